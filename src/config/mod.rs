// src/config/mod.rs
// Widget configuration: ~/.rag-chat/config.toml, then RAG_CHAT_* env overrides
//
// Resolution order used by the binary: CLI > env > file > defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::citations::DEFAULT_EXCERPT_CHARS;
use crate::error::{Result, WidgetError};

/// Conversation entries sent with each chat frame
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WidgetConfig {
    // ── Backend
    pub ws_url: String,
    pub kb_id: Option<String>,

    // ── Presentation
    pub bot_name: String,
    pub greeting: String,

    // ── Session
    pub history_window: usize,

    pub reconnect: ReconnectConfig,
    pub citations: CitationConfig,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000/ws/chat".to_string(),
            kb_id: None,
            bot_name: "Chatbot".to_string(),
            greeting: "Hello! How can I help you today?".to_string(),
            history_window: DEFAULT_HISTORY_WINDOW,
            reconnect: ReconnectConfig::default(),
            citations: CitationConfig::default(),
        }
    }
}

/// Fixed-delay reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 3000,
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CitationConfig {
    /// Drop repeated citation ids within a turn (first one wins)
    pub dedup: bool,
    pub excerpt_chars: usize,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            dedup: false,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }
}

impl WidgetConfig {
    /// Load ~/.rag-chat/config.toml, or defaults if it does not exist
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| WidgetError::Io {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| WidgetError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply RAG_CHAT_* overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = env_value::<String>(&lookup, "RAG_CHAT_WS_URL") {
            self.ws_url = url;
        }
        if let Some(kb_id) = env_value::<String>(&lookup, "RAG_CHAT_KB_ID") {
            self.kb_id = Some(kb_id);
        }
        if let Some(name) = env_value::<String>(&lookup, "RAG_CHAT_BOT_NAME") {
            self.bot_name = name;
        }
        if let Some(window) = env_value(&lookup, "RAG_CHAT_HISTORY_WINDOW") {
            self.history_window = window;
        }
        if let Some(attempts) = env_value(&lookup, "RAG_CHAT_RECONNECT_MAX_ATTEMPTS") {
            self.reconnect.max_attempts = attempts;
        }
        if let Some(delay) = env_value(&lookup, "RAG_CHAT_RECONNECT_DELAY_MS") {
            self.reconnect.delay_ms = delay;
        }
    }

    /// Parse the endpoint; only ws:// and wss:// are accepted
    pub fn endpoint(&self) -> Result<Url> {
        let url = Url::parse(&self.ws_url)
            .map_err(|e| WidgetError::InvalidEndpoint(self.ws_url.clone(), e.to_string()))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(WidgetError::InvalidEndpoint(
                self.ws_url.clone(),
                format!("unsupported scheme '{}'", other),
            )),
        }
    }
}

// Values may carry trailing comments and whitespace, as in .env files
fn env_value<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    let clean = raw.split('#').next().unwrap_or("").trim();
    if clean.is_empty() {
        return None;
    }
    match clean.parse::<T>() {
        Ok(parsed) => {
            debug!("Config: {} = {} (from environment)", key, clean);
            Some(parsed)
        }
        Err(_) => {
            warn!("Config: {} = '{}' (parse failed, ignoring)", key, raw);
            None
        }
    }
}

/// Directory holding config.toml and the visitor id
pub fn config_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".rag-chat")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}
