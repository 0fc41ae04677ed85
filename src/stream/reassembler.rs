// src/stream/reassembler.rs
// Text Reassembler: accumulates deltas for the in-flight turn

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::normalize::normalize;

static RE_METADATA_FRAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*\w+:\s*(\{.*\})\s*$").expect("valid regex"));

/// True for stream-protocol metadata such as `d:{"finishReason":"stop"}`:
/// a prefixed JSON object that carries no `text` field.
pub fn is_metadata_noise(delta: &str) -> bool {
    let Some(caps) = RE_METADATA_FRAME.captures(delta) else {
        return false;
    };
    match serde_json::from_str::<serde_json::Value>(&caps[1]) {
        Ok(value) => value.is_object() && value.get("text").and_then(|t| t.as_str()).is_none(),
        Err(_) => false,
    }
}

/// Raw buffer plus its normalized rendering.
#[derive(Debug, Default, Clone)]
pub struct Reassembler {
    raw: String,
    normalized: String,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return the full normalized buffer.
    ///
    /// Deltas are joined with a single space; normalization folds the
    /// doubled spaces and split tokens that produces.
    pub fn append(&mut self, delta: &str) -> &str {
        if is_metadata_noise(delta) {
            debug!("Skipping metadata chunk");
            return &self.normalized;
        }

        if !self.raw.is_empty() {
            self.raw.push(' ');
        }
        self.raw.push_str(delta);

        // Streams sometimes open with the closing quote of a wrapper
        if self.raw.starts_with('"') {
            self.raw = self.raw.trim_start_matches('"').trim_start().to_string();
        }

        self.normalized = normalize(&self.raw);
        &self.normalized
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn text(&self) -> &str {
        &self.normalized
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}
