// src/main.rs
// Terminal chat client: mounts the widget against a backend and reads stdin

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use rag_chat::terminal::{self, TerminalSurface};
use rag_chat::visitor::{FileVisitorStore, VisitorStore};
use rag_chat::{ChatWidget, CmarkRenderer, WidgetConfig, config};

#[derive(Parser)]
#[command(name = "rag-chat")]
#[command(about = "Chat with a knowledge base over WebSocket")]
struct Args {
    /// Backend WebSocket URL
    #[arg(long, env = "RAG_CHAT_WS_URL")]
    ws_url: Option<String>,

    /// Knowledge base to query
    #[arg(long, env = "RAG_CHAT_KB_ID")]
    kb_id: Option<String>,

    /// Name shown before assistant replies
    #[arg(long, env = "RAG_CHAT_BOT_NAME")]
    bot_name: Option<String>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay between reconnect attempts, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,
}

enum Input {
    Message(String),
    SelectKnowledgeBase(String),
    Quit,
    Nothing,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Nothing;
    }
    match line.split_once(char::is_whitespace) {
        Some(("/kb", id)) => Input::SelectKnowledgeBase(id.trim().to_string()),
        None if line == "/kb" => Input::SelectKnowledgeBase(String::new()),
        _ if line == "/quit" || line == "/exit" => Input::Quit,
        _ => Input::Message(line.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from ~/.rag-chat/.env or current dir)
    let env_path = Some(config::config_dir().join(".env")).filter(|p| p.exists());
    if let Some(path) = env_path {
        let _ = dotenvy::from_path(&path);
    } else {
        let _ = dotenvy::dotenv();
    }

    // Logs go to stderr so they don't interleave with the conversation
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // CLI args > env vars > config file > defaults
    let mut config = WidgetConfig::load().context("Failed to load config")?;
    config.apply_env();
    if let Some(url) = args.ws_url {
        config.ws_url = url;
    }
    if let Some(kb_id) = args.kb_id {
        config.kb_id = Some(kb_id);
    }
    if let Some(name) = args.bot_name {
        config.bot_name = name;
    }
    if let Some(attempts) = args.max_attempts {
        config.reconnect.max_attempts = attempts;
    }
    if let Some(delay) = args.delay_ms {
        config.reconnect.delay_ms = delay;
    }

    let visitor_id = FileVisitorStore::default_location()
        .get_or_create_visitor_id()
        .context("Failed to load visitor id")?;
    info!("Visitor id: {}", visitor_id);

    let surface = TerminalSurface::new(config.bot_name.clone());
    let mut widget = ChatWidget::mount(
        &config,
        visitor_id,
        Box::new(surface),
        Arc::new(CmarkRenderer),
    )?;

    if config.kb_id.is_none() {
        println!("{}", terminal::status("No knowledge base selected. Use /kb <id>."));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let input = match line.context("Failed to read stdin")? {
                    Some(line) => parse_input(&line),
                    None => {
                        stdin_open = false;
                        Input::Quit
                    }
                };

                match input {
                    Input::Message(text) => {
                        if let Err(e) = widget.send(&text) {
                            println!("{}", terminal::error(&format!("Not sent: {}", e)));
                        }
                    }
                    Input::SelectKnowledgeBase(id) if id.is_empty() => {
                        println!("{}", terminal::error("Usage: /kb <id>"));
                    }
                    Input::SelectKnowledgeBase(id) => match widget.select_knowledge_base(id.as_str()) {
                        Ok(()) => println!("{}", terminal::status(&format!("Knowledge base: {}", id))),
                        Err(e) => println!("{}", terminal::error(&e.to_string())),
                    },
                    Input::Quit => widget.close(),
                    Input::Nothing => {}
                }
            }
            alive = widget.pump() => {
                if !alive {
                    break;
                }
            }
        }
    }

    Ok(())
}
