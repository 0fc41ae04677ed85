// src/terminal.rs
// ChatSurface that streams to a terminal with ANSI colors

use std::io::Write;

use tracing::debug;

use crate::citations::CitationRef;
use crate::connection::ConnectionEvent;
use crate::surface::{ChatSurface, RenderedMessage};

/// ANSI escape codes
pub mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";

    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const GRAY: &str = "\x1b[90m";
}

use ansi::*;

pub fn error(msg: &str) -> String {
    format!("{}{}{}", RED, msg, RESET)
}

pub fn status(msg: &str) -> String {
    format!("{}{}{}", GRAY, msg, RESET)
}

/// Footnote line for one attached citation: `[1] Title (source, p. 2)`
pub fn footnote(citation: &CitationRef) -> String {
    format!(
        "{}[{}]{} {} {}({}, p. {}){}",
        BOLD, citation.id, RESET, citation.title, DIM, citation.source, citation.page, RESET
    )
}

struct StreamingTurn {
    turn: u64,
    printed: String,
    latest: String,
    done: bool,
}

/// Prints the assistant text as it streams. Normalization can rewrite
/// earlier text; when it does, the final text is printed again in full.
pub struct TerminalSurface {
    out: Box<dyn Write + Send>,
    bot_name: String,
    color: bool,
    current: Option<StreamingTurn>,
}

impl TerminalSurface {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self::with_writer(bot_name, Box::new(std::io::stdout()), true)
    }

    pub fn with_writer(bot_name: impl Into<String>, out: Box<dyn Write + Send>, color: bool) -> Self {
        Self {
            out,
            bot_name: bot_name.into(),
            color,
            current: None,
        }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("{}{}{}", code, text, RESET)
        } else {
            text.to_string()
        }
    }

    fn emit(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            debug!("Terminal write failed: {}", e);
        }
    }

    /// Close out the streamed line for the active turn, once
    fn finish_text(&mut self) {
        let Some(current) = self.current.as_mut().filter(|c| !c.done) else {
            return;
        };
        current.done = true;

        let text = if current.printed == current.latest {
            "\n".to_string()
        } else {
            format!("\n{}\n", current.latest)
        };
        self.emit(&text);
    }
}

impl ChatSurface for TerminalSurface {
    fn system_message(&mut self, text: &str) {
        let line = format!("{}\n", self.paint(GRAY, text));
        self.emit(&line);
    }

    fn user_message(&mut self, _text: &str) {
        // Already echoed by the terminal
    }

    fn typing_started(&mut self, turn: u64) {
        let label = format!("{}: ", self.bot_name);
        let label = self.paint(&format!("{}{}", BOLD, GREEN), &label);
        self.emit(&label);
        self.current = Some(StreamingTurn {
            turn,
            printed: String::new(),
            latest: String::new(),
            done: false,
        });
    }

    fn render_assistant(&mut self, turn: u64, message: &RenderedMessage) {
        let Some(current) = self.current.as_mut().filter(|c| c.turn == turn && !c.done) else {
            return;
        };
        current.latest = message.markdown.clone();

        let suffix = message
            .markdown
            .strip_prefix(current.printed.as_str())
            .map(str::to_string);
        if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
            current.printed.push_str(&suffix);
            self.emit(&suffix);
        }
    }

    fn attach_citations(&mut self, turn: u64, _html: &str, citations: &[CitationRef]) {
        if self.current.as_ref().is_some_and(|c| c.turn == turn) {
            self.finish_text();
        }
        for citation in citations {
            let line = if self.color {
                footnote(citation)
            } else {
                format!("[{}] {} ({}, p. {})", citation.id, citation.title, citation.source, citation.page)
            };
            self.emit(&format!("  {}\n", line));
        }
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        if enabled {
            self.finish_text();
        }
    }

    fn connection_changed(&mut self, event: &ConnectionEvent) {
        let line = match event {
            ConnectionEvent::Open => self.paint(GRAY, "Connected."),
            ConnectionEvent::Reconnecting { attempt, delay } => self.paint(
                YELLOW,
                &format!(
                    "Connection lost. Reconnecting in {}s (attempt {})...",
                    delay.as_secs_f32(),
                    attempt
                ),
            ),
            ConnectionEvent::ReconnectExhausted { attempts } => self.paint(
                RED,
                &format!("Could not reconnect after {} attempts.", attempts),
            ),
            ConnectionEvent::Closed { .. } => self.paint(GRAY, "Connection closed."),
            ConnectionEvent::Connecting { .. } | ConnectionEvent::Frame(_) => return,
        };
        self.finish_text();
        self.emit(&format!("{}\n", line));
    }
}
