// src/error.rs
// Library error types for the chat widget core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WidgetError>;

/// Errors surfaced by widget setup and collaborators.
///
/// Nothing on the inbound frame path produces one of these: decode problems
/// degrade to raw text or empty citations instead of failing the turn.
#[derive(Debug, Error)]
pub enum WidgetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid endpoint '{0}': {1}")]
    InvalidEndpoint(String, String),

    #[error("knowledge base id is empty")]
    EmptyKnowledgeBase,

    #[error("knowledge base is locked to '{0}' after the first turn")]
    KnowledgeBaseLocked(String),
}

/// Why a user send was rejected. Rejections never touch the wire or history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendRejected {
    #[error("message is empty")]
    EmptyMessage,

    #[error("no knowledge base selected")]
    NoKnowledgeBase,

    #[error("not connected")]
    NotConnected,

    #[error("a response is still streaming")]
    TurnInFlight,
}
