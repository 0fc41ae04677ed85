// src/protocol/mod.rs
// Wire contract with the RAG chat backend: one JSON object per WebSocket text frame

pub mod decoder;

use serde::{Deserialize, Serialize};

use crate::citations::Citation;

pub use decoder::{decode, decode_chunk};

/// Sentinel separating the base64 retrieval context from the response text.
pub const LLM_RESPONSE_SENTINEL: &str = "__LLM_RESPONSE__";

/// Author of a history entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of the conversation window sent with every chat frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Credentials sent right after every successful open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPayload {
    pub visitor_id: String,
    pub kb_id: Option<String>,
}

/// Frames the client sends
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Auth {
        visitor_id: String,
        kb_id: Option<String>,
    },
    Chat {
        kb_id: String,
        messages: Vec<HistoryEntry>,
    },
    Pong,
}

impl From<&AuthPayload> for OutboundFrame {
    fn from(auth: &AuthPayload) -> Self {
        OutboundFrame::Auth {
            visitor_id: auth.visitor_id.clone(),
            kb_id: auth.kb_id.clone(),
        }
    }
}

/// Text and retrieval context extracted from one `response_chunk`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedChunk {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Frames the server sends, after decoding
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// System notice shown as a system message
    Info { message: String },
    /// An assistant turn begins
    Start,
    /// One streamed fragment
    Chunk(DecodedChunk),
    /// The assistant turn is complete
    End,
    /// Liveness probe, answered by the connection and never forwarded
    Ping,
}
