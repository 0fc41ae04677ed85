// src/protocol/decoder.rs
// Frame Decoder: JSON frames in, InboundFrame out
//
// Chunk content grammar:
//   token-delta  := INDEX ':' '"' json-escaped '"'
//   dual-payload := blob "__LLM_RESPONSE__" text
//   blob         := [noise ':'] ['"'] base64(json { context: [{page_content, metadata}] })
// Anything else is opaque text. No step here is allowed to fail the turn.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{DecodedChunk, InboundFrame, LLM_RESPONSE_SENTINEL};
use crate::citations::{Citation, CitationMetadata};

static RE_TOKEN_DELTA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)^\s*\d+:\s*"(.*)"\s*$"#).expect("valid regex"));

/// Backends emit both padded and unpadded context blobs.
const CONTEXT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Deserialize)]
struct ContextEnvelope {
    #[serde(default)]
    context: Vec<ContextEntry>,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    #[serde(default)]
    page_content: String,
    #[serde(default)]
    metadata: CitationMetadata,
}

/// Decode one raw WebSocket text frame.
///
/// Returns `None` for non-JSON payloads, frames without a `type` and unknown
/// frame types; those are protocol noise and are dropped.
pub fn decode(raw: &str) -> Option<InboundFrame> {
    let json: Value = match serde_json::from_str(raw) {
        Ok(json) => json,
        Err(_) => {
            warn!("Received non-JSON frame ({} bytes)", raw.len());
            return None;
        }
    };

    let Some(frame_type) = json.get("type").and_then(|v| v.as_str()) else {
        debug!("Ignoring frame without a type field");
        return None;
    };

    match frame_type {
        "info" => {
            let message = json
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            Some(InboundFrame::Info { message })
        }
        "start" => Some(InboundFrame::Start),
        "response_chunk" => {
            let content = json.get("content").and_then(|v| v.as_str()).unwrap_or("");
            Some(InboundFrame::Chunk(decode_chunk(content)))
        }
        "end" => Some(InboundFrame::End),
        "ping" => Some(InboundFrame::Ping),
        other => {
            debug!("Unknown frame type: {}", other);
            None
        }
    }
}

/// Decode the `content` of a `response_chunk`.
pub fn decode_chunk(content: &str) -> DecodedChunk {
    if let Some((blob, text)) = content.split_once(LLM_RESPONSE_SENTINEL) {
        return DecodedChunk {
            text: text.trim().to_string(),
            citations: decode_context(blob),
        };
    }

    DecodedChunk {
        text: decode_token_delta(content),
        citations: Vec::new(),
    }
}

/// Unwrap `N:"fragment"` into the JSON-unescaped fragment, or return the
/// chunk untouched.
fn decode_token_delta(chunk: &str) -> String {
    let Some(caps) = RE_TOKEN_DELTA.captures(chunk) else {
        return chunk.to_string();
    };

    let literal = format!("\"{}\"", &caps[1]);
    match serde_json::from_str::<String>(&literal) {
        Ok(fragment) => fragment,
        Err(e) => {
            debug!("Token delta is not a valid JSON string ({}), using raw chunk", e);
            chunk.to_string()
        }
    }
}

/// Map the retrieval context blob to citations numbered 1..n.
fn decode_context(blob: &str) -> Vec<Citation> {
    let cleaned = clean_base64(blob);
    if cleaned.is_empty() {
        return Vec::new();
    }

    let bytes = match CONTEXT_ENGINE.decode(cleaned.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to decode context blob: {}", e);
            return Vec::new();
        }
    };

    let envelope: ContextEnvelope = match serde_json::from_slice(&bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Failed to parse context JSON: {}", e);
            return Vec::new();
        }
    };

    envelope
        .context
        .into_iter()
        .enumerate()
        .map(|(index, entry)| Citation {
            id: index + 1,
            text: entry.page_content,
            metadata: entry.metadata,
        })
        .collect()
}

/// Drop any `field:` prefix (base64 never contains ':') and every character
/// outside the base64 alphabet.
pub(crate) fn clean_base64(blob: &str) -> String {
    let payload = blob.rsplit(':').next().unwrap_or(blob);
    payload
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect()
}
