// src/session/turn.rs
// One request/response exchange as seen from the client

use crate::citations::Citation;
use crate::protocol::DecodedChunk;
use crate::stream::Reassembler;

#[derive(Debug, Clone)]
pub struct Turn {
    sequence: u64,
    buffer: Reassembler,
    citations: Vec<Citation>,
    finished: bool,
}

impl Turn {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            buffer: Reassembler::new(),
            citations: Vec::new(),
            finished: false,
        }
    }

    /// Fold one chunk in. Returns the normalized text when it changed.
    pub fn apply(&mut self, chunk: DecodedChunk) -> Option<String> {
        self.citations.extend(chunk.citations);

        let before = self.buffer.text().to_string();
        let after = self.buffer.append(&chunk.text);
        (after != before).then(|| after.to_string())
    }

    pub(crate) fn finish(&mut self) {
        self.finished = true;
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn text(&self) -> &str {
        self.buffer.text()
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
