// src/session/history.rs
// Bounded conversation window sent with every chat frame

use std::collections::VecDeque;

use crate::protocol::{HistoryEntry, Role};

#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    window: usize,
}

impl History {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            entries: VecDeque::with_capacity(window + 1),
            window,
        }
    }

    /// Append, evicting the oldest entries beyond the window
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.entries.push_back(HistoryEntry::new(role, content));
        while self.entries.len() > self.window {
            self.entries.pop_front();
        }
    }

    /// Undo the most recent push
    pub(crate) fn pop_latest(&mut self) -> Option<HistoryEntry> {
        self.entries.pop_back()
    }

    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}
