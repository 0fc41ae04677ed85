// src/connection/reconnect.rs
// Attempt bookkeeping for the fixed-delay reconnect policy

use std::time::Duration;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    attempt: u32,
    max_attempts: u32,
    delay: Duration,
}

impl ReconnectTracker {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            delay: config.delay(),
        }
    }

    /// A connection opened: the budget starts over
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Count one more attempt. `None` once the budget is spent.
    pub fn next_attempt(&mut self) -> Option<u32> {
        self.attempt += 1;
        (self.attempt <= self.max_attempts).then_some(self.attempt)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
