//! Bounded exponential backoff for reconnect attempts.

use std::time::Duration;

use tokio::time::Instant;

/// Reconnect bookkeeping: attempt `n` (from zero) becomes eligible `2^n`
/// seconds after it is scheduled, and no attempt is scheduled past the
/// ceiling.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    attempt: u32,
    max_attempts: u32,
    next_eligible: Option<Instant>,
}

impl ReconnectBackoff {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            next_eligible: None,
        }
    }

    /// Failed attempts so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn next_eligible(&self) -> Option<Instant> {
        self.next_eligible
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Delay before the next attempt.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs(2u64.saturating_pow(self.attempt))
    }

    /// Reserve the next attempt, returning when it may start, or `None`
    /// once the ceiling is reached.
    pub fn schedule_next(&mut self, now: Instant) -> Option<Instant> {
        if self.is_exhausted() {
            self.next_eligible = None;
            return None;
        }
        let at = now + self.delay();
        self.next_eligible = Some(at);
        Some(at)
    }

    pub fn record_failure(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_eligible = None;
    }
}
