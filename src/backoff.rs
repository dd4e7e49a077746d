//! Reconnect backoff schedule.
//!
//! `delay = base * 2^attempt`, with `attempt` starting at 0 and capped at
//! `max_exponent`. With the defaults (1s, 6) the sequence is
//! 1s, 2s, 4s, ... 64s, 64s.

#[cfg(test)]
#[path = "backoff_test.rs"]
mod backoff_test;

use std::time::Duration;

use crate::config::{DEFAULT_RECONNECT_BASE_MS, DEFAULT_RECONNECT_MAX_EXPONENT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_exponent: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS), max_exponent: DEFAULT_RECONNECT_MAX_EXPONENT }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Consecutive failures since the last successful open, capped.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next reconnect; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = (self.attempt + 1).min(self.policy.max_exponent);
        delay
    }

    /// Called on a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.policy.max_exponent).min(31);
        self.policy.base.saturating_mul(1_u32 << exponent)
    }
}
