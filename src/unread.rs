//! Unread counters for the chat badge.
//!
//! Three counters are kept independently: direct messages, support
//! messages, and a per-sender breakdown used for roster row badges. Only
//! the first two feed the global badge; the per-sender map is never summed
//! into it. Live events nudge the counters up between polls and each poll
//! overwrites them with the server's authoritative value, which is also
//! what keeps them from drifting below zero.

#[cfg(test)]
#[path = "unread_test.rs"]
mod unread_test;

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadTracker {
    direct: u32,
    support: u32,
    by_sender: HashMap<String, u32>,
}

impl UnreadTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn direct(&self) -> u32 {
        self.direct
    }

    #[must_use]
    pub fn support(&self) -> u32 {
        self.support
    }

    #[must_use]
    pub fn for_sender(&self, sender_id: &str) -> u32 {
        self.by_sender.get(sender_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn by_sender(&self) -> &HashMap<String, u32> {
        &self.by_sender
    }

    /// Global badge: direct plus support, recomputed on every read.
    #[must_use]
    pub fn badge_total(&self) -> u32 {
        self.direct.saturating_add(self.support)
    }

    /// A direct message arrived for a conversation that is not open.
    pub fn record_direct(&mut self, sender_id: &str) {
        self.direct = self.direct.saturating_add(1);
        let count = self.by_sender.entry(sender_id.to_owned()).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// A support message arrived for a chat that is not open.
    pub fn record_support(&mut self) {
        self.support = self.support.saturating_add(1);
    }

    /// The conversation with `sender_id` was read; drop its row badge and
    /// deduct it from the direct total until the next poll.
    pub fn clear_sender(&mut self, sender_id: &str) {
        if let Some(count) = self.by_sender.remove(sender_id) {
            self.direct = self.direct.saturating_sub(count);
        }
    }

    pub fn set_direct(&mut self, count: u32) {
        self.direct = count;
    }

    pub fn set_support(&mut self, count: u32) {
        self.support = count;
    }

    pub fn set_by_sender(&mut self, counts: HashMap<String, u32>) {
        self.by_sender = counts;
        self.by_sender.retain(|_, count| *count > 0);
    }
}
