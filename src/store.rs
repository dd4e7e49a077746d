//! Message store for the currently selected conversation.
//!
//! DESIGN
//! ======
//! Messages keep arrival order; nothing is re-sorted by timestamp. Every
//! source (socket push, REST refetch, optimistic REST send) funnels through
//! `upsert`, which updates an entry in place when the id is already known
//! and appends otherwise. That makes the three sources idempotent with
//! respect to each other.
//!
//! Selecting a conversation clears the store and bumps `generation`. Any
//! response tagged with an older generation is dropped on arrival, which is
//! how stale fetches for a previous conversation are discarded without
//! aborting their I/O.
//!
//! TRADE-OFFS
//! ==========
//! When a refetch and a push disagree about the same message, whichever
//! lands last wins. Snapshots prune entries the server no longer returns,
//! but only entries that were already present when the fetch was issued;
//! a push that raced the fetch is kept.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::HashSet;

use envelopes::{ChatMessage, MessagePatch};

use crate::conversation::ConversationKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Identity of an in-flight refetch, captured before the request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotTicket {
    pub key: ConversationKey,
    generation: u64,
    watermark: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    message: ChatMessage,
    inserted_at: u64,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    selected: Option<ConversationKey>,
    generation: u64,
    seq: u64,
    entries: Vec<Entry>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn selected(&self) -> Option<&ConversationKey> {
        self.selected.as_ref()
    }

    #[must_use]
    pub fn is_selected(&self, key: &ConversationKey) -> bool {
        self.selected.as_ref() == Some(key)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Switch to `key`, clearing the previous conversation in the same step.
    pub fn select(&mut self, key: ConversationKey) -> u64 {
        self.entries.clear();
        self.selected = Some(key);
        self.generation += 1;
        self.generation
    }

    pub fn deselect(&mut self) {
        self.entries.clear();
        self.selected = None;
        self.generation += 1;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.entries
            .iter()
            .find(|entry| entry.message.id == id)
            .map(|entry| &entry.message)
    }

    /// Messages in display order.
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().map(|entry| &entry.message)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.message.id.as_str())
            .collect()
    }

    pub fn upsert(&mut self, message: ChatMessage) -> Upsert {
        if let Some(entry) = self.entry_mut(&message.id) {
            absorb(&mut entry.message, message);
            return Upsert::Updated;
        }
        self.seq += 1;
        self.entries.push(Entry { message, inserted_at: self.seq });
        Upsert::Inserted
    }

    /// Apply a partial update to a known entry. Returns `false` if the id is unknown.
    pub fn apply_patch(&mut self, patch: &MessagePatch) -> bool {
        let Some(entry) = self.entry_mut(&patch.id) else {
            return false;
        };
        let message = &mut entry.message;
        if let Some(content) = &patch.content {
            message.content.clone_from(content);
        }
        if let Some(edited) = patch.edited {
            message.edited = edited;
        }
        if let Some(read) = patch.read {
            message.read = read;
        }
        if patch.attachment_url.is_some() {
            message.attachment_url.clone_from(&patch.attachment_url);
        }
        true
    }

    /// Local edit ahead of server confirmation.
    pub fn mark_edited(&mut self, id: &str, content: &str) -> bool {
        let Some(entry) = self.entry_mut(id) else {
            return false;
        };
        content.clone_into(&mut entry.message.content);
        entry.message.edited = true;
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.message.id != id);
        self.entries.len() != before
    }

    /// Flip `read` on matching entries; returns how many changed.
    pub fn mark_read_where(&mut self, mut predicate: impl FnMut(&ChatMessage) -> bool) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            if !entry.message.read && predicate(&entry.message) {
                entry.message.read = true;
                changed += 1;
            }
        }
        changed
    }

    /// Capture the identity of a refetch about to be issued.
    #[must_use]
    pub fn snapshot_ticket(&self) -> Option<SnapshotTicket> {
        let key = self.selected.clone()?;
        Some(SnapshotTicket { key, generation: self.generation, watermark: self.seq })
    }

    #[must_use]
    pub fn is_current(&self, ticket: &SnapshotTicket) -> bool {
        ticket.generation == self.generation && self.is_selected(&ticket.key)
    }

    /// Merge a full refetch. Returns `false` if the ticket is stale and the
    /// result was dropped.
    pub fn apply_snapshot(&mut self, ticket: &SnapshotTicket, messages: Vec<ChatMessage>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }

        let returned: HashSet<String> = messages.iter().map(|m| m.id.clone()).collect();
        self.entries
            .retain(|entry| entry.inserted_at > ticket.watermark || returned.contains(&entry.message.id));

        for message in messages {
            self.upsert(message);
        }
        true
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|entry| entry.message.id == id)
    }
}

/// Fold a fresh copy of a message into the stored one.
///
/// Content and edit state follow the incoming copy; `read` only ever moves
/// to true; identity fields fill gaps but are never overwritten.
fn absorb(existing: &mut ChatMessage, incoming: ChatMessage) {
    existing.content = incoming.content;
    existing.edited = incoming.edited;
    existing.read |= incoming.read;
    if incoming.attachment_url.is_some() {
        existing.attachment_url = incoming.attachment_url;
    }
    if existing.sender_id.is_none() {
        existing.sender_id = incoming.sender_id;
    }
    if existing.target_id.is_none() {
        existing.target_id = incoming.target_id;
    }
    if existing.chat_id.is_none() {
        existing.chat_id = incoming.chat_id;
    }
    if existing.timestamp.is_none() {
        existing.timestamp = incoming.timestamp;
    }
    if existing.sender_role.is_none() {
        existing.sender_role = incoming.sender_role;
    }
}
