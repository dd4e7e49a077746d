//! Conversation roster ordered by recent activity.

#[cfg(test)]
#[path = "roster_test.rs"]
mod roster_test;

use std::collections::{HashMap, HashSet};

use envelopes::{Participant, ParticipantRole, SupportChat};

use crate::conversation::ConversationKey;

#[derive(Debug, Default)]
pub struct ConversationList {
    entries: Vec<Participant>,
    last_activity: HashMap<ConversationKey, i64>,
    search: String,
}

impl ConversationList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> &[Participant] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, key: &ConversationKey) -> Option<&Participant> {
        self.entries
            .iter()
            .find(|entry| &ConversationKey::for_participant(entry) == key)
    }

    #[must_use]
    pub fn search(&self) -> &str {
        &self.search
    }

    /// Returns `true` when the term actually changed and a refetch is due.
    pub fn set_search(&mut self, term: &str) -> bool {
        let term = term.trim();
        if self.search == term {
            return false;
        }
        term.clone_into(&mut self.search);
        true
    }

    #[must_use]
    pub fn last_activity(&self, key: &ConversationKey) -> Option<i64> {
        self.last_activity.get(key).copied()
    }

    /// Install a fetched roster. Results fetched for a search term that is
    /// no longer current are dropped and `false` is returned.
    pub fn apply_fetch(&mut self, fetched_for: &str, users: Vec<Participant>, support_chats: &[SupportChat]) -> bool {
        if fetched_for.trim() != self.search {
            return false;
        }
        self.replace(users, support_chats);
        true
    }

    /// Merge regular users with one synthetic entry per guest, then order by activity.
    pub fn replace(&mut self, users: Vec<Participant>, support_chats: &[SupportChat]) {
        let mut merged = users;
        let mut seen_guests = HashSet::new();
        for chat in support_chats {
            if !seen_guests.insert(chat.guest_id.as_str()) {
                continue;
            }
            let entry = chat.to_participant();
            if matches_search(&entry, &self.search) {
                merged.push(entry);
            }
        }
        self.entries = merged;
        self.sort();
    }

    /// Record activity with `key` at `at_ms` and reorder.
    pub fn touch(&mut self, key: &ConversationKey, at_ms: i64) {
        let slot = self.last_activity.entry(key.clone()).or_insert(at_ms);
        *slot = (*slot).max(at_ms);
        self.sort();
    }

    /// Presence change; updates the flag in place without reordering.
    pub fn set_online(&mut self, user_id: &str, online: bool) -> bool {
        let mut changed = false;
        for entry in &mut self.entries {
            if entry.role != ParticipantRole::Support && entry.id == user_id {
                entry.is_online = online;
                changed = true;
            }
        }
        changed
    }

    pub fn set_blocked(&mut self, user_id: &str, blocked: bool) -> bool {
        let mut changed = false;
        for entry in &mut self.entries {
            if entry.role != ParticipantRole::Support && entry.id == user_id {
                entry.is_blocked_in_chat = blocked;
                changed = true;
            }
        }
        changed
    }

    // Stable: entries without activity keep their relative order at the end.
    fn sort(&mut self) {
        let activity = &self.last_activity;
        self.entries.sort_by(|a, b| {
            let a = activity.get(&ConversationKey::for_participant(a));
            let b = activity.get(&ConversationKey::for_participant(b));
            b.cmp(&a)
        });
    }
}

fn matches_search(entry: &Participant, search: &str) -> bool {
    if search.is_empty() {
        return true;
    }
    let needle = search.to_lowercase();
    entry.name.to_lowercase().contains(&needle)
        || entry
            .email
            .as_deref()
            .is_some_and(|email| email.to_lowercase().contains(&needle))
}
