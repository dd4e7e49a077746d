//! Client-side chat state and the reducer that applies server events to it.
//!
//! DESIGN
//! ======
//! Every decoded socket event goes through [`ChatState::apply`], one match
//! arm per event kind. The reducer is pure: anything that needs I/O (marking
//! a thread read, re-polling counts) comes back as an [`Effect`] for the
//! caller to run outside the state lock.
//!
//! Events for the open conversation mutate the message store. Events for
//! any other conversation leave the store alone and instead bump the unread
//! counters and the roster's activity ordering.

#[cfg(test)]
#[path = "reducer_test.rs"]
mod reducer_test;

use std::collections::HashMap;

use envelopes::{ChatMessage, MessagePatch, ReadReceipt, ServerEvent};
use tracing::debug;

use crate::conversation::ConversationKey;
use crate::roster::ConversationList;
use crate::store::MessageStore;
use crate::unread::UnreadTracker;

/// Follow-up work requested by the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Support read state changed server-side; poll the support count now.
    RefreshSupportUnread,
    /// A message from the counterpart landed in the open conversation.
    MarkRead(ConversationKey),
}

#[derive(Debug)]
pub struct ChatState {
    me: String,
    pub store: MessageStore,
    pub unread: UnreadTracker,
    pub roster: ConversationList,
    editing: Option<String>,
    drafts: HashMap<ConversationKey, String>,
    quiet_ticks: u32,
}

impl ChatState {
    #[must_use]
    pub fn new(me: impl Into<String>) -> Self {
        Self {
            me: me.into(),
            store: MessageStore::new(),
            unread: UnreadTracker::new(),
            roster: ConversationList::new(),
            editing: None,
            drafts: HashMap::new(),
            quiet_ticks: 0,
        }
    }

    #[must_use]
    pub fn me(&self) -> &str {
        &self.me
    }

    /// Open `key`: clears the store, leaves edit mode and drops the row badge.
    pub fn select(&mut self, key: ConversationKey) -> u64 {
        self.editing = None;
        if let ConversationKey::Direct(counterpart) = &key {
            self.unread.clear_sender(counterpart);
        }
        self.store.select(key)
    }

    pub fn deselect(&mut self) {
        self.editing = None;
        self.store.deselect();
    }

    /// Enter edit mode for one of our own messages in the open conversation.
    pub fn begin_edit(&mut self, id: &str) -> bool {
        let own = self
            .store
            .get(id)
            .is_some_and(|message| message.sender_id.as_deref() == Some(self.me.as_str()));
        if own {
            self.editing = Some(id.to_owned());
        }
        own
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    #[must_use]
    pub fn editing(&self) -> Option<&str> {
        self.editing.as_deref()
    }

    pub fn set_draft(&mut self, key: ConversationKey, text: &str) {
        if text.is_empty() {
            self.drafts.remove(&key);
        } else {
            self.drafts.insert(key, text.to_owned());
        }
    }

    #[must_use]
    pub fn draft(&self, key: &ConversationKey) -> Option<&str> {
        self.drafts.get(key).map(String::as_str)
    }

    pub fn clear_drafts(&mut self) {
        self.drafts.clear();
    }

    /// Count a message-poll tick; returns how many ticks passed without socket traffic.
    pub fn tick_quiet(&mut self) -> u32 {
        self.quiet_ticks = self.quiet_ticks.saturating_add(1);
        self.quiet_ticks
    }

    /// Apply one server event. `now_ms` stamps roster activity.
    pub fn apply(&mut self, event: ServerEvent, now_ms: i64) -> Vec<Effect> {
        self.quiet_ticks = 0;
        let mut effects = Vec::new();

        match event {
            ServerEvent::Message(message) => self.on_direct_message(message, now_ms, &mut effects),
            ServerEvent::SupportNewMessage(message) => self.on_support_message(message, now_ms, &mut effects),
            ServerEvent::MessageUpdate(patch) => self.on_update(patch, false),
            ServerEvent::SupportMessageUpdate(patch) => self.on_update(patch, true),
            ServerEvent::MessageDelete(deleted) => {
                let support = deleted.chat_id.is_some();
                if self.targets_open(support, deleted.chat_id.as_deref(), [None, None]) {
                    self.store.remove(&deleted.id);
                    if self.editing.as_deref() == Some(deleted.id.as_str()) {
                        self.editing = None;
                    }
                }
            }
            ServerEvent::Read(receipt) => self.on_read(&receipt),
            ServerEvent::SupportMessagesRead(_) => effects.push(Effect::RefreshSupportUnread),
            ServerEvent::Presence(presence) => {
                self.roster.set_online(&presence.user_id, presence.online());
            }
            ServerEvent::Unknown(kind) => debug!(%kind, "ignoring unhandled chat event"),
        }

        effects
    }

    /// Record a message we sent ourselves (REST path) so the roster reorders.
    pub fn note_sent(&mut self, key: &ConversationKey, now_ms: i64) {
        self.roster.touch(key, now_ms);
        self.drafts.remove(key);
    }

    fn is_mine(&self, message: &ChatMessage) -> bool {
        message.sender_id.as_deref() == Some(self.me.as_str())
    }

    fn on_direct_message(&mut self, message: ChatMessage, now_ms: i64, effects: &mut Vec<Effect>) {
        let mine = self.is_mine(&message);
        let counterpart = if mine { message.target_id.clone() } else { message.sender_id.clone() };
        let Some(counterpart) = counterpart else {
            debug!(id = %message.id, "direct message without counterpart");
            return;
        };
        let key = ConversationKey::Direct(counterpart);
        let open = self
            .store
            .selected()
            .is_some_and(|selected| selected.contains_direct(&message));

        if open {
            let unread = !mine && !message.read;
            self.store.upsert(message);
            if unread {
                effects.push(Effect::MarkRead(key.clone()));
            }
        } else if !mine {
            self.unread.record_direct(key.id());
        }
        self.roster.touch(&key, now_ms);
    }

    fn on_support_message(&mut self, message: ChatMessage, now_ms: i64, effects: &mut Vec<Effect>) {
        let Some(chat_id) = message.chat_id.clone() else {
            debug!(id = %message.id, "support message without chat id");
            return;
        };
        let key = ConversationKey::Support(chat_id);
        let mine = self.is_mine(&message);

        if self.store.is_selected(&key) {
            let unread = !mine && !message.read;
            self.store.upsert(message);
            if unread {
                effects.push(Effect::MarkRead(key.clone()));
            }
        } else if !mine {
            self.unread.record_support();
        }
        self.roster.touch(&key, now_ms);
    }

    /// Whether an id-addressed event belongs to the open conversation.
    ///
    /// Message ids are only unique within one conversation kind, so direct
    /// events never touch an open support chat and vice versa. Any chat id or
    /// sender/target the event carries must also match the selection.
    fn targets_open(&self, support: bool, chat_id: Option<&str>, ends: [Option<&str>; 2]) -> bool {
        match self.store.selected() {
            Some(ConversationKey::Support(open)) => support && chat_id.is_none_or(|id| id == open),
            Some(ConversationKey::Direct(peer)) => {
                !support && (ends.iter().all(Option::is_none) || ends.contains(&Some(peer.as_str())))
            }
            None => false,
        }
    }

    fn on_update(&mut self, patch: MessagePatch, support: bool) {
        let ends = [patch.sender_id.as_deref(), patch.target_id.as_deref()];
        if !self.targets_open(support, patch.chat_id.as_deref(), ends) {
            debug!(id = %patch.id, support, "update for another conversation");
            return;
        }
        if self.store.apply_patch(&patch) {
            return;
        }
        let Some(message) = patch.into_message() else {
            return;
        };
        let belongs = self.store.selected().is_some_and(|selected| {
            if support { selected.contains_support(&message) } else { selected.contains_direct(&message) }
        });
        if belongs {
            self.store.upsert(message);
        }
    }

    fn on_read(&mut self, receipt: &ReadReceipt) {
        if !self.targets_open(false, None, [receipt.reader_id.as_deref(), None]) {
            return;
        }
        if !receipt.message_ids.is_empty() {
            self.store
                .mark_read_where(|message| receipt.message_ids.contains(&message.id));
            return;
        }
        let Some(reader) = receipt.reader_id.as_deref() else {
            return;
        };
        let me = self.me.as_str();
        self.store.mark_read_where(|message| {
            message.sender_id.as_deref() == Some(me) && message.target_id.as_deref() == Some(reader)
        });
    }
}
