//! Realtime partner chat client.
//!
//! Keeps a local view of direct and support conversations in sync with the
//! chat backend over three channels: a WebSocket push stream, REST calls for
//! history and mutations, and periodic polls that reconcile both.
//!
//! [`ChatClient`] is the entry point. The pure state pieces
//! ([`MessageStore`], [`UnreadTracker`], [`ConversationList`] and the
//! [`ChatState`] reducer) are public so they can be driven directly.

pub mod api;
pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod reducer;
pub mod roster;
pub mod session;
pub mod store;
pub mod unread;

pub use api::{Attachment, ChatApi, RestClient};
pub use backoff::{Backoff, BackoffPolicy};
pub use client::{ChatClient, SendOutcome};
pub use config::{ChatConfig, PollIntervals};
pub use connection::{CommandSink, ConnectionManager, ConnectionStatus};
pub use conversation::ConversationKey;
pub use envelopes;
pub use error::ChatError;
pub use reducer::{ChatState, Effect};
pub use roster::ConversationList;
pub use session::{Session, UserRole};
pub use store::{MessageStore, SnapshotTicket, Upsert};
pub use unread::UnreadTracker;

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
