//! Shared envelope model and JSON codec for the realtime chat socket.
//!
//! Every socket message is a `{ "type": ..., "data": ... }` envelope. This
//! crate owns that wire representation together with the REST records the
//! chat client exchanges with the backend, so both transports agree on ids
//! and field names.
//!
//! DESIGN
//! ======
//! Server events decode through a single dispatch table keyed by the
//! envelope `type`; each variant carries its own typed payload. Unknown
//! types decode to [`ServerEvent::Unknown`] rather than failing, since the
//! backend adds event kinds ahead of clients.
//!
//! Ids arrive either as strings or as server-assigned integers. Both
//! normalize to `String` at the edge.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod lenient;

/// Error returned by [`decode_event`] and [`encode_command`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw text is not a JSON `{type, data}` envelope.
    #[error("failed to decode envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// The envelope `data` does not match the payload shape for its `type`.
    #[error("invalid payload for `{kind}` event: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    /// A client command could not be serialized.
    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Raw `{type, data}` wrapper shared by both directions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

// =============================================================================
// WIRE RECORDS
// =============================================================================

/// A single chat message as stored by the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "senderId", deserialize_with = "lenient::opt_string")]
    pub sender_id: Option<String>,
    #[serde(default, alias = "targetId", deserialize_with = "lenient::opt_string")]
    pub target_id: Option<String>,
    /// Support chat this message belongs to; absent for direct messages.
    #[serde(
        default,
        alias = "chatId",
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub chat_id: Option<String>,
    #[serde(default, alias = "created_at", alias = "createdAt", deserialize_with = "lenient::opt_string")]
    pub timestamp: Option<String>,
    #[serde(default, alias = "is_read", alias = "isRead")]
    pub read: bool,
    #[serde(default, alias = "attachmentUrl", skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default, alias = "is_edited", alias = "isEdited")]
    pub edited: bool,
    #[serde(default, alias = "senderRole", skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<String>,
}

/// Partial message carried by `message_update` / `support_message_update`.
///
/// Only fields present on the wire are applied to the local copy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MessagePatch {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "senderId", deserialize_with = "lenient::opt_string")]
    pub sender_id: Option<String>,
    #[serde(default, alias = "targetId", deserialize_with = "lenient::opt_string")]
    pub target_id: Option<String>,
    #[serde(default, alias = "chatId", deserialize_with = "lenient::opt_string")]
    pub chat_id: Option<String>,
    #[serde(default, alias = "created_at", alias = "createdAt", deserialize_with = "lenient::opt_string")]
    pub timestamp: Option<String>,
    #[serde(default, alias = "is_read", alias = "isRead")]
    pub read: Option<bool>,
    #[serde(default, alias = "attachmentUrl")]
    pub attachment_url: Option<String>,
    #[serde(default, alias = "is_edited", alias = "isEdited")]
    pub edited: Option<bool>,
    #[serde(default, alias = "senderRole")]
    pub sender_role: Option<String>,
}

impl MessagePatch {
    /// Promote the patch to a full message when it carries enough to be appended.
    ///
    /// A patch without content cannot stand on its own; it only ever updates
    /// an entry that is already present.
    #[must_use]
    pub fn into_message(self) -> Option<ChatMessage> {
        let content = self.content?;
        Some(ChatMessage {
            id: self.id,
            content,
            sender_id: self.sender_id,
            target_id: self.target_id,
            chat_id: self.chat_id,
            timestamp: self.timestamp,
            read: self.read.unwrap_or(false),
            attachment_url: self.attachment_url,
            edited: self.edited.unwrap_or(false),
            sender_role: self.sender_role,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MessageDeleted {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, alias = "chatId", deserialize_with = "lenient::opt_string")]
    pub chat_id: Option<String>,
}

/// Read receipt for direct messages.
///
/// With explicit `message_ids` only those entries flip to read; otherwise
/// every message addressed to `reader_id` is considered read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ReadReceipt {
    #[serde(default, alias = "messageIds", alias = "ids", deserialize_with = "lenient::string_vec")]
    pub message_ids: Vec<String>,
    #[serde(default, alias = "readerId", alias = "user_id", deserialize_with = "lenient::opt_string")]
    pub reader_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SupportRead {
    #[serde(alias = "chatId", deserialize_with = "lenient::string")]
    pub chat_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PresenceUpdate {
    #[serde(alias = "userId", deserialize_with = "lenient::string")]
    pub user_id: String,
    #[serde(default, alias = "isOnline", alias = "online")]
    pub is_online: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
}

impl PresenceUpdate {
    #[must_use]
    pub fn online(&self) -> bool {
        self.is_online
            .unwrap_or_else(|| self.status.as_deref() == Some("online"))
    }
}

/// Role of a roster entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParticipantRole {
    Admin,
    #[default]
    Partner,
    /// Synthetic entry standing in for a guest support chat.
    Support,
    Other(String),
}

impl From<String> for ParticipantRole {
    fn from(value: String) -> Self {
        match value.as_str() {
            "admin" | "main_admin" => Self::Admin,
            "partner" => Self::Partner,
            "support" => Self::Support,
            _ => Self::Other(value),
        }
    }
}

impl From<ParticipantRole> for String {
    fn from(value: ParticipantRole) -> Self {
        match value {
            ParticipantRole::Admin => "admin".to_owned(),
            ParticipantRole::Partner => "partner".to_owned(),
            ParticipantRole::Support => "support".to_owned(),
            ParticipantRole::Other(other) => other,
        }
    }
}

/// A counterpart in the conversation roster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: ParticipantRole,
    #[serde(default, alias = "isOnline")]
    pub is_online: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "partnerCode")]
    pub partner_code: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default, alias = "isBlockedInChat")]
    pub is_blocked_in_chat: bool,
}

/// A guest-initiated support thread as listed by the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SupportChat {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(alias = "guestId", deserialize_with = "lenient::string")]
    pub guest_id: String,
    #[serde(default, alias = "guestName")]
    pub guest_name: Option<String>,
    #[serde(default, alias = "guestEmail")]
    pub guest_email: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl SupportChat {
    /// Build the synthetic roster entry for this chat, keyed by chat id.
    #[must_use]
    pub fn to_participant(&self) -> Participant {
        Participant {
            id: self.id.clone(),
            name: self
                .guest_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| "Guest".to_owned()),
            email: self.guest_email.clone(),
            role: ParticipantRole::Support,
            is_online: false,
            status: self.status.clone(),
            partner_code: None,
            login: None,
            is_blocked_in_chat: false,
        }
    }
}

/// `{count}` body returned by the unread-count endpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct UnreadCount {
    #[serde(alias = "unread_count", alias = "unreadCount")]
    pub count: u32,
}

// =============================================================================
// SERVER EVENTS
// =============================================================================

/// A decoded server push, one variant per recognized envelope `type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    Message(ChatMessage),
    MessageUpdate(MessagePatch),
    MessageDelete(MessageDeleted),
    Read(ReadReceipt),
    SupportNewMessage(ChatMessage),
    SupportMessageUpdate(MessagePatch),
    SupportMessagesRead(SupportRead),
    Presence(PresenceUpdate),
    /// Envelope with a `type` this client does not handle.
    Unknown(String),
}

impl ServerEvent {
    /// The envelope `type` this event was decoded from.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::MessageUpdate(_) => "message_update",
            Self::MessageDelete(_) => "message_delete",
            Self::Read(_) => "read",
            Self::SupportNewMessage(_) => "support_new_message",
            Self::SupportMessageUpdate(_) => "support_message_update",
            Self::SupportMessagesRead(_) => "support_messages_read",
            Self::Presence(_) => "presence",
            Self::Unknown(kind) => kind,
        }
    }
}

/// Decode a text socket message into a typed server event.
///
/// # Errors
///
/// Returns [`CodecError::Envelope`] when the text is not an envelope and
/// [`CodecError::Payload`] when `data` does not fit the event's payload.
pub fn decode_event(text: &str) -> Result<ServerEvent, CodecError> {
    let envelope = serde_json::from_str::<Envelope>(text).map_err(CodecError::Envelope)?;
    event_from_envelope(envelope)
}

/// Map an already-parsed envelope onto its typed event.
///
/// # Errors
///
/// Returns [`CodecError::Payload`] when `data` does not fit the payload shape.
pub fn event_from_envelope(envelope: Envelope) -> Result<ServerEvent, CodecError> {
    let Envelope { kind, data } = envelope;
    let event = match kind.as_str() {
        "message" => ServerEvent::Message(payload(&kind, data)?),
        "message_update" => ServerEvent::MessageUpdate(payload(&kind, data)?),
        "message_delete" => ServerEvent::MessageDelete(payload(&kind, data)?),
        "read" => ServerEvent::Read(payload(&kind, data)?),
        "support_new_message" => {
            ServerEvent::SupportNewMessage(payload(&kind, hoist_support_message(data))?)
        }
        "support_message_update" => {
            ServerEvent::SupportMessageUpdate(payload(&kind, hoist_support_message(data))?)
        }
        "support_messages_read" => ServerEvent::SupportMessagesRead(payload(&kind, data)?),
        "presence" => ServerEvent::Presence(payload(&kind, data)?),
        _ => ServerEvent::Unknown(kind),
    };
    Ok(event)
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, CodecError> {
    serde_json::from_value(data).map_err(|source| CodecError::Payload { kind: kind.to_owned(), source })
}

/// Support pushes may nest the message as `{chat_id, message: {...}}`.
/// Flatten that form so the payload decodes like a plain message, keeping
/// the outer `chat_id` when the inner record lacks one.
fn hoist_support_message(data: Value) -> Value {
    let Value::Object(mut outer) = data else {
        return data;
    };
    let Some(Value::Object(mut inner)) = outer.remove("message") else {
        return Value::Object(outer);
    };
    if !inner.contains_key("chat_id") && !inner.contains_key("chatId") {
        if let Some(chat_id) = outer.remove("chat_id").or_else(|| outer.remove("chatId")) {
            inner.insert("chat_id".to_owned(), chat_id);
        }
    }
    Value::Object(inner)
}

// =============================================================================
// CLIENT COMMANDS
// =============================================================================

/// Commands the client sends over the socket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    Message { target_id: String, content: String },
    Update { id: String, content: String },
    Delete { id: String },
}

/// Encode a client command as envelope JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_command(command: &ClientCommand) -> Result<String, CodecError> {
    serde_json::to_string(command).map_err(CodecError::Encode)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
