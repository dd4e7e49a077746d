//! Conversation identity.

#[cfg(test)]
#[path = "conversation_test.rs"]
mod conversation_test;

use std::fmt;
use std::str::FromStr;

use envelopes::{ChatMessage, Participant, ParticipantRole};

use crate::error::ChatError;

const SUPPORT_PREFIX: &str = "support:";

/// A selectable conversation: a direct thread with a user, or a guest
/// support chat keyed by chat id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationKey {
    Direct(String),
    Support(String),
}

impl ConversationKey {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Direct(id) | Self::Support(id) => id,
        }
    }

    #[must_use]
    pub fn is_support(&self) -> bool {
        matches!(self, Self::Support(_))
    }

    #[must_use]
    pub fn for_participant(participant: &Participant) -> Self {
        if participant.role == ParticipantRole::Support {
            Self::Support(participant.id.clone())
        } else {
            Self::Direct(participant.id.clone())
        }
    }

    /// Whether a direct message belongs to this conversation.
    ///
    /// Direct threads match on either end of the message so both the
    /// counterpart's messages and our own replies to them are included.
    #[must_use]
    pub fn contains_direct(&self, message: &ChatMessage) -> bool {
        match self {
            Self::Direct(counterpart) => {
                message.sender_id.as_deref() == Some(counterpart.as_str())
                    || message.target_id.as_deref() == Some(counterpart.as_str())
            }
            Self::Support(_) => false,
        }
    }

    /// Whether a support message belongs to this conversation.
    #[must_use]
    pub fn contains_support(&self, message: &ChatMessage) -> bool {
        match self {
            Self::Support(chat_id) => message.chat_id.as_deref() == Some(chat_id.as_str()),
            Self::Direct(_) => false,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(id) => write!(f, "{id}"),
            Self::Support(id) => write!(f, "{SUPPORT_PREFIX}{id}"),
        }
    }
}

impl FromStr for ConversationKey {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let key = match trimmed.strip_prefix(SUPPORT_PREFIX) {
            Some(chat_id) => Self::Support(chat_id.to_owned()),
            None => Self::Direct(trimmed.to_owned()),
        };
        if key.id().is_empty() {
            return Err(ChatError::InvalidConversation(s.to_owned()));
        }
        Ok(key)
    }
}
