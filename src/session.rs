//! Authenticated caller identity.
//!
//! LIFECYCLE
//! =========
//! A `Session` is loaded once at startup (from the environment or from the
//! login response) and handed to [`crate::ChatClient`]. Nothing else reads
//! credentials from ambient storage. Logging out drops the client, which
//! clears every draft and cached counter along with it.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::fmt;
use std::str::FromStr;

use crate::error::ChatError;

/// Role of the logged-in caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    MainAdmin,
    Admin,
    Partner,
}

impl UserRole {
    /// Admins see guest support chats in their roster.
    #[must_use]
    pub fn sees_support_chats(self) -> bool {
        matches!(self, Self::MainAdmin | Self::Admin)
    }
}

impl FromStr for UserRole {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main_admin" | "main-admin" => Ok(Self::MainAdmin),
            "admin" => Ok(Self::Admin),
            "partner" => Ok(Self::Partner),
            other => Err(ChatError::InvalidSession(format!("unknown role `{other}`"))),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub role: UserRole,
}

impl Session {
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidSession`] when the token or user id is blank.
    pub fn new(token: impl Into<String>, user_id: impl Into<String>, role: UserRole) -> Result<Self, ChatError> {
        let token = token.into();
        let user_id = user_id.into();
        if token.trim().is_empty() {
            return Err(ChatError::InvalidSession("token is empty".to_owned()));
        }
        if user_id.trim().is_empty() {
            return Err(ChatError::InvalidSession("user id is empty".to_owned()));
        }
        Ok(Self { token, user_id, role })
    }

    /// Load the session from `CHAT_TOKEN`, `CHAT_USER_ID` and
    /// `CHAT_USER_ROLE` (default `partner`).
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidSession`] when a variable is missing or
    /// the role is not recognized.
    pub fn from_env() -> Result<Self, ChatError> {
        let token = std::env::var("CHAT_TOKEN").map_err(|_| ChatError::InvalidSession("CHAT_TOKEN not set".into()))?;
        let user_id =
            std::env::var("CHAT_USER_ID").map_err(|_| ChatError::InvalidSession("CHAT_USER_ID not set".into()))?;
        let role = std::env::var("CHAT_USER_ROLE")
            .ok()
            .filter(|s| !s.is_empty())
            .map_or(Ok(UserRole::Partner), |raw| raw.parse())?;
        Self::new(token, user_id, role)
    }
}

// The token never reaches logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("token", &"<redacted>")
            .finish()
    }
}
