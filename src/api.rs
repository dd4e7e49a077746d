//! REST side of the chat backend.
//!
//! [`ChatApi`] is the seam the client talks through; [`RestClient`] is the
//! `reqwest` implementation. Every call is fire-once: failures are returned
//! to the caller, which logs them, and nothing here retries.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::collections::HashMap;

use envelopes::{ChatMessage, Participant, SupportChat, UnreadCount};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::ChatConfig;
use crate::conversation::ConversationKey;
use crate::error::ChatError;
use crate::session::Session;

/// A file to upload against an existing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

/// Backend operations consumed by the chat client. Enables mocking in tests.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    /// Roster of counterparts, filtered by `search` (empty for all).
    async fn fetch_roster(&self, search: &str) -> Result<Vec<Participant>, ChatError>;

    /// Guest support chats visible to admins.
    async fn fetch_support_chats(&self) -> Result<Vec<SupportChat>, ChatError>;

    async fn fetch_messages(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>, ChatError>;

    async fn fetch_direct_unread(&self) -> Result<u32, ChatError>;

    async fn fetch_support_unread(&self) -> Result<u32, ChatError>;

    async fn fetch_unread_by_sender(&self) -> Result<HashMap<String, u32>, ChatError>;

    /// Create a message; returns the stored record with its server id.
    async fn send_message(&self, key: &ConversationKey, content: &str) -> Result<ChatMessage, ChatError>;

    /// Returns the updated record when the backend echoes one.
    async fn edit_message(
        &self,
        key: &ConversationKey,
        id: &str,
        content: &str,
    ) -> Result<Option<ChatMessage>, ChatError>;

    async fn delete_message(&self, key: &ConversationKey, id: &str) -> Result<(), ChatError>;

    async fn upload_attachment(
        &self,
        key: &ConversationKey,
        message_id: &str,
        attachment: &Attachment,
    ) -> Result<(), ChatError>;

    async fn mark_read(&self, key: &ConversationKey) -> Result<(), ChatError>;

    async fn set_blocked(&self, user_id: &str, blocked: bool) -> Result<(), ChatError>;
}

pub(crate) fn messages_path(key: &ConversationKey) -> Vec<&str> {
    match key {
        ConversationKey::Direct(user_id) => vec!["api", "chat", "messages", user_id.as_str()],
        ConversationKey::Support(chat_id) => vec!["api", "support", "chats", chat_id.as_str(), "messages"],
    }
}

pub(crate) fn message_path<'a>(key: &ConversationKey, id: &'a str) -> Vec<&'a str> {
    match key {
        ConversationKey::Direct(_) => vec!["api", "chat", "messages", id],
        ConversationKey::Support(_) => vec!["api", "support", "messages", id],
    }
}

pub(crate) fn mark_read_path(key: &ConversationKey) -> Vec<&str> {
    match key {
        ConversationKey::Direct(user_id) => vec!["api", "chat", "messages", user_id.as_str(), "read"],
        ConversationKey::Support(chat_id) => vec!["api", "support", "chats", chat_id.as_str(), "read"],
    }
}

/// Append `segments` to `base`, percent-encoding each one, so ids can never
/// add path levels or start a query.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    // `RestClient::new` rejects bases that cannot carry a path.
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// `reqwest`-backed [`ChatApi`] carrying the session's bearer token.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidConfig`] if the base URL cannot carry a
    /// path, [`ChatError::InvalidSession`] if the token is not a valid header
    /// value and [`ChatError::Http`] if the client fails to build.
    pub fn new(config: &ChatConfig, session: &Session) -> Result<Self, ChatError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|error| ChatError::InvalidConfig(format!("invalid base URL {}: {error}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ChatError::InvalidConfig(format!("invalid base URL: {}", config.base_url)));
        }

        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", session.token))
            .map_err(|_| ChatError::InvalidSession("token is not a valid header value".to_owned()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self { http, base_url })
    }

    fn request(&self, method: Method, path: &[&str]) -> RequestBuilder {
        self.http.request(method, endpoint(&self.base_url, path))
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<String, ChatError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Status { operation, status: status.as_u16(), body });
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ChatError> {
        let body = self.send(operation, request).await?;
        decode_body(operation, &body)
    }
}

pub(crate) fn decode_body<T: DeserializeOwned>(operation: &'static str, body: &str) -> Result<T, ChatError> {
    let value = serde_json::from_str::<Value>(body).map_err(|source| ChatError::Decode { operation, source })?;
    serde_json::from_value(unwrap_data(value)).map_err(|source| ChatError::Decode { operation, source })
}

/// Some endpoints wrap their payload as `{"data": ...}`.
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[async_trait::async_trait]
impl ChatApi for RestClient {
    async fn fetch_roster(&self, search: &str) -> Result<Vec<Participant>, ChatError> {
        let mut request = self.request(Method::GET, &["api", "chat", "users"]);
        if !search.is_empty() {
            request = request.query(&[("search", search)]);
        }
        self.send_json("fetch roster", request).await
    }

    async fn fetch_support_chats(&self) -> Result<Vec<SupportChat>, ChatError> {
        self.send_json("fetch support chats", self.request(Method::GET, &["api", "support", "chats"]))
            .await
    }

    async fn fetch_messages(&self, key: &ConversationKey) -> Result<Vec<ChatMessage>, ChatError> {
        let mut messages: Vec<ChatMessage> = self
            .send_json("fetch messages", self.request(Method::GET, &messages_path(key)))
            .await?;
        // Support rows omit the chat id; stamp it so membership checks hold.
        if let ConversationKey::Support(chat_id) = key {
            for message in &mut messages {
                message.chat_id.get_or_insert_with(|| chat_id.clone());
            }
        }
        Ok(messages)
    }

    async fn fetch_direct_unread(&self) -> Result<u32, ChatError> {
        let count: UnreadCount = self
            .send_json("fetch direct unread", self.request(Method::GET, &["api", "chat", "unread-count"]))
            .await?;
        Ok(count.count)
    }

    async fn fetch_support_unread(&self) -> Result<u32, ChatError> {
        let count: UnreadCount = self
            .send_json("fetch support unread", self.request(Method::GET, &["api", "support", "unread-count"]))
            .await?;
        Ok(count.count)
    }

    async fn fetch_unread_by_sender(&self) -> Result<HashMap<String, u32>, ChatError> {
        self.send_json("fetch unread by sender", self.request(Method::GET, &["api", "chat", "unread-by-sender"]))
            .await
    }

    async fn send_message(&self, key: &ConversationKey, content: &str) -> Result<ChatMessage, ChatError> {
        let request = match key {
            ConversationKey::Direct(target_id) => self
                .request(Method::POST, &["api", "chat", "messages"])
                .json(&json!({ "target_id": target_id, "content": content })),
            ConversationKey::Support(_) => self
                .request(Method::POST, &messages_path(key))
                .json(&json!({ "content": content })),
        };
        let mut message: ChatMessage = self.send_json("send message", request).await?;
        if let ConversationKey::Support(chat_id) = key {
            message.chat_id.get_or_insert_with(|| chat_id.clone());
        }
        Ok(message)
    }

    async fn edit_message(
        &self,
        key: &ConversationKey,
        id: &str,
        content: &str,
    ) -> Result<Option<ChatMessage>, ChatError> {
        let request = self
            .request(Method::PATCH, &message_path(key, id))
            .json(&json!({ "content": content }));
        let body = self.send("edit message", request).await?;
        // The body is informational; an empty or unexpected one is not a failure.
        Ok(decode_body::<ChatMessage>("edit message", &body).ok())
    }

    async fn delete_message(&self, key: &ConversationKey, id: &str) -> Result<(), ChatError> {
        self.send("delete message", self.request(Method::DELETE, &message_path(key, id)))
            .await?;
        Ok(())
    }

    async fn upload_attachment(
        &self,
        key: &ConversationKey,
        message_id: &str,
        attachment: &Attachment,
    ) -> Result<(), ChatError> {
        let mut part = reqwest::multipart::Part::bytes(attachment.bytes.clone()).file_name(attachment.file_name.clone());
        if let Some(mime) = &attachment.mime {
            part = part.mime_str(mime)?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);
        let mut path = message_path(key, message_id);
        path.push("attachments");
        self.send("upload attachment", self.request(Method::POST, &path).multipart(form))
            .await?;
        Ok(())
    }

    async fn mark_read(&self, key: &ConversationKey) -> Result<(), ChatError> {
        self.send("mark read", self.request(Method::POST, &mark_read_path(key)))
            .await?;
        Ok(())
    }

    async fn set_blocked(&self, user_id: &str, blocked: bool) -> Result<(), ChatError> {
        let request = self
            .request(Method::PATCH, &["api", "chat", "users", user_id, "block"])
            .json(&json!({ "blocked": blocked }));
        self.send("set blocked", request).await?;
        Ok(())
    }
}
