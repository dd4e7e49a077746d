//! Client configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::ChatError;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_MESSAGE_POLL_MS: u64 = 3_000;
pub const DEFAULT_ROSTER_POLL_MS: u64 = 3_000;
pub const DEFAULT_UNREAD_POLL_MS: u64 = 15_000;
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_EXPONENT: u32 = 6;
pub const DEFAULT_RESYNC_MISSED_TICKS: u32 = 0;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Timer cadences for the three polling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// Refetch of the open conversation's messages.
    pub messages: Duration,
    /// Roster refresh while the panel is open.
    pub roster: Duration,
    /// Direct, support and per-sender unread counts.
    pub unread: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            messages: Duration::from_millis(DEFAULT_MESSAGE_POLL_MS),
            roster: Duration::from_millis(DEFAULT_ROSTER_POLL_MS),
            unread: Duration::from_millis(DEFAULT_UNREAD_POLL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// REST base URL without a trailing slash.
    pub base_url: String,
    /// WebSocket endpoint without the token query; derived from `base_url` when unset.
    pub ws_url: String,
    pub polls: PollIntervals,
    pub reconnect: BackoffPolicy,
    /// Message poll ticks without socket traffic before a refetch runs.
    /// Zero refetches on every tick.
    pub resync_missed_ticks: u32,
    pub http_timeout: Duration,
}

impl ChatConfig {
    /// Build a config for `base_url` with every other knob at its default.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidConfig`] if the URL is not `http(s)://`.
    pub fn new(base_url: &str) -> Result<Self, ChatError> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        let ws_url = derive_ws_url(&base_url)?;
        Ok(Self {
            base_url,
            ws_url,
            polls: PollIntervals::default(),
            reconnect: BackoffPolicy::default(),
            resync_missed_ticks: DEFAULT_RESYNC_MISSED_TICKS,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        })
    }

    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `CHAT_BASE_URL`: REST base, default `http://127.0.0.1:8000`
    /// - `CHAT_WS_URL`: socket endpoint, default derived from the base URL
    /// - `CHAT_MESSAGE_POLL_MS` / `CHAT_ROSTER_POLL_MS`: default 3000
    /// - `CHAT_UNREAD_POLL_MS`: default 15000
    /// - `CHAT_RECONNECT_BASE_MS`: default 1000
    /// - `CHAT_RECONNECT_MAX_EXPONENT`: default 6
    /// - `CHAT_RESYNC_MISSED_TICKS`: default 0
    /// - `CHAT_HTTP_TIMEOUT_SECS`: default 30
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidConfig`] for an unusable base or socket URL.
    pub fn from_env() -> Result<Self, ChatError> {
        let base_url = std::env::var("CHAT_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let mut config = Self::new(&base_url)?;

        if let Some(ws_url) = std::env::var("CHAT_WS_URL").ok().filter(|s| !s.is_empty()) {
            if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
                return Err(ChatError::InvalidConfig(format!("CHAT_WS_URL must be ws:// or wss://, got {ws_url}")));
            }
            config.ws_url = ws_url;
        }

        config.polls = PollIntervals {
            messages: Duration::from_millis(env_parse("CHAT_MESSAGE_POLL_MS", DEFAULT_MESSAGE_POLL_MS)),
            roster: Duration::from_millis(env_parse("CHAT_ROSTER_POLL_MS", DEFAULT_ROSTER_POLL_MS)),
            unread: Duration::from_millis(env_parse("CHAT_UNREAD_POLL_MS", DEFAULT_UNREAD_POLL_MS)),
        };
        config.reconnect = BackoffPolicy {
            base: Duration::from_millis(env_parse("CHAT_RECONNECT_BASE_MS", DEFAULT_RECONNECT_BASE_MS)),
            max_exponent: env_parse("CHAT_RECONNECT_MAX_EXPONENT", DEFAULT_RECONNECT_MAX_EXPONENT),
        };
        config.resync_missed_ticks = env_parse("CHAT_RESYNC_MISSED_TICKS", DEFAULT_RESYNC_MISSED_TICKS);
        config.http_timeout = Duration::from_secs(env_parse("CHAT_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS));

        Ok(config)
    }

    /// Socket URL with the bearer token attached as a query parameter.
    #[must_use]
    pub fn ws_url_with_token(&self, token: &str) -> String {
        let separator = if self.ws_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}token={token}", self.ws_url)
    }
}

pub(crate) fn derive_ws_url(base_url: &str) -> Result<String, ChatError> {
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws/chat"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws/chat"));
    }

    Err(ChatError::InvalidConfig(format!("invalid base URL: {base_url}")))
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
