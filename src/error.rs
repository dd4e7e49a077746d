//! Error type shared by the chat client operations.

/// Errors produced by chat client operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A configuration value is unusable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The session is missing a required field.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// The HTTP request itself failed (connect, timeout, body read).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("{operation} failed: HTTP {status}: {body}")]
    Status { operation: &'static str, status: u16, body: String },

    /// A response body did not match the expected shape.
    #[error("invalid response for {operation}: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A socket envelope could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] envelopes::CodecError),

    /// Neither text nor attachments were given.
    #[error("message is empty")]
    EmptyMessage,

    /// The operation needs a selected conversation.
    #[error("no conversation selected")]
    NoConversation,

    /// The client was shut down; no new polls or selections.
    #[error("chat client is shut down")]
    Closed,

    /// The conversation key text could not be parsed.
    #[error("invalid conversation `{0}`")]
    InvalidConversation(String),
}
