//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding or encoding events.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON, or not an object with a `type` field.
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),

    /// A well-known event type carried a payload of the wrong shape.
    #[error("invalid payload for `{kind}`: {reason}")]
    InvalidPayload { kind: String, reason: String },

    /// A status payload named something other than the four known states.
    #[error("unknown connection status: {0}")]
    UnknownStatus(String),
}

impl ProtocolError {
    pub fn invalid_payload(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}
