//! protocol::error.rs
//!
//! Everything that can go wrong while turning a client frame into a message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a text frame")]
    NotText,

    #[error("sessionId must be non-empty")]
    EmptySessionId,

    #[error("terminateSession must be \"true\" or \"false\", got {0:?}")]
    InvalidTerminateFlag(String),

    #[error("unknown messageType {0:?}; expected \"echo\" or \"bbox\"")]
    UnknownMessageType(String),
}
