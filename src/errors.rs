use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::{
    self,
    protocol::{CloseFrame, frame::coding::CloseCode},
};

use crate::backend::BackendError;
use crate::protocol::DecodeError;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// RFC 6455 caps a close reason at 123 bytes.
const MAX_CLOSE_REASON: usize = 123;

// -----------------------------------------------------------------------------
// ----- GatewayError ----------------------------------------------------------

/// Everything that can end a session early. None of these leave the session
/// that produced them.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("no frame received for {0:?}")]
    IdleTimeout(Duration),

    #[error("peer did not accept a frame within {0:?}")]
    SendTimeout(Duration),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("session registry is gone")]
    RegistryClosed,
}

impl GatewayError {
    /// What the client is told before its connection is closed, if anything.
    pub fn to_error_response(&self) -> Option<ErrorResponse> {
        match self {
            GatewayError::Decode(e) => Some(ErrorResponse::protocol_violation(e.to_string())),
            GatewayError::Backend(e) => Some(ErrorResponse::backend_failure(e.to_string())),
            GatewayError::Encode(_) => Some(ErrorResponse::backend_failure("internal error")),
            GatewayError::IdleTimeout(_) => Some(ErrorResponse::going_away("idle timeout")),
            GatewayError::RegistryClosed => Some(ErrorResponse::going_away("gateway shutting down")),
            GatewayError::ConnectionClosed
            | GatewayError::SendTimeout(_)
            | GatewayError::Transport(_) => None,
        }
    }

    /// The peer is gone; nothing can be sent to it anymore.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectionClosed
                | GatewayError::SendTimeout(_)
                | GatewayError::Transport(_)
        )
    }
}

// -----------------------------------------------------------------------------
// ----- ErrorResponse ---------------------------------------------------------

/// Protocol-level error indication: the close frame a client receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: CloseCode,
    pub reason: String,
}

// -----------------------------------------------------------------------------
// ----- ErrorResponse: Static -------------------------------------------------

impl ErrorResponse {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Normal, reason)
    }

    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Invalid, reason)
    }

    pub fn backend_failure(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Error, reason)
    }

    pub fn going_away(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Away, reason)
    }
}

// -----------------------------------------------------------------------------
// ----- ErrorResponse: Public -------------------------------------------------

impl ErrorResponse {
    pub fn to_close_frame(&self) -> CloseFrame {
        CloseFrame {
            code: self.code,
            reason: truncate_utf8(&self.reason, MAX_CLOSE_REASON).to_string().into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
