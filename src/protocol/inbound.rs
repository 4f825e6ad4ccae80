use serde::{Deserialize, Serialize};

use super::{ComputationKind, DecodeError, WireSerializable};
use crate::shared_types::SessionId;

// -----------------------------------------------------------------------------
// ----- RegistrationFrame -----------------------------------------------------

/// First frame on every connection: `{sessionId, startTime}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationFrame {
    pub session_id: SessionId,
    pub start_time: String,
}

impl RegistrationFrame {
    pub fn new(session_id: impl Into<SessionId>, start_time: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            start_time: start_time.into(),
        }
    }
}

impl WireSerializable for RegistrationFrame {
    type Error = DecodeError;

    fn to_frame(&self) -> Result<String, Self::Error> {
        let raw = RawRegistration {
            session_id: self.session_id.as_str().to_string(),
            start_time: self.start_time.clone(),
        };
        Ok(serde_json::to_string(&raw)?)
    }

    fn from_frame(frame: &str) -> Result<Self, Self::Error> {
        let raw: RawRegistration = serde_json::from_str(frame)?;

        if raw.session_id.is_empty() {
            return Err(DecodeError::EmptySessionId);
        }

        Ok(Self {
            session_id: SessionId::from(raw.session_id),
            start_time: raw.start_time,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- DataFrame -------------------------------------------------------------

/// Every frame after registration:
/// `{message, startTime, terminateSession, messageType}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub message: String,
    pub start_time: String,
    pub terminate: bool,
    pub kind: ComputationKind,
}

impl DataFrame {
    pub fn compute(
        kind: ComputationKind,
        message: impl Into<String>,
        start_time: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            start_time: start_time.into(),
            terminate: false,
            kind,
        }
    }

    pub fn terminate(start_time: impl Into<String>) -> Self {
        Self {
            message: String::new(),
            start_time: start_time.into(),
            terminate: true,
            kind: ComputationKind::Echo,
        }
    }
}

impl WireSerializable for DataFrame {
    type Error = DecodeError;

    fn to_frame(&self) -> Result<String, Self::Error> {
        let raw = RawData {
            message: self.message.clone(),
            start_time: self.start_time.clone(),
            terminate_session: if self.terminate { "true" } else { "false" }.to_string(),
            message_type: self.kind.as_str().to_string(),
        };
        Ok(serde_json::to_string(&raw)?)
    }

    fn from_frame(frame: &str) -> Result<Self, Self::Error> {
        let raw: RawData = serde_json::from_str(frame)?;

        let terminate = match raw.terminate_session.as_str() {
            "true" => true,
            "false" => false,
            other => return Err(DecodeError::InvalidTerminateFlag(other.to_string())),
        };

        let kind = raw.message_type.parse::<ComputationKind>()?;

        Ok(Self {
            message: raw.message,
            start_time: raw.start_time,
            terminate,
            kind,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-wire format ----------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawRegistration {
    session_id: String,
    start_time: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawData {
    message: String,
    start_time: String,
    terminate_session: String,
    message_type: String,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
