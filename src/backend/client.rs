use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::BoundingBox;
use crate::shared_types::SessionId;

// -----------------------------------------------------------------------------
// ----- BackendReply ----------------------------------------------------------

/// A successful backend answer plus the timing figures the backend reports
/// about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply<T> {
    pub value: T,
    pub timestamp: String,
    pub duration: String,
}

impl<T> BackendReply<T> {
    pub fn new(value: T, timestamp: impl Into<String>, duration: impl Into<String>) -> Self {
        Self {
            value,
            timestamp: timestamp.into(),
            duration: duration.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- BackendClient ---------------------------------------------------------

/// The remote compute service, seen from the gateway.
///
/// Every call is keyed by the session id; the backend uses it to find the
/// compute actor that belongs to the session.
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    /// Create (or find) the compute context for `session_id`.
    async fn register(&self, session_id: &SessionId) -> Result<BackendReply<String>, BackendError>;

    /// Round-trip `payload` through the session's compute context.
    async fn echo_compute(
        &self,
        session_id: &SessionId,
        payload: &str,
    ) -> Result<BackendReply<String>, BackendError>;

    /// Run the model on `payload`.
    async fn model_compute(
        &self,
        session_id: &SessionId,
        payload: &str,
    ) -> Result<BackendReply<Vec<BoundingBox>>, BackendError>;

    /// Release the session's compute context.
    async fn terminate(&self, session_id: &SessionId) -> Result<(), BackendError>;
}

#[async_trait]
impl<C: BackendClient + ?Sized> BackendClient for Arc<C> {
    async fn register(&self, session_id: &SessionId) -> Result<BackendReply<String>, BackendError> {
        (**self).register(session_id).await
    }

    async fn echo_compute(
        &self,
        session_id: &SessionId,
        payload: &str,
    ) -> Result<BackendReply<String>, BackendError> {
        (**self).echo_compute(session_id, payload).await
    }

    async fn model_compute(
        &self,
        session_id: &SessionId,
        payload: &str,
    ) -> Result<BackendReply<Vec<BoundingBox>>, BackendError> {
        (**self).model_compute(session_id, payload).await
    }

    async fn terminate(&self, session_id: &SessionId) -> Result<(), BackendError> {
        (**self).terminate(session_id).await
    }
}

// -----------------------------------------------------------------------------
// ----- BackendOperation ------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOperation {
    Register,
    EchoCompute,
    ModelCompute,
    Terminate,
}

impl BackendOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendOperation::Register => "Register",
            BackendOperation::EchoCompute => "DummyComputation",
            BackendOperation::ModelCompute => "ModelComputation",
            BackendOperation::Terminate => "KillActor",
        }
    }
}

impl fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend {operation} failed: {reason}")]
    Unavailable {
        operation: BackendOperation,
        reason: String,
    },

    #[error("backend {operation} timed out after {after:?}")]
    Timeout {
        operation: BackendOperation,
        after: Duration,
    },
}

impl BackendError {
    pub fn unavailable(operation: BackendOperation, reason: impl Into<String>) -> Self {
        BackendError::Unavailable {
            operation,
            reason: reason.into(),
        }
    }

    pub fn operation(&self) -> BackendOperation {
        match self {
            BackendError::Unavailable { operation, .. } => *operation,
            BackendError::Timeout { operation, .. } => *operation,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout { .. })
    }
}
