use std::{future::Future, time::Duration};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::warn;

use super::{BackendClient, BackendError, BackendOperation, BackendReply};
use crate::protocol::BoundingBox;
use crate::shared_types::SessionId;

// -----------------------------------------------------------------------------
// ----- DeadlineClient --------------------------------------------------------

/// Puts a fixed upper bound on every call made through the inner client.
#[derive(Debug, Clone)]
pub struct DeadlineClient<C> {
    inner: C,
    deadline: Duration,
}

impl<C: BackendClient> DeadlineClient<C> {
    pub fn new(inner: C, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        operation: BackendOperation,
        session_id: &SessionId,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match timeout(self.deadline, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("backend {operation} for session {session_id} hit the {:?} deadline", self.deadline);
                Err(BackendError::Timeout {
                    operation,
                    after: self.deadline,
                })
            }
        }
    }
}

#[async_trait]
impl<C: BackendClient> BackendClient for DeadlineClient<C> {
    async fn register(&self, session_id: &SessionId) -> Result<BackendReply<String>, BackendError> {
        self.bounded(
            BackendOperation::Register,
            session_id,
            self.inner.register(session_id),
        )
        .await
    }

    async fn echo_compute(
        &self,
        session_id: &SessionId,
        payload: &str,
    ) -> Result<BackendReply<String>, BackendError> {
        self.bounded(
            BackendOperation::EchoCompute,
            session_id,
            self.inner.echo_compute(session_id, payload),
        )
        .await
    }

    async fn model_compute(
        &self,
        session_id: &SessionId,
        payload: &str,
    ) -> Result<BackendReply<Vec<BoundingBox>>, BackendError> {
        self.bounded(
            BackendOperation::ModelCompute,
            session_id,
            self.inner.model_compute(session_id, payload),
        )
        .await
    }

    async fn terminate(&self, session_id: &SessionId) -> Result<(), BackendError> {
        self.bounded(
            BackendOperation::Terminate,
            session_id,
            self.inner.terminate(session_id),
        )
        .await
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
