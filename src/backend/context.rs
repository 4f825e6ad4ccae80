use tracing::{info, warn};

use super::{BackendClient, BackendError};
use crate::shared_types::SessionId;

// -----------------------------------------------------------------------------
// ----- BackendContext --------------------------------------------------------

/// Proof that the backend holds a compute context for a session.
///
/// Created after a successful Register, never mutated, and consumed by
/// [`BackendContext::release`] so Terminate can be issued at most once.
#[derive(Debug)]
pub struct BackendContext {
    session_id: SessionId,
    armed: bool,
}

impl BackendContext {
    pub(crate) fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            armed: true,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Issue Terminate for this context. The context is gone afterwards
    /// whether or not the backend acknowledged it.
    pub async fn release<C: BackendClient + ?Sized>(mut self, backend: &C) -> Result<(), BackendError> {
        self.armed = false;
        let result = backend.terminate(&self.session_id).await;

        match &result {
            Ok(()) => info!("released backend context for session {}", self.session_id),
            Err(e) => warn!("failed to release backend context for session {}: {e}", self.session_id),
        }

        result
    }
}

impl Drop for BackendContext {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "backend context for session {} dropped without Terminate",
                self.session_id
            );
        }
    }
}
