use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::{Instant, SystemTime},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{BackendClient, BackendError, BackendOperation, BackendReply};
use crate::config::LoopbackSettings;
use crate::protocol::BoundingBox;
use crate::shared_types::SessionId;
use crate::timing::format_millis;

// -----------------------------------------------------------------------------
// ----- LoopbackBackend -------------------------------------------------------

/// In-process stand-in for the compute service.
///
/// Keeps one worker per registered session id, the same bookkeeping the
/// real model server does: Register is idempotent per id, computations on an
/// unknown id fail, Terminate on an unknown id is a logged no-op.
#[derive(Debug)]
pub struct LoopbackBackend {
    settings: LoopbackSettings,
    workers: Mutex<HashMap<SessionId, Worker>>,
    counters: Counters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopbackStats {
    pub registrations: u64,
    pub computations: u64,
    pub terminations: u64,
    pub live_workers: usize,
}

#[derive(Debug)]
struct Worker {
    created_at: Instant,
    calls: u64,
}

#[derive(Debug, Default)]
struct Counters {
    registrations: AtomicU64,
    computations: AtomicU64,
    terminations: AtomicU64,
}

// -----------------------------------------------------------------------------
// ----- LoopbackBackend: Static -----------------------------------------------

impl LoopbackBackend {
    pub fn new(settings: LoopbackSettings) -> Self {
        Self {
            settings,
            workers: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new(LoopbackSettings::default())
    }
}

// -----------------------------------------------------------------------------
// ----- LoopbackBackend: Public -----------------------------------------------

impl LoopbackBackend {
    pub fn stats(&self) -> LoopbackStats {
        LoopbackStats {
            registrations: self.counters.registrations.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            terminations: self.counters.terminations.load(Ordering::Relaxed),
            live_workers: self.workers.lock().len(),
        }
    }

    pub fn has_worker(&self, session_id: &SessionId) -> bool {
        self.workers.lock().contains_key(session_id)
    }
}

// -----------------------------------------------------------------------------
// ----- LoopbackBackend: Private ----------------------------------------------

impl LoopbackBackend {
    async fn simulate_latency(&self) {
        if !self.settings.latency.is_zero() {
            tokio::time::sleep(self.settings.latency).await;
        }
    }

    fn touch_worker(
        &self,
        operation: BackendOperation,
        session_id: &SessionId,
    ) -> Result<(), BackendError> {
        let mut workers = self.workers.lock();
        let worker = workers.get_mut(session_id).ok_or_else(|| {
            BackendError::unavailable(operation, format!("no worker for session {session_id}"))
        })?;

        worker.calls += 1;
        self.counters.computations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- LoopbackBackend: BackendClient ----------------------------------------

#[async_trait]
impl BackendClient for LoopbackBackend {
    async fn register(&self, session_id: &SessionId) -> Result<BackendReply<String>, BackendError> {
        let started = Instant::now();
        self.simulate_latency().await;

        {
            let mut workers = self.workers.lock();
            workers.entry(session_id.clone()).or_insert_with(|| {
                info!("loopback: new worker for session {session_id}");
                Worker {
                    created_at: Instant::now(),
                    calls: 0,
                }
            });
        }
        self.counters.registrations.fetch_add(1, Ordering::Relaxed);

        Ok(BackendReply::new(
            "register".to_string(),
            timestamp(),
            format_millis(started.elapsed()),
        ))
    }

    async fn echo_compute(
        &self,
        session_id: &SessionId,
        payload: &str,
    ) -> Result<BackendReply<String>, BackendError> {
        let started = Instant::now();
        self.simulate_latency().await;
        self.touch_worker(BackendOperation::EchoCompute, session_id)?;

        Ok(BackendReply::new(
            payload.to_string(),
            timestamp(),
            format_millis(started.elapsed()),
        ))
    }

    async fn model_compute(
        &self,
        session_id: &SessionId,
        payload: &str,
    ) -> Result<BackendReply<Vec<BoundingBox>>, BackendError> {
        let started = Instant::now();
        self.simulate_latency().await;
        self.touch_worker(BackendOperation::ModelCompute, session_id)?;

        debug!("loopback: model run for session {session_id} on {payload:?}");

        Ok(BackendReply::new(
            self.settings.boxes.clone(),
            timestamp(),
            format_millis(started.elapsed()),
        ))
    }

    async fn terminate(&self, session_id: &SessionId) -> Result<(), BackendError> {
        self.simulate_latency().await;

        let removed = self.workers.lock().remove(session_id);
        match removed {
            Some(worker) => info!(
                "loopback: deleted worker for session {session_id} after {} calls ({:?} old)",
                worker.calls,
                worker.created_at.elapsed()
            ),
            None => info!(
                "loopback: attempted to delete worker for session {session_id} but none exists"
            ),
        }
        self.counters.terminations.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn timestamp() -> String {
    humantime::format_rfc3339_micros(SystemTime::now()).to_string()
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_is_idempotent_per_session() {
        let backend = LoopbackBackend::default();
        let id = SessionId::from("abc");

        let first = backend.register(&id).await.unwrap();
        let _ = backend.register(&id).await.unwrap();

        assert_eq!(first.value, "register");
        assert_eq!(backend.stats().registrations, 2);
        assert_eq!(backend.stats().live_workers, 1);
    }

    #[tokio::test]
    async fn computations_need_a_worker() {
        let backend = LoopbackBackend::default();
        let id = SessionId::from("ghost");

        let err = backend.echo_compute(&id, "hi").await.unwrap_err();
        assert_eq!(err.operation(), BackendOperation::EchoCompute);
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn model_compute_returns_configured_boxes_in_order() {
        let boxes = vec![BoundingBox::new(5, 6, 7, 8), BoundingBox::new(1, 2, 3, 4)];
        let backend = LoopbackBackend::new(LoopbackSettings {
            boxes: boxes.clone(),
            ..LoopbackSettings::default()
        });
        let id = SessionId::from("abc");

        backend.register(&id).await.unwrap();
        let reply = backend.model_compute(&id, "frame1").await.unwrap();

        assert_eq!(reply.value, boxes);
        assert!(reply.duration.contains('.'));
    }

    #[tokio::test]
    async fn terminate_drops_worker_and_tolerates_unknown_ids() {
        let backend = LoopbackBackend::default();
        let id = SessionId::from("abc");

        backend.register(&id).await.unwrap();
        assert!(backend.has_worker(&id));

        backend.terminate(&id).await.unwrap();
        assert!(!backend.has_worker(&id));

        backend.terminate(&id).await.unwrap();
        assert_eq!(backend.stats().terminations, 2);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
