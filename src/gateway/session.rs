use std::sync::Arc;

use tokio::{
    select,
    sync::{Notify, mpsc, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use super::hub::{AttachRequest, SessionHandle, SessionRegistry};
use crate::backend::{BackendClient, BackendContext, BackendError};
use crate::config::SessionSettings;
use crate::errors::{ErrorResponse, GatewayError};
use crate::net::BoxedConnection;
use crate::protocol::{
    BboxResult, ComputationKind, DataFrame, EchoResult, OutboundFrame, RegistrationAck,
    WireSerializable,
};
use crate::shared_types::{SessionId, SessionStage};
use crate::timing::{TimingRecord, TimingRecorder};

// -----------------------------------------------------------------------------
// ----- Session ---------------------------------------------------------------

/// One logical client conversation.
///
/// Owns the current client connection and the backend context. Runs in its
/// own task; the registry only keeps a [`SessionHandle`].
pub struct Session {
    id: SessionId,
    handle: SessionHandle,
    conn: Option<BoxedConnection>,
    context: Option<BackendContext>,

    ack_payload: String,
    registration_timing: TimingRecord,

    attach_rx: mpsc::Receiver<AttachRequest>,
    evict: Arc<Notify>,
    stage: watch::Sender<SessionStage>,
    shutdown: watch::Receiver<bool>,

    backend: Arc<dyn BackendClient>,
    registry: SessionRegistry,
    settings: SessionSettings,
}

/// Why the active loop stopped.
#[derive(Debug)]
enum SessionEnd {
    /// Client asked for it with `terminateSession: "true"`.
    Requested,
    /// Removed from the registry.
    Evicted,
    Shutdown,
    Failed(GatewayError),
}

// -----------------------------------------------------------------------------
// ----- Session: Static -------------------------------------------------------

impl Session {
    /// Build a session around a context the backend just registered.
    /// Nothing runs until [`Session::run`].
    pub(crate) fn new(
        conn: BoxedConnection,
        context: BackendContext,
        ack_payload: String,
        registration_timing: TimingRecord,
        backend: Arc<dyn BackendClient>,
        registry: SessionRegistry,
        settings: SessionSettings,
    ) -> Self {
        let id = context.session_id().clone();
        let (attach_tx, attach_rx) = mpsc::channel(settings.attach_queue);
        let (stage, stage_rx) = watch::channel(SessionStage::Registering);
        let evict = Arc::new(Notify::new());
        let handle = SessionHandle::new(
            id.clone(),
            registry.next_instance(),
            attach_tx,
            evict.clone(),
            stage_rx,
        );
        let shutdown = registry.shutdown_signal();

        Self {
            id,
            handle,
            conn: Some(conn),
            context: Some(context),
            ack_payload,
            registration_timing,
            attach_rx,
            evict,
            stage,
            shutdown,
            backend,
            registry,
            settings,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Public -------------------------------------------------------

impl Session {
    /// Acknowledge the registration, serve the client until the session ends,
    /// then tear down on both sides.
    pub async fn run(mut self) {
        self.set_stage(SessionStage::Active);

        let ack = self.registration_ack(self.registration_timing.clone());
        let end = match self.send(ack).await {
            Ok(()) => self.serve().await,
            Err(e) => SessionEnd::Failed(e),
        };

        self.teardown(end).await;
    }

    /// Tear down a session that never started serving.
    pub(crate) async fn abort(self, error: GatewayError) {
        self.teardown(SessionEnd::Failed(error)).await;
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Active loop --------------------------------------------------

impl Session {
    async fn serve(&mut self) -> SessionEnd {
        let idle = self.settings.idle_timeout;

        loop {
            if *self.shutdown.borrow() {
                return SessionEnd::Shutdown;
            }

            let Some(conn) = self.conn.as_mut() else {
                return SessionEnd::Failed(GatewayError::ConnectionClosed);
            };

            select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return SessionEnd::Shutdown;
                    }
                }

                _ = self.evict.notified() => {
                    info!("session {}: removed from registry", self.id);
                    return SessionEnd::Evicted;
                }

                Some(request) = self.attach_rx.recv() => {
                    if let Err(e) = self.reattach(request).await {
                        return SessionEnd::Failed(e);
                    }
                }

                received = timeout(idle, conn.recv_frame()) => {
                    let frame = match received {
                        Err(_) => return SessionEnd::Failed(GatewayError::IdleTimeout(idle)),
                        Ok(Err(e)) => return SessionEnd::Failed(e),
                        Ok(Ok(None)) => return SessionEnd::Failed(GatewayError::ConnectionClosed),
                        Ok(Ok(Some(frame))) => frame,
                    };

                    let message = match DataFrame::from_frame(&frame) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("session {}: rejecting frame: {e}", self.id);
                            return SessionEnd::Failed(e.into());
                        }
                    };

                    if message.terminate {
                        info!("session {}: client requested termination", self.id);
                        return SessionEnd::Requested;
                    }

                    let reply = match dispatch(self.backend.as_ref(), &self.id, &message).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            warn!("session {}: {e}", self.id);
                            return SessionEnd::Failed(e.into());
                        }
                    };

                    if let Err(e) = self.send(reply).await {
                        debug!("session {}: reply discarded: {e}", self.id);
                        return SessionEnd::Failed(e);
                    }
                }
            }
        }
    }

    /// The client came back under the same id: the new connection wins, the
    /// old one is closed, and the backend context is reused as is.
    async fn reattach(&mut self, request: AttachRequest) -> Result<(), GatewayError> {
        // Dropping `returned` tells the caller the connection was adopted.
        let AttachRequest { conn, start_time, .. } = request;
        info!("session {}: reconnect from {}", self.id, conn.peer());

        if let Some(mut old) = self.conn.replace(conn) {
            old.close(Some(ErrorResponse::going_away("superseded by a new connection")))
                .await;
        }

        let ack = self.registration_ack(self.registration_timing.replayed(start_time));
        self.send(ack).await
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Teardown -----------------------------------------------------

impl Session {
    async fn teardown(mut self, end: SessionEnd) {
        self.set_stage(SessionStage::Terminating);

        match &end {
            SessionEnd::Requested => info!("session {}: terminating on request", self.id),
            SessionEnd::Evicted => info!("session {}: terminating after removal", self.id),
            SessionEnd::Shutdown => info!("session {}: terminating for shutdown", self.id),
            SessionEnd::Failed(e) if e.is_disconnect() => {
                info!("session {}: connection lost ({e}); terminating", self.id)
            }
            SessionEnd::Failed(e) => warn!("session {}: terminating after error: {e}", self.id),
        }

        // No reconnect can reach this session anymore. Queued ones go back to
        // their callers, which register fresh once this session has closed.
        self.attach_rx.close();
        while let Ok(AttachRequest { conn, returned, .. }) = self.attach_rx.try_recv() {
            debug!("session {}: handing back reconnect from {}", self.id, conn.peer());
            let _ = returned.send(conn);
        }

        if let Some(context) = self.context.take() {
            let _ = context.release(self.backend.as_ref()).await;
        }

        if let Some(mut conn) = self.conn.take() {
            let reason = match &end {
                SessionEnd::Requested => Some(ErrorResponse::normal("session terminated")),
                SessionEnd::Evicted => Some(ErrorResponse::going_away("session removed")),
                SessionEnd::Shutdown => Some(ErrorResponse::going_away("gateway shutting down")),
                SessionEnd::Failed(e) => e.to_error_response(),
            };
            conn.close(reason).await;
        }

        self.registry.release(&self.handle).await;
        self.set_stage(SessionStage::Closed);
        info!("session {} closed", self.id);
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Private ------------------------------------------------------

impl Session {
    fn set_stage(&self, stage: SessionStage) {
        debug!("session {}: {}", self.id, stage.as_str());
        self.stage.send_replace(stage);
    }

    fn registration_ack(&self, timing_data: TimingRecord) -> OutboundFrame {
        RegistrationAck {
            session_id: self.id.as_str().to_string(),
            echoed_message: self.ack_payload.clone(),
            timing_data,
        }
        .into()
    }

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), GatewayError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(GatewayError::ConnectionClosed);
        };

        let text = frame.to_frame()?;
        debug!("session {}: sending {}", self.id, frame.kind());
        conn.send_frame(text).await
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Dispatch ----------------------------------------------------

/// Run the backend operation a data frame selects and shape its reply.
async fn dispatch(
    backend: &dyn BackendClient,
    id: &SessionId,
    message: &DataFrame,
) -> Result<OutboundFrame, BackendError> {
    debug!(
        "session {id}: {} request ({} bytes)",
        message.kind,
        message.message.len()
    );

    let recorder = TimingRecorder::start();

    let reply: OutboundFrame = match message.kind {
        ComputationKind::Echo => {
            let reply = backend.echo_compute(id, &message.message).await?;
            let timing_data = recorder.finish(reply.timestamp, reply.duration, &message.start_time);
            EchoResult {
                echoed_message: reply.value,
                timing_data,
            }
            .into()
        }

        ComputationKind::Bbox => {
            let reply = backend.model_compute(id, &message.message).await?;
            let timing_data = recorder.finish(reply.timestamp, reply.duration, &message.start_time);
            BboxResult {
                bbox_data: reply.value,
                timing_data,
            }
            .into()
        }
    };

    Ok(reply)
}
