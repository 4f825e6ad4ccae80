pub mod hub;
pub mod session;

pub use hub::{Lookup, Reservation, SessionHandle, SessionRegistry};
pub use session::Session;

use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::{BackendClient, BackendContext};
use crate::config::SessionSettings;
use crate::errors::GatewayError;
use crate::net::BoxedConnection;
use crate::protocol::{RegistrationFrame, WireSerializable};
use crate::timing::TimingRecorder;

// -----------------------------------------------------------------------------
// ----- Gateway ---------------------------------------------------------------

/// Entry point for new client connections: reads the registration frame and
/// either attaches the connection to its live session or creates one.
#[derive(Clone)]
pub struct Gateway {
    registry: SessionRegistry,
    backend: Arc<dyn BackendClient>,
    settings: SessionSettings,
}

// -----------------------------------------------------------------------------
// ----- Gateway: Static -------------------------------------------------------

impl Gateway {
    /// Spawns the session registry, so this must run inside a runtime.
    pub fn new(backend: Arc<dyn BackendClient>, settings: SessionSettings) -> Self {
        Self {
            registry: SessionRegistry::spawn(),
            backend,
            settings,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Public -------------------------------------------------------

impl Gateway {
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Handle first contact on `conn`. Returns once the connection belongs to
    /// a session task or has been closed.
    pub async fn accept(&self, mut conn: BoxedConnection) -> Result<(), GatewayError> {
        let registration = match self.read_registration(&mut conn).await {
            Ok(registration) => registration,
            Err(e) => {
                warn!("{}: bad registration: {e}", conn.peer());
                conn.close(e.to_error_response()).await;
                return Err(e);
            }
        };

        let id = registration.session_id.clone();
        debug!("{}: registration for session {id}", conn.peer());

        loop {
            let lookup = match self.registry.lookup_or_prepare(id.clone()).await {
                Ok(lookup) => lookup,
                Err(e) => {
                    conn.close(e.to_error_response()).await;
                    return Err(e);
                }
            };

            match lookup {
                Lookup::Existing(handle) => {
                    match handle.attach(conn, registration.start_time.clone()).await {
                        Ok(()) => return Ok(()),
                        Err(returned) => {
                            // Session is on its way out; wait for it so the
                            // next Register cannot overlap its Terminate.
                            debug!("session {id} is closing; retrying registration");
                            conn = returned;
                            handle.closed().await;
                        }
                    }
                }

                Lookup::Prepared(reservation) => {
                    return self.register(conn, registration, reservation).await;
                }
            }
        }
    }

    /// Stop taking sessions and terminate the live ones.
    pub async fn shutdown(&self, grace: Duration) {
        self.registry.shutdown(grace).await;
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Private ------------------------------------------------------

impl Gateway {
    async fn read_registration(
        &self,
        conn: &mut BoxedConnection,
    ) -> Result<RegistrationFrame, GatewayError> {
        let idle = self.settings.idle_timeout;
        let frame = timeout(idle, conn.recv_frame())
            .await
            .map_err(|_| GatewayError::IdleTimeout(idle))??
            .ok_or(GatewayError::ConnectionClosed)?;

        Ok(RegistrationFrame::from_frame(&frame)?)
    }

    async fn register(
        &self,
        mut conn: BoxedConnection,
        registration: RegistrationFrame,
        reservation: Reservation,
    ) -> Result<(), GatewayError> {
        let RegistrationFrame {
            session_id,
            start_time,
        } = registration;

        let recorder = TimingRecorder::start();
        let reply = match self.backend.register(&session_id).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("session {session_id}: register failed: {e}");
                drop(reservation);
                let e = GatewayError::from(e);
                conn.close(e.to_error_response()).await;
                return Err(e);
            }
        };
        let timing = recorder.finish(reply.timestamp, reply.duration, start_time);

        let session = Session::new(
            conn,
            BackendContext::new(session_id.clone()),
            reply.value,
            timing,
            self.backend.clone(),
            self.registry.clone(),
            self.settings.clone(),
        );

        let handle = session.handle().clone();
        if let Err(e) = self.registry.insert(reservation, handle).await {
            session.abort(GatewayError::RegistryClosed).await;
            return Err(e);
        }

        info!("session {session_id} active");
        tokio::spawn(session.run());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
