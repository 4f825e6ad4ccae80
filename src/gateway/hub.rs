use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::{Notify, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::errors::GatewayError;
use crate::net::BoxedConnection;
use crate::shared_types::{SessionId, SessionStage};

// -----------------------------------------------------------------------------
// ----- SessionHandle ---------------------------------------------------------

/// What the registry stores for a live session: enough to hand it a new
/// connection and to watch it close. The session itself lives in its own task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    instance: u64,
    attach: mpsc::Sender<AttachRequest>,
    evict: Arc<Notify>,
    stage: watch::Receiver<SessionStage>,
}

/// A reconnecting client, handed to the session that owns its id.
///
/// The session either adopts `conn` and drops `returned`, or sends `conn`
/// back through `returned` if it is already terminating.
pub struct AttachRequest {
    pub conn: BoxedConnection,
    pub start_time: String,
    pub returned: oneshot::Sender<BoxedConnection>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        instance: u64,
        attach: mpsc::Sender<AttachRequest>,
        evict: Arc<Notify>,
        stage: watch::Receiver<SessionStage>,
    ) -> Self {
        Self {
            id,
            instance,
            attach,
            evict,
            stage,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Distinguishes sessions that reused the same id over time.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Hand `conn` to the session and wait for it to be adopted. Gives the
    /// connection back if the session has stopped taking reconnects.
    pub async fn attach(&self, conn: BoxedConnection, start_time: String) -> Result<(), BoxedConnection> {
        let (returned, returned_rx) = oneshot::channel();
        self.attach
            .send(AttachRequest {
                conn,
                start_time,
                returned,
            })
            .await
            .map_err(|mpsc::error::SendError(request)| request.conn)?;

        match returned_rx.await {
            Ok(conn) => Err(conn),
            // Sender dropped: the session took the connection.
            Err(_) => Ok(()),
        }
    }

    /// Ask the session to terminate. Returns immediately; see
    /// [`SessionHandle::closed`].
    pub fn evict(&self) {
        self.evict.notify_one();
    }

    /// Resolves once the session reached `Closed`.
    pub async fn closed(&self) {
        let mut stage = self.stage.clone();
        // An error means the session task is gone, which is closed too.
        let _ = stage.wait_for(|s| s.is_closed()).await;
    }
}

// -----------------------------------------------------------------------------
// ----- Lookup / Reservation --------------------------------------------------

/// Answer to [`SessionRegistry::lookup_or_prepare`].
#[derive(Debug)]
pub enum Lookup {
    /// A live session owns the id; attach to it, do not register again.
    Existing(SessionHandle),

    /// The caller owns the id until it inserts or drops the reservation.
    Prepared(Reservation),
}

/// Exclusive right to create the session for one id.
///
/// Dropping it without [`SessionRegistry::insert`] gives the id back; the
/// next waiter for the same id, if any, is promoted to preparer.
#[derive(Debug)]
pub struct Reservation {
    id: SessionId,
    token: u64,
    commands: mpsc::UnboundedSender<Command>,
    armed: bool,
}

impl Reservation {
    pub fn id(&self) -> &SessionId {
        &self.id
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.commands.send(Command::Abandon {
                id: self.id.clone(),
                token: self.token,
            });
        }
    }
}

// -----------------------------------------------------------------------------
// ----- SessionRegistry -------------------------------------------------------

/// Process-wide table of live sessions.
///
/// A single actor task owns the map; every read and write is a command on its
/// channel, so operations are linearized in arrival order and no lock is held
/// across an await. Backend calls never run on the actor, so sessions with
/// different ids only ever wait on each other for one command.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Receiver<bool>,
    instances: Arc<AtomicU64>,
}

#[derive(Debug)]
enum Command {
    LookupOrPrepare {
        id: SessionId,
        reply: oneshot::Sender<Result<Lookup, GatewayError>>,
    },
    Insert {
        id: SessionId,
        token: u64,
        handle: SessionHandle,
        reply: oneshot::Sender<()>,
    },
    Abandon {
        id: SessionId,
        token: u64,
    },
    Get {
        id: SessionId,
        reply: oneshot::Sender<Option<SessionHandle>>,
    },
    Remove {
        id: SessionId,
        reply: oneshot::Sender<Option<SessionHandle>>,
    },
    Release {
        id: SessionId,
        instance: u64,
        reply: oneshot::Sender<bool>,
    },
    List {
        reply: oneshot::Sender<Vec<SessionHandle>>,
    },
    Shutdown {
        reply: oneshot::Sender<Vec<SessionHandle>>,
    },
}

// -----------------------------------------------------------------------------
// ----- SessionRegistry: Static -----------------------------------------------

impl SessionRegistry {
    /// Start the owning actor on the current runtime.
    pub fn spawn() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = watch::channel(false);

        let actor = RegistryActor {
            slots: HashMap::new(),
            commands: commands.clone(),
            next_token: 0,
            accepting: true,
            shutdown: shutdown_tx,
        };
        tokio::spawn(actor.run(rx));

        Self {
            commands,
            shutdown,
            instances: Arc::new(AtomicU64::new(1)),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- SessionRegistry: Public -----------------------------------------------

impl SessionRegistry {
    /// Serialized existence check. Waits while another caller is preparing
    /// the same id, then returns either its session or the reservation.
    pub async fn lookup_or_prepare(&self, id: SessionId) -> Result<Lookup, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::LookupOrPrepare { id, reply })?;
        rx.await.map_err(|_| GatewayError::RegistryClosed)?
    }

    /// Install a freshly created session under its reserved id.
    pub async fn insert(&self, mut reservation: Reservation, handle: SessionHandle) -> Result<(), GatewayError> {
        reservation.armed = false;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Insert {
            id: reservation.id.clone(),
            token: reservation.token,
            handle,
            reply,
        })?;
        rx.await.map_err(|_| GatewayError::RegistryClosed)
    }

    pub async fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get {
            id: id.clone(),
            reply,
        })
        .ok()?;
        rx.await.ok().flatten()
    }

    /// Terminate the live session for `id` and wait until it has closed and
    /// left the table. Removing an absent id is a no-op.
    pub async fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Remove {
            id: id.clone(),
            reply,
        })
        .ok()?;
        let handle = rx.await.ok().flatten()?;
        handle.closed().await;
        Some(handle)
    }

    /// Remove `handle`'s entry only if it is still the live one for its id.
    pub async fn release(&self, handle: &SessionHandle) -> bool {
        let (reply, rx) = oneshot::channel();
        let sent = self.send(Command::Release {
            id: handle.id.clone(),
            instance: handle.instance,
            reply,
        });
        if sent.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn sessions(&self) -> Vec<SessionHandle> {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::List { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.sessions().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop taking registrations, tell every live session to terminate, and
    /// wait up to `grace` for them to close.
    pub async fn shutdown(&self, grace: Duration) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).is_err() {
            return;
        }
        let live = rx.await.unwrap_or_default();
        if live.is_empty() {
            return;
        }

        info!("waiting for {} sessions to close", live.len());
        let drained = async {
            for handle in &live {
                handle.closed().await;
            }
        };
        if tokio::time::timeout(grace, drained).await.is_err() {
            warn!("sessions still open after {:?} shutdown grace", grace);
        }
    }

    /// Flips to `true` once [`SessionRegistry::shutdown`] has been called.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    pub(crate) fn next_instance(&self) -> u64 {
        self.instances.fetch_add(1, Ordering::Relaxed)
    }
}

// -----------------------------------------------------------------------------
// ----- SessionRegistry: Private ----------------------------------------------

impl SessionRegistry {
    fn send(&self, command: Command) -> Result<(), GatewayError> {
        self.commands
            .send(command)
            .map_err(|_| GatewayError::RegistryClosed)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: RegistryActor -----------------------------------------------

#[derive(Debug)]
enum Slot {
    /// Someone holds the reservation; later callers queue here.
    Pending {
        token: u64,
        waiters: VecDeque<oneshot::Sender<Result<Lookup, GatewayError>>>,
    },
    Live(SessionHandle),
}

struct RegistryActor {
    slots: HashMap<SessionId, Slot>,
    commands: mpsc::UnboundedSender<Command>,
    next_token: u64,
    accepting: bool,
    shutdown: watch::Sender<bool>,
}

impl RegistryActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        debug!("session registry stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::LookupOrPrepare { id, reply } => self.lookup_or_prepare(id, reply),

            Command::Insert {
                id,
                token,
                handle,
                reply,
            } => {
                self.insert(id, token, handle);
                let _ = reply.send(());
            }

            Command::Abandon { id, token } => self.abandon(id, token),

            Command::Get { id, reply } => {
                let found = match self.slots.get(&id) {
                    Some(Slot::Live(handle)) => Some(handle.clone()),
                    _ => None,
                };
                let _ = reply.send(found);
            }

            Command::Remove { id, reply } => {
                // The slot stays until the session releases it, so the id
                // cannot be registered again while its backend context lives.
                // Reservations belong to their preparer and are left alone.
                let removed = match self.slots.get(&id) {
                    Some(Slot::Live(handle)) => {
                        debug!("session {id} evicted from registry");
                        handle.evict();
                        Some(handle.clone())
                    }
                    Some(Slot::Pending { .. }) | None => None,
                };
                let _ = reply.send(removed);
            }

            Command::Release {
                id,
                instance,
                reply,
            } => {
                let current = matches!(
                    self.slots.get(&id),
                    Some(Slot::Live(handle)) if handle.instance == instance
                );
                if current {
                    self.slots.remove(&id);
                    debug!("session {id} released from registry");
                }
                let _ = reply.send(current);
            }

            Command::List { reply } => {
                let _ = reply.send(self.live_handles());
            }

            Command::Shutdown { reply } => {
                self.accepting = false;
                let _ = self.shutdown.send(true);
                let _ = reply.send(self.live_handles());
            }
        }
    }

    fn lookup_or_prepare(
        &mut self,
        id: SessionId,
        reply: oneshot::Sender<Result<Lookup, GatewayError>>,
    ) {
        match self.slots.get_mut(&id) {
            Some(Slot::Live(handle)) => {
                let _ = reply.send(Ok(Lookup::Existing(handle.clone())));
            }

            Some(Slot::Pending { waiters, .. }) => {
                debug!("session {id} is being registered; queueing lookup");
                waiters.push_back(reply);
            }

            None if !self.accepting => {
                let _ = reply.send(Err(GatewayError::RegistryClosed));
            }

            None => {
                let token = self.next_token();
                self.slots.insert(
                    id.clone(),
                    Slot::Pending {
                        token,
                        waiters: VecDeque::new(),
                    },
                );
                let reservation = self.reservation(id, token);
                // A dropped receiver drops the reservation, which abandons it.
                let _ = reply.send(Ok(Lookup::Prepared(reservation)));
            }
        }
    }

    fn insert(&mut self, id: SessionId, token: u64, handle: SessionHandle) {
        let waiters = match self.slots.remove(&id) {
            Some(Slot::Pending {
                token: current,
                waiters,
            }) if current == token => waiters,

            other => {
                // Only the reservation holder can insert, so this is a bug.
                warn!("insert for session {id} without a matching reservation");
                if let Some(slot) = other {
                    self.slots.insert(id, slot);
                }
                return;
            }
        };

        info!(
            "session {id} registered (instance {}, {} waiting)",
            handle.instance,
            waiters.len()
        );

        for waiter in waiters {
            debug!("session {id}: concurrent first contact adopts the winner");
            let _ = waiter.send(Ok(Lookup::Existing(handle.clone())));
        }
        self.slots.insert(id, Slot::Live(handle));
    }

    fn abandon(&mut self, id: SessionId, token: u64) {
        let Some(Slot::Pending {
            token: current,
            waiters,
        }) = self.slots.get_mut(&id)
        else {
            return;
        };
        if *current != token {
            return;
        }

        match waiters.pop_front() {
            Some(next) => {
                let token = self.next_token;
                self.next_token += 1;
                *current = token;
                // A dropped receiver drops the reservation, which abandons
                // it again and moves on to the following waiter.
                debug!("session {id}: registration abandoned; promoting next waiter");
                let reservation = self.reservation(id, token);
                let _ = next.send(Ok(Lookup::Prepared(reservation)));
            }
            None => {
                debug!("session {id}: registration abandoned");
                self.slots.remove(&id);
            }
        }
    }

    fn reservation(&self, id: SessionId, token: u64) -> Reservation {
        Reservation {
            id,
            token,
            commands: self.commands.clone(),
            armed: true,
        }
    }

    fn next_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    fn live_handles(&self) -> Vec<SessionHandle> {
        self.slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Live(handle) => Some(handle.clone()),
                Slot::Pending { .. } => None,
            })
            .collect()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_for(registry: &SessionRegistry, id: &str) -> (SessionHandle, watch::Sender<SessionStage>) {
        let (attach, _attach_rx) = mpsc::channel(1);
        let (stage_tx, stage_rx) = watch::channel(SessionStage::Active);
        let handle = SessionHandle::new(
            SessionId::from(id),
            registry.next_instance(),
            attach,
            Arc::new(Notify::new()),
            stage_rx,
        );
        (handle, stage_tx)
    }

    /// A stand-in session task that closes and releases itself when evicted.
    fn spawn_evictable(registry: &SessionRegistry, id: &str) -> SessionHandle {
        let (attach, _attach_rx) = mpsc::channel(1);
        let evict = Arc::new(Notify::new());
        let (stage_tx, stage_rx) = watch::channel(SessionStage::Active);
        let handle = SessionHandle::new(
            SessionId::from(id),
            registry.next_instance(),
            attach,
            evict.clone(),
            stage_rx,
        );

        let registry = registry.clone();
        let own = handle.clone();
        tokio::spawn(async move {
            evict.notified().await;
            stage_tx.send_replace(SessionStage::Terminating);
            registry.release(&own).await;
            stage_tx.send_replace(SessionStage::Closed);
        });
        handle
    }

    async fn prepare(registry: &SessionRegistry, id: &str) -> Reservation {
        match registry.lookup_or_prepare(SessionId::from(id)).await.unwrap() {
            Lookup::Prepared(reservation) => reservation,
            Lookup::Existing(_) => panic!("expected a reservation for {id}"),
        }
    }

    #[tokio::test]
    async fn unseen_id_is_prepared_then_found() {
        let registry = SessionRegistry::spawn();

        let reservation = prepare(&registry, "S1").await;
        let (handle, _stage) = handle_for(&registry, "S1");
        registry.insert(reservation, handle.clone()).await.unwrap();

        match registry.lookup_or_prepare(SessionId::from("S1")).await.unwrap() {
            Lookup::Existing(found) => assert_eq!(found.instance(), handle.instance()),
            Lookup::Prepared(_) => panic!("expected existing session"),
        }
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_first_contacts_get_one_reservation() {
        let registry = SessionRegistry::spawn();

        let winner = prepare(&registry, "race").await;

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.lookup_or_prepare(SessionId::from("race")).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let (handle, _stage) = handle_for(&registry, "race");
        registry.insert(winner, handle.clone()).await.unwrap();

        match waiter.await.unwrap().unwrap() {
            Lookup::Existing(found) => assert_eq!(found.instance(), handle.instance()),
            Lookup::Prepared(_) => panic!("second caller must adopt the winner"),
        }
    }

    #[tokio::test]
    async fn abandoned_reservation_promotes_next_waiter() {
        let registry = SessionRegistry::spawn();

        let first = prepare(&registry, "S").await;
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.lookup_or_prepare(SessionId::from("S")).await })
        };
        tokio::task::yield_now().await;

        drop(first);

        match waiter.await.unwrap().unwrap() {
            Lookup::Prepared(reservation) => assert_eq!(reservation.id().as_str(), "S"),
            Lookup::Existing(_) => panic!("nothing was inserted"),
        }
    }

    #[tokio::test]
    async fn abandoned_reservation_frees_the_id() {
        let registry = SessionRegistry::spawn();

        drop(prepare(&registry, "S").await);
        let again = prepare(&registry, "S").await;
        assert_eq!(again.id().as_str(), "S");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn distinct_ids_do_not_wait_on_each_other() {
        let registry = SessionRegistry::spawn();

        let _held = prepare(&registry, "id1").await;
        let other = tokio::time::timeout(
            Duration::from_secs(1),
            registry.lookup_or_prepare(SessionId::from("id2")),
        )
        .await
        .expect("id2 must not wait for id1")
        .unwrap();
        assert!(matches!(other, Lookup::Prepared(_)));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SessionRegistry::spawn();

        let reservation = prepare(&registry, "S").await;
        let handle = spawn_evictable(&registry, "S");
        registry.insert(reservation, handle).await.unwrap();

        assert!(registry.remove(&SessionId::from("S")).await.is_some());
        assert!(registry.remove(&SessionId::from("S")).await.is_none());
        assert!(registry.remove(&SessionId::from("never")).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn remove_keeps_the_id_until_the_session_has_closed() {
        let registry = SessionRegistry::spawn();

        let reservation = prepare(&registry, "S").await;
        let (handle, stage) = handle_for(&registry, "S");
        registry.insert(reservation, handle.clone()).await.unwrap();

        let remover = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.remove(&SessionId::from("S")).await })
        };
        tokio::task::yield_now().await;

        // Still terminating: a new contact must find the old session, not
        // prepare a second one.
        assert!(!remover.is_finished());
        match registry.lookup_or_prepare(SessionId::from("S")).await.unwrap() {
            Lookup::Existing(found) => assert_eq!(found.instance(), handle.instance()),
            Lookup::Prepared(_) => panic!("id must stay taken while the session closes"),
        }

        assert!(registry.release(&handle).await);
        stage.send_replace(SessionStage::Closed);

        let removed = remover.await.unwrap().unwrap();
        assert_eq!(removed.instance(), handle.instance());
        assert!(matches!(
            registry.lookup_or_prepare(SessionId::from("S")).await.unwrap(),
            Lookup::Prepared(_)
        ));
    }

    #[tokio::test]
    async fn attach_hands_back_a_refused_connection() {
        let registry = SessionRegistry::spawn();
        let (attach, mut attach_rx) = mpsc::channel(1);
        let (_stage_tx, stage_rx) = watch::channel(SessionStage::Terminating);
        let handle = SessionHandle::new(
            SessionId::from("S"),
            registry.next_instance(),
            attach,
            Arc::new(Notify::new()),
            stage_rx,
        );

        let session = tokio::spawn(async move {
            let request = attach_rx.recv().await.unwrap();
            let _ = request.returned.send(request.conn);
        });

        let (conn, _client) = crate::net::memory_pair("late");
        let returned = handle.attach(Box::new(conn), "t1".into()).await.unwrap_err();
        assert_eq!(returned.peer(), "late");
        session.await.unwrap();
    }

    #[tokio::test]
    async fn release_only_removes_the_same_instance() {
        let registry = SessionRegistry::spawn();

        let reservation = prepare(&registry, "S").await;
        let (old, _old_stage) = handle_for(&registry, "S");
        registry.insert(reservation, old.clone()).await.unwrap();
        assert!(registry.release(&old).await);

        let reservation = prepare(&registry, "S").await;
        let (fresh, _fresh_stage) = handle_for(&registry, "S");
        registry.insert(reservation, fresh.clone()).await.unwrap();

        assert!(!registry.release(&old).await);
        assert_eq!(
            registry.get(&SessionId::from("S")).await.map(|h| h.instance()),
            Some(fresh.instance())
        );
    }

    #[tokio::test]
    async fn shutdown_refuses_new_ids_and_waits_for_live_sessions() {
        let registry = SessionRegistry::spawn();

        let reservation = prepare(&registry, "S").await;
        let (handle, stage) = handle_for(&registry, "S");
        registry.insert(reservation, handle).await.unwrap();

        let mut signal = registry.shutdown_signal();
        let closer = tokio::spawn(async move {
            signal.wait_for(|down| *down).await.unwrap();
            stage.send(SessionStage::Closed).unwrap();
        });

        registry.shutdown(Duration::from_secs(1)).await;
        closer.await.unwrap();

        let err = registry.lookup_or_prepare(SessionId::from("late")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RegistryClosed));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
