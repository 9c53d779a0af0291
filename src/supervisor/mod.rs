//! Connection supervision for the protocol session.
//!
//! One supervise loop owns the only live session. It connects with persisted
//! credentials, pumps lifecycle events into the state machine, persists key
//! rotations, and applies the reconnect policy on close:
//!
//! ```text
//! Disconnected --start--> Connecting --opened--> Open
//!      ^                                           |
//!      |                closed(transient, backoff) |
//!      +-------------------------------------------+
//!                closed(LoggedOut): purge creds, halt
//! ```
//!
//! A supervised restart fully tears down the outgoing instance (slot cleared,
//! `close()` awaited, event subscription dropped) before the next connect, so
//! two live sessions can never coexist for the same identity.

mod policy;

pub use policy::ReconnectPolicy;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;

use crate::creds::CredentialStore;
use crate::session::{DisconnectReason, ProtocolSession, SessionConnector, SessionEvent};
use crate::status::{StatusEvent, StatusPublisher};

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionPhase::Disconnected => write!(f, "disconnected"),
            ConnectionPhase::Connecting => write!(f, "connecting"),
            ConnectionPhase::Open => write!(f, "open"),
            ConnectionPhase::Closing => write!(f, "closing"),
        }
    }
}

/// Supervisor-owned connection state. Nothing else mutates this.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub last_disconnect_reason: Option<DisconnectReason>,
    /// Monotonic within a connect cycle; reset to 0 on reaching `Open`.
    pub reconnect_attempts: u32,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            last_disconnect_reason: None,
            reconnect_attempts: 0,
        }
    }
}

/// A session reference plus the generation it belongs to.
///
/// Holders must treat the reference as invalid once the supervisor's
/// generation moves past `generation` (a restart happened underneath them).
#[derive(Clone)]
pub struct SessionRef {
    pub generation: u64,
    pub session: Arc<dyn ProtocolSession>,
}

/// Owns the protocol session and its reconnect lifecycle.
pub struct ConnectionSupervisor {
    connector: Arc<dyn SessionConnector>,
    store: CredentialStore,
    publisher: StatusPublisher,
    policy: ReconnectPolicy,
    /// Greeting sent to the session's own user on open; empty disables.
    ready_message: String,
    state: RwLock<ConnectionState>,
    current: RwLock<Option<SessionRef>>,
    generation: AtomicU64,
    halted: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionSupervisor {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        store: CredentialStore,
        publisher: StatusPublisher,
        policy: ReconnectPolicy,
        ready_message: String,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            connector,
            store,
            publisher,
            policy,
            ready_message,
            state: RwLock::new(ConnectionState::new()),
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            halted: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// Start the supervise loop on a new task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move { supervisor.run().await })
    }

    /// Request a graceful stop. The loop exits at its next suspension point.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// The live session, only while the connection is `Open`.
    pub async fn session(&self) -> Option<SessionRef> {
        if self.state.read().await.phase != ConnectionPhase::Open {
            return None;
        }
        self.current.read().await.clone()
    }

    /// Generation of the most recent connect cycle.
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Snapshot of the connection state machine.
    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    /// True once a terminal disconnect stopped supervision.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow() || self.is_halted() {
                break;
            }

            self.set_phase(ConnectionPhase::Connecting).await;

            let creds = match self.store.load() {
                Ok(creds) => creds,
                Err(e) => {
                    tracing::error!("Failed to load credentials: {}", e);
                    if self.backoff(&mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };

            let session = match self.connector.connect(&creds).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("Connect failed: {}", e);
                    self.set_phase(ConnectionPhase::Disconnected).await;
                    if self.backoff(&mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let mut events = session.lifecycle();
            *self.current.write().await = Some(SessionRef {
                generation,
                session: Arc::clone(&session),
            });
            tracing::info!(generation, "Session constructed, awaiting open");

            let close_reason = self
                .pump_events(&session, &mut events, &mut shutdown_rx)
                .await;

            // Full teardown before anything else may connect: drop the shared
            // reference first so no dispatcher picks up a dying session.
            self.set_phase(ConnectionPhase::Closing).await;
            *self.current.write().await = None;
            session.close().await;
            drop(events);

            {
                let mut state = self.state.write().await;
                state.phase = ConnectionPhase::Disconnected;
                state.last_disconnect_reason = close_reason;
            }

            let Some(reason) = close_reason else {
                // Shutdown was requested while the session was live.
                break;
            };

            self.publisher
                .publish(StatusEvent::connection_closed(reason));

            if reason.is_terminal() {
                tracing::error!("Remote service logged this device out; halting supervision");
                if let Err(e) = self.store.clear() {
                    tracing::error!("Failed to purge credentials: {}", e);
                }
                self.halted.store(true, Ordering::SeqCst);
                break;
            }

            tracing::info!("Disconnected ({}), reconnecting", reason);
            if self.backoff(&mut shutdown_rx).await {
                break;
            }
        }

        self.set_phase(ConnectionPhase::Disconnected).await;
        tracing::info!("Supervisor stopped");
    }

    /// Pump lifecycle events until the session closes or shutdown is asked.
    ///
    /// Returns the disconnect reason, or `None` when stopping for shutdown.
    async fn pump_events(
        &self,
        session: &Arc<dyn ProtocolSession>,
        events: &mut broadcast::Receiver<SessionEvent>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<DisconnectReason> {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return None,
                event = events.recv() => match event {
                    Ok(SessionEvent::Opened) => {
                        {
                            let mut state = self.state.write().await;
                            state.phase = ConnectionPhase::Open;
                            state.reconnect_attempts = 0;
                            state.last_disconnect_reason = None;
                        }
                        tracing::info!("Connection open");
                        self.publisher.publish(StatusEvent::ConnectionOpened);
                        self.send_ready_message(session).await;
                    }
                    Ok(SessionEvent::CredsRotated(delta)) => {
                        if let Err(e) = self.store.apply_delta(&delta) {
                            tracing::error!("Failed to persist rotated credentials: {}", e);
                        }
                    }
                    Ok(SessionEvent::Closed(reason)) => return Some(reason),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Lagged behind session events");
                    }
                    // Sender dropped without an orderly close.
                    Err(broadcast::error::RecvError::Closed) => {
                        return Some(DisconnectReason::ConnectionLost);
                    }
                },
            }
        }
    }

    async fn send_ready_message(&self, session: &Arc<dyn ProtocolSession>) {
        if self.ready_message.is_empty() {
            return;
        }
        let Some(user) = session.user_id() else {
            return;
        };
        if let Err(e) = session.send_message(&user, &self.ready_message).await {
            tracing::warn!("Failed to send ready message: {}", e);
        }
    }

    /// Sleep per policy before the next attempt. Returns true on shutdown.
    async fn backoff(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        let attempt = {
            let mut state = self.state.write().await;
            state.reconnect_attempts += 1;
            state.reconnect_attempts
        };
        let delay = self.policy.delay_for(attempt);
        tracing::debug!(attempt, ?delay, "Backing off before reconnect");

        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = shutdown_rx.changed() => true,
        }
    }

    async fn set_phase(&self, phase: ConnectionPhase) {
        self.state.write().await.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::creds::Credentials;
    use crate::error::SessionError;
    use crate::session::testing::{MockConnector, closed};
    use tempfile::TempDir;

    fn test_store() -> (CredentialStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("creds.json"));
        (store, dir)
    }

    fn supervisor_with(
        connector: Arc<MockConnector>,
        store: CredentialStore,
        publisher: StatusPublisher,
    ) -> Arc<ConnectionSupervisor> {
        ConnectionSupervisor::new(
            connector,
            store,
            publisher,
            ReconnectPolicy::immediate(),
            String::new(),
        )
    }

    async fn wait_until_open(supervisor: &ConnectionSupervisor) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if supervisor.state().await.phase == ConnectionPhase::Open {
                    return;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("supervisor never reached Open");
    }

    #[tokio::test]
    async fn test_reaches_open_and_exposes_session() {
        let connector = Arc::new(MockConnector::new());
        let (store, _dir) = test_store();
        let supervisor = supervisor_with(Arc::clone(&connector), store, StatusPublisher::new());

        let handle = supervisor.spawn();
        wait_until_open(&supervisor).await;

        let session_ref = supervisor.session().await.expect("session while open");
        assert_eq!(session_ref.generation, 1);
        assert_eq!(supervisor.state().await.reconnect_attempts, 0);

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_session_exposed_before_open() {
        let connector = Arc::new(MockConnector::new());
        connector.manual_open();
        let (store, _dir) = test_store();
        let supervisor = supervisor_with(Arc::clone(&connector), store, StatusPublisher::new());

        let handle = supervisor.spawn();

        // Let the loop connect; the session never opens.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(supervisor.session().await.is_none());
        assert_eq!(supervisor.state().await.phase, ConnectionPhase::Connecting);

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_close_reconnects_with_new_generation() {
        let connector = Arc::new(MockConnector::new());
        let (store, _dir) = test_store();
        let publisher = StatusPublisher::new();
        let mut events = publisher.subscribe();
        let supervisor = supervisor_with(Arc::clone(&connector), store, publisher);

        let handle = supervisor.spawn();
        wait_until_open(&supervisor).await;
        let first = supervisor.session().await.unwrap();

        let sessions = connector.sessions().await;
        sessions[0].emit(closed(DisconnectReason::ConnectionLost));

        // Reconnects without operator intervention.
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if supervisor.current_generation() == 2
                    && supervisor.state().await.phase == ConnectionPhase::Open
                {
                    return;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("never reconnected");

        let second = supervisor.session().await.unwrap();
        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);

        // Old instance was fully torn down.
        let sessions = connector.sessions().await;
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].is_closed());
        assert!(!sessions[1].is_closed());
        assert_eq!(sessions[0].subscriber_count(), 0);

        // Observers saw open, close, open.
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(events.recv().await.unwrap());
        }
        assert!(matches!(seen[0], StatusEvent::ConnectionOpened));
        assert!(matches!(
            seen[1],
            StatusEvent::ConnectionClosed { fatal: false, .. }
        ));
        assert!(matches!(seen[2], StatusEvent::ConnectionOpened));

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_logged_out_purges_credentials_and_halts() {
        let connector = Arc::new(MockConnector::new());
        let (store, _dir) = test_store();
        store
            .save(&Credentials {
                registered: true,
                material: serde_json::json!({"noise_key": "k"}),
            })
            .unwrap();
        let publisher = StatusPublisher::new();
        let mut events = publisher.subscribe();
        let supervisor =
            supervisor_with(Arc::clone(&connector), store.clone(), publisher);

        let handle = supervisor.spawn();
        wait_until_open(&supervisor).await;

        connector.sessions().await[0].emit(closed(DisconnectReason::LoggedOut));
        handle.await.unwrap();

        assert!(supervisor.is_halted());
        assert_eq!(
            supervisor.state().await.phase,
            ConnectionPhase::Disconnected
        );
        // Credentials purged; a fresh load is unregistered.
        assert!(!store.load().unwrap().registered);
        // No further connect attempts were made.
        assert_eq!(connector.connect_count().await, 1);

        // Fatal close surfaced exactly once.
        assert!(matches!(
            events.recv().await.unwrap(),
            StatusEvent::ConnectionOpened
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            StatusEvent::ConnectionClosed { fatal: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_retries() {
        let connector = Arc::new(MockConnector::new());
        connector
            .push_outcome(Err(SessionError::Transport("refused".to_string())))
            .await;
        let (store, _dir) = test_store();
        let supervisor = supervisor_with(Arc::clone(&connector), store, StatusPublisher::new());

        let handle = supervisor.spawn();
        wait_until_open(&supervisor).await;

        // First attempt failed, second produced a live session.
        assert_eq!(connector.connect_count().await, 1);
        assert_eq!(supervisor.state().await.reconnect_attempts, 0);

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_creds_rotation_persisted_mid_session() {
        let connector = Arc::new(MockConnector::new());
        let (store, _dir) = test_store();
        let supervisor =
            supervisor_with(Arc::clone(&connector), store.clone(), StatusPublisher::new());

        let handle = supervisor.spawn();
        wait_until_open(&supervisor).await;

        let session = Arc::clone(&connector.sessions().await[0]);
        session.emit(SessionEvent::CredsRotated(
            serde_json::json!({"registered": true, "noise_key": "rotated"}),
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if store.load().unwrap().registered {
                    return;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("rotation never persisted");

        let creds = store.load().unwrap();
        assert_eq!(creds.material["noise_key"], "rotated");

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_message_sent_on_open() {
        let connector = Arc::new(MockConnector::new());
        let (store, _dir) = test_store();
        let supervisor = ConnectionSupervisor::new(
            connector.clone(),
            store,
            StatusPublisher::new(),
            ReconnectPolicy::immediate(),
            "Session generated successfully.".to_string(),
        );

        let handle = supervisor.spawn();
        wait_until_open(&supervisor).await;

        let session = Arc::clone(&connector.sessions().await[0]);
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !session.sent_messages().await.is_empty() {
                    return;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("ready message never sent");

        let sent = session.sent_messages().await;
        assert_eq!(sent[0].0, "mock-user");
        assert_eq!(sent[0].1, "Session generated successfully.");

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_open_tears_down_session() {
        let connector = Arc::new(MockConnector::new());
        let (store, _dir) = test_store();
        let supervisor = supervisor_with(Arc::clone(&connector), store, StatusPublisher::new());

        let handle = supervisor.spawn();
        wait_until_open(&supervisor).await;

        supervisor.shutdown();
        handle.await.unwrap();

        assert!(connector.sessions().await[0].is_closed());
        assert!(supervisor.session().await.is_none());
        assert!(!supervisor.is_halted());
    }

    #[tokio::test]
    async fn test_never_two_live_sessions() {
        let connector = Arc::new(MockConnector::new());
        let (store, _dir) = test_store();
        let supervisor = supervisor_with(Arc::clone(&connector), store, StatusPublisher::new());

        let handle = supervisor.spawn();
        wait_until_open(&supervisor).await;

        // Bounce the connection a few times and check the teardown invariant
        // after each cycle: every session but the newest is closed and
        // unsubscribed.
        for bounce in 0..3u64 {
            let sessions = connector.sessions().await;
            sessions
                .last()
                .unwrap()
                .emit(closed(DisconnectReason::RestartRequired));

            let want_generation = bounce + 2;
            tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    if supervisor.current_generation() == want_generation
                        && supervisor.state().await.phase == ConnectionPhase::Open
                    {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            })
            .await
            .expect("reconnect stalled");

            let sessions = connector.sessions().await;
            let (newest, rest) = sessions.split_last().unwrap();
            for old in rest {
                assert!(old.is_closed());
                assert_eq!(old.subscriber_count(), 0);
            }
            assert!(!newest.is_closed());
        }

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ConnectionPhase::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionPhase::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionPhase::Open.to_string(), "open");
        assert_eq!(ConnectionPhase::Closing.to_string(), "closing");
    }
}
