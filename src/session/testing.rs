//! Scripted in-memory session for tests.
//!
//! `MockSession` answers pairing-code requests from a queue of scripted
//! outcomes and lets tests drive lifecycle events by hand. `MockConnector`
//! hands out sessions in order and records every instance it produced so
//! tests can assert on teardown behavior.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};

use crate::creds::Credentials;
use crate::error::SessionError;
use crate::session::{DisconnectReason, ProtocolSession, SessionConnector, SessionEvent};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// In-memory [`ProtocolSession`] driven entirely by the test.
pub struct MockSession {
    events: broadcast::Sender<SessionEvent>,
    code_responses: Mutex<VecDeque<Result<String, SessionError>>>,
    requests: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
    user_id: Option<String>,
}

impl MockSession {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            code_responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            user_id: Some("mock-user".to_string()),
        }
    }

    /// Script the outcome of the next pairing-code request.
    pub async fn push_code_response(&self, response: Result<String, SessionError>) {
        self.code_responses.lock().await.push_back(response);
    }

    /// Emit a lifecycle event to all current subscribers.
    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine; the event is simply dropped.
        let _ = self.events.send(event);
    }

    /// Emit `Opened` once at least one subscriber is listening.
    ///
    /// Subscription happens after `connect` returns, so an immediate send
    /// would be lost. Polling the receiver count keeps the test deterministic
    /// without a fixed sleep.
    pub fn emit_opened_when_subscribed(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while session.events.receiver_count() == 0 {
                tokio::task::yield_now().await;
            }
            session.emit(SessionEvent::Opened);
        });
    }

    /// Numbers that pairing codes were requested for, in order.
    pub async fn requested_numbers(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }

    /// Messages sent through this session, as `(to, text)` pairs.
    pub async fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live lifecycle subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolSession for MockSession {
    async fn request_pairing_code(&self, number: &str) -> Result<String, SessionError> {
        self.requests.lock().await.push(number.to_string());
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::NotConnected);
        }
        self.code_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok("MOCK1234".to_string()))
    }

    async fn send_message(&self, to: &str, text: &str) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::NotConnected);
        }
        self.sent
            .lock()
            .await
            .push((to.to_string(), text.to_string()));
        Ok(())
    }

    fn lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out [`MockSession`]s in order; auto-opens each unless told not to.
pub struct MockConnector {
    scripted: Mutex<VecDeque<Result<Arc<MockSession>, SessionError>>>,
    connected: Mutex<Vec<Arc<MockSession>>>,
    auto_open: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            connected: Mutex::new(Vec::new()),
            auto_open: AtomicBool::new(true),
        }
    }

    /// Script the outcome of the next `connect` call. Unscripted calls
    /// produce a fresh default session.
    pub async fn push_outcome(&self, outcome: Result<Arc<MockSession>, SessionError>) {
        self.scripted.lock().await.push_back(outcome);
    }

    /// Disable the automatic `Opened` event on connect.
    pub fn manual_open(&self) {
        self.auto_open.store(false, Ordering::SeqCst);
    }

    /// Every session this connector has produced, in connect order.
    pub async fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.connected.lock().await.clone()
    }

    /// Number of `connect` calls that produced a session.
    pub async fn connect_count(&self) -> usize {
        self.connected.lock().await.len()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(
        &self,
        _creds: &Credentials,
    ) -> Result<Arc<dyn ProtocolSession>, SessionError> {
        let session = match self.scripted.lock().await.pop_front() {
            Some(Ok(session)) => session,
            Some(Err(e)) => return Err(e),
            None => Arc::new(MockSession::new()),
        };

        self.connected.lock().await.push(Arc::clone(&session));
        if self.auto_open.load(Ordering::SeqCst) {
            session.emit_opened_when_subscribed();
        }
        Ok(session)
    }
}

/// Shorthand for a closed-event, used throughout the tests.
pub fn closed(reason: DisconnectReason) -> SessionEvent {
    SessionEvent::Closed(reason)
}
