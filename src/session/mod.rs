//! Boundary to the external messaging protocol.
//!
//! The wire protocol (framing, encryption, multi-device sync) lives in an
//! external library. This module pins down the narrow seam the orchestration
//! layer consumes: connect, request a pairing code, send a message, and a
//! lifecycle event stream. Everything behind the seam is opaque.

pub mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::creds::Credentials;
use crate::error::SessionError;

/// Why the remote service closed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Remote service de-authenticated this device. Terminal.
    LoggedOut,
    /// Server asked for a reconnect (routine after registration).
    RestartRequired,
    /// Transport dropped mid-stream.
    ConnectionLost,
    /// Keep-alive expired.
    TimedOut,
    /// Orderly close from the remote end.
    ConnectionClosed,
    /// Unrecognized close code.
    Unknown(u16),
}

impl DisconnectReason {
    /// Terminal reasons stop supervision; everything else is retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::LoggedOut => write!(f, "logged out"),
            DisconnectReason::RestartRequired => write!(f, "restart required"),
            DisconnectReason::ConnectionLost => write!(f, "connection lost"),
            DisconnectReason::TimedOut => write!(f, "timed out"),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::Unknown(code) => write!(f, "unknown close code {}", code),
        }
    }
}

/// Lifecycle notification from a live session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connection reached the usable state.
    Opened,
    /// The connection closed; supervision decides what happens next.
    Closed(DisconnectReason),
    /// The protocol library rotated key material; must be persisted.
    CredsRotated(serde_json::Value),
}

/// A single logical connection to the remote messaging service.
///
/// Implementations wrap the external protocol library. Exactly one instance
/// may be live per identity; the supervisor enforces that.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    /// Ask the remote service to issue a pairing code for `number`.
    ///
    /// `number` is already normalized to digits. The returned code is raw
    /// (ungrouped); formatting is the caller's concern.
    async fn request_pairing_code(&self, number: &str) -> Result<String, SessionError>;

    /// Send a text message through the session.
    async fn send_message(&self, to: &str, text: &str) -> Result<(), SessionError>;

    /// Subscribe to lifecycle events. Events emitted before subscription are
    /// not replayed.
    fn lifecycle(&self) -> broadcast::Receiver<SessionEvent>;

    /// Identity of the account this session is authenticated as, once known.
    fn user_id(&self) -> Option<String>;

    /// Tear down the underlying connection. Idempotent.
    async fn close(&self);
}

/// Constructs protocol sessions from persisted credentials.
///
/// The supervisor owns a connector rather than a session type so reconnects
/// never leak a concrete implementation into supervision logic.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, creds: &Credentials)
    -> Result<Arc<dyn ProtocolSession>, SessionError>;
}

/// Connector used when no protocol backend has been linked in.
///
/// Every connect attempt fails, so the supervisor idles in capped backoff
/// while the rest of the service (submission, status, health) stays up.
/// Deployments replace this with the connector from their protocol crate.
pub struct UnconfiguredConnector;

#[async_trait]
impl SessionConnector for UnconfiguredConnector {
    async fn connect(
        &self,
        _creds: &Credentials,
    ) -> Result<Arc<dyn ProtocolSession>, SessionError> {
        Err(SessionError::Transport(
            "no protocol backend configured".to_string(),
        ))
    }
}
