//! Status fan-out to external observers.
//!
//! The HTTP/UI layer subscribes here for push notifications; the core never
//! knows who is listening. Pure observer boundary, no business logic.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::session::DisconnectReason;

const CHANNEL_CAPACITY: usize = 256;

/// A status change worth telling the outside world about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    NumberSubmitted {
        number: String,
    },
    CodeGenerated {
        number: String,
        code: String,
    },
    PairingError {
        number: String,
        reason: String,
    },
    ConnectionOpened,
    ConnectionClosed {
        reason: String,
        /// True when supervision has halted and operator action is needed.
        fatal: bool,
    },
}

impl StatusEvent {
    /// Build a close event from a disconnect reason.
    pub fn connection_closed(reason: DisconnectReason) -> Self {
        StatusEvent::ConnectionClosed {
            reason: reason.to_string(),
            fatal: reason.is_terminal(),
        }
    }
}

/// Broadcast fan-out of [`StatusEvent`]s.
///
/// Cloning is cheap; every clone publishes into the same stream. Slow
/// subscribers observe `Lagged` rather than blocking publishers.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`, convenient for SSE-style forwarding.
    pub fn stream(&self) -> BroadcastStream<StatusEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Publish an event. A stream with no subscribers drops it silently.
    pub fn publish(&self, event: StatusEvent) {
        tracing::debug!(?event, "status event");
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}
