//! Single-flight worker that carries queued submissions to completion.
//!
//! A recurring tick drains `Pending` entries one at a time against the live
//! session. Pairing-code issuance is stateful per device on the remote end,
//! so dispatch is intentionally serialized; one bad number never blocks the
//! rest of the tick or the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::pairing::queue::{PairingOutcome, PairingQueue, format_pairing_code};
use crate::status::{StatusEvent, StatusPublisher};
use crate::supervisor::{ConnectionSupervisor, SessionRef};

/// Dispatcher timing knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often to scan the queue for pending entries.
    pub interval: Duration,
    /// Bound on a single pairing-code request; expiry is an `Error` outcome.
    pub request_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Recurring worker loop over the pairing queue.
pub struct PairingDispatcher {
    queue: Arc<PairingQueue>,
    supervisor: Arc<ConnectionSupervisor>,
    publisher: StatusPublisher,
    config: DispatcherConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PairingDispatcher {
    pub fn new(
        queue: Arc<PairingQueue>,
        supervisor: Arc<ConnectionSupervisor>,
        publisher: StatusPublisher,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            supervisor,
            publisher,
            config,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Start the tick loop on a new task.
    pub fn start(&mut self) {
        let queue = Arc::clone(&self.queue);
        let supervisor = Arc::clone(&self.supervisor);
        let publisher = self.publisher.clone();
        let config = self.config.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_tick(&queue, &supervisor, &publisher, &config).await;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            tracing::info!("Dispatcher stopped");
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// One pass over the queue.
///
/// Skipped entirely while the connection is not `Open`; entries stay
/// `Pending` and the next tick after reconnection picks them up.
async fn run_tick(
    queue: &PairingQueue,
    supervisor: &ConnectionSupervisor,
    publisher: &StatusPublisher,
    config: &DispatcherConfig,
) {
    let Some(session_ref) = supervisor.session().await else {
        return;
    };
    process_pending(queue, supervisor, publisher, config, session_ref).await;
}

/// Drain pending entries against one claimed session reference.
async fn process_pending(
    queue: &PairingQueue,
    supervisor: &ConnectionSupervisor,
    publisher: &StatusPublisher,
    config: &DispatcherConfig,
    session_ref: SessionRef,
) {
    while let Some(request) = queue.next_pending().await {
        let key = request.normalized_number;
        let outcome = tokio::time::timeout(
            config.request_timeout,
            session_ref.session.request_pairing_code(&key),
        )
        .await;

        match outcome {
            Ok(Ok(raw_code)) => {
                let code = format_pairing_code(&raw_code);
                tracing::info!(number = %key, "Pairing code generated");
                queue
                    .mark_result(&key, PairingOutcome::CodeGenerated(code.clone()))
                    .await;
                publisher.publish(StatusEvent::CodeGenerated { number: key, code });
            }
            // A timeout is a terminal Error outcome, never left hanging.
            Err(_) => {
                record_error(queue, publisher, key, "Pairing-code request timed out").await;
            }
            Ok(Err(e)) => {
                if is_stale(supervisor, &session_ref).await {
                    // The connection fell over underneath us; the entry goes
                    // back in line and the rest of the tick is pointless.
                    tracing::debug!(number = %key, "Session went stale mid-dispatch, requeueing");
                    queue.mark_result(&key, PairingOutcome::Requeued).await;
                    break;
                }
                record_error(queue, publisher, key, &e.to_string()).await;
            }
        }
    }
}

async fn record_error(
    queue: &PairingQueue,
    publisher: &StatusPublisher,
    number: String,
    detail: &str,
) {
    tracing::warn!(number = %number, "Pairing request failed: {}", detail);
    queue
        .mark_result(&number, PairingOutcome::Error(detail.to_string()))
        .await;
    publisher.publish(StatusEvent::PairingError {
        number,
        reason: detail.to_string(),
    });
}

/// Check whether `session_ref` still belongs to the live connect cycle.
async fn is_stale(supervisor: &ConnectionSupervisor, session_ref: &SessionRef) -> bool {
    match supervisor.session().await {
        Some(current) => current.generation != session_ref.generation,
        None => true,
    }
}
