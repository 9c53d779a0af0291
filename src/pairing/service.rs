//! Narrow submission/status facade consumed by the transport layer.

use std::sync::Arc;

use crate::error::SubmitError;
use crate::pairing::queue::{PairingQueue, PairingRequest, normalize_number};
use crate::status::{StatusEvent, StatusPublisher};

/// Submission boundary for external interfaces.
///
/// Wraps the queue with the one piece of cross-cutting behavior transports
/// should not have to remember: announcing accepted submissions.
#[derive(Clone)]
pub struct PairingService {
    queue: Arc<PairingQueue>,
    publisher: StatusPublisher,
}

impl PairingService {
    pub fn new(queue: Arc<PairingQueue>, publisher: StatusPublisher) -> Self {
        Self { queue, publisher }
    }

    /// Submit a raw phone number. Returns the normalized key on acceptance.
    pub async fn submit(&self, raw: &str) -> Result<String, SubmitError> {
        let key = self.queue.submit(raw).await?;
        self.publisher.publish(StatusEvent::NumberSubmitted {
            number: key.clone(),
        });
        Ok(key)
    }

    /// Look up a request by number, accepting either raw or normalized form.
    pub async fn status(&self, number: &str) -> Option<PairingRequest> {
        // The status path tolerates any formatting but not garbage lengths;
        // those can never correspond to a stored entry.
        let key = normalize_number(number).ok()?;
        self.queue.get(&key).await
    }

    /// Forget every request, terminal or not.
    pub async fn clear(&self) {
        self.queue.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> PairingService {
        PairingService::new(Arc::new(PairingQueue::new()), StatusPublisher::new())
    }

    #[tokio::test]
    async fn test_submit_publishes_number_submitted() {
        let publisher = StatusPublisher::new();
        let service = PairingService::new(Arc::new(PairingQueue::new()), publisher.clone());
        let mut events = publisher.subscribe();

        let key = service.submit("+1 (234) 567-8901").await.unwrap();
        assert_eq!(key, "12345678901");

        match events.recv().await.unwrap() {
            StatusEvent::NumberSubmitted { number } => assert_eq!(number, key),
            other => panic!("expected NumberSubmitted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_submit_publishes_nothing() {
        let publisher = StatusPublisher::new();
        let service = PairingService::new(Arc::new(PairingQueue::new()), publisher.clone());
        let mut events = publisher.subscribe();

        service.submit("123").await.unwrap_err();
        service.submit("12345678901").await.unwrap();
        service.submit("12345678901").await.unwrap_err();

        // Only the accepted submission produced an event.
        match events.recv().await.unwrap() {
            StatusEvent::NumberSubmitted { number } => assert_eq!(number, "12345678901"),
            other => panic!("expected NumberSubmitted, got {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_status_normalizes_lookup() {
        let service = service();
        service.submit("12345678901").await.unwrap();

        let entry = service.status("+1 (234) 567-8901").await.unwrap();
        assert_eq!(entry.normalized_number, "12345678901");
    }

    #[tokio::test]
    async fn test_status_unknown_or_garbage_is_none() {
        let service = service();
        assert!(service.status("99999999999").await.is_none());
        assert!(service.status("abc").await.is_none());
        assert!(service.status("").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_makes_all_statuses_not_found() {
        let service = service();
        service.submit("12345678901").await.unwrap();
        service.submit("98765432109").await.unwrap();

        service.clear().await;

        assert!(service.status("12345678901").await.is_none());
        assert!(service.status("98765432109").await.is_none());
    }
}
