//! Consumer loop: verify, persist, detect, ack (§4.3 "Worker").

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::alerts::AlertEngine;
use crate::config::{DlqConfig, RetryConfig};
use crate::crypto;
use crate::error::Result;
use crate::patterns::PatternDetector;
use crate::store::Store;

use super::dlq::DlqStore;
use super::{Queue, QueueMessage};

/// Processes messages popped from a [`Queue`]: verifies the seal, persists
/// through the durable store (C4), feeds the event to pattern detection
/// (C5), and converts any suspicious pattern into an alert (C6). Failures
/// are retried with exponential backoff up to `retry.max_attempts`, after
/// which the message is moved to the DLQ.
pub struct Worker {
    queue: Arc<dyn Queue>,
    store: Arc<dyn Store>,
    detector: Mutex<PatternDetector>,
    alerts: Arc<AlertEngine>,
    dlq: Arc<DlqStore>,
    retry: RetryConfig,
    #[allow(dead_code)]
    dlq_config: DlqConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn Queue>,
        store: Arc<dyn Store>,
        detector: PatternDetector,
        alerts: Arc<AlertEngine>,
        dlq: Arc<DlqStore>,
        retry: RetryConfig,
        dlq_config: DlqConfig,
    ) -> Self {
        Self {
            queue,
            store,
            detector: Mutex::new(detector),
            alerts,
            dlq,
            retry,
            dlq_config,
        }
    }

    /// Processes exactly one message, if one is queued. Returns `true` if a
    /// message was popped (regardless of outcome), so callers can decide
    /// whether to keep polling or back off.
    #[tracing::instrument(skip(self))]
    pub async fn process_one(&self) -> Result<bool> {
        let Some(message) = self.queue.dequeue().await? else {
            return Ok(false);
        };

        match self.handle(&message).await {
            Ok(()) => {
                self.queue.ack(message.message_id).await?;
            }
            Err(err) => {
                self.handle_failure(message, err.to_string()).await?;
            }
        }
        Ok(true)
    }

    async fn handle(&self, message: &QueueMessage) -> Result<()> {
        if !crypto::verify_hash(&message.event) {
            return Err(crate::error::AuditError::Integrity(format!(
                "event {} failed hash verification at worker stage",
                message.event.id
            )));
        }

        self.store.insert_event(&message.event).await?;

        let patterns = {
            let mut detector = self.detector.lock().await;
            detector.record_event(message.event.clone(), chrono::Utc::now())
        };
        for pattern in patterns {
            self.alerts.generate_alert(pattern.into_new_alert()).await?;
        }

        Ok(())
    }

    async fn handle_failure(&self, message: QueueMessage, reason: String) -> Result<()> {
        if message.attempt + 1 >= self.retry.max_attempts {
            self.dlq.record_failure(message.event.clone(), reason, None);
            self.queue.ack(message.message_id).await?;
            return Ok(());
        }

        let delay = self.retry.backoff_delay(message.attempt);
        tokio::time::sleep(delay).await;
        self.queue.nack(message).await
    }

    /// Drains the queue until it reports empty, processing one message at a
    /// time. A production deployment would run several of these
    /// concurrently up to `worker.concurrency`.
    pub async fn drain(&self) -> Result<u64> {
        let mut processed = 0u64;
        while self.process_one().await? {
            processed += 1;
        }
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternDetectionConfig;
    use crate::crypto::{seal, LocalHmac};
    use crate::event::{DataClassification, EventStatus, SessionContext};
    use crate::kv::InMemoryKv;
    use crate::queue::InMemoryQueue;
    use crate::store::InMemoryStore;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn unsealed_event(action: &str) -> crate::event::AuditEvent {
        crate::event::AuditEvent {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            action: action.to_string(),
            status: EventStatus::Success,
            principal_id: "u1".to_string(),
            organization_id: "o1".to_string(),
            target_resource_type: None,
            target_resource_id: None,
            data_classification: DataClassification::Internal,
            outcome_description: "ok".to_string(),
            session_context: SessionContext::default(),
            details: HashMap::new(),
            correlation_id: None,
            retention_policy: "default".to_string(),
            hash: None,
            hash_algorithm: "SHA-256".to_string(),
            signature: None,
            signature_algorithm: None,
            archived_at: None,
        }
    }

    async fn worker_with_empty_queue() -> (Worker, Arc<dyn Queue>, Arc<dyn Store>) {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let kv = Arc::new(InMemoryKv::new());
        let alerts = Arc::new(AlertEngine::new(store.clone(), kv, vec![]));
        let detector = PatternDetector::new(PatternDetectionConfig::default());
        let dlq = Arc::new(DlqStore::new());
        let worker = Worker::new(
            queue.clone(),
            store.clone(),
            detector,
            alerts,
            dlq,
            RetryConfig::default(),
            DlqConfig::default(),
        );
        (worker, queue, store)
    }

    #[tokio::test]
    async fn valid_sealed_event_is_persisted_and_acked() {
        let (worker, queue, store) = worker_with_empty_queue().await;
        let signer = LocalHmac::new(b"test-key".to_vec()).unwrap();
        let mut event = unsealed_event("data.read");
        seal(&mut event, &signer).await.unwrap();
        let id = event.id;

        queue.enqueue("o1", event).await.unwrap();
        let processed = worker.process_one().await.unwrap();
        assert!(processed);
        assert!(store.get_event(id).await.unwrap().is_some());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tampered_event_is_requeued_with_incremented_attempt() {
        let (worker, queue, _store) = worker_with_empty_queue().await;
        let signer = LocalHmac::new(b"test-key".to_vec()).unwrap();
        let mut event = unsealed_event("data.read");
        seal(&mut event, &signer).await.unwrap();
        event.action = "data.write".to_string(); // invalidates the hash

        queue.enqueue("o1", event).await.unwrap();
        worker.process_one().await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_move_message_to_dlq() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new());
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let kv = Arc::new(InMemoryKv::new());
        let alerts = Arc::new(AlertEngine::new(store.clone(), kv, vec![]));
        let detector = PatternDetector::new(PatternDetectionConfig::default());
        let dlq = Arc::new(DlqStore::new());
        let mut retry = RetryConfig::default();
        retry.max_attempts = 1;
        retry.initial_delay_ms = 1;
        let worker = Worker::new(queue.clone(), store, detector, alerts, dlq.clone(), retry, DlqConfig::default());

        let mut event = unsealed_event("data.read");
        event.hash = Some("not-a-valid-hash".to_string()); // always fails verification

        queue.enqueue("o1", event).await.unwrap();
        worker.process_one().await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(dlq.len(), 1);
    }
}
