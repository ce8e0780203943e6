//! Durable enqueue, worker processing, and DLQ (C3) — §4.3. The underlying
//! broker is an external capability (§1); `Queue` is the interface this
//! crate owns, with an in-memory implementation for tests and single-node
//! deployments.

pub mod dlq;
pub mod worker;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::event::AuditEvent;

pub use dlq::{DlqEntry, DlqScanner};
pub use worker::Worker;

#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: Uuid,
    pub organization_id: String,
    pub event: AuditEvent,
    pub attempt: u32,
}

/// Durable queue capability (§4.3 "Enqueue"). Implementations must be
/// crash-safe: a successful `enqueue` means the message survives a
/// process restart.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, organization_id: &str, event: AuditEvent) -> Result<Uuid>;
    /// Pops the next message for processing, or `None` if the queue is empty.
    async fn dequeue(&self) -> Result<Option<QueueMessage>>;
    /// Marks a message as durably processed.
    async fn ack(&self, message_id: Uuid) -> Result<()>;
    /// Returns a failed message to the back of the queue with an
    /// incremented attempt count, after the caller's backoff delay.
    async fn nack(&self, message: QueueMessage) -> Result<()>;
    async fn len(&self) -> Result<usize>;
}

/// Single-process FIFO queue backed by a `Mutex<VecDeque>` — fine for tests
/// and a single-node deployment; a multi-node deployment would swap in a
/// broker-backed implementation behind the same trait.
#[derive(Default)]
pub struct InMemoryQueue {
    messages: Mutex<VecDeque<QueueMessage>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(&self, organization_id: &str, event: AuditEvent) -> Result<Uuid> {
        let message_id = Uuid::new_v4();
        let message = QueueMessage {
            message_id,
            organization_id: organization_id.to_string(),
            event,
            attempt: 0,
        };
        self.messages.lock().unwrap().push_back(message);
        Ok(message_id)
    }

    async fn dequeue(&self) -> Result<Option<QueueMessage>> {
        Ok(self.messages.lock().unwrap().pop_front())
    }

    async fn ack(&self, _message_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn nack(&self, mut message: QueueMessage) -> Result<()> {
        message.attempt += 1;
        self.messages.lock().unwrap().push_back(message);
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.messages.lock().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DataClassification, EventStatus, SessionContext};
    use std::collections::HashMap;

    fn sample_event() -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: "data.read".to_string(),
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
            hash: Some("h".to_string()),
            hash_algorithm: "SHA-256".to_string(),
            signature: None,
            signature_algorithm: None,
            archived_at: None,
        }
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let queue = InMemoryQueue::new();
        let event = sample_event();
        let id = queue.enqueue("o1", event.clone()).await.unwrap();
        let message = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(message.message_id, id);
        assert_eq!(message.event.id, event.id);
        assert_eq!(message.attempt, 0);
    }

    #[tokio::test]
    async fn nack_requeues_with_incremented_attempt() {
        let queue = InMemoryQueue::new();
        queue.enqueue("o1", sample_event()).await.unwrap();
        let message = queue.dequeue().await.unwrap().unwrap();
        queue.nack(message).await.unwrap();
        let requeued = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(requeued.attempt, 1);
    }
}
