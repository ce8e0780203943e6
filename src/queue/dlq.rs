//! Dead-letter queue entries and the periodic scanner (§4.3 "DLQ").

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::alerts::{AlertEngine, AlertType, NewAlert, Severity};
use crate::config::DlqConfig;
use crate::error::Result;
use crate::event::AuditEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempted_at: DateTime<Utc>,
    pub error: String,
}

/// §3.6 DLQ Entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEntry {
    pub id: Uuid,
    pub original_event: AuditEvent,
    pub failure_reason: String,
    pub failure_count: u32,
    pub first_failure_time: DateTime<Utc>,
    pub last_failure_time: DateTime<Utc>,
    pub error_stack: Option<String>,
    pub retry_history: Vec<RetryAttempt>,
    pub archived: bool,
}

/// In-memory DLQ store; durable deployments would back this with the same
/// relational store used for audit events (§4.4 logical table `dlq_entry`).
#[derive(Default)]
pub struct DlqStore {
    entries: DashMap<Uuid, DlqEntry>,
}

impl DlqStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, event: AuditEvent, reason: String, error_stack: Option<String>) {
        let now = Utc::now();
        self.entries.insert(
            event.id,
            DlqEntry {
                id: event.id,
                original_event: event,
                failure_reason: reason,
                failure_count: 1,
                first_failure_time: now,
                last_failure_time: now,
                error_stack,
                retry_history: Vec::new(),
                archived: false,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<DlqEntry> {
        self.entries.get(&id).map(|e| e.clone())
    }
}

/// Periodic sweep (§4.3 "DLQ"): archives entries older than
/// `archiveAfterDays`, deletes entries older than `maxRetentionDays`,
/// alerts when the DLQ grows past `alertThreshold`.
pub struct DlqScanner {
    store: Arc<DlqStore>,
    alerts: Arc<AlertEngine>,
    config: DlqConfig,
}

impl DlqScanner {
    pub fn new(store: Arc<DlqStore>, alerts: Arc<AlertEngine>, config: DlqConfig) -> Self {
        Self { store, alerts, config }
    }

    #[tracing::instrument(skip(self))]
    pub async fn scan(&self, organization_id: &str) -> Result<()> {
        let now = Utc::now();
        let archive_cutoff = now - chrono::Duration::days(self.config.archive_after_days);
        let delete_cutoff = now - chrono::Duration::days(self.config.max_retention_days);

        let to_delete: Vec<Uuid> = self
            .store
            .entries
            .iter()
            .filter(|e| e.value().last_failure_time < delete_cutoff)
            .map(|e| *e.key())
            .collect();
        for id in to_delete {
            self.store.entries.remove(&id);
        }

        for mut entry in self.store.entries.iter_mut() {
            if !entry.archived && entry.last_failure_time < archive_cutoff {
                entry.archived = true;
            }
        }

        if self.store.len() as u64 >= self.config.alert_threshold {
            let mut metadata = std::collections::HashMap::new();
            metadata.insert("organizationId".to_string(), organization_id.to_string());
            metadata.insert("dlqSize".to_string(), self.store.len().to_string());
            self.alerts
                .generate_alert(NewAlert {
                    organization_id: organization_id.to_string(),
                    severity: Severity::High,
                    alert_type: AlertType::System,
                    title: "DLQ size threshold exceeded".to_string(),
                    description: format!("DLQ has {} entries, threshold is {}", self.store.len(), self.config.alert_threshold),
                    source: "dlq_scanner".to_string(),
                    correlation_id: None,
                    metadata,
                    tags: vec!["dlq".to_string()],
                })
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DataClassification, EventStatus, SessionContext};
    use crate::kv::InMemoryKv;
    use crate::store::InMemoryStore;
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
    async fn scan_alerts_once_threshold_crossed() {
        let dlq = Arc::new(DlqStore::new());
        dlq.record_failure(sample_event(), "boom".to_string(), None);

        let store = Arc::new(InMemoryStore::new());
        let kv = Arc::new(InMemoryKv::new());
        let alerts = Arc::new(AlertEngine::new(store, kv, vec![]));

        let mut config = DlqConfig::default();
        config.alert_threshold = 1;
        let scanner = DlqScanner::new(dlq.clone(), alerts.clone(), config);
        scanner.scan("o1").await.unwrap();

        let active = alerts.get_active_alerts("o1").await.unwrap();
        assert_eq!(active.len(), 1);
    }
}
