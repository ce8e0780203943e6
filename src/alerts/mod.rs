//! Deduplication, persistence, lifecycle, and sinks for alerts (C6) — §4.6.

pub mod sinks;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AuditError, Result};
use crate::kv::Kv;
use crate::store::Store;

pub use sinks::{AlertSink, DatabaseSink, WebhookSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    // Ordering must satisfy "severity order CRITICAL<HIGH<MEDIUM<LOW" (§4.6)
    // so a plain sort puts the most severe alerts first.
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    Security,
    Compliance,
    Performance,
    System,
    Metrics,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub organization_id: String,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub status: AlertStatus,
    pub title: String,
    pub description: String,
    pub source: String,
    pub correlation_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub tags: Vec<String>,
}

/// A proposed alert before dedup/persistence — everything `generateAlert`
/// needs that an engine still decides (id, timestamps, status).
pub struct NewAlert {
    pub organization_id: String,
    pub severity: Severity,
    pub alert_type: AlertType,
    pub title: String,
    pub description: String,
    pub source: String,
    pub correlation_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub tags: Vec<String>,
}

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Computes `base64(source|title|severity)` (§4.6, §6 "Persisted layouts").
pub fn dedup_key(source: &str, title: &str, severity: Severity) -> String {
    let raw = format!("{source}|{title}|{}", severity.as_str());
    general_purpose::STANDARD.encode(raw.as_bytes())
}

pub struct AlertEngine {
    store: Arc<dyn Store>,
    kv: Arc<dyn Kv>,
    sinks: Vec<Arc<dyn AlertSink>>,
    cooldown: Duration,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn Store>, kv: Arc<dyn Kv>, sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { store, kv, sinks, cooldown: DEFAULT_COOLDOWN }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Generates an alert: checks the cooldown key, persists on a miss,
    /// notifies every sink (§4.6 "Deduplication"/"Persistence"/"Notifications").
    #[tracing::instrument(skip(self, new_alert))]
    pub async fn generate_alert(&self, new_alert: NewAlert) -> Result<Option<Alert>> {
        if !new_alert.metadata.contains_key("organizationId")
            && new_alert.metadata.get("organization_id").is_none()
        {
            // A1: organizationId required in metadata; tolerate either key
            // shape but require one to be present.
            return Err(AuditError::Validation(
                "alert metadata must contain organizationId".to_string(),
            ));
        }

        let key = dedup_key(&new_alert.source, &new_alert.title, new_alert.severity);
        let cooldown_key = format!("alerts:alert_cooldown:{key}");
        if self.kv.exists(&cooldown_key).await? {
            return Ok(None);
        }
        self.kv.setex(&cooldown_key, "1", self.cooldown).await?;

        let alert = Alert {
            id: Uuid::new_v4(),
            organization_id: new_alert.organization_id,
            severity: new_alert.severity,
            alert_type: new_alert.alert_type,
            status: AlertStatus::Active,
            title: new_alert.title,
            description: new_alert.description,
            source: new_alert.source,
            correlation_id: new_alert.correlation_id,
            metadata: new_alert.metadata,
            created_at: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            tags: new_alert.tags,
        };

        self.store.insert_alert(&alert).await?;

        for sink in &self.sinks {
            sink.notify(&alert).await?;
        }

        Ok(Some(alert))
    }

    pub async fn get_active_alerts(&self, organization_id: &str) -> Result<Vec<Alert>> {
        self.store
            .query_alerts(organization_id, Some("active"), i64::MAX, 0)
            .await
    }

    pub async fn acknowledge(&self, id: Uuid, by: &str) -> Result<Alert> {
        let mut alert = self.require_alert(id).await?;
        if alert.status == AlertStatus::Acknowledged {
            return Ok(alert); // idempotent no-op (§4.6)
        }
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(Utc::now());
        alert.acknowledged_by = Some(by.to_string());
        self.store.update_alert(&alert).await?;
        Ok(alert)
    }

    pub async fn resolve(&self, id: Uuid, by: &str, notes: Option<String>) -> Result<Alert> {
        let mut alert = self.require_alert(id).await?;
        if alert.status == AlertStatus::Resolved {
            return Ok(alert);
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());
        alert.resolved_by = Some(by.to_string());
        alert.resolution_notes = notes;
        self.store.update_alert(&alert).await?;
        Ok(alert)
    }

    pub async fn dismiss(&self, id: Uuid, by: &str) -> Result<Alert> {
        let mut alert = self.require_alert(id).await?;
        if alert.status == AlertStatus::Dismissed {
            return Ok(alert);
        }
        alert.status = AlertStatus::Dismissed;
        alert.resolved_at = Some(Utc::now());
        alert.resolved_by = Some(by.to_string());
        self.store.update_alert(&alert).await?;
        Ok(alert)
    }

    pub async fn cleanup_resolved_alerts(&self, organization_id: &str, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        self.store.delete_resolved_alerts_before(organization_id, cutoff).await
    }

    async fn require_alert(&self, id: Uuid) -> Result<Alert> {
        self.store
            .get_alert(id)
            .await?
            .ok_or_else(|| AuditError::NotFound(format!("alert {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn new_alert(source: &str, title: &str, severity: Severity, org: &str) -> NewAlert {
        let mut metadata = HashMap::new();
        metadata.insert("organizationId".to_string(), org.to_string());
        NewAlert {
            organization_id: org.to_string(),
            severity,
            alert_type: AlertType::Security,
            title: title.to_string(),
            description: "desc".to_string(),
            source: source.to_string(),
            correlation_id: None,
            metadata,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn dedup_suppresses_within_cooldown() {
        // S3: identical (source,title,severity) within cooldown -> 1 alert.
        let store = Arc::new(InMemoryStore::new());
        let kv = Arc::new(crate::kv::InMemoryKv::new());
        let engine = AlertEngine::new(store.clone(), kv, vec![]);

        let first = engine
            .generate_alert(new_alert("detector", "Failed auth", Severity::High, "o1"))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = engine
            .generate_alert(new_alert("detector", "Failed auth", Severity::High, "o1"))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn dedup_expires_after_cooldown() {
        let store = Arc::new(InMemoryStore::new());
        let kv = Arc::new(crate::kv::InMemoryKv::new());
        let engine = AlertEngine::new(store, kv, vec![]).with_cooldown(Duration::from_millis(20));

        let first = engine
            .generate_alert(new_alert("detector", "Failed auth", Severity::High, "o1"))
            .await
            .unwrap();
        assert!(first.is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = engine
            .generate_alert(new_alert("detector", "Failed auth", Severity::High, "o1"))
            .await
            .unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let kv = Arc::new(crate::kv::InMemoryKv::new());
        let engine = AlertEngine::new(store, kv, vec![]);

        let alert = engine
            .generate_alert(new_alert("detector", "t", Severity::Medium, "o1"))
            .await
            .unwrap()
            .unwrap();

        let acked = engine.acknowledge(alert.id, "alice").await.unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        let acked_again = engine.acknowledge(alert.id, "bob").await.unwrap();
        assert_eq!(acked_again.acknowledged_by.as_deref(), Some("alice"));

        let resolved = engine.resolve(alert.id, "alice", None).await.unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
    }
}
