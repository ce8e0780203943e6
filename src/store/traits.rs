use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::Alert;
use crate::error::Result;
use crate::event::{AuditEvent, DataClassification, EventStatus};
use crate::gdpr::PseudonymMapping;
use crate::scheduler::{ReportExecution, ScheduledReportConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Timestamp,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Query filters for reports/GDPR exports (§4.4 "Query API").
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub principal_ids: Option<Vec<String>>,
    pub organization_ids: Option<Vec<String>>,
    pub actions: Option<Vec<String>>,
    pub data_classifications: Option<Vec<DataClassification>>,
    pub statuses: Option<Vec<EventStatus>>,
    pub resource_types: Option<Vec<String>>,
    pub verified_only: bool,
    pub include_integrity_failures: bool,
    pub limit: i64,
    pub offset: i64,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            date_range: None,
            principal_ids: None,
            organization_ids: None,
            actions: None,
            data_classifications: None,
            statuses: None,
            resource_types: None,
            verified_only: false,
            include_integrity_failures: true,
            limit: 50,
            offset: 0,
            sort_by: SortBy::Timestamp,
            sort_order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub events: Vec<AuditEvent>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityFailure {
    pub event_id: uuid::Uuid,
    pub reason: String,
}

/// Aggregate result of a streaming integrity sweep (§4.4 "Integrity
/// verification query").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IntegrityVerificationReport {
    pub total: u64,
    pub verified: u64,
    pub failed: u64,
    pub algorithm_histogram: std::collections::HashMap<String, u64>,
    pub avg_latency_ms: f64,
    pub failures: Vec<IntegrityFailure>,
}

/// Retention enforcement outcome for a single policy application (§4.4).
#[derive(Debug, Clone, Default)]
pub struct RetentionEnforcementResult {
    pub archived: u64,
    pub deleted: u64,
}

/// Transactional CRUD + query + streaming read capability (design note
/// "Queue/Store abstractions"). The underlying relational store and its
/// connection management are out of scope (§1) — implementations hold
/// whatever pool/client they need behind this trait.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_event(&self, event: &AuditEvent) -> Result<()>;
    async fn get_event(&self, id: uuid::Uuid) -> Result<Option<AuditEvent>>;
    async fn query_events(&self, query: &EventQuery) -> Result<QueryResult>;
    /// Mutates only the fields I1 permits post-persist.
    async fn update_event_identity(
        &self,
        id: uuid::Uuid,
        principal_id: Option<String>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<()>;
    async fn archive_event(&self, id: uuid::Uuid, archived_at: DateTime<Utc>) -> Result<()>;
    async fn delete_event(&self, id: uuid::Uuid) -> Result<()>;
    async fn delete_events_for_principal(
        &self,
        organization_id: &str,
        principal_id: &str,
        except_ids: &[uuid::Uuid],
    ) -> Result<u64>;

    async fn verify_integrity(&self, query: &EventQuery) -> Result<IntegrityVerificationReport>;
    async fn apply_retention_policy(
        &self,
        classification: DataClassification,
        archive_cutoff: DateTime<Utc>,
        delete_cutoff: DateTime<Utc>,
    ) -> Result<RetentionEnforcementResult>;

    async fn insert_alert(&self, alert: &Alert) -> Result<()>;
    async fn get_alert(&self, id: uuid::Uuid) -> Result<Option<Alert>>;
    async fn update_alert(&self, alert: &Alert) -> Result<()>;
    async fn query_alerts(
        &self,
        organization_id: &str,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Alert>>;
    async fn delete_resolved_alerts_before(
        &self,
        organization_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;

    async fn upsert_pseudonym_mapping(&self, mapping: &PseudonymMapping) -> Result<()>;
    async fn get_pseudonym_mapping(&self, pseudonym_id: &str) -> Result<Option<PseudonymMapping>>;
    async fn find_pseudonym_mapping_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<PseudonymMapping>>;

    async fn upsert_scheduled_report(&self, config: &ScheduledReportConfig) -> Result<()>;
    async fn get_scheduled_report(&self, id: uuid::Uuid) -> Result<Option<ScheduledReportConfig>>;
    async fn delete_scheduled_report(&self, id: uuid::Uuid) -> Result<()>;
    async fn list_scheduled_reports(&self, enabled_only: bool) -> Result<Vec<ScheduledReportConfig>>;
    async fn due_scheduled_reports(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledReportConfig>>;
    async fn insert_report_execution(&self, execution: &ReportExecution) -> Result<()>;
    async fn update_report_execution(&self, execution: &ReportExecution) -> Result<()>;
    async fn list_report_executions(&self, report_config_id: uuid::Uuid) -> Result<Vec<ReportExecution>>;
}
