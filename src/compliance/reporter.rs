//! HIPAA/GDPR/custom report construction and integrity verification
//! (C8) — §4.8.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::event::{AuditEvent, DataClassification, EventStatus};
use crate::gdpr::is_compliance_critical;
use crate::store::{EventQuery, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Hipaa,
    Gdpr,
    Custom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCriteria {
    pub organization_id: Option<String>,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub principal_ids: Option<Vec<String>>,
    pub actions: Option<Vec<String>>,
    pub data_classifications: Option<Vec<DataClassification>>,
}

impl ReportCriteria {
    fn into_query(self) -> EventQuery {
        let mut query = EventQuery {
            organization_ids: self.organization_id.map(|o| vec![o]),
            principal_ids: self.principal_ids,
            actions: self.actions,
            data_classifications: self.data_classifications,
            limit: i64::MAX,
            ..Default::default()
        };
        query.date_range = self.date_range;
        query
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub report_id: Uuid,
    pub report_type: ReportType,
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
    pub criteria: ReportCriteria,
    pub total_events: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_events: u64,
    pub counts_by_status: HashMap<String, u64>,
    pub counts_by_action: HashMap<String, u64>,
    pub counts_by_classification: HashMap<String, u64>,
    pub unique_principals: u64,
    pub unique_resources: u64,
    pub integrity_violations: u64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HipaaSpecific {
    pub phi_access_events: u64,
    pub phi_modification_events: u64,
    pub unauthorized_attempts: u64,
    pub emergency_access: u64,
    pub break_glass_events: u64,
    pub minimum_necessary_violations: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub high_risk_events: u64,
    pub suspicious_patterns: u64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GdprSpecific {
    pub personal_data_events: u64,
    pub data_subject_rights: u64,
    pub consent_events: u64,
    pub data_breaches: u64,
    pub cross_border_transfers: u64,
    pub retention_violations: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataSubjectRightsBreakdown {
    pub access_requests: u64,
    pub rectification_requests: u64,
    pub erasure_requests: u64,
    pub portability_requests: u64,
    pub objection_requests: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub metadata: ReportMetadata,
    pub summary: ReportSummary,
    pub events: Vec<serde_json::Value>,
    pub hipaa_specific: Option<HipaaSpecific>,
    pub risk_assessment: Option<RiskAssessment>,
    pub gdpr_specific: Option<GdprSpecific>,
    pub legal_basis_breakdown: Option<HashMap<String, u64>>,
    pub data_subject_rights: Option<DataSubjectRightsBreakdown>,
}

pub struct ComplianceReporter {
    store: Arc<dyn Store>,
    /// Keyed by the originating scheduled report config id, so
    /// `Scheduler::retry_failed_deliveries` can re-export without
    /// re-querying the store for a report that already succeeded.
    last_reports: DashMap<Uuid, ComplianceReport>,
}

impl ComplianceReporter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, last_reports: DashMap::new() }
    }

    pub async fn generate_hipaa_report(&self, criteria: &ReportCriteria) -> Result<ComplianceReport> {
        let (metadata, summary, events) = self.collect(criteria.clone()).await?;
        let hipaa_specific = summarize_hipaa(&events);
        let risk_assessment = build_risk_assessment(&events, &hipaa_specific);
        let sanitized = events.iter().map(sanitize_for_report).collect();
        Ok(ComplianceReport {
            metadata,
            summary,
            events: sanitized,
            hipaa_specific: Some(hipaa_specific),
            risk_assessment: Some(risk_assessment),
            gdpr_specific: None,
            legal_basis_breakdown: None,
            data_subject_rights: None,
        })
    }

    pub async fn generate_gdpr_report(&self, criteria: &ReportCriteria) -> Result<ComplianceReport> {
        let (metadata, summary, events) = self.collect(criteria.clone()).await?;
        let gdpr_specific = summarize_gdpr(&events);
        let data_subject_rights = summarize_subject_rights(&events);
        let legal_basis = legal_basis_breakdown(&events);
        let sanitized = events.iter().map(sanitize_for_report).collect();
        Ok(ComplianceReport {
            metadata,
            summary,
            events: sanitized,
            hipaa_specific: None,
            risk_assessment: None,
            gdpr_specific: Some(gdpr_specific),
            legal_basis_breakdown: Some(legal_basis),
            data_subject_rights: Some(data_subject_rights),
        })
    }

    pub async fn generate_custom_report(&self, criteria: &ReportCriteria) -> Result<ComplianceReport> {
        let (metadata, summary, events) = self.collect(criteria.clone()).await?;
        let sanitized = events.iter().map(sanitize_for_report).collect();
        Ok(ComplianceReport {
            metadata,
            summary,
            events: sanitized,
            hipaa_specific: None,
            risk_assessment: None,
            gdpr_specific: None,
            legal_basis_breakdown: None,
            data_subject_rights: None,
        })
    }

    /// Independent report: recompute hash for each matched event,
    /// aggregate pass/fail and latency stats (§4.8, §4.4).
    pub async fn verify_integrity(&self, criteria: &ReportCriteria) -> Result<crate::store::IntegrityVerificationReport> {
        let query = criteria.clone().into_query();
        self.store.verify_integrity(&query).await
    }

    pub async fn last_report_for(&self, scheduled_report_id: Uuid) -> Option<ComplianceReport> {
        self.last_reports.get(&scheduled_report_id).map(|r| r.clone())
    }

    pub fn remember(&self, scheduled_report_id: Uuid, report: ComplianceReport) {
        self.last_reports.insert(scheduled_report_id, report);
    }

    async fn collect(&self, criteria: ReportCriteria) -> Result<(ReportMetadata, ReportSummary, Vec<AuditEvent>)> {
        let query = criteria.clone().into_query();
        let result = self.store.query_events(&query).await?;
        let summary = summarize(&result.events);
        let metadata = ReportMetadata {
            report_id: Uuid::new_v4(),
            report_type: ReportType::Custom,
            generated_at: Utc::now(),
            generated_by: "scheduler".to_string(),
            criteria,
            total_events: summary.total_events,
        };
        Ok((metadata, summary, result.events))
    }
}

fn summarize(events: &[AuditEvent]) -> ReportSummary {
    let mut summary = ReportSummary::default();
    let mut principals = std::collections::HashSet::new();
    let mut resources = std::collections::HashSet::new();

    for event in events {
        summary.total_events += 1;
        *summary.counts_by_status.entry(event.status.as_str().to_string()).or_insert(0) += 1;
        *summary.counts_by_action.entry(event.action.clone()).or_insert(0) += 1;
        *summary
            .counts_by_classification
            .entry(event.data_classification.as_str().to_string())
            .or_insert(0) += 1;
        principals.insert(event.principal_id.clone());
        if let Some(resource_id) = &event.target_resource_id {
            resources.insert(resource_id.clone());
        }
        if !crate::crypto::verify_hash(event) {
            summary.integrity_violations += 1;
        }
        summary.earliest = Some(summary.earliest.map_or(event.timestamp, |e| e.min(event.timestamp)));
        summary.latest = Some(summary.latest.map_or(event.timestamp, |l| l.max(event.timestamp)));
    }

    summary.unique_principals = principals.len() as u64;
    summary.unique_resources = resources.len() as u64;
    summary
}

fn summarize_hipaa(events: &[AuditEvent]) -> HipaaSpecific {
    let mut specific = HipaaSpecific::default();
    for event in events {
        if event.data_classification == DataClassification::Phi {
            match event.status {
                EventStatus::Success if event.action.starts_with("data.read") => specific.phi_access_events += 1,
                EventStatus::Success if event.action.starts_with("data.write") => specific.phi_modification_events += 1,
                _ => {}
            }
            if event.details.get("minimumNecessary").and_then(|v| v.as_bool()) == Some(false) {
                specific.minimum_necessary_violations += 1;
            }
        }
        if event.status == EventStatus::Failure && event.outcome_description.to_lowercase().contains("unauthorized") {
            specific.unauthorized_attempts += 1;
        }
        if event.action.contains("emergency") {
            specific.emergency_access += 1;
        }
        if event.action.contains("break_glass") {
            specific.break_glass_events += 1;
        }
    }
    specific
}

fn build_risk_assessment(events: &[AuditEvent], hipaa: &HipaaSpecific) -> RiskAssessment {
    let high_risk_events = events
        .iter()
        .filter(|e| e.status == EventStatus::Failure && e.data_classification == DataClassification::Phi)
        .count() as u64;

    // Supplemental feature: free-text recommendations derived from the
    // report's own aggregate counts.
    let mut recommendations = Vec::new();
    if hipaa.unauthorized_attempts > 0 {
        recommendations.push("Strengthen access controls for PHI; unauthorized attempts detected.".to_string());
    }
    if hipaa.break_glass_events > 0 {
        recommendations.push("Review break-glass access justifications for the reporting period.".to_string());
    }
    if high_risk_events == 0 && hipaa.unauthorized_attempts == 0 {
        recommendations.push("No elevated risk indicators found in the reporting period.".to_string());
    }

    RiskAssessment { high_risk_events, suspicious_patterns: 0, recommendations }
}

fn summarize_gdpr(events: &[AuditEvent]) -> GdprSpecific {
    let mut specific = GdprSpecific::default();
    for event in events {
        if event.action.starts_with("gdpr.") {
            specific.data_subject_rights += 1;
        }
        if event.action == "gdpr.data.breach" || event.action == "data.breach.detected" {
            specific.data_breaches += 1;
        }
        if event.data_classification != DataClassification::Public {
            specific.personal_data_events += 1;
        }
        if event.action.starts_with("gdpr.consent") || event.details.get("consentGiven").is_some() {
            specific.consent_events += 1;
        }
        if event.details.get("crossBorderTransfer").and_then(|v| v.as_bool()) == Some(true) {
            specific.cross_border_transfers += 1;
        }
        if event.details.get("retentionViolation").and_then(|v| v.as_bool()) == Some(true) {
            specific.retention_violations += 1;
        }
    }
    specific
}

/// Buckets events by their `details.legalBasis` value (Art. 6 GDPR lawful
/// bases); events without one are omitted rather than bucketed as "unknown".
fn legal_basis_breakdown(events: &[AuditEvent]) -> HashMap<String, u64> {
    let mut breakdown = HashMap::new();
    for event in events {
        if let Some(basis) = event.details.get("legalBasis").and_then(|v| v.as_str()) {
            *breakdown.entry(basis.to_string()).or_insert(0) += 1;
        }
    }
    breakdown
}

fn summarize_subject_rights(events: &[AuditEvent]) -> DataSubjectRightsBreakdown {
    let mut breakdown = DataSubjectRightsBreakdown::default();
    for event in events {
        match event.action.as_str() {
            "gdpr.data.export" => breakdown.access_requests += 1,
            "gdpr.data.rectify" => breakdown.rectification_requests += 1,
            "gdpr.data.delete" => breakdown.erasure_requests += 1,
            "gdpr.data.portability" => breakdown.portability_requests += 1,
            "gdpr.data.objection" => breakdown.objection_requests += 1,
            _ => {}
        }
    }
    breakdown
}

/// Strips internal bookkeeping the same way `gdpr::export_user_data` does,
/// so report rows never leak seal internals (§4.9 sanitization).
fn sanitize_for_report(event: &AuditEvent) -> serde_json::Value {
    let mut value = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    if let Some(obj) = value.as_object_mut() {
        for key in ["hash", "signature"] {
            obj.remove(key);
        }
    }
    value
}

pub fn is_compliance_critical_action(action: &str) -> bool {
    is_compliance_critical(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SessionContext;
    use std::collections::HashMap as Map;

    fn event(action: &str, status: EventStatus, classification: DataClassification) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: action.to_string(),
            status,
            principal_id: "u1".to_string(),
            organization_id: "o1".to_string(),
            target_resource_type: None,
            target_resource_id: None,
            data_classification: classification,
            outcome_description: "ok".to_string(),
            session_context: SessionContext::default(),
            details: Map::new(),
            correlation_id: None,
            retention_policy: "default".to_string(),
            hash: Some("deadbeef".to_string()),
            hash_algorithm: "SHA-256".to_string(),
            signature: None,
            signature_algorithm: None,
            archived_at: None,
        }
    }

    #[test]
    fn summarize_counts_by_status_and_action() {
        let events = vec![
            event("data.read", EventStatus::Success, DataClassification::Phi),
            event("data.read", EventStatus::Success, DataClassification::Phi),
            event("auth.login.failure", EventStatus::Failure, DataClassification::Internal),
        ];
        let summary = summarize(&events);
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.counts_by_action["data.read"], 2);
        assert_eq!(summary.counts_by_status["success"], 2);
    }

    #[test]
    fn hipaa_summary_counts_phi_access() {
        let events = vec![event("data.read.patient", EventStatus::Success, DataClassification::Phi)];
        let hipaa = summarize_hipaa(&events);
        assert_eq!(hipaa.phi_access_events, 1);
    }

    #[test]
    fn hipaa_summary_flags_minimum_necessary_violation() {
        let mut flagged = event("data.read.patient", EventStatus::Success, DataClassification::Phi);
        flagged.details.insert("minimumNecessary".to_string(), serde_json::json!(false));
        let compliant = event("data.read.patient", EventStatus::Success, DataClassification::Phi);
        let hipaa = summarize_hipaa(&[flagged, compliant]);
        assert_eq!(hipaa.minimum_necessary_violations, 1);
    }

    #[test]
    fn gdpr_summary_counts_consent_transfers_and_retention_violations() {
        let mut consent = event("gdpr.consent.given", EventStatus::Success, DataClassification::Internal);
        consent.details.insert("consentGiven".to_string(), serde_json::json!(true));
        let mut transfer = event("data.write", EventStatus::Success, DataClassification::Internal);
        transfer.details.insert("crossBorderTransfer".to_string(), serde_json::json!(true));
        let mut retention = event("data.read", EventStatus::Success, DataClassification::Internal);
        retention.details.insert("retentionViolation".to_string(), serde_json::json!(true));
        let breach = event("data.breach.detected", EventStatus::Failure, DataClassification::Phi);

        let gdpr = summarize_gdpr(&[consent, transfer, retention, breach]);
        assert_eq!(gdpr.consent_events, 1);
        assert_eq!(gdpr.cross_border_transfers, 1);
        assert_eq!(gdpr.retention_violations, 1);
        assert_eq!(gdpr.data_breaches, 1);
    }

    #[test]
    fn legal_basis_breakdown_buckets_by_details_field() {
        let mut consent = event("data.read", EventStatus::Success, DataClassification::Internal);
        consent.details.insert("legalBasis".to_string(), serde_json::json!("consent"));
        let mut contract = event("data.write", EventStatus::Success, DataClassification::Internal);
        contract.details.insert("legalBasis".to_string(), serde_json::json!("contract"));
        let unspecified = event("data.read", EventStatus::Success, DataClassification::Internal);

        let breakdown = legal_basis_breakdown(&[consent, contract, unspecified]);
        assert_eq!(breakdown.get("consent"), Some(&1));
        assert_eq!(breakdown.get("contract"), Some(&1));
        assert_eq!(breakdown.len(), 2);
    }
}
