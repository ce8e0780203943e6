//! Sliding-window suspicious-pattern detection (C5) — §4.5.

use chrono::{DateTime, Timelike, Utc};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::alerts::{AlertType, NewAlert, Severity};
use crate::config::PatternDetectionConfig;
use crate::event::{AuditEvent, EventStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    FailedAuth,
    UnauthorizedAccess,
    DataVelocity,
    BulkOperation,
    OffHours,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::FailedAuth => "FAILED_AUTH",
            PatternType::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
            PatternType::DataVelocity => "DATA_VELOCITY",
            PatternType::BulkOperation => "BULK_OPERATION",
            PatternType::OffHours => "OFF_HOURS",
        }
    }

    fn severity(&self) -> Severity {
        match self {
            PatternType::FailedAuth => Severity::High,
            PatternType::UnauthorizedAccess => Severity::Critical,
            PatternType::DataVelocity => Severity::Medium,
            PatternType::BulkOperation => Severity::Medium,
            PatternType::OffHours => Severity::Low,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuspiciousPattern {
    pub pattern_type: PatternType,
    pub organization_id: String,
    pub source: String,
    pub event_count: usize,
    pub severity: Severity,
}

impl SuspiciousPattern {
    pub fn into_new_alert(self) -> NewAlert {
        let mut metadata = HashMap::new();
        metadata.insert("organizationId".to_string(), self.organization_id.clone());
        metadata.insert("patternType".to_string(), self.pattern_type.as_str().to_string());
        metadata.insert("eventCount".to_string(), self.event_count.to_string());
        metadata.insert("source".to_string(), self.source.clone());

        NewAlert {
            organization_id: self.organization_id,
            severity: self.severity,
            alert_type: AlertType::Security,
            title: format!("{} detected", self.pattern_type.as_str()),
            description: format!(
                "{} events matched the {} pattern over the configured window",
                self.event_count,
                self.pattern_type.as_str()
            ),
            source: self.source,
            correlation_id: None,
            metadata,
            tags: vec![self.pattern_type.as_str().to_lowercase()],
        }
    }
}

fn unauthorized_regex() -> &'static Regex {
    static RE: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"(?i)unauthorized|access denied|forbidden").unwrap());
    &RE
}

fn matches_data_or_fhir(action: &str) -> bool {
    action.starts_with("data.") || action.starts_with("fhir.")
}

fn matches_bulk(event: &AuditEvent) -> bool {
    if event.action.starts_with("data.export") || event.action.starts_with("data.import") || event.action.contains("bulk") {
        return true;
    }
    event
        .details
        .get("recordCount")
        .and_then(|v| v.as_u64())
        .map(|count| count > 10)
        .unwrap_or(false)
}

/// Bounded recent-event buffer, evaluated per detector on each ingest
/// (§4.5). Cross-instance aggregation is out of scope — the buffer is
/// single-writer, per-instance state (§4.11 "Scheduling model").
pub struct PatternDetector {
    config: PatternDetectionConfig,
    buffer: VecDeque<AuditEvent>,
    longest_window: Duration,
}

impl PatternDetector {
    pub fn new(config: PatternDetectionConfig) -> Self {
        let longest_window = [
            config.failed_auth.window_seconds,
            config.unauthorized_access.window_seconds,
            config.data_access.window_seconds,
            config.bulk_operation.window_seconds,
        ]
        .into_iter()
        .max()
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(600));

        Self { config, buffer: VecDeque::new(), longest_window }
    }

    /// Records an event and evaluates all five detectors, returning every
    /// pattern that crossed threshold as of this event (P8: deterministic
    /// given an identical stream). `now` is the reference instant used to
    /// evict stale buffer entries and bound each detector's window.
    pub fn record_event(&mut self, event: AuditEvent, now: DateTime<Utc>) -> Vec<SuspiciousPattern> {
        self.buffer.push_back(event);
        self.evict_stale(now);

        let mut patterns = Vec::new();
        if self.config.failed_auth.enabled {
            if let Some(p) = self.evaluate_failed_auth(now) {
                patterns.push(p);
            }
        }
        if self.config.unauthorized_access.enabled {
            if let Some(p) = self.evaluate_unauthorized_access(now) {
                patterns.push(p);
            }
        }
        if self.config.data_access.enabled {
            if let Some(p) = self.evaluate_data_velocity(now) {
                patterns.push(p);
            }
        }
        if self.config.bulk_operation.enabled {
            if let Some(p) = self.evaluate_bulk_operation(now) {
                patterns.push(p);
            }
        }
        if self.config.off_hours.enabled {
            if let Some(p) = self.evaluate_off_hours() {
                patterns.push(p);
            }
        }
        patterns
    }

    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::from_std(self.longest_window).unwrap();
        while let Some(front) = self.buffer.front() {
            if front.timestamp < cutoff {
                self.buffer.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_events(&self, window_seconds: u64, now: DateTime<Utc>) -> impl Iterator<Item = &AuditEvent> {
        let cutoff = now - chrono::Duration::seconds(window_seconds as i64);
        self.buffer.iter().filter(move |e| e.timestamp >= cutoff)
    }

    fn evaluate_failed_auth(&self, now: DateTime<Utc>) -> Option<SuspiciousPattern> {
        let cfg = &self.config.failed_auth;
        let mut groups: HashMap<String, (String, usize)> = HashMap::new();
        for event in self.window_events(cfg.window_seconds, now) {
            if event.action == "auth.login.failure" && event.status == EventStatus::Failure {
                let key = if !event.principal_id.is_empty() {
                    event.principal_id.clone()
                } else if let Some(ip) = &event.session_context.ip_address {
                    ip.clone()
                } else {
                    "unknown".to_string()
                };
                let entry = groups.entry(key.clone()).or_insert((event.organization_id.clone(), 0));
                entry.1 += 1;
            }
        }
        groups
            .into_iter()
            .find(|(_, (_, count))| *count >= cfg.threshold as usize)
            .map(|(key, (org, count))| SuspiciousPattern {
                pattern_type: PatternType::FailedAuth,
                organization_id: org,
                source: key,
                event_count: count,
                severity: PatternType::FailedAuth.severity(),
            })
    }

    fn evaluate_unauthorized_access(&self, now: DateTime<Utc>) -> Option<SuspiciousPattern> {
        let cfg = &self.config.unauthorized_access;
        let mut groups: HashMap<String, (String, usize)> = HashMap::new();
        for event in self.window_events(cfg.window_seconds, now) {
            if event.status == EventStatus::Failure && unauthorized_regex().is_match(&event.outcome_description) {
                let entry = groups
                    .entry(event.principal_id.clone())
                    .or_insert((event.organization_id.clone(), 0));
                entry.1 += 1;
            }
        }
        groups
            .into_iter()
            .find(|(_, (_, count))| *count >= cfg.threshold as usize)
            .map(|(key, (org, count))| SuspiciousPattern {
                pattern_type: PatternType::UnauthorizedAccess,
                organization_id: org,
                source: key,
                event_count: count,
                severity: PatternType::UnauthorizedAccess.severity(),
            })
    }

    fn evaluate_data_velocity(&self, now: DateTime<Utc>) -> Option<SuspiciousPattern> {
        let cfg = &self.config.data_access;
        let mut groups: HashMap<String, (String, usize)> = HashMap::new();
        for event in self.window_events(cfg.window_seconds, now) {
            let matches = event.status == EventStatus::Success
                && (matches_data_or_fhir(&event.action) || event.target_resource_type.is_some());
            if matches {
                let entry = groups
                    .entry(event.principal_id.clone())
                    .or_insert((event.organization_id.clone(), 0));
                entry.1 += 1;
            }
        }
        groups
            .into_iter()
            .find(|(_, (_, count))| *count >= cfg.threshold as usize)
            .map(|(key, (org, count))| SuspiciousPattern {
                pattern_type: PatternType::DataVelocity,
                organization_id: org,
                source: key,
                event_count: count,
                severity: PatternType::DataVelocity.severity(),
            })
    }

    fn evaluate_bulk_operation(&self, now: DateTime<Utc>) -> Option<SuspiciousPattern> {
        let cfg = &self.config.bulk_operation;
        let mut organization_id = String::new();
        let mut count = 0usize;
        for event in self.window_events(cfg.window_seconds, now) {
            if matches_bulk(event) {
                if organization_id.is_empty() {
                    organization_id = event.organization_id.clone();
                }
                count += 1;
            }
        }
        if count >= cfg.threshold as usize {
            Some(SuspiciousPattern {
                pattern_type: PatternType::BulkOperation,
                organization_id,
                source: "global".to_string(),
                event_count: count,
                severity: PatternType::BulkOperation.severity(),
            })
        } else {
            None
        }
    }

    /// Evaluated against the triggering event alone: a single off-hours
    /// access is already reportable (threshold 1), unlike the other
    /// window-aggregated detectors.
    fn evaluate_off_hours(&self) -> Option<SuspiciousPattern> {
        let cfg = &self.config.off_hours;
        let event = self.buffer.back()?;
        if event.status != EventStatus::Success || !matches_data_or_fhir(&event.action) {
            return None;
        }
        let hour = event.timestamp.hour();
        let in_off_hours = if cfg.off_hours_start <= cfg.off_hours_end {
            hour >= cfg.off_hours_start && hour < cfg.off_hours_end
        } else {
            // Wraps midnight: e.g. start=22, end=6 covers [22,24) ∪ [0,6).
            hour >= cfg.off_hours_start || hour < cfg.off_hours_end
        };
        if !in_off_hours {
            return None;
        }
        Some(SuspiciousPattern {
            pattern_type: PatternType::OffHours,
            organization_id: event.organization_id.clone(),
            source: event.principal_id.clone(),
            event_count: 1,
            severity: PatternType::OffHours.severity(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DataClassification, SessionContext};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap as Map;
    use uuid::Uuid;

    fn event_at(action: &str, status: EventStatus, principal: &str, hour: u32) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            action: action.to_string(),
            status,
            principal_id: principal.to_string(),
            organization_id: "o1".to_string(),
            target_resource_type: None,
            target_resource_id: None,
            data_classification: DataClassification::Phi,
            outcome_description: "ok".to_string(),
            session_context: SessionContext::default(),
            details: Map::new(),
            correlation_id: None,
            retention_policy: "default".to_string(),
            hash: Some("h".to_string()),
            hash_algorithm: "SHA-256".to_string(),
            signature: None,
            signature_algorithm: None,
            archived_at: None,
        }
    }

    #[test]
    fn off_hours_wraps_midnight() {
        // B2: start=22 end=6 — 23 and 3 are off-hours, 10 is not.
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap();
        let mut detector = PatternDetector::new(PatternDetectionConfig::default());
        let at_23 = detector.record_event(event_at("data.read", EventStatus::Success, "u1", 23), now);
        assert!(at_23.iter().any(|p| p.pattern_type == PatternType::OffHours));

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        let mut detector = PatternDetector::new(PatternDetectionConfig::default());
        let at_3 = detector.record_event(event_at("data.read", EventStatus::Success, "u1", 3), now);
        assert!(at_3.iter().any(|p| p.pattern_type == PatternType::OffHours));

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let mut detector = PatternDetector::new(PatternDetectionConfig::default());
        let at_10 = detector.record_event(event_at("data.read", EventStatus::Success, "u1", 10), now);
        assert!(!at_10.iter().any(|p| p.pattern_type == PatternType::OffHours));
    }

    #[test]
    fn failed_auth_triggers_at_threshold() {
        let mut config = PatternDetectionConfig::default();
        config.failed_auth.threshold = 3;
        let mut detector = PatternDetector::new(config);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let mut last = Vec::new();
        for _ in 0..3 {
            last = detector.record_event(event_at("auth.login.failure", EventStatus::Failure, "u1", 10), now);
        }
        assert!(last.iter().any(|p| p.pattern_type == PatternType::FailedAuth && p.event_count == 3));
    }

    #[test]
    fn bulk_operation_is_global_not_per_principal() {
        let mut config = PatternDetectionConfig::default();
        config.bulk_operation.threshold = 2;
        let mut detector = PatternDetector::new(config);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        detector.record_event(event_at("data.export.full", EventStatus::Success, "u1", 10), now);
        let last = detector.record_event(event_at("data.export.full", EventStatus::Success, "u2", 10), now);
        assert!(last.iter().any(|p| p.pattern_type == PatternType::BulkOperation));
    }
}
