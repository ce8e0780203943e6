use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AuditError, Result};

/// Top-level configuration (§6 "Configuration (recognized)"), loaded via
/// the `config` crate from layered TOML/YAML/env sources and deserialized
/// with `camelCase` keys to match the wire contract exactly while keeping
/// idiomatic `snake_case` field names on the Rust side.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub base_url: String,
    #[serde(default)]
    pub authentication: AuthenticationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub kms: KmsConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub pattern_detection: PatternDetectionConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub dlq: DlqConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationConfig {
    #[serde(rename = "type", default)]
    pub auth_type: String,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    #[serde(default)]
    pub retryable_status_codes: Vec<u16>,
    #[serde(default)]
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        // Defaults per §4.3 "Worker": initial=1s, multiplier=2, max=30s, attempts 3-5.
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retryable_status_codes: Vec::new(),
            retryable_errors: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// `min(initial·multiplier^attempt, maxDelay)` (§4.3).
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        let scaled = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_delay_ms as f64);
        std::time::Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KmsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_signing_algorithm")]
    pub signing_algorithm: String,
}

fn default_signing_algorithm() -> String {
    "HMAC-SHA256".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoConfig {
    #[serde(default)]
    pub encryption_key: String,
    /// Supplemental feature (not in the distilled spec): when enabled,
    /// each signature additionally covers the previous event's hash.
    /// Disabled by default so the default hash computation is untouched.
    #[serde(default)]
    pub chain_linking: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub threshold: u32,
    pub window_seconds: u64,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternDetectionConfig {
    #[serde(default = "failed_auth_default")]
    pub failed_auth: DetectorConfig,
    #[serde(default = "unauthorized_access_default")]
    pub unauthorized_access: DetectorConfig,
    #[serde(default = "data_access_default")]
    pub data_access: DetectorConfig,
    #[serde(default = "bulk_operation_default")]
    pub bulk_operation: DetectorConfig,
    #[serde(default)]
    pub off_hours: OffHoursConfig,
}

fn failed_auth_default() -> DetectorConfig {
    DetectorConfig { enabled: true, threshold: 5, window_seconds: 300 }
}
fn unauthorized_access_default() -> DetectorConfig {
    DetectorConfig { enabled: true, threshold: 3, window_seconds: 600 }
}
fn data_access_default() -> DetectorConfig {
    DetectorConfig { enabled: true, threshold: 50, window_seconds: 60 }
}
fn bulk_operation_default() -> DetectorConfig {
    DetectorConfig { enabled: true, threshold: 100, window_seconds: 300 }
}

impl Default for PatternDetectionConfig {
    fn default() -> Self {
        Self {
            failed_auth: failed_auth_default(),
            unauthorized_access: unauthorized_access_default(),
            data_access: data_access_default(),
            bulk_operation: bulk_operation_default(),
            off_hours: OffHoursConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffHoursConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "off_hours_start_default")]
    pub off_hours_start: u32,
    #[serde(default = "off_hours_end_default")]
    pub off_hours_end: u32,
}

fn off_hours_start_default() -> u32 {
    22
}
fn off_hours_end_default() -> u32 {
    6
}

impl Default for OffHoursConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            off_hours_start: off_hours_start_default(),
            off_hours_end: off_hours_end_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqConfig {
    #[serde(default = "dlq_alert_threshold_default")]
    pub alert_threshold: u64,
    #[serde(default = "dlq_max_retention_days_default")]
    pub max_retention_days: i64,
    #[serde(default = "dlq_archive_after_days_default")]
    pub archive_after_days: i64,
}

fn dlq_alert_threshold_default() -> u64 {
    100
}
fn dlq_max_retention_days_default() -> i64 {
    90
}
fn dlq_archive_after_days_default() -> i64 {
    30
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            alert_threshold: dlq_alert_threshold_default(),
            max_retention_days: dlq_max_retention_days_default(),
            archive_after_days: dlq_archive_after_days_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicyEntry {
    pub data_classification: String,
    pub retention_days: i64,
    pub archive_after_days: Option<i64>,
    pub delete_after_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionConfig {
    #[serde(default)]
    pub policies: Vec<RetentionPolicyEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    #[serde(default = "worker_concurrency_default")]
    pub concurrency: usize,
}

fn worker_concurrency_default() -> usize {
    4
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { concurrency: worker_concurrency_default() }
    }
}

impl Config {
    /// Loads configuration via the layered `config` crate sources
    /// (defaults → file → environment), following the pattern used
    /// elsewhere in the corpus for service configuration.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("AUDITFLOW")
                .separator("__")
                .try_parsing(true),
        );
        let raw = builder
            .build()
            .map_err(|e| AuditError::Config(format!("failed to load configuration: {e}")))?;
        raw.try_deserialize()
            .map_err(|e| AuditError::Config(format!("failed to parse configuration: {e}")))
    }

    /// Reads `PSEUDONYM_SALT`/`GDPR_PSEUDONYM_SALT` per §6 "Environment";
    /// the latter is accepted for backward compatibility with deployments
    /// that set the older name.
    pub fn pseudonym_salt() -> Result<String> {
        std::env::var("PSEUDONYM_SALT")
            .or_else(|_| std::env::var("GDPR_PSEUDONYM_SALT"))
            .map_err(|_| AuditError::Config("PSEUDONYM_SALT is not set".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_caps_at_max_delay() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff_delay(0), std::time::Duration::from_millis(1_000));
        assert_eq!(retry.backoff_delay(1), std::time::Duration::from_millis(2_000));
        assert_eq!(retry.backoff_delay(2), std::time::Duration::from_millis(4_000));
        assert_eq!(retry.backoff_delay(10), std::time::Duration::from_millis(30_000));
    }

    #[test]
    fn pattern_detection_defaults_match_spec_table() {
        let cfg = PatternDetectionConfig::default();
        assert_eq!(cfg.failed_auth.threshold, 5);
        assert_eq!(cfg.failed_auth.window_seconds, 300);
        assert_eq!(cfg.unauthorized_access.threshold, 3);
        assert_eq!(cfg.data_access.threshold, 50);
        assert_eq!(cfg.bulk_operation.threshold, 100);
        assert_eq!(cfg.off_hours.off_hours_start, 22);
        assert_eq!(cfg.off_hours.off_hours_end, 6);
    }
}
