//! Aggregated component health (C11) — §4.11.

use std::sync::Arc;
use std::time::Duration;

use crate::alerts::AlertEngine;
use crate::metrics::MetricsCollector;

const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CHECK_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

const ERROR_RATE_CRITICAL: f64 = 0.1;
const ERROR_RATE_WARNING: f64 = 0.05;
const LATENCY_WARNING_MS: f64 = 5000.0;
const ACTIVE_ALERTS_WARNING: usize = 10;
const SUSPICIOUS_PATTERNS_WARNING: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "OK",
            HealthStatus::Warning => "WARNING",
            HealthStatus::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

/// Runs each sub-check under a timeout with bounded retries, then derives
/// overall status as the worst of its components (§4.11).
pub struct HealthChecker {
    metrics: Arc<MetricsCollector>,
    alerts: Arc<AlertEngine>,
    check_timeout: Duration,
    check_retries: u32,
    retry_delay: Duration,
}

impl HealthChecker {
    pub fn new(metrics: Arc<MetricsCollector>, alerts: Arc<AlertEngine>) -> Self {
        Self {
            metrics,
            alerts,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            check_retries: DEFAULT_CHECK_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn check(&self, organization_id: &str) -> HealthReport {
        let metrics_component = self.with_retry(|| async { Ok(self.check_metrics()) }).await;
        let alerting_component = self
            .with_retry(|| async { self.check_alerting(organization_id).await })
            .await;
        let detector_component = self.with_retry(|| async { Ok(self.check_detector()) }).await;

        let components = vec![metrics_component, alerting_component, detector_component];
        let overall = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Ok);

        HealthReport { overall, components }
    }

    fn check_metrics(&self) -> ComponentHealth {
        let snapshot = self.metrics.snapshot();
        let status = if snapshot.error_rate > ERROR_RATE_CRITICAL {
            HealthStatus::Critical
        } else if snapshot.error_rate > ERROR_RATE_WARNING
            || snapshot.processing_latency_avg_ms > LATENCY_WARNING_MS
        {
            HealthStatus::Warning
        } else {
            HealthStatus::Ok
        };

        ComponentHealth {
            component: "metrics".to_string(),
            status,
            message: format!(
                "errorRate={:.4} avgLatencyMs={:.1}",
                snapshot.error_rate, snapshot.processing_latency_avg_ms
            ),
        }
    }

    async fn check_alerting(&self, organization_id: &str) -> crate::error::Result<ComponentHealth> {
        let active = self.alerts.get_active_alerts(organization_id).await?;
        let status = if active.len() > ACTIVE_ALERTS_WARNING {
            HealthStatus::Warning
        } else {
            HealthStatus::Ok
        };
        Ok(ComponentHealth {
            component: "alerting".to_string(),
            status,
            message: format!("{} active alerts", active.len()),
        })
    }

    fn check_detector(&self) -> ComponentHealth {
        let snapshot = self.metrics.snapshot();
        let status = if snapshot.suspicious_patterns_total > SUSPICIOUS_PATTERNS_WARNING {
            HealthStatus::Warning
        } else {
            HealthStatus::Ok
        };
        ComponentHealth {
            component: "detector".to_string(),
            status,
            message: format!("{} suspicious patterns", snapshot.suspicious_patterns_total),
        }
    }

    /// Retries a sub-check up to `check_retries` times with `retry_delay`
    /// between attempts, bounded by `check_timeout` per attempt. A failed
    /// check that never succeeds is reported as CRITICAL rather than
    /// propagated, since health reporting must never itself error out.
    async fn with_retry<F, Fut>(&self, check: F) -> ComponentHealth
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<ComponentHealth>>,
    {
        let mut last_error = None;
        for attempt in 0..=self.check_retries {
            match tokio::time::timeout(self.check_timeout, check()).await {
                Ok(Ok(result)) => return result,
                Ok(Err(err)) => last_error = Some(err.to_string()),
                Err(_) => last_error = Some("health check timed out".to_string()),
            }
            if attempt < self.check_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        ComponentHealth {
            component: "unknown".to_string(),
            status: HealthStatus::Critical,
            message: last_error.unwrap_or_else(|| "health check failed".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    fn checker() -> HealthChecker {
        let store = Arc::new(InMemoryStore::new());
        let kv = Arc::new(InMemoryKv::new());
        let alerts = Arc::new(AlertEngine::new(store, kv, vec![]));
        let metrics = Arc::new(MetricsCollector::new(false).unwrap());
        HealthChecker::new(metrics, alerts)
    }

    #[tokio::test]
    async fn healthy_system_reports_ok() {
        let checker = checker();
        let report = checker.check("o1").await;
        assert_eq!(report.overall, HealthStatus::Ok);
    }

    #[tokio::test]
    async fn high_error_rate_reports_critical() {
        let checker = checker();
        checker.metrics.increment_counter("events_processed_total", 10);
        checker.metrics.increment_counter("errors_generated_total", 5);
        let report = checker.check("o1").await;
        assert_eq!(report.overall, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn elevated_latency_reports_warning() {
        let checker = checker();
        checker.metrics.increment_counter("events_processed_total", 10);
        checker.metrics.record_histogram("processing_latency_ms", 6000.0);
        let report = checker.check("o1").await;
        assert_eq!(report.overall, HealthStatus::Warning);
    }
}
