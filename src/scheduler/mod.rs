//! Cron-like schedule computation, due-report selection, execution, and
//! multi-channel delivery (C10) — §4.10.

pub mod delivery;
pub mod schedule;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub use delivery::{DeliveryChannel, DeliveryConfig};
pub use schedule::{calculate_next_run, Frequency, Schedule};

use crate::compliance::{export_report, ExportConfig, ExportResult};
use crate::compliance::reporter::{ComplianceReporter, ReportCriteria, ReportType};
use crate::error::{AuditError, Result};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReportConfig {
    pub id: Uuid,
    pub name: String,
    pub report_type: ReportType,
    pub criteria: ReportCriteria,
    pub schedule: Schedule,
    pub delivery: DeliveryConfig,
    pub enabled: bool,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub attempted_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportExecution {
    pub id: Uuid,
    pub report_config_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub record_count: Option<u64>,
    pub download_ref: Option<String>,
    pub delivery_attempts: Vec<DeliveryAttempt>,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    reporter: Arc<ComplianceReporter>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, reporter: Arc<ComplianceReporter>) -> Self {
        Self { store, reporter }
    }

    pub async fn create_scheduled_report(&self, mut config: ScheduledReportConfig) -> Result<ScheduledReportConfig> {
        config.next_run = calculate_next_run(&config.schedule, Utc::now())?;
        self.store.upsert_scheduled_report(&config).await?;
        Ok(config)
    }

    pub async fn update_scheduled_report(&self, id: Uuid, patch: impl FnOnce(&mut ScheduledReportConfig)) -> Result<ScheduledReportConfig> {
        let mut config = self
            .store
            .get_scheduled_report(id)
            .await?
            .ok_or_else(|| AuditError::NotFound(format!("scheduled report {id} not found")))?;
        patch(&mut config);
        self.store.upsert_scheduled_report(&config).await?;
        Ok(config)
    }

    pub async fn delete_scheduled_report(&self, id: Uuid) -> Result<()> {
        self.store.delete_scheduled_report(id).await
    }

    pub async fn list_scheduled_reports(&self, enabled_only: bool) -> Result<Vec<ScheduledReportConfig>> {
        self.store.list_scheduled_reports(enabled_only).await
    }

    pub async fn get_execution_history(&self, report_config_id: Uuid) -> Result<Vec<ReportExecution>> {
        self.store.list_report_executions(report_config_id).await
    }

    pub async fn get_upcoming_executions(&self, organization_id: &str, n: usize) -> Result<Vec<ScheduledReportConfig>> {
        let mut all = self.store.list_scheduled_reports(true).await?;
        all.retain(|c| c.criteria.organization_id.as_deref() == Some(organization_id));
        all.sort_by_key(|c| c.next_run);
        all.truncate(n);
        Ok(all)
    }

    /// Periodic tick (§4.10 "Due selection"): selects `enabled ∧ nextRun ≤
    /// now`, atomically bumps `nextRun` before executing so the same config
    /// can't be re-selected by a concurrent tick.
    #[tracing::instrument(skip(self))]
    pub async fn process_due_reports(&self) -> Result<Vec<ReportExecution>> {
        let now = Utc::now();
        let due = self.store.due_scheduled_reports(now).await?;
        let mut executions = Vec::with_capacity(due.len());

        for mut config in due {
            config.last_run = Some(now);
            config.next_run = calculate_next_run(&config.schedule, now)?;
            self.store.upsert_scheduled_report(&config).await?;

            let execution = self.execute_now(&config).await?;
            executions.push(execution);
        }

        Ok(executions)
    }

    pub async fn execute_now_by_id(&self, id: Uuid) -> Result<ReportExecution> {
        let config = self
            .store
            .get_scheduled_report(id)
            .await?
            .ok_or_else(|| AuditError::NotFound(format!("scheduled report {id} not found")))?;
        self.execute_now(&config).await
    }

    async fn execute_now(&self, config: &ScheduledReportConfig) -> Result<ReportExecution> {
        let mut execution = ReportExecution {
            id: Uuid::new_v4(),
            report_config_id: config.id,
            started_at: Utc::now(),
            completed_at: None,
            status: ExecutionStatus::Running,
            record_count: None,
            download_ref: None,
            delivery_attempts: Vec::new(),
        };
        self.store.insert_report_execution(&execution).await?;

        let report = match config.report_type {
            ReportType::Hipaa => self.reporter.generate_hipaa_report(&config.criteria).await,
            ReportType::Gdpr => self.reporter.generate_gdpr_report(&config.criteria).await,
            ReportType::Custom => self.reporter.generate_custom_report(&config.criteria).await,
        };

        let report = match report {
            Ok(r) => r,
            Err(e) => {
                execution.status = ExecutionStatus::Failed;
                execution.completed_at = Some(Utc::now());
                self.store.update_report_execution(&execution).await?;
                return Err(e);
            }
        };

        execution.record_count = Some(report.summary.total_events);

        let export = export_report(&report, &ExportConfig::default())?;
        let attempt = delivery::deliver(&config.delivery, &export).await;
        execution.delivery_attempts.push(attempt_record(&attempt));

        match attempt {
            Ok(download_ref) => {
                execution.download_ref = Some(download_ref);
                execution.status = ExecutionStatus::Completed;
            }
            Err(_) => {
                execution.status = ExecutionStatus::Failed;
            }
        }
        execution.completed_at = Some(Utc::now());
        self.store.update_report_execution(&execution).await?;
        Ok(execution)
    }

    /// Separate job picking up stragglers for executions whose delivery
    /// failed but the report itself was produced (§4.10 "Execution").
    pub async fn retry_failed_deliveries(&self) -> Result<()> {
        let configs = self.store.list_scheduled_reports(true).await?;
        for config in configs {
            let executions = self.store.list_report_executions(config.id).await?;
            for mut execution in executions.into_iter().filter(|e| e.status == ExecutionStatus::Failed) {
                let max_retries = config.delivery.retry_config.max_attempts;
                if (execution.delivery_attempts.len() as u32) >= max_retries {
                    continue;
                }
                if let Some(report) = self.reporter.last_report_for(config.id).await {
                    let export = export_report(&report, &ExportConfig::default())?;
                    let attempt = delivery::deliver(&config.delivery, &export).await;
                    execution.delivery_attempts.push(attempt_record(&attempt));
                    if attempt.is_ok() {
                        execution.status = ExecutionStatus::Completed;
                    }
                    self.store.update_report_execution(&execution).await?;
                }
            }
        }
        Ok(())
    }
}

fn attempt_record(result: &Result<String>) -> DeliveryAttempt {
    DeliveryAttempt {
        attempted_at: Utc::now(),
        success: result.is_ok(),
        error: result.as_ref().err().map(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::reporter::ReportCriteria;
    use chrono::TimeZone;

    #[test]
    fn weekly_schedule_next_run_matches_scenario() {
        // S6.
        let schedule = Schedule {
            frequency: Frequency::Weekly,
            time: "09:00".to_string(),
            timezone: "UTC".to_string(),
            day_of_week: Some(1),
            day_of_month: None,
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        let next = calculate_next_run(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap());
    }

    #[test]
    fn criteria_compiles() {
        let _ = ReportCriteria::default();
    }
}
