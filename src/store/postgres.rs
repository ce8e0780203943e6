//! PostgreSQL-backed `Store` (C4 persistence). Each table stores the
//! structured columns used for filtering alongside a JSONB payload holding
//! the full serialized record, avoiding a wide hand-maintained column set
//! for every nested field.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};
use uuid::Uuid;

use crate::alerts::Alert;
use crate::error::{AuditError, Result};
use crate::event::{AuditEvent, DataClassification};
use crate::gdpr::PseudonymMapping;
use crate::scheduler::{ReportExecution, ScheduledReportConfig};

use super::traits::{
    EventQuery, IntegrityFailure, IntegrityVerificationReport, Pagination, QueryResult,
    RetentionEnforcementResult, SortBy, SortOrder, Store,
};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await?;
        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id UUID PRIMARY KEY,
                organization_id VARCHAR NOT NULL,
                principal_id VARCHAR NOT NULL,
                action VARCHAR NOT NULL,
                status VARCHAR NOT NULL,
                data_classification VARCHAR NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                archived_at TIMESTAMPTZ,
                payload JSONB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_events_org_ts ON audit_events (organization_id, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_audit_events_principal ON audit_events (organization_id, principal_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id UUID PRIMARY KEY,
                organization_id VARCHAR NOT NULL,
                status VARCHAR NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                payload JSONB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_org_status ON alerts (organization_id, status);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pseudonym_mappings (
                pseudonym_id VARCHAR PRIMARY KEY,
                fingerprint VARCHAR,
                payload JSONB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pseudonym_fingerprint ON pseudonym_mappings (fingerprint);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_reports (
                id UUID PRIMARY KEY,
                enabled BOOLEAN NOT NULL,
                next_run TIMESTAMPTZ NOT NULL,
                organization_id VARCHAR,
                payload JSONB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scheduled_reports_due ON scheduled_reports (enabled, next_run);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS report_executions (
                id UUID PRIMARY KEY,
                report_config_id UUID NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                payload JSONB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_report_executions_config ON report_executions (report_config_id, started_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_event(row: &PgRow) -> Result<AuditEvent> {
        let payload: serde_json::Value = row.try_get("payload")?;
        Ok(serde_json::from_value(payload)?)
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_event(&self, event: &AuditEvent) -> Result<()> {
        let payload = serde_json::to_value(event)?;
        sqlx::query(
            r#"
            INSERT INTO audit_events
                (id, organization_id, principal_id, action, status, data_classification, timestamp, archived_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload, archived_at = EXCLUDED.archived_at
            "#,
        )
        .bind(event.id)
        .bind(&event.organization_id)
        .bind(&event.principal_id)
        .bind(&event.action)
        .bind(event.status.as_str())
        .bind(event.data_classification.as_str())
        .bind(event.timestamp)
        .bind(event.archived_at)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<AuditEvent>> {
        let row = sqlx::query("SELECT payload FROM audit_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn query_events(&self, query: &EventQuery) -> Result<QueryResult> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT payload FROM audit_events WHERE 1=1");
        push_event_predicates(&mut builder, query);

        let order_column = match query.sort_by {
            SortBy::Timestamp => "timestamp",
            SortBy::Status => "status",
        };
        let order_direction = match query.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        // Secondary tiebreak by id keeps pagination deterministic when the
        // primary key ties across rows.
        builder.push(format!(" ORDER BY {order_column} {order_direction}, id {order_direction} LIMIT "));
        builder.push_bind(query.limit);
        builder.push(" OFFSET ");
        builder.push_bind(query.offset);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let events = rows.iter().map(Self::row_to_event).collect::<Result<Vec<_>>>()?;

        let mut count_builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM audit_events WHERE 1=1");
        push_event_predicates(&mut count_builder, query);
        let total: i64 = count_builder.build().fetch_one(&self.pool).await?.try_get(0)?;

        Ok(QueryResult { events, pagination: Pagination { total, limit: query.limit, offset: query.offset } })
    }

    async fn update_event_identity(
        &self,
        id: Uuid,
        principal_id: Option<String>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<()> {
        let Some(mut event) = self.get_event(id).await? else { return Ok(()) };
        event.apply_pseudonymization(principal_id, ip_address, user_agent);
        self.insert_event(&event).await
    }

    async fn archive_event(&self, id: Uuid, archived_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE audit_events SET archived_at = $2, payload = jsonb_set(payload, '{archivedAt}', to_jsonb($2::timestamptz)) WHERE id = $1")
            .bind(id)
            .bind(archived_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM audit_events WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_events_for_principal(
        &self,
        organization_id: &str,
        principal_id: &str,
        except_ids: &[Uuid],
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM audit_events WHERE organization_id = $1 AND principal_id = $2 AND NOT (id = ANY($3))",
        )
        .bind(organization_id)
        .bind(principal_id)
        .bind(except_ids.to_vec())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn verify_integrity(&self, query: &EventQuery) -> Result<IntegrityVerificationReport> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT payload FROM audit_events WHERE 1=1");
        push_event_predicates(&mut builder, query);
        let rows = builder.build().fetch_all(&self.pool).await?;

        let mut report = IntegrityVerificationReport { total: rows.len() as u64, ..Default::default() };
        let started = std::time::Instant::now();
        for row in &rows {
            let event = Self::row_to_event(row)?;
            *report.algorithm_histogram.entry(event.hash_algorithm.clone()).or_insert(0) += 1;
            if crate::crypto::verify_hash(&event) {
                report.verified += 1;
            } else {
                report.failed += 1;
                report.failures.push(IntegrityFailure {
                    event_id: event.id,
                    reason: "recomputed hash does not match stored hash".to_string(),
                });
            }
        }
        if report.total > 0 {
            report.avg_latency_ms = started.elapsed().as_secs_f64() * 1000.0 / report.total as f64;
        }
        Ok(report)
    }

    async fn apply_retention_policy(
        &self,
        classification: DataClassification,
        archive_cutoff: DateTime<Utc>,
        delete_cutoff: DateTime<Utc>,
    ) -> Result<RetentionEnforcementResult> {
        let deleted = sqlx::query(
            "DELETE FROM audit_events WHERE data_classification = $1 AND timestamp < $2 AND archived_at IS NOT NULL",
        )
        .bind(classification.as_str())
        .bind(delete_cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let archived = sqlx::query(
            "UPDATE audit_events SET archived_at = NOW() WHERE data_classification = $1 AND timestamp < $2 AND archived_at IS NULL",
        )
        .bind(classification.as_str())
        .bind(archive_cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(RetentionEnforcementResult { archived, deleted })
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let payload = serde_json::to_value(alert)?;
        sqlx::query(
            "INSERT INTO alerts (id, organization_id, status, created_at, payload) VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, payload = EXCLUDED.payload",
        )
        .bind(alert.id)
        .bind(&alert.organization_id)
        .bind(format!("{:?}", alert.status).to_lowercase())
        .bind(alert.created_at)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        let row = sqlx::query("SELECT payload FROM alerts WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| {
            let payload: serde_json::Value = r.try_get("payload")?;
            Ok::<Alert, AuditError>(serde_json::from_value(payload)?)
        })
        .transpose()
    }

    async fn update_alert(&self, alert: &Alert) -> Result<()> {
        self.insert_alert(alert).await
    }

    async fn query_alerts(
        &self,
        organization_id: &str,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Alert>> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT payload FROM alerts WHERE organization_id = ");
        builder.push_bind(organization_id.to_string());
        if let Some(status) = status {
            builder.push(" AND status = ");
            builder.push_bind(status.to_lowercase());
        }
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| {
                let payload: serde_json::Value = r.try_get("payload")?;
                Ok::<Alert, AuditError>(serde_json::from_value(payload)?)
            })
            .collect()
    }

    async fn delete_resolved_alerts_before(&self, organization_id: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM alerts WHERE organization_id = $1 AND status = 'resolved' AND (payload->>'resolvedAt')::timestamptz < $2",
        )
        .bind(organization_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_pseudonym_mapping(&self, mapping: &PseudonymMapping) -> Result<()> {
        let payload = serde_json::to_value(mapping)?;
        sqlx::query(
            "INSERT INTO pseudonym_mappings (pseudonym_id, fingerprint, payload) VALUES ($1, $2, $3)
             ON CONFLICT (pseudonym_id) DO UPDATE SET fingerprint = EXCLUDED.fingerprint, payload = EXCLUDED.payload",
        )
        .bind(&mapping.pseudonym_id)
        .bind(&mapping.fingerprint)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_pseudonym_mapping(&self, pseudonym_id: &str) -> Result<Option<PseudonymMapping>> {
        let row = sqlx::query("SELECT payload FROM pseudonym_mappings WHERE pseudonym_id = $1")
            .bind(pseudonym_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let payload: serde_json::Value = r.try_get("payload")?;
            Ok::<PseudonymMapping, AuditError>(serde_json::from_value(payload)?)
        })
        .transpose()
    }

    async fn find_pseudonym_mapping_by_fingerprint(&self, fingerprint: &str) -> Result<Option<PseudonymMapping>> {
        let row = sqlx::query("SELECT payload FROM pseudonym_mappings WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let payload: serde_json::Value = r.try_get("payload")?;
            Ok::<PseudonymMapping, AuditError>(serde_json::from_value(payload)?)
        })
        .transpose()
    }

    async fn upsert_scheduled_report(&self, config: &ScheduledReportConfig) -> Result<()> {
        let payload = serde_json::to_value(config)?;
        sqlx::query(
            "INSERT INTO scheduled_reports (id, enabled, next_run, organization_id, payload) VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET enabled = EXCLUDED.enabled, next_run = EXCLUDED.next_run, payload = EXCLUDED.payload",
        )
        .bind(config.id)
        .bind(config.enabled)
        .bind(config.next_run)
        .bind(&config.criteria.organization_id)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_scheduled_report(&self, id: Uuid) -> Result<Option<ScheduledReportConfig>> {
        let row = sqlx::query("SELECT payload FROM scheduled_reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let payload: serde_json::Value = r.try_get("payload")?;
            Ok::<ScheduledReportConfig, AuditError>(serde_json::from_value(payload)?)
        })
        .transpose()
    }

    async fn delete_scheduled_report(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM scheduled_reports WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_scheduled_reports(&self, enabled_only: bool) -> Result<Vec<ScheduledReportConfig>> {
        let rows = if enabled_only {
            sqlx::query("SELECT payload FROM scheduled_reports WHERE enabled = TRUE").fetch_all(&self.pool).await?
        } else {
            sqlx::query("SELECT payload FROM scheduled_reports").fetch_all(&self.pool).await?
        };
        rows.iter()
            .map(|r| {
                let payload: serde_json::Value = r.try_get("payload")?;
                Ok::<ScheduledReportConfig, AuditError>(serde_json::from_value(payload)?)
            })
            .collect()
    }

    async fn due_scheduled_reports(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledReportConfig>> {
        let rows = sqlx::query("SELECT payload FROM scheduled_reports WHERE enabled = TRUE AND next_run <= $1")
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                let payload: serde_json::Value = r.try_get("payload")?;
                Ok::<ScheduledReportConfig, AuditError>(serde_json::from_value(payload)?)
            })
            .collect()
    }

    async fn insert_report_execution(&self, execution: &ReportExecution) -> Result<()> {
        let payload = serde_json::to_value(execution)?;
        sqlx::query(
            "INSERT INTO report_executions (id, report_config_id, started_at, payload) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload",
        )
        .bind(execution.id)
        .bind(execution.report_config_id)
        .bind(execution.started_at)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_report_execution(&self, execution: &ReportExecution) -> Result<()> {
        self.insert_report_execution(execution).await
    }

    async fn list_report_executions(&self, report_config_id: Uuid) -> Result<Vec<ReportExecution>> {
        let rows = sqlx::query(
            "SELECT payload FROM report_executions WHERE report_config_id = $1 ORDER BY started_at DESC",
        )
        .bind(report_config_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                let payload: serde_json::Value = r.try_get("payload")?;
                Ok::<ReportExecution, AuditError>(serde_json::from_value(payload)?)
            })
            .collect()
    }
}

fn push_event_predicates<'a>(builder: &mut QueryBuilder<'a, sqlx::Postgres>, query: &'a EventQuery) {
    if let Some((start, end)) = &query.date_range {
        builder.push(" AND timestamp BETWEEN ").push_bind(*start).push(" AND ").push_bind(*end);
    }
    if let Some(ids) = &query.organization_ids {
        builder.push(" AND organization_id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(ids) = &query.principal_ids {
        builder.push(" AND principal_id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(actions) = &query.actions {
        builder.push(" AND action = ANY(").push_bind(actions.clone()).push(")");
    }
    if let Some(classifications) = &query.data_classifications {
        let strings: Vec<String> = classifications.iter().map(|c| c.as_str().to_string()).collect();
        builder.push(" AND data_classification = ANY(").push_bind(strings).push(")");
    }
}
