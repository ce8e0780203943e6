use async_trait::async_trait;
use std::sync::Arc;

use super::{Alert, AlertType, Severity};
use crate::error::Result;
use crate::store::Store;

/// Pluggable alert sink (design note "Pluggable alert sinks"): each sink
/// declares a name; the database sink is authoritative for lifecycle state.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Authoritative sink: lifecycle methods (acknowledge/resolve/dismiss) only
/// ever call through the database, never the notification sinks.
pub struct DatabaseSink {
    store: Arc<dyn Store>,
}

impl DatabaseSink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AlertSink for DatabaseSink {
    fn name(&self) -> &str {
        "database"
    }

    async fn notify(&self, alert: &Alert) -> Result<()> {
        self.store.insert_alert(alert).await
    }
}

/// Webhook notification sink (§4.6 "Notifications"). Non-CRITICAL alerts
/// POST with a `warning` tag set; CRITICAL alerts additionally carry
/// `Priority: 5`.
pub struct WebhookSink {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl WebhookSink {
    pub fn new(base_url: String, bearer_token: String) -> Self {
        Self { client: reqwest::Client::new(), base_url, bearer_token }
    }

    fn alert_type_tag(alert_type: AlertType) -> &'static str {
        match alert_type {
            AlertType::Security => "SECURITY",
            AlertType::Compliance => "COMPLIANCE",
            AlertType::Performance => "PERFORMANCE",
            AlertType::System => "SYSTEM",
            AlertType::Metrics => "METRICS",
            AlertType::Custom => "CUSTOM",
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    #[tracing::instrument(skip(self, alert), fields(alert_id = %alert.id))]
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let url = format!("{}/{}", self.base_url, alert.organization_id);
        let tags = format!(
            "warning,{},{},{},{:?}",
            Self::alert_type_tag(alert.alert_type),
            alert.severity.as_str(),
            alert.source,
            alert.status
        );

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.bearer_token)
            .header("Title", alert.title.clone())
            .header("Tags", tags)
            .body(alert.description.clone());

        if alert.severity == Severity::Critical {
            request = request.header("Priority", "5");
        }

        request
            .send()
            .await
            .map_err(|e| crate::error::AuditError::Network(format!("webhook delivery failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_type_tags_match_wire_names() {
        assert_eq!(WebhookSink::alert_type_tag(AlertType::Security), "SECURITY");
        assert_eq!(WebhookSink::alert_type_tag(AlertType::Custom), "CUSTOM");
    }
}
