use chrono::Utc;
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::error::{AuditError, Result};
use crate::event::{validate_action_shape, AuditEvent, UnsealedEvent};

const MAX_DETAILS_BYTES: usize = 64 * 1024;
const MAX_CORRELATION_ID_LEN: usize = 256;
const FORBIDDEN_DETAIL_KEYS: [&str; 2] = ["hash", "signature"];

/// Normalizes and validates a producer-supplied event, resolving its
/// retention policy when unspecified (§4.1). Returns an unsealed-but-valid
/// `AuditEvent` with `timestamp` assigned and seal fields still empty;
/// the crypto stage fills those in.
pub fn validate(input: UnsealedEvent, retention: &RetentionConfig) -> Result<AuditEvent> {
    let mut offending = Vec::new();

    if input.principal_id.trim().is_empty() {
        offending.push("principalId");
    }
    if input.organization_id.trim().is_empty() {
        offending.push("organizationId");
    }
    if validate_action_shape(&input.action).is_err() {
        offending.push("action");
    }

    let details_size = serde_json::to_vec(&input.details).map(|b| b.len()).unwrap_or(usize::MAX);
    if details_size > MAX_DETAILS_BYTES {
        offending.push("details");
    }
    for key in input.details.keys() {
        let lower = key.to_lowercase();
        if FORBIDDEN_DETAIL_KEYS.contains(&lower.as_str()) || lower.contains("secret") {
            offending.push("details");
            break;
        }
    }

    if let Some(correlation_id) = &input.correlation_id {
        if correlation_id.len() > MAX_CORRELATION_ID_LEN {
            offending.push("correlationId");
        }
    }

    if !offending.is_empty() {
        return Err(AuditError::Validation(format!(
            "invalid fields: {}",
            offending.join(", ")
        )));
    }

    let retention_policy = resolve_retention_policy(input.data_classification, retention);

    Ok(AuditEvent {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        action: input.action,
        status: input.status,
        principal_id: input.principal_id,
        organization_id: input.organization_id,
        target_resource_type: input.target_resource_type,
        target_resource_id: input.target_resource_id,
        data_classification: input.data_classification,
        outcome_description: input.outcome_description,
        session_context: input.session_context,
        details: input.details,
        correlation_id: input.correlation_id,
        retention_policy,
        hash: None,
        hash_algorithm: "SHA-256".to_string(),
        signature: None,
        signature_algorithm: None,
        archived_at: None,
    })
}

/// Resolves the retention policy name for a classification from config, or
/// falls back to the documented recommended defaults (§3.4) when the
/// operator hasn't configured that classification explicitly.
fn resolve_retention_policy(
    classification: crate::event::DataClassification,
    retention: &RetentionConfig,
) -> String {
    let key = classification.as_str();
    if let Some(entry) = retention
        .policies
        .iter()
        .find(|p| p.data_classification == key)
    {
        return format!("{}-configured", entry.data_classification.to_lowercase());
    }
    match classification {
        crate::event::DataClassification::Phi => "phi-default-7y".to_string(),
        crate::event::DataClassification::Confidential => "confidential-default-3y".to_string(),
        crate::event::DataClassification::Internal => "internal-default-180d".to_string(),
        crate::event::DataClassification::Public => "public-default-90d".to_string(),
    }
}
