use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AuditError, Result};

pub type EventId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Attempt,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataClassification {
    #[serde(rename = "PUBLIC")]
    Public,
    #[serde(rename = "INTERNAL")]
    Internal,
    #[serde(rename = "CONFIDENTIAL")]
    Confidential,
    #[serde(rename = "PHI")]
    Phi,
}

impl DataClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClassification::Public => "PUBLIC",
            DataClassification::Internal => "INTERNAL",
            DataClassification::Confidential => "CONFIDENTIAL",
            DataClassification::Phi => "PHI",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "HMAC-SHA256")]
    HmacSha256,
    #[serde(rename = "RSASSA_PSS_SHA_256")]
    RsaPssSha256,
    #[serde(rename = "RSASSA_PSS_SHA_384")]
    RsaPssSha384,
    #[serde(rename = "RSASSA_PSS_SHA_512")]
    RsaPssSha512,
    #[serde(rename = "RSASSA_PKCS1_V1_5_SHA_256")]
    RsaPkcs1Sha256,
    #[serde(rename = "RSASSA_PKCS1_V1_5_SHA_384")]
    RsaPkcs1Sha384,
    #[serde(rename = "RSASSA_PKCS1_V1_5_SHA_512")]
    RsaPkcs1Sha512,
}

/// Session-scoped context that may later be pseudonymized (I1).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Immutable audit record (§3.1). Only `archived_at`, retention-driven
/// deletion, and pseudonymization mutations to `principal_id` and
/// `session_context.{ip_address,user_agent}` may occur once persisted (I1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub status: EventStatus,
    pub principal_id: String,
    pub organization_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_resource_id: Option<String>,
    pub data_classification: DataClassification,
    pub outcome_description: String,
    #[serde(default)]
    pub session_context: SessionContext,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub retention_policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub hash_algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_algorithm: Option<SignatureAlgorithm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

/// The producer-supplied shape, sans seal fields (§6 Producer API).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsealedEvent {
    pub action: String,
    pub status: EventStatus,
    pub principal_id: String,
    pub organization_id: String,
    pub target_resource_type: Option<String>,
    pub target_resource_id: Option<String>,
    pub data_classification: DataClassification,
    pub outcome_description: String,
    #[serde(default)]
    pub session_context: SessionContext,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    pub correlation_id: Option<String>,
}

/// The eight critical fields covered by the integrity hash (§3.1 I2).
#[derive(Debug, Clone)]
pub struct CriticalFields {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub status: EventStatus,
    pub principal_id: String,
    pub organization_id: String,
    pub target_resource_type: Option<String>,
    pub target_resource_id: Option<String>,
    pub outcome_description: String,
}

impl AuditEvent {
    pub fn critical_fields(&self) -> CriticalFields {
        CriticalFields {
            timestamp: self.timestamp,
            action: self.action.clone(),
            status: self.status,
            principal_id: self.principal_id.clone(),
            organization_id: self.organization_id.clone(),
            target_resource_type: self.target_resource_type.clone(),
            target_resource_id: self.target_resource_id.clone(),
            outcome_description: self.outcome_description.clone(),
        }
    }

    /// Every successfully ingested event has a non-empty hash (I4).
    pub fn is_sealed(&self) -> bool {
        self.hash.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// Applies a pseudonymization mutation to principal/session fields —
    /// the only identity-bearing fields I1 permits mutating post-persist.
    pub fn apply_pseudonymization(&mut self, principal_id: Option<String>, ip: Option<String>, ua: Option<String>) {
        if let Some(principal_id) = principal_id {
            self.principal_id = principal_id;
        }
        if let Some(ip) = ip {
            self.session_context.ip_address = Some(ip);
        }
        if let Some(ua) = ua {
            self.session_context.user_agent = Some(ua);
        }
    }
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Attempt => "attempt",
            EventStatus::Success => "success",
            EventStatus::Failure => "failure",
        }
    }
}

/// `action` must match `[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+` (§4.1).
pub fn validate_action_shape(action: &str) -> Result<()> {
    static ACTION_RE: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+$").unwrap()
    });
    if ACTION_RE.is_match(action) {
        Ok(())
    } else {
        Err(AuditError::Validation(format!(
            "action '{action}' does not match required dot-separated identifier shape"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
            action: "data.read".to_string(),
            status: EventStatus::Success,
            principal_id: "u1".to_string(),
            organization_id: "o1".to_string(),
            target_resource_type: Some("Patient".to_string()),
            target_resource_id: Some("p1".to_string()),
            data_classification: DataClassification::Phi,
            outcome_description: "ok".to_string(),
            session_context: SessionContext::default(),
            details: HashMap::new(),
            correlation_id: None,
            retention_policy: "phi-default".to_string(),
            hash: None,
            hash_algorithm: "SHA-256".to_string(),
            signature: None,
            signature_algorithm: None,
            archived_at: None,
        }
    }

    #[test]
    fn action_shape_validation() {
        assert!(validate_action_shape("auth.login.failure").is_ok());
        assert!(validate_action_shape("data.read").is_ok());
        assert!(validate_action_shape("gdpr.data.delete").is_ok());
        assert!(validate_action_shape("noseparator").is_err());
        assert!(validate_action_shape("Data.Read").is_err());
        assert!(validate_action_shape(".leading").is_err());
    }

    #[test]
    fn unsealed_until_hash_set() {
        let mut e = sample();
        assert!(!e.is_sealed());
        e.hash = Some("".to_string());
        assert!(!e.is_sealed());
        e.hash = Some("abc123".to_string());
        assert!(e.is_sealed());
    }

    #[test]
    fn pseudonymization_only_touches_identity_fields() {
        let mut e = sample();
        let original_action = e.action.clone();
        e.apply_pseudonymization(Some("pseudo-abc".to_string()), Some("0.0.0.0".to_string()), None);
        assert_eq!(e.principal_id, "pseudo-abc");
        assert_eq!(e.session_context.ip_address.as_deref(), Some("0.0.0.0"));
        assert_eq!(e.action, original_action);
    }
}
