//! Export, pseudonymize, delete-with-audit-trail, and retention enforcement
//! (C9) — §4.9. Narrowed from the much broader Art.30/DPIA/breach-notification
//! machinery of a general-purpose GDPR subsystem to the exact operations
//! named here.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::Signer;
use crate::error::{AuditError, Result};
use crate::event::{AuditEvent, DataClassification, EventStatus, SessionContext, UnsealedEvent};
use crate::store::{EventQuery, Store};
use crate::validator;

/// Actions whose audit rows survive GDPR erasure via pseudonymization
/// rather than deletion (§4.9, glossary "Compliance-critical action").
/// `gdpr.*`, `security.*`, `compliance.*`, and `system.backup.*` are prefix
/// matches; the rest are exact.
const COMPLIANCE_CRITICAL_EXACT: [&str; 5] = [
    "auth.login.success",
    "auth.login.failure",
    "auth.logout",
    "data.access.unauthorized",
    "data.breach.detected",
];
const COMPLIANCE_CRITICAL_PREFIXES: [&str; 4] = ["gdpr.", "security.", "compliance.", "system.backup."];

pub fn is_compliance_critical(action: &str) -> bool {
    COMPLIANCE_CRITICAL_EXACT.contains(&action)
        || COMPLIANCE_CRITICAL_PREFIXES.iter().any(|p| action.starts_with(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudonymStrategy {
    Hash,
    Token,
    Encryption,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PseudonymMapping {
    pub pseudonym_id: String,
    pub encrypted_original_id: String,
    pub created_at: DateTime<Utc>,
    /// Populated only for the `hash` strategy, so repeated calls for the
    /// same input can find the existing mapping row deterministically (R2).
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataExportResult {
    pub principal_id: String,
    pub organization_id: String,
    pub events: Vec<serde_json::Value>,
    pub exported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionResult {
    pub records_deleted: u64,
    pub compliance_records_preserved: u64,
}

pub struct GdprController {
    store: Arc<dyn Store>,
    signer: Arc<dyn Signer>,
    salt: String,
    /// Raw 32-byte AES-256 key used to encrypt pseudonym mappings (§4.9
    /// "encryption" strategy, §3.3 "plaintext is never stored"). External
    /// KMS key custody is out of scope (§1); the caller supplies key
    /// material resolved elsewhere.
    kms_key: [u8; 32],
}

impl GdprController {
    pub fn new(store: Arc<dyn Store>, signer: Arc<dyn Signer>, salt: String, kms_key: [u8; 32]) -> Self {
        Self { store, signer, salt, kms_key }
    }

    /// Runs the query for `principalId`+`organizationId`(+optional date
    /// range), strips internal fields, logs `gdpr.data.export` (Art.15/20).
    #[tracing::instrument(skip(self))]
    pub async fn export_user_data(
        &self,
        principal_id: &str,
        organization_id: &str,
        date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<DataExportResult> {
        let mut query = EventQuery {
            principal_ids: Some(vec![principal_id.to_string()]),
            organization_ids: Some(vec![organization_id.to_string()]),
            limit: i64::MAX,
            ..Default::default()
        };
        query.date_range = date_range;

        let result = self.store.query_events(&query).await?;
        let events = result
            .events
            .into_iter()
            .map(strip_internal_fields)
            .collect::<Result<Vec<_>>>()?;

        self.log_gdpr_event(
            organization_id,
            principal_id,
            "gdpr.data.export",
            HashMap::new(),
        )
        .await?;

        Ok(DataExportResult {
            principal_id: principal_id.to_string(),
            organization_id: organization_id.to_string(),
            events,
            exported_at: Utc::now(),
        })
    }

    /// Pseudonymizes `original_id` under the given strategy (§4.9). The
    /// original id is always KMS-encrypted via `self.signer`'s companion
    /// crypto service and stored in `pseudonym_mapping`; `hash` reuses an
    /// existing mapping row for the same input (R2).
    #[tracing::instrument(skip(self, original_id, requested_by))]
    pub async fn pseudonymize_user_data(
        &self,
        original_id: &str,
        strategy: PseudonymStrategy,
        organization_id: &str,
        requested_by: &str,
    ) -> Result<String> {
        let pseudonym_id = match strategy {
            PseudonymStrategy::Hash => {
                let fingerprint = self.hash_fingerprint(original_id);
                if let Some(existing) = self.store.find_pseudonym_mapping_by_fingerprint(&fingerprint).await? {
                    return Ok(existing.pseudonym_id);
                }
                format!("pseudo-{}", &fingerprint[..16])
            }
            PseudonymStrategy::Token => {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                format!("pseudo-{}", hex::encode(bytes))
            }
            PseudonymStrategy::Encryption => {
                let encoded = general_purpose::URL_SAFE_NO_PAD.encode(original_id.as_bytes());
                format!("pseudo-enc-{}", &encoded[..encoded.len().min(16)])
            }
        };

        let encrypted_original_id = self.kms_encrypt(original_id).await?;
        let fingerprint = matches!(strategy, PseudonymStrategy::Hash)
            .then(|| self.hash_fingerprint(original_id));

        self.store
            .upsert_pseudonym_mapping(&PseudonymMapping {
                pseudonym_id: pseudonym_id.clone(),
                encrypted_original_id,
                created_at: Utc::now(),
                fingerprint,
            })
            .await?;

        let mut metadata = HashMap::new();
        metadata.insert("strategy".to_string(), format!("{strategy:?}"));
        metadata.insert("requestedBy".to_string(), requested_by.to_string());
        self.log_gdpr_event(organization_id, original_id, "gdpr.data.pseudonymize", metadata)
            .await?;

        Ok(pseudonym_id)
    }

    /// Decrypts the original id behind a pseudonym. Lookup failures return
    /// `NOT_FOUND`; decryption failures surface `INTEGRITY_ERROR` (§4.9).
    pub async fn get_original_id(&self, pseudonym_id: &str) -> Result<String> {
        let mapping = self
            .store
            .get_pseudonym_mapping(pseudonym_id)
            .await?
            .ok_or_else(|| AuditError::NotFound(format!("pseudonym {pseudonym_id} not found")))?;
        self.kms_decrypt(&mapping.encrypted_original_id).await
    }

    /// Deletes (or pseudonymizes, when `preserve_compliance_audits`) every
    /// row for `principal_id`, logging `gdpr.data.delete` with counts
    /// (§4.9, S4).
    #[tracing::instrument(skip(self, requested_by))]
    pub async fn delete_user_data_with_audit_trail(
        &self,
        principal_id: &str,
        organization_id: &str,
        requested_by: &str,
        preserve_compliance_audits: bool,
    ) -> Result<DeletionResult> {
        let query = EventQuery {
            principal_ids: Some(vec![principal_id.to_string()]),
            organization_ids: Some(vec![organization_id.to_string()]),
            limit: i64::MAX,
            ..Default::default()
        };
        let all_rows = self.store.query_events(&query).await?.events;

        let (critical, rest): (Vec<_>, Vec<_>) = all_rows
            .into_iter()
            .partition(|e| is_compliance_critical(&e.action));

        let mut preserved_ids = Vec::new();
        if preserve_compliance_audits {
            for event in &critical {
                let pseudonym_id = self
                    .pseudonymize_user_data(
                        &event.principal_id,
                        PseudonymStrategy::Hash,
                        organization_id,
                        requested_by,
                    )
                    .await?;
                self.store
                    .update_event_identity(event.id, Some(pseudonym_id), None, None)
                    .await?;
                preserved_ids.push(event.id);
            }
        }

        let except_ids: Vec<Uuid> = if preserve_compliance_audits { preserved_ids } else { Vec::new() };
        let records_deleted = if preserve_compliance_audits {
            self.store
                .delete_events_for_principal(organization_id, principal_id, &except_ids)
                .await?
        } else {
            let all_count = (critical.len() + rest.len()) as u64;
            self.store
                .delete_events_for_principal(organization_id, principal_id, &[])
                .await?;
            all_count
        };

        let compliance_records_preserved = if preserve_compliance_audits { critical.len() as u64 } else { 0 };

        let mut metadata = HashMap::new();
        metadata.insert("recordsDeleted".to_string(), records_deleted.to_string());
        metadata.insert(
            "complianceRecordsPreserved".to_string(),
            compliance_records_preserved.to_string(),
        );
        metadata.insert("requestedBy".to_string(), requested_by.to_string());
        self.log_gdpr_event(organization_id, principal_id, "gdpr.data.delete", metadata)
            .await?;

        Ok(DeletionResult { records_deleted, compliance_records_preserved })
    }

    fn hash_fingerprint(&self, original_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(original_id.as_bytes());
        hasher.update(self.salt.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Real AES-256-GCM encryption (§3.3 "plaintext is never stored"),
    /// reusing the same cipher path as report export encryption. External
    /// KMS key custody is out of scope (§1) — `self.kms_key` stands in for
    /// a key resolved from an external KMS.
    async fn kms_encrypt(&self, plaintext: &str) -> Result<String> {
        let ciphertext = crate::compliance::export::encrypt(plaintext.as_bytes(), &self.kms_key)?;
        Ok(general_purpose::STANDARD.encode(ciphertext))
    }

    async fn kms_decrypt(&self, ciphertext: &str) -> Result<String> {
        let decoded = general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|_| AuditError::Integrity("pseudonym mapping is corrupt".to_string()))?;
        let plaintext = crate::compliance::export::decrypt(&decoded, &self.kms_key)
            .map_err(|_| AuditError::Integrity("pseudonym mapping is corrupt".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| AuditError::Integrity("pseudonym mapping is corrupt".to_string()))
    }

    async fn log_gdpr_event(
        &self,
        organization_id: &str,
        principal_id: &str,
        action: &str,
        details: HashMap<String, String>,
    ) -> Result<()> {
        let input = UnsealedEvent {
            action: action.to_string(),
            status: EventStatus::Success,
            principal_id: principal_id.to_string(),
            organization_id: organization_id.to_string(),
            target_resource_type: None,
            target_resource_id: None,
            data_classification: DataClassification::Confidential,
            outcome_description: "gdpr operation completed".to_string(),
            session_context: SessionContext::default(),
            details: details
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect(),
            correlation_id: None,
        };
        let mut event: AuditEvent = validator::validate(input, &crate::config::RetentionConfig::default())?;
        crate::crypto::seal(&mut event, self.signer.as_ref()).await?;
        self.store.insert_event(&event).await
    }
}

fn strip_internal_fields(event: AuditEvent) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(&event)?;
    if let Some(obj) = value.as_object_mut() {
        for key in ["hash", "hashAlgorithm", "signature", "signatureAlgorithm", "retentionPolicy"] {
            obj.remove(key);
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::LocalHmac;
    use crate::store::memory::InMemoryStore;

    fn controller() -> GdprController {
        let store = Arc::new(InMemoryStore::new());
        let signer: Arc<dyn Signer> = Arc::new(LocalHmac::new(b"test-key".to_vec()).unwrap());
        GdprController::new(store, signer, "unit-test-salt".to_string(), [9u8; 32])
    }

    #[test]
    fn compliance_critical_matches_exact_and_prefix() {
        assert!(is_compliance_critical("auth.login.success"));
        assert!(is_compliance_critical("auth.login.failure"));
        assert!(is_compliance_critical("auth.logout"));
        assert!(is_compliance_critical("data.access.unauthorized"));
        assert!(is_compliance_critical("data.breach.detected"));
        assert!(is_compliance_critical("gdpr.data.export"));
        assert!(is_compliance_critical("security.anything"));
        assert!(!is_compliance_critical("data.read"));
    }

    #[tokio::test]
    async fn pseudonymize_hash_strategy_is_deterministic() {
        // R2: pseudonymize(id, hash) twice -> same pseudonymId, one mapping row.
        let controller = controller();
        let first = controller
            .pseudonymize_user_data("user-1", PseudonymStrategy::Hash, "o1", "admin")
            .await
            .unwrap();
        let second = controller
            .pseudonymize_user_data("user-1", PseudonymStrategy::Hash, "o1", "admin")
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn get_original_id_round_trips_through_pseudonymize() {
        // R3.
        let controller = controller();
        let pseudonym_id = controller
            .pseudonymize_user_data("user-42", PseudonymStrategy::Hash, "o1", "admin")
            .await
            .unwrap();
        let original = controller.get_original_id(&pseudonym_id).await.unwrap();
        assert_eq!(original, "user-42");
    }

    #[tokio::test]
    async fn encrypted_mapping_does_not_expose_plaintext() {
        let controller = controller();
        let pseudonym_id = controller
            .pseudonymize_user_data("user-secret", PseudonymStrategy::Hash, "o1", "admin")
            .await
            .unwrap();
        let mapping = controller.store.get_pseudonym_mapping(&pseudonym_id).await.unwrap().unwrap();
        assert!(!mapping.encrypted_original_id.contains("user-secret"));
    }

    #[tokio::test]
    async fn unknown_pseudonym_is_not_found() {
        let controller = controller();
        let err = controller.get_original_id("pseudo-does-not-exist").await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }
}
