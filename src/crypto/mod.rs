//! Canonicalization, hashing, and signing (C1) — §4.2.

pub mod canonical;
pub mod signer;

pub use canonical::{constant_time_eq, hash_critical_fields};
pub use signer::{LocalHmac, RemoteKms, Signer};

use crate::error::Result;
use crate::event::{AuditEvent, SignatureAlgorithm};

/// Seals an event: computes its hash and signature in place. Called by the
/// validator pipeline after §4.1 validation, before enqueue (§4.3).
pub async fn seal(event: &mut AuditEvent, signer: &dyn Signer) -> Result<()> {
    let hash = hash_critical_fields(&event.critical_fields());
    let (signature, algorithm) = signer.sign(&hash).await?;
    event.hash = Some(hash);
    event.hash_algorithm = "SHA-256".to_string();
    event.signature = Some(signature);
    event.signature_algorithm = Some(algorithm);
    Ok(())
}

/// Recomputes the hash from current field values and compares in constant
/// time against the stored hash (§4.2 "Verify").
pub fn verify_hash(event: &AuditEvent) -> bool {
    match &event.hash {
        None => false,
        Some(stored) => {
            let recomputed = hash_critical_fields(&event.critical_fields());
            constant_time_eq(&recomputed, stored)
        }
    }
}

/// Recomputes and verifies both hash and signature (§4.2 "Verify").
pub async fn verify(event: &AuditEvent, signer: &dyn Signer) -> Result<bool> {
    if !verify_hash(event) {
        return Ok(false);
    }
    let (hash, signature, algorithm) = match (&event.hash, &event.signature, event.signature_algorithm) {
        (Some(h), Some(s), Some(a)) => (h, s, a),
        _ => return Ok(false),
    };
    signer.verify(hash, signature, algorithm).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DataClassification, EventStatus, SessionContext};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn unsealed() -> AuditEvent {
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

    #[tokio::test]
    async fn seal_then_verify_round_trips() {
        let signer = LocalHmac::new(b"unit-test-key".to_vec()).unwrap();
        let mut event = unsealed();
        seal(&mut event, &signer).await.unwrap();
        assert!(event.is_sealed());
        assert!(verify(&event, &signer).await.unwrap());
    }

    #[tokio::test]
    async fn tampering_with_critical_field_fails_verification() {
        // S1: mutate stored `action`, expect verification failure.
        let signer = LocalHmac::new(b"unit-test-key".to_vec()).unwrap();
        let mut event = unsealed();
        seal(&mut event, &signer).await.unwrap();
        event.action = "data.write".to_string();
        assert!(!verify_hash(&event));
        assert!(!verify(&event, &signer).await.unwrap());
    }

    #[tokio::test]
    async fn tampering_with_non_critical_field_preserves_verification() {
        let signer = LocalHmac::new(b"unit-test-key".to_vec()).unwrap();
        let mut event = unsealed();
        seal(&mut event, &signer).await.unwrap();
        event.details.insert("note".to_string(), serde_json::json!("unrelated"));
        assert!(verify_hash(&event));
    }
}
