use sha2::{Digest, Sha256};

use crate::event::CriticalFields;

/// One byte prepended to a critical-field value that is present but empty,
/// distinguishing it from a field that is entirely absent. Both render as
/// "empty" to a human reading the canonical string, but only the sentinel
/// form hashes differently from the absent form (B1).
const PRESENT_EMPTY_SENTINEL: char = '\u{0}';

/// Canonicalize the eight critical fields (§3.1 I2) into the deterministic
/// `k1:v1|k2:v2|…` string, field names sorted lexicographically. Missing
/// optional fields are emitted with an empty value; a present-but-empty
/// string value is emitted with a one-byte sentinel so the two cases never
/// collide (see `PRESENT_EMPTY_SENTINEL`).
pub fn canonicalize(fields: &CriticalFields) -> String {
    fn render_optional(v: &Option<String>) -> String {
        match v {
            None => String::new(),
            Some(s) if s.is_empty() => PRESENT_EMPTY_SENTINEL.to_string(),
            Some(s) => s.clone(),
        }
    }

    // Documented join order (persisted-layouts contract): action,
    // dataClassification, organizationId, outcomeDescription, principalId,
    // status, targetResourceId, targetResourceType, timestamp.
    // dataClassification is not part of the critical-fields set (I2) and is
    // always empty here; it's kept as a fixed key for wire compatibility.
    let parts = [
        format!("action:{}", fields.action),
        "dataClassification:".to_string(),
        format!("organizationId:{}", fields.organization_id),
        format!("outcomeDescription:{}", fields.outcome_description),
        format!("principalId:{}", fields.principal_id),
        format!("status:{}", fields.status.as_str()),
        format!(
            "targetResourceId:{}",
            render_optional(&fields.target_resource_id)
        ),
        format!(
            "targetResourceType:{}",
            render_optional(&fields.target_resource_type)
        ),
        format!("timestamp:{}", fields.timestamp.to_rfc3339()),
    ];
    parts.join("|")
}

/// SHA-256 over the UTF-8 canonical string, output as lowercase hex (§4.2).
pub fn hash_critical_fields(fields: &CriticalFields) -> String {
    let canonical = canonicalize(fields);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of two hex-encoded hashes, used by `verify` so
/// a timing side channel can't leak how many leading bytes matched.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStatus;

    fn fields(target_resource_id: Option<String>) -> CriticalFields {
        CriticalFields {
            timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
            action: "data.read".to_string(),
            status: EventStatus::Success,
            principal_id: "u1".to_string(),
            organization_id: "o1".to_string(),
            target_resource_type: Some("Patient".to_string()),
            target_resource_id,
            outcome_description: "ok".to_string(),
        }
    }

    #[test]
    fn hash_is_order_independent_function_of_critical_fields() {
        // P1: rebuilding from the same logical fields twice yields the same hash.
        let f1 = fields(Some("p1".to_string()));
        let f2 = fields(Some("p1".to_string()));
        assert_eq!(hash_critical_fields(&f1), hash_critical_fields(&f2));
    }

    #[test]
    fn mutating_a_critical_field_changes_the_hash() {
        // P2, via S1: changing `action` changes the hash.
        let original = hash_critical_fields(&fields(Some("p1".to_string())));
        let mut mutated = fields(Some("p1".to_string()));
        mutated.action = "data.write".to_string();
        assert_ne!(original, hash_critical_fields(&mutated));
    }

    #[test]
    fn missing_vs_present_empty_target_resource_id_differ() {
        // B1.
        let missing = hash_critical_fields(&fields(None));
        let present_empty = hash_critical_fields(&fields(Some(String::new())));
        assert_ne!(missing, present_empty);
    }

    #[test]
    fn constant_time_eq_matches_str_eq() {
        assert!(constant_time_eq("abcd", "abcd"));
        assert!(!constant_time_eq("abcd", "abce"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
