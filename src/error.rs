use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuditError>;

/// Error kinds surfaced across ingestion, compliance, and scheduling (§7 of
/// the design brief). Each variant maps 1:1 onto one of the twelve named
/// error kinds; the propagation policy (retry vs. surface) lives in
/// `retryable`.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuditError {
    /// Whether a failed operation may be retried with backoff.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AuditError::Network(_) | AuditError::Database(_) | AuditError::Queue(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::Validation(_) => "VALIDATION_ERROR",
            AuditError::Config(_) => "CONFIG_ERROR",
            AuditError::Crypto(_) => "CRYPTO_ERROR",
            AuditError::Integrity(_) => "INTEGRITY_ERROR",
            AuditError::Network(_) => "NETWORK_ERROR",
            AuditError::Database(_) => "DATABASE_ERROR",
            AuditError::Queue(_) => "QUEUE_ERROR",
            AuditError::Authentication(_) => "AUTHENTICATION_ERROR",
            AuditError::Authorization(_) => "AUTHORIZATION_ERROR",
            AuditError::NotFound(_) => "NOT_FOUND",
            AuditError::Conflict(_) => "CONFLICT",
            AuditError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(e: sqlx::Error) -> Self {
        AuditError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        AuditError::Internal(format!("serialization error: {e}"))
    }
}

impl From<reqwest::Error> for AuditError {
    fn from(e: reqwest::Error) -> Self {
        AuditError::Network(e.to_string())
    }
}

impl From<std::io::Error> for AuditError {
    fn from(e: std::io::Error) -> Self {
        AuditError::Internal(e.to_string())
    }
}

/// Strip keys that look like secrets before a map reaches a log line or
/// error message ("Sanitization").
pub fn sanitize_for_log(
    metadata: &std::collections::HashMap<String, String>,
) -> std::collections::HashMap<String, String> {
    metadata
        .iter()
        .map(|(k, v)| {
            let lower = k.to_lowercase();
            if lower.contains("secret") || lower.contains("password") || lower.contains("token") {
                (k.clone(), "***redacted***".to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(AuditError::Network("x".into()).retryable());
        assert!(AuditError::Database("x".into()).retryable());
        assert!(AuditError::Queue("x".into()).retryable());
        assert!(!AuditError::Validation("x".into()).retryable());
        assert!(!AuditError::Integrity("x".into()).retryable());
        assert!(!AuditError::NotFound("x".into()).retryable());
    }

    #[test]
    fn sanitizes_secret_like_keys() {
        let mut m = std::collections::HashMap::new();
        m.insert("api_secret".to_string(), "shh".to_string());
        m.insert("reason".to_string(), "ok".to_string());
        let sanitized = sanitize_for_log(&m);
        assert_eq!(sanitized["api_secret"], "***redacted***");
        assert_eq!(sanitized["reason"], "ok");
    }
}
