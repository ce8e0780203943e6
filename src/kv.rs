use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Shared key-value capability backing metrics, cooldowns, and queue state
/// (design note "Queue/Store abstractions" — `KV`). Shared across
/// instances in production; the in-memory impl below is single-process and
/// used for tests and standalone deployments.
#[async_trait]
pub trait Kv: Send + Sync {
    async fn incr(&self, key: &str, by: i64) -> Result<i64>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Set with expiry, used for cooldown keys (`alerts:alert_cooldown:*`).
    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-memory `Kv` implementation for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryKv {
    data: Arc<DashMap<String, Entry>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        match entry.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

#[async_trait]
impl Kv for InMemoryKv {
    async fn incr(&self, key: &str, by: i64) -> Result<i64> {
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: i64 = entry.value.parse().unwrap_or(0);
        let next = current + by;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: None },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.data.get(key) {
            Some(entry) if Self::is_live(&entry) => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.data.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Some(Instant::now() + ttl) },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        // Only the trailing-`*` glob shape used by this codebase (e.g.
        // `alerts:alert_cooldown:*`) is supported.
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .data
            .iter()
            .filter(|kv| Self::is_live(kv.value()) && kv.key().starts_with(prefix))
            .map(|kv| kv.key().clone())
            .collect())
    }
}

/// Redis-backed `Kv` implementation for multi-instance deployments (§5
/// "shared-resource policy": "The KV is shared across instances").
pub struct RedisKv {
    manager: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| crate::error::AuditError::Config(format!("invalid redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| crate::error::AuditError::Network(format!("redis connect failed: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn incr(&self, key: &str, by: i64) -> Result<i64> {
        let mut conn = self.manager.clone();
        redis::cmd("INCRBY")
            .arg(key)
            .arg(by)
            .query_async(&mut conn)
            .await
            .map_err(|e| crate::error::AuditError::Network(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| crate::error::AuditError::Network(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| crate::error::AuditError::Network(e.to_string()))
    }

    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| crate::error::AuditError::Network(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| crate::error::AuditError::Network(e.to_string()))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| crate::error::AuditError::Network(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_accumulates() {
        let kv = InMemoryKv::new();
        assert_eq!(kv.incr("metrics:eventsProcessed", 1).await.unwrap(), 1);
        assert_eq!(kv.incr("metrics:eventsProcessed", 1).await.unwrap(), 2);
        assert_eq!(kv.incr("metrics:eventsProcessed", 3).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn setex_expires() {
        let kv = InMemoryKv::new();
        kv.setex("alerts:alert_cooldown:x", "1", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(kv.exists("alerts:alert_cooldown:x").await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!kv.exists("alerts:alert_cooldown:x").await.unwrap());
    }

    #[tokio::test]
    async fn keys_matches_prefix_glob() {
        let kv = InMemoryKv::new();
        kv.set("alerts:alert_cooldown:a", "1").await.unwrap();
        kv.set("alerts:alert_cooldown:b", "1").await.unwrap();
        kv.set("metrics:eventsProcessed", "1").await.unwrap();
        let mut matched = kv.keys("alerts:alert_cooldown:*").await.unwrap();
        matched.sort();
        assert_eq!(matched, vec!["alerts:alert_cooldown:a", "alerts:alert_cooldown:b"]);
    }
}
