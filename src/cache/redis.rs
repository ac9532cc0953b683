//! Redis-backed L2 tier (feature `redis-cache`).

use super::backend::SharedCache;
use super::key::KeyPattern;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn redis_error(op: &str, e: redis::RedisError) -> Error {
    Error::runtime_with_context(
        format!("redis {} failed: {}", op, e),
        ErrorContext::new().with_source("redis_cache"),
    )
}

/// Shared L2 over a Redis connection manager. Keys are stored under
/// `namespace:` so several deployments can share one Redis database.
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: Arc<ConnectionManager>,
    namespace: String,
}

impl RedisCache {
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self> {
        let client = Client::open(url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid redis url: {}", e),
                ErrorContext::new().with_field_path("cache.redis_url"),
            )
        })?;
        let conn_manager = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| Error::Timeout {
                operation: "redis connect".to_string(),
                timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            })?
            .map_err(|e| redis_error("connect", e))?;
        let namespace = namespace.into();
        info!(namespace = %namespace, "connected redis L2 cache");
        Ok(Self {
            conn_manager: Arc::new(conn_manager),
            namespace,
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn conn(&self) -> ConnectionManager {
        (*self.conn_manager).clone()
    }

    async fn namespaced_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn();
        conn.keys(format!("{}:*", self.namespace))
            .await
            .map_err(|e| redis_error("keys", e))
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn();
        conn.get(self.full_key(key))
            .await
            .map_err(|e| redis_error("get", e))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        // Redis TTLs are whole seconds; never round a live entry down to zero.
        let ttl_secs = ttl.as_secs().max(1);
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(self.full_key(key), value, ttl_secs)
            .await
            .map_err(|e| redis_error("set", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: u32 = conn
            .del(self.full_key(key))
            .await
            .map_err(|e| redis_error("del", e))?;
        Ok(removed > 0)
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize> {
        let prefix_len = self.namespace.len() + 1;
        let doomed: Vec<String> = self
            .namespaced_keys()
            .await?
            .into_iter()
            .filter(|k| k.len() >= prefix_len && pattern.matches(&k[prefix_len..]))
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let removed: usize = conn
            .del(&doomed)
            .await
            .map_err(|e| redis_error("del", e))?;
        debug!(removed, "redis pattern invalidation");
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let keys = self.namespaced_keys().await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let _: usize = conn.del(&keys).await.map_err(|e| redis_error("del", e))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
