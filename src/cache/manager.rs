//! Two-tier cache: in-process L1 in front of an optional shared L2.

use super::backend::SharedCache;
use super::key::{CacheKey, KeyPattern};
use super::local::LocalCache;
use crate::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size: usize,
    pub default_ttl: Duration,
    pub enabled: bool,
    /// Upper bound for any single L2 operation. A slower backend is
    /// treated as failed for that operation.
    pub shared_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(300),
            enabled: true,
            shared_timeout: Duration::from_millis(250),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_shared_timeout(mut self, timeout: Duration) -> Self {
        self.shared_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub hit_rate: f64,
    pub expirations: u64,
    pub l2_hits: u64,
    /// Backend and serialization failures that were treated as misses.
    pub errors: u64,
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    l2_hits: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            l2_hits: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.l2_hits.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// L2 wire format. The absolute expiry lets a back-fill keep the original
/// deadline instead of restarting the TTL.
#[derive(Serialize, Deserialize)]
struct SharedEntry<V> {
    expires_at_ms: u64,
    value: V,
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Cache for one dependency's responses.
///
/// Every backend failure is logged, counted in [`CacheStats::errors`] and
/// reported to the caller as a miss.
pub struct TieredCache<V> {
    config: CacheConfig,
    l1: LocalCache<V>,
    l2: Option<Arc<dyn SharedCache>>,
    stats: AtomicStats,
}

impl<V> TieredCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            l1: LocalCache::new(config.max_size),
            config,
            l2: None,
            stats: AtomicStats::new(),
        }
    }

    pub fn with_shared(config: CacheConfig, l2: Arc<dyn SharedCache>) -> Self {
        let mut cache = Self::new(config);
        cache.l2 = Some(l2);
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn shared_backend_name(&self) -> Option<&'static str> {
        self.l2.as_ref().map(|b| b.name())
    }

    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        if !self.config.enabled {
            return None;
        }
        let k = key.to_string();
        if let Some(v) = self.l1.get(&k) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(cache_key = %k, tier = "l1", "cache hit");
            return Some(v);
        }
        if let Some(v) = self.get_shared(&k).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
            debug!(cache_key = %k, tier = "l2", "cache hit");
            return Some(v);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn get_shared(&self, k: &str) -> Option<V> {
        let l2 = self.l2.as_ref()?;
        let bytes = self.shared_op("read", k, l2.get(k)).await??;
        let entry: SharedEntry<V> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(cache_key = %k, error = %e, "undecodable L2 entry, treating as miss");
                return None;
            }
        };
        let remaining = entry.expires_at_ms.saturating_sub(unix_ms());
        if remaining == 0 {
            return None;
        }
        self.l1
            .set(k, entry.value.clone(), Duration::from_millis(remaining));
        Some(entry.value)
    }

    /// Store `value` in both tiers. `ttl` falls back to the configured default.
    pub async fn set(&self, key: &CacheKey, value: V, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        if ttl.is_zero() {
            return;
        }
        let k = key.to_string();
        if let Some(ref l2) = self.l2 {
            let entry = SharedEntry {
                expires_at_ms: unix_ms().saturating_add(ttl.as_millis() as u64),
                value: &value,
            };
            match serde_json::to_vec(&entry) {
                Ok(bytes) => {
                    self.shared_op("write", &k, l2.set(&k, &bytes, ttl)).await;
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(cache_key = %k, error = %e, "cache value not serializable, L1 only");
                }
            }
        }
        self.l1.set(&k, value, ttl);
    }

    pub async fn delete(&self, key: &CacheKey) -> bool {
        let k = key.to_string();
        let mut removed = self.l1.delete(&k);
        if let Some(ref l2) = self.l2 {
            if let Some(hit) = self.shared_op("delete", &k, l2.delete(&k)).await {
                removed |= hit;
            }
        }
        removed
    }

    /// Remove every entry whose key matches. Returns the count from whichever
    /// tier held more matching entries.
    pub async fn delete_pattern(&self, pattern: &KeyPattern) -> usize {
        let local = self.l1.delete_matching(pattern);
        let shared = match self.l2 {
            Some(ref l2) => self
                .shared_op("pattern delete", "*", l2.delete_matching(pattern))
                .await
                .unwrap_or(0),
            None => 0,
        };
        debug!(local, shared, "cache pattern invalidation");
        local.max(shared)
    }

    /// Empty both tiers and reset statistics.
    pub async fn clear(&self) {
        self.l1.clear();
        if let Some(ref l2) = self.l2 {
            self.shared_op("clear", "*", l2.clear()).await;
        }
        self.l1.reset_counters();
        self.stats.reset();
    }

    /// Run one L2 operation under `shared_timeout`. Failures and timeouts
    /// are logged, counted and reported as `None`.
    async fn shared_op<T, F>(&self, op: &str, k: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        let backend = self.l2.as_ref().map(|b| b.name()).unwrap_or("none");
        match tokio::time::timeout(self.config.shared_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(cache_key = %k, backend, error = %e, "L2 {} failed", op);
                None
            }
            Err(_) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    cache_key = %k,
                    backend,
                    timeout_ms = self.config.shared_timeout.as_millis() as u64,
                    "L2 {} timed out",
                    op
                );
                None
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.l1.evictions(),
            size: self.l1.len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            expirations: self.l1.expirations(),
            l2_hits: self.stats.l2_hits.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }
}
