//! In-process L1 tier: size-bounded LRU with per-entry TTL.

use super::key::KeyPattern;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub expires_at: Instant,
    pub last_accessed_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            expires_at: now + ttl,
            last_accessed_at: now,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded LRU map. Every read refreshes recency; inserting into a full cache
/// evicts the least-recently-used entry.
pub struct LocalCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    capacity: usize,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> LocalCache<V> {
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get_mut(key) {
            None => return None,
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed_at = now;
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }
        entries.pop(key);
        self.expirations.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Remaining lifetime of a live entry. Does not touch recency.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .peek(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.expires_at - now)
    }

    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let evicted = self.lock().push(key.to_string(), CacheEntry::new(value, ttl));
        if let Some((old_key, _)) = evicted {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted_key = %old_key, "L1 evicted least-recently-used entry");
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().pop(key).is_some()
    }

    pub fn delete_matching(&self, pattern: &KeyPattern) -> usize {
        let mut entries = self.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(k, _)| pattern.matches(k))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &doomed {
            entries.pop(k);
        }
        doomed.len()
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            entries.pop(k);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn reset_counters(&self) {
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }
}

impl<V> std::fmt::Debug for LocalCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("capacity", &self.capacity)
            .field("evictions", &self.evictions.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_ttl() {
        let cache = LocalCache::new(10);
        cache.set("k", "v".to_string(), Duration::from_millis(1_000));
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(cache.get("k").is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("k").is_none());
        assert_eq!(cache.expirations(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_respects_reads() {
        let cache = LocalCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.set("a", 1, ttl);
        cache.set("b", 2, ttl);
        // Reading "a" makes "b" the least recently used.
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c", 3, ttl);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.evictions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_is_not_an_eviction() {
        let cache = LocalCache::new(1);
        cache.set("a", 1, Duration::from_secs(1));
        cache.set("a", 2, Duration::from_secs(1));
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.evictions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_matching_and_purge() {
        let cache = LocalCache::new(10);
        cache.set("llm:1", 1, Duration::from_secs(10));
        cache.set("llm:2", 2, Duration::from_millis(10));
        cache.set("vector:1", 3, Duration::from_secs(10));

        assert_eq!(cache.delete_matching(&KeyPattern::prefix("vector:")), 1);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.ttl_remaining("llm:1"),
            Some(Duration::from_millis(9_990))
        );
    }
}
