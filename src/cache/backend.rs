//! Shared (L2) cache backends.
//!
//! L2 stores raw bytes; the tiered cache owns (de)serialization.

use super::key::KeyPattern;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize>;
    async fn clear(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

struct StoredBytes {
    data: Vec<u8>,
    expires_at: Instant,
}

/// Process-wide shared store; lets several clients (or client rebuilds) share
/// results without an external service.
pub struct MemorySharedCache {
    entries: RwLock<HashMap<String, StoredBytes>>,
    max_entries: usize,
}

impl MemorySharedCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    fn evict_if_needed(&self, entries: &mut HashMap<String, StoredBytes>) {
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        while entries.len() >= self.max_entries {
            let soonest = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            match soonest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl SharedCache for MemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.data.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(key) {
            self.evict_if_needed(&mut entries);
        }
        entries.insert(
            key.to_string(),
            StoredBytes {
                data: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some())
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|k, _| !pattern.matches(k));
        Ok(before - entries.len())
    }

    async fn clear(&self) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_memory_shared_cache_ttl_and_patterns() {
        let l2 = MemorySharedCache::new(8);
        l2.set("llm:a", b"1", Duration::from_secs(1)).await.unwrap();
        l2.set("vector:b", b"2", Duration::from_secs(5)).await.unwrap();
        assert_eq!(l2.get("llm:a").await.unwrap(), Some(b"1".to_vec()));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(l2.get("llm:a").await.unwrap(), None);

        let removed = l2
            .delete_matching(&KeyPattern::prefix("vector:"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!l2.delete("vector:b").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_shared_cache_bounded() {
        let l2 = MemorySharedCache::new(2);
        l2.set("a", b"1", Duration::from_secs(1)).await.unwrap();
        l2.set("b", b"2", Duration::from_secs(9)).await.unwrap();
        l2.set("c", b"3", Duration::from_secs(9)).await.unwrap();
        assert_eq!(l2.get("a").await.unwrap(), None);
        assert!(l2.get("b").await.unwrap().is_some());
        assert!(l2.get("c").await.unwrap().is_some());
    }
}
