//! 分层缓存模块：进程内 LRU 与可选共享缓存，减少重复的上游调用。
//!
//! # Tiered response cache
//!
//! Keeps successful upstream responses so repeated queries skip the network.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TieredCache`] | L1 LRU with per-entry TTL, optional shared L2, statistics |
//! | [`CacheConfig`] | Size bound, default TTL, on/off switch |
//! | [`SharedCache`] | Trait for L2 stores ([`MemorySharedCache`], `RedisCache`) |
//! | [`CacheKeyGenerator`] | Stable keys from normalized request content |
//! | [`KeyPattern`] | Prefix or regex matcher for bulk invalidation |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_guard::cache::{CacheConfig, CacheKeyGenerator, TieredCache};
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let cache: TieredCache<String> =
//!     TieredCache::new(CacheConfig::new().with_ttl(Duration::from_secs(300)));
//! let key = CacheKeyGenerator::new().generate("vector", "Ransomware trends", &BTreeMap::new());
//! cache.set(&key, "cached".to_string(), None).await;
//! assert_eq!(cache.get(&key).await.as_deref(), Some("cached"));
//! # });
//! ```
//!
//! Backend failures never surface to callers: they are logged, counted and
//! treated as a miss.

mod backend;
mod key;
mod local;
mod manager;
#[cfg(feature = "redis-cache")]
mod redis;

pub use backend::{MemorySharedCache, SharedCache};
pub use key::{normalize_text, CacheKey, CacheKeyGenerator, CacheableRequest, KeyPattern};
pub use local::{CacheEntry, LocalCache};
pub use manager::{CacheConfig, CacheStats, TieredCache};
#[cfg(feature = "redis-cache")]
pub use self::redis::RedisCache;
