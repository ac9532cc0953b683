//! Client option and health types.

use crate::cache::CacheStats;
use crate::chain::ProviderStatus;
use crate::coalesce::CoalescerStats;
use crate::resilience::circuit_breaker::CircuitBreakerSnapshot;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-call knobs.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Overall deadline for this caller. `None` uses the client default.
    pub timeout: Option<Duration>,
    pub use_cache: bool,
    /// TTL for a fresh result. `None` uses the cache default.
    pub cache_ttl: Option<Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            use_cache: true,
            cache_ttl: None,
        }
    }
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// Serializable health snapshot of one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    pub dependency: String,
    pub circuit: CircuitBreakerSnapshot,
    pub providers: BTreeMap<String, ProviderStatus>,
    pub cache: CacheStats,
    pub coalescer: CoalescerStats,
}
