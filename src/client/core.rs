//! 弹性客户端核心：缓存、合并、熔断、重试与降级的组合调用。
//!
//! Core call path of the resilient client.

use super::types::{CallOptions, DependencyHealth};
use crate::cache::{CacheKeyGenerator, CacheableRequest, KeyPattern, TieredCache};
use crate::chain::ProviderChain;
use crate::coalesce::RequestCoalescer;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Guarded access to one upstream dependency.
///
/// A call goes: cache lookup → coalescing → dependency breaker → provider
/// chain (per-provider breaker and retry) → cache population. Only terminal
/// errors reach the caller.
pub struct ResilientClient<Req, Resp> {
    pub(crate) name: String,
    pub(crate) chain: Arc<ProviderChain<Req, Resp>>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) cache: Arc<TieredCache<Resp>>,
    pub(crate) coalescer: RequestCoalescer<Resp>,
    pub(crate) keys: CacheKeyGenerator,
    pub(crate) default_timeout: Duration,
}

impl<Req, Resp> ResilientClient<Req, Resp>
where
    Req: CacheableRequest + Clone + Send + Sync + 'static,
    Resp: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain(&self) -> &ProviderChain<Req, Resp> {
        &self.chain
    }

    pub fn cache(&self) -> &TieredCache<Resp> {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run one guarded call.
    ///
    /// The whole call, cache lookup included, is bounded by the call timeout
    /// (or the client default). A call that times out gets `Error::Timeout`,
    /// and the upstream work it started is cut off at the same deadline, so
    /// a late result is never cached.
    ///
    /// Concurrent calls for the same request and the same `use_cache` flag
    /// share one upstream invocation. The caller that started it decides the
    /// upstream deadline and the cache TTL for everyone attached to it.
    pub async fn call(&self, request: Req, options: CallOptions) -> Result<Resp> {
        let key = request.cache_key(&self.keys);
        let key_str = key.to_string();
        let call_id = Uuid::new_v4().to_string();
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;

        if options.use_cache {
            match tokio::time::timeout_at(deadline, self.cache.get(&key)).await {
                Ok(Some(hit)) => {
                    debug!(dependency = %self.name, cache_key = %key_str, call_id = %call_id, "served from cache");
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(_) => {
                    warn!(dependency = %self.name, cache_key = %key_str, call_id = %call_id, "cache lookup hit the deadline");
                    return Err(self.timed_out(&call_id, timeout));
                }
            }
        }

        let chain = Arc::clone(&self.chain);
        let breaker = Arc::clone(&self.breaker);
        let cache = Arc::clone(&self.cache);
        let dependency = self.name.clone();
        let use_cache = options.use_cache;
        let cache_ttl = options.cache_ttl;
        let factory = move || async move {
            let bounded = breaker.execute(|| async {
                match tokio::time::timeout_at(deadline, chain.call(&request)).await {
                    Ok(out) => out,
                    Err(_) => Err(Error::Timeout {
                        operation: format!("{} upstream", dependency),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                }
            });
            let response = bounded.await?;
            info!(
                dependency = %dependency,
                provider = %response.provider_used,
                attempts = response.attempts.len(),
                "upstream call succeeded"
            );
            if use_cache {
                if Instant::now() < deadline {
                    cache.set(&key, response.content.clone(), cache_ttl).await;
                } else {
                    debug!(dependency = %dependency, "result arrived past the deadline, not cached");
                }
            }
            Ok(response.content)
        };

        let flight_key = if use_cache {
            key_str
        } else {
            format!("{}#nocache", key_str)
        };
        match tokio::time::timeout_at(deadline, self.coalescer.coalesce(&flight_key, factory)).await {
            Ok(out) => {
                if let Err(ref e) = out {
                    warn!(dependency = %self.name, call_id = %call_id, error = %e, "call failed");
                }
                out
            }
            Err(_) => Err(self.timed_out(&call_id, timeout)),
        }
    }

    fn timed_out(&self, call_id: &str, timeout: Duration) -> Error {
        warn!(
            dependency = %self.name,
            call_id = %call_id,
            timeout_ms = timeout.as_millis() as u64,
            "call timed out"
        );
        Error::Timeout {
            operation: format!("{} call", self.name),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Drop the cached result for `request`, if any.
    pub async fn invalidate(&self, request: &Req) -> bool {
        self.cache.delete(&request.cache_key(&self.keys)).await
    }

    pub async fn invalidate_pattern(&self, pattern: &KeyPattern) -> usize {
        self.cache.delete_pattern(pattern).await
    }

    pub fn health(&self) -> DependencyHealth {
        DependencyHealth {
            dependency: self.name.clone(),
            circuit: self.breaker.snapshot(),
            providers: self.chain.provider_status(),
            cache: self.cache.stats(),
            coalescer: self.coalescer.stats(),
        }
    }
}

impl<Req, Resp> std::fmt::Debug for ResilientClient<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("name", &self.name)
            .field("chain", &self.chain)
            .field("breaker", &self.breaker)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}
