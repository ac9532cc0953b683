use super::core::ResilientClient;
use crate::cache::{CacheConfig, CacheKeyGenerator, CacheableRequest, SharedCache, TieredCache};
use crate::chain::ProviderChain;
use crate::coalesce::RequestCoalescer;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::{Error, ErrorContext, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`ResilientClient`].
///
/// Only the provider chain is required; everything else has a production
/// default (30 s timeout, 5/2/60 s dependency breaker, 1000-entry L1 cache).
pub struct ResilientClientBuilder<Req, Resp> {
    name: String,
    chain: Option<ProviderChain<Req, Resp>>,
    cache_config: CacheConfig,
    shared_cache: Option<Arc<dyn SharedCache>>,
    breaker_config: CircuitBreakerConfig,
    keys: CacheKeyGenerator,
    default_timeout: Duration,
}

impl<Req, Resp> ResilientClientBuilder<Req, Resp>
where
    Req: CacheableRequest + Clone + Send + Sync + 'static,
    Resp: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: None,
            cache_config: CacheConfig::default(),
            shared_cache: None,
            breaker_config: CircuitBreakerConfig::default(),
            keys: CacheKeyGenerator::new(),
            default_timeout: Duration::from_secs(30),
        }
    }

    pub fn chain(mut self, chain: ProviderChain<Req, Resp>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Put a shared L2 store behind the in-process cache.
    pub fn shared_cache(mut self, l2: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(l2);
        self
    }

    /// Thresholds for the dependency-level breaker, which only counts
    /// failures of the whole chain.
    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ResilientClient<Req, Resp>> {
        let chain = self.chain.ok_or_else(|| {
            Error::configuration_with_context(
                format!("client '{}' has no provider chain", self.name),
                ErrorContext::new().with_source("client_builder"),
            )
        })?;
        if self.default_timeout.is_zero() {
            return Err(Error::validation_with_context(
                "default timeout must be greater than zero",
                ErrorContext::new()
                    .with_field_path(format!("dependencies.{}.timeout_ms", self.name))
                    .with_source("client_builder"),
            ));
        }
        if self.breaker_config.failure_threshold == 0 || self.breaker_config.success_threshold == 0
        {
            return Err(Error::validation_with_context(
                "breaker thresholds must be at least 1",
                ErrorContext::new()
                    .with_field_path(format!("dependencies.{}.breaker", self.name))
                    .with_source("client_builder"),
            ));
        }

        let breaker = chain
            .breakers()
            .get_or_create_with(&self.name, self.breaker_config);
        let cache = match self.shared_cache {
            Some(l2) => TieredCache::with_shared(self.cache_config, l2),
            None => TieredCache::new(self.cache_config),
        };

        Ok(ResilientClient {
            name: self.name,
            chain: Arc::new(chain),
            breaker,
            cache: Arc::new(cache),
            coalescer: RequestCoalescer::new(),
            keys: self.keys,
            default_timeout: self.default_timeout,
        })
    }
}
