//! Startup wiring: turns a [`GuardConfig`] into ready-to-use clients.
//!
//! Everything is constructed here once and handed out by reference; there
//! are no global singletons.

use crate::batch::BatchRunner;
use crate::cache::{CacheKeyGenerator, MemorySharedCache, SharedCache};
use crate::chain::ProviderChain;
use crate::client::{DependencyHealth, ResilientClient, ResilientClientBuilder};
use crate::config::{GuardConfig, SharedCacheBackend, LLM_CACHE_TTL_MS, VECTOR_CACHE_TTL_MS};
use crate::llm::{build_provider, Completion, CompletionRequest};
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::vector::{OpenAiEmbedder, QdrantSearch, SearchRequest, SearchResponse};
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub type LlmClient = ResilientClient<CompletionRequest, Completion>;
pub type VectorClient = ResilientClient<SearchRequest, SearchResponse>;

/// All guarded dependencies of one process.
pub struct Dependencies {
    pub llm: LlmClient,
    pub vector: Option<VectorClient>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub batch: BatchRunner,
}

impl Dependencies {
    pub fn health(&self) -> Vec<DependencyHealth> {
        let mut out = vec![self.llm.health()];
        if let Some(ref v) = self.vector {
            out.push(v.health());
        }
        out
    }

    pub fn vector(&self) -> Result<&VectorClient> {
        self.vector.as_ref().ok_or_else(|| {
            Error::configuration_with_context(
                "no vector backend configured",
                ErrorContext::new()
                    .with_field_path("vector_backend")
                    .with_source("bootstrap"),
            )
        })
    }
}

/// Build every client using the process environment for credentials.
pub async fn bootstrap(cfg: &GuardConfig) -> Result<Dependencies> {
    bootstrap_with(cfg, |k| std::env::var(k).ok()).await
}

/// Like [`bootstrap`], with credentials resolved through `lookup`.
pub async fn bootstrap_with<F>(cfg: &GuardConfig, lookup: F) -> Result<Dependencies>
where
    F: Fn(&str) -> Option<String>,
{
    cfg.validate()?;
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let shared = shared_cache(cfg).await?;
    let shared_timeout = Duration::from_millis(cfg.shared_cache.op_timeout_ms);
    let keys = match cfg.cache_key_salt {
        Some(ref salt) => CacheKeyGenerator::new().with_salt(salt.clone()),
        None => CacheKeyGenerator::new(),
    };

    let mut llm_chain = ProviderChain::new("llm", Arc::clone(&breakers), cfg.llm.retry_policy());
    for p in &cfg.providers {
        let settings = p.resolve(cfg.llm.timeout(), &lookup);
        if !settings.is_usable() {
            warn!(provider = %p.name, key_env = p.api_key_env(), "provider registered but disabled");
        }
        llm_chain = llm_chain.with_provider(build_provider(settings)?);
    }
    info!(
        providers = llm_chain.len(),
        enabled = llm_chain.enabled_count(),
        "llm provider chain ready"
    );

    let mut llm = ResilientClientBuilder::new("llm")
        .chain(llm_chain)
        .cache_config(
            cfg.llm
                .cache_config(LLM_CACHE_TTL_MS)
                .with_shared_timeout(shared_timeout),
        )
        .breaker_config(cfg.llm.breaker_config())
        .key_generator(keys.clone())
        .default_timeout(cfg.llm.timeout());
    if let Some(ref l2) = shared {
        llm = llm.shared_cache(Arc::clone(l2));
    }
    let llm = llm.build()?;

    let vector = match cfg.vector_backend {
        Some(ref vb) => {
            let embedder = OpenAiEmbedder::new(
                &vb.embedding_base_url,
                lookup(&vb.embedding_api_key_env),
                cfg.vector.timeout(),
            )?
            .with_model(vb.embedding_model.clone(), vb.embedding_dimensions);
            let search = QdrantSearch::new(
                vb.name.clone(),
                &vb.url,
                vb.collection.clone(),
                vb.api_key_env.as_deref().and_then(&lookup),
                cfg.vector.timeout(),
                Arc::new(embedder),
            )?
            .with_enabled(vb.enabled);
            let chain = ProviderChain::new("vector", Arc::clone(&breakers), cfg.vector.retry_policy())
                .with_provider(Arc::new(search));
            let mut builder = ResilientClientBuilder::new("vector")
                .chain(chain)
                .cache_config(
                    cfg.vector
                        .cache_config(VECTOR_CACHE_TTL_MS)
                        .with_shared_timeout(shared_timeout),
                )
                .breaker_config(cfg.vector.breaker_config())
                .key_generator(keys)
                .default_timeout(cfg.vector.timeout());
            if let Some(ref l2) = shared {
                builder = builder.shared_cache(Arc::clone(l2));
            }
            info!(backend = %vb.name, collection = %vb.collection, "vector client ready");
            Some(builder.build()?)
        }
        None => None,
    };

    Ok(Dependencies {
        llm,
        vector,
        breakers,
        batch: BatchRunner::new(cfg.batch.batch_config()),
    })
}

async fn shared_cache(cfg: &GuardConfig) -> Result<Option<Arc<dyn SharedCache>>> {
    match cfg.shared_cache.backend {
        SharedCacheBackend::None => Ok(None),
        SharedCacheBackend::Memory => Ok(Some(Arc::new(MemorySharedCache::new(
            cfg.shared_cache.max_entries,
        )))),
        SharedCacheBackend::Redis => redis_cache(cfg).await,
    }
}

#[cfg(feature = "redis-cache")]
async fn redis_cache(cfg: &GuardConfig) -> Result<Option<Arc<dyn SharedCache>>> {
    let url = cfg.shared_cache.redis_url.as_deref().unwrap_or_default();
    let cache = crate::cache::RedisCache::connect(url, cfg.shared_cache.namespace.clone()).await?;
    Ok(Some(Arc::new(cache)))
}

#[cfg(not(feature = "redis-cache"))]
async fn redis_cache(_cfg: &GuardConfig) -> Result<Option<Arc<dyn SharedCache>>> {
    Err(Error::configuration_with_context(
        "redis shared cache requested but the crate was built without `redis-cache`",
        ErrorContext::new()
            .with_field_path("shared_cache.backend")
            .with_source("bootstrap"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorBackendConfig;

    #[tokio::test]
    async fn test_bootstrap_without_keys_disables_providers() {
        let deps = bootstrap_with(&GuardConfig::default(), |_| None).await.unwrap();
        assert_eq!(deps.llm.chain().len(), 3);
        assert_eq!(deps.llm.chain().enabled_count(), 0);
        assert!(deps.vector().is_err());

        let err = deps
            .llm
            .call(CompletionRequest::new("hi"), Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_bootstrap_with_vector_backend() {
        let mut cfg = GuardConfig::default();
        cfg.vector_backend = Some(VectorBackendConfig::new("http://localhost:6333", "docs"));
        cfg.shared_cache.backend = SharedCacheBackend::Memory;
        let deps = bootstrap_with(&cfg, |k| (k == "OPENAI_API_KEY").then(|| "sk".to_string()))
            .await
            .unwrap();
        assert_eq!(deps.llm.chain().enabled_count(), 1);
        let vector = deps.vector().unwrap();
        assert_eq!(vector.cache().shared_backend_name(), Some("memory"));
        assert_eq!(deps.health().len(), 2);
        assert_eq!(deps.batch.config().batch_size, 100);
    }
}
