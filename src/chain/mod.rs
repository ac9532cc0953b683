//! 提供商链模块：按优先级依次尝试多个上游，每个上游有独立的熔断与重试。
//!
//! # Provider chain
//!
//! A [`ProviderChain`] holds interchangeable upstreams for one dependency and
//! tries the enabled ones in ascending priority order. Each provider gets its
//! own circuit breaker (`<chain>/<provider>` in the shared registry) and is
//! retried under the chain's [`RetryPolicy`] before the chain moves on.
//!
//! Every attempt is recorded, so a success reports which providers were
//! skipped and why, and [`Error::AllProvidersFailed`] carries the full trail.

use crate::resilience::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerSnapshot};
use crate::resilience::retry::{RetryExecutor, RetryPolicy};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One interchangeable upstream.
#[async_trait]
pub trait Provider<Req, Resp>: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> u32;

    /// Disabled providers are skipped without an attempt record.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn invoke(&self, request: &Req) -> Result<Resp>;
}

fn serialize_error<S: Serializer>(
    err: &Option<Error>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match err {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

/// Outcome of trying one provider.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub success: bool,
    pub latency_ms: u64,
    /// Invocations made against this provider, retries included.
    pub attempts: u32,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<Error>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainResponse<Resp> {
    pub content: Resp,
    pub provider_used: String,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub enabled: bool,
    pub priority: u32,
    pub circuit: CircuitBreakerSnapshot,
}

pub struct ProviderChain<Req, Resp> {
    name: String,
    providers: Vec<Arc<dyn Provider<Req, Resp>>>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryExecutor,
}

impl<Req, Resp> ProviderChain<Req, Resp>
where
    Req: Send + Sync,
    Resp: Send,
{
    pub fn new(
        name: impl Into<String>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
            breakers,
            retry: RetryExecutor::new(retry),
        }
    }

    /// Register a provider. Its breaker is created immediately so status
    /// reports cover providers that have not been called yet.
    pub fn with_provider(mut self, provider: Arc<dyn Provider<Req, Resp>>) -> Self {
        self.breakers.get_or_create(&self.breaker_name(provider.name()));
        self.providers.push(provider);
        // Stable: equal priorities keep registration order.
        self.providers.sort_by_key(|p| p.priority());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.providers.iter().filter(|p| p.is_enabled()).count()
    }

    fn breaker_name(&self, provider: &str) -> String {
        format!("{}/{}", self.name, provider)
    }

    /// Try enabled providers in priority order; first success wins.
    pub async fn call(&self, request: &Req) -> Result<ChainResponse<Resp>> {
        let enabled: Vec<&Arc<dyn Provider<Req, Resp>>> =
            self.providers.iter().filter(|p| p.is_enabled()).collect();
        if enabled.is_empty() {
            return Err(Error::configuration_with_context(
                format!("no enabled provider for '{}'", self.name),
                ErrorContext::new()
                    .with_source("provider_chain")
                    .with_details(format!("{} provider(s) registered", self.providers.len())),
            ));
        }

        let mut attempts = Vec::with_capacity(enabled.len());
        for provider in enabled {
            let provider_name = provider.name().to_string();
            let breaker = self.breakers.get_or_create(&self.breaker_name(&provider_name));
            let started = Instant::now();
            let tries = AtomicU32::new(0);

            let outcome = {
                let breaker = &*breaker;
                let provider = &**provider;
                let tries = &tries;
                self.retry
                    .run(&provider_name, move |attempt| {
                        tries.store(attempt, Ordering::Relaxed);
                        async move { breaker.execute(|| provider.invoke(request)).await }
                    })
                    .await
            };
            let latency_ms = started.elapsed().as_millis() as u64;
            let attempts_made = tries.load(Ordering::Relaxed);

            match outcome {
                Ok(content) => {
                    info!(
                        dependency = %self.name,
                        provider = %provider_name,
                        attempt = attempts_made,
                        latency_ms,
                        "provider succeeded"
                    );
                    attempts.push(AttemptRecord {
                        provider: provider_name.clone(),
                        success: true,
                        latency_ms,
                        attempts: attempts_made,
                        error: None,
                    });
                    return Ok(ChainResponse {
                        content,
                        provider_used: provider_name,
                        attempts,
                    });
                }
                Err(e) => {
                    if matches!(e, Error::CircuitOpen { .. }) {
                        debug!(dependency = %self.name, provider = %provider_name, "skipping provider, circuit open");
                    } else {
                        warn!(
                            dependency = %self.name,
                            provider = %provider_name,
                            attempt = attempts_made,
                            error = %e,
                            "provider failed, falling through"
                        );
                    }
                    attempts.push(AttemptRecord {
                        provider: provider_name,
                        success: false,
                        latency_ms,
                        attempts: attempts_made,
                        error: Some(e),
                    });
                }
            }
        }

        warn!(dependency = %self.name, providers = attempts.len(), "all providers failed");
        Err(Error::AllProvidersFailed { attempts })
    }

    /// `{name: {enabled, priority, circuit}}` for every registered provider.
    pub fn provider_status(&self) -> BTreeMap<String, ProviderStatus> {
        self.providers
            .iter()
            .map(|p| {
                let circuit = self
                    .breakers
                    .get_or_create(&self.breaker_name(p.name()))
                    .snapshot();
                (
                    p.name().to_string(),
                    ProviderStatus {
                        enabled: p.is_enabled(),
                        priority: p.priority(),
                        circuit,
                    },
                )
            })
            .collect()
    }
}

impl<Req, Resp> std::fmt::Debug for ProviderChain<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field("name", &self.name)
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
