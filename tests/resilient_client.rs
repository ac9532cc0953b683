//! End-to-end behaviour of `ResilientClient` over scripted providers.

mod common;

use ai_lib_guard::batch::{BatchConfig, BatchRunner};
use ai_lib_guard::cache::{CacheConfig, KeyPattern};
use ai_lib_guard::chain::ProviderChain;
use ai_lib_guard::client::{CallOptions, ResilientClient, ResilientClientBuilder};
use ai_lib_guard::llm::{Completion, CompletionRequest};
use ai_lib_guard::resilience::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
use ai_lib_guard::resilience::retry::RetryPolicy;
use ai_lib_guard::Error;
use common::{auth_error, server_error, ScriptedProvider, StalledSharedCache};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

fn retry_policy() -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(3)
        .with_base_delay(Duration::from_millis(100))
        .with_jitter_ratio(0.0)
}

fn builder(
    providers: Vec<Arc<ScriptedProvider>>,
    policy: RetryPolicy,
) -> ResilientClientBuilder<CompletionRequest, Completion> {
    let mut chain = ProviderChain::new("llm", Arc::new(CircuitBreakerRegistry::default()), policy);
    for p in providers {
        chain = chain.with_provider(p);
    }
    ResilientClientBuilder::new("llm")
        .chain(chain)
        .cache_config(CacheConfig::new().with_ttl(Duration::from_secs(60)))
        .default_timeout(Duration::from_secs(30))
}

fn client(
    providers: Vec<Arc<ScriptedProvider>>,
    policy: RetryPolicy,
) -> ResilientClient<CompletionRequest, Completion> {
    builder(providers, policy).build().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_cached_result() {
    let a = ScriptedProvider::new("a", 1, vec![Err(server_error("a"))]);
    let client = client(vec![a.clone()], retry_policy());
    let request = CompletionRequest::new("What is a circuit breaker?");

    let first = client.call(request.clone(), CallOptions::new()).await.unwrap();
    assert_eq!(first.provider, "a");
    assert_eq!(a.calls(), 2);
    assert_eq!(client.cache().stats().size, 1);

    // Same prompt modulo whitespace and case: served from cache.
    let again = CompletionRequest::new("  what is a   circuit breaker? ");
    let second = client.call(again, CallOptions::new()).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(a.calls(), 2);
    assert_eq!(client.cache().stats().hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_falls_back_to_next_provider() {
    let a = ScriptedProvider::always_failing("a", 1, auth_error("a"));
    let b = ScriptedProvider::new("b", 2, vec![]);
    let client = client(vec![b.clone(), a.clone()], retry_policy());

    let out = client
        .call(CompletionRequest::new("hello"), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(out.provider, "b");
    // Authentication errors are not retried.
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_all_providers_failed_is_not_cached() {
    let a = ScriptedProvider::always_failing("a", 1, server_error("a"));
    let b = ScriptedProvider::always_failing("b", 2, auth_error("b"));
    let client = client(vec![a.clone(), b.clone()], RetryPolicy::no_retry());
    let request = CompletionRequest::new("doomed");

    let err = client.call(request.clone(), CallOptions::new()).await.unwrap_err();
    let attempts = err.attempts().expect("aggregate error");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].provider, "a");
    assert_eq!(attempts[1].provider, "b");
    assert!(attempts.iter().all(|r| !r.success && r.error.is_some()));

    let _ = client.call(request, CallOptions::new()).await.unwrap_err();
    assert_eq!(a.calls(), 2);
    assert_eq!(client.cache().stats().size, 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_dependency_breaker_fails_fast() {
    let a = ScriptedProvider::always_failing("a", 1, server_error("a"));
    let chain = ProviderChain::new(
        "llm",
        Arc::new(CircuitBreakerRegistry::default()),
        RetryPolicy::no_retry(),
    )
    .with_provider(a.clone());
    let client: ResilientClient<CompletionRequest, Completion> = ResilientClientBuilder::new("llm")
        .chain(chain)
        .breaker_config(
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_reset_timeout(Duration::from_secs(60)),
        )
        .build()
        .unwrap();

    for i in 0..2 {
        let req = CompletionRequest::new(format!("attempt {i}"));
        assert!(client.call(req, CallOptions::new()).await.is_err());
    }
    assert_eq!(client.breaker().state(), CircuitState::Open);

    let err = client
        .call(CompletionRequest::new("attempt 2"), CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }), "got {err:?}");
    assert_eq!(a.calls(), 2);

    // After the reset timeout a probe goes through again.
    tokio::time::sleep(Duration::from_secs(61)).await;
    let _ = client
        .call(CompletionRequest::new("probe"), CallOptions::new())
        .await;
    assert_eq!(a.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_discards_late_upstream_result() {
    let slow = ScriptedProvider::with_delay("slow", 1, Duration::from_secs(5), vec![]);
    let client = client(vec![slow.clone()], RetryPolicy::no_retry());
    let request = CompletionRequest::new("take your time");

    let err = client
        .call(
            request.clone(),
            CallOptions::new().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { timeout_ms: 100, .. }), "got {err:?}");

    // Long after the provider would have answered, nothing was cached.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(client.cache().stats().size, 0);
    assert_eq!(client.health().coalescer.in_flight, 0);
    assert_eq!(slow.calls(), 1);

    let out = client.call(request, CallOptions::new()).await.unwrap();
    assert_eq!(out.provider, "slow");
    assert_eq!(slow.calls(), 2);
    assert_eq!(client.cache().stats().size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_shared_cache_falls_through_to_upstream() {
    let a = ScriptedProvider::new("a", 1, vec![]);
    let client = builder(vec![a.clone()], RetryPolicy::no_retry())
        .cache_config(
            CacheConfig::new()
                .with_ttl(Duration::from_secs(60))
                .with_shared_timeout(Duration::from_millis(50)),
        )
        .shared_cache(Arc::new(StalledSharedCache))
        .build()
        .unwrap();

    let out = client
        .call(CompletionRequest::new("still answers"), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(out.provider, "a");
    assert_eq!(a.calls(), 1);
    let stats = client.cache().stats();
    assert_eq!(stats.misses, 1);
    // One timed-out read, one timed-out write.
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_shared_cache_respects_call_timeout() {
    let a = ScriptedProvider::new("a", 1, vec![]);
    let client = builder(vec![a.clone()], RetryPolicy::no_retry())
        .cache_config(CacheConfig::new().with_shared_timeout(Duration::from_secs(3600)))
        .shared_cache(Arc::new(StalledSharedCache))
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let err = client
        .call(
            CompletionRequest::new("hung cache"),
            CallOptions::new().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { timeout_ms: 100, .. }), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(a.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_uncached_callers_do_not_join_cached_flight() {
    let a = ScriptedProvider::with_delay("a", 1, Duration::from_millis(50), vec![]);
    let client = client(vec![a.clone()], RetryPolicy::no_retry());
    let request = CompletionRequest::new("mixed options");

    let (cached, fresh, fresh_again) = tokio::join!(
        client.call(request.clone(), CallOptions::new()),
        client.call(request.clone(), CallOptions::new().with_cache(false)),
        client.call(request.clone(), CallOptions::new().with_cache(false)),
    );
    assert_eq!(cached.unwrap().provider, "a");
    assert_eq!(fresh.unwrap(), fresh_again.unwrap());

    // One flight per cache mode; only the cached one stores its result.
    assert_eq!(a.calls(), 2);
    let health = client.health();
    assert_eq!((health.coalescer.leaders, health.coalescer.followers), (2, 1));
    assert_eq!(health.cache.size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_calls_share_one_upstream_call() {
    let a = ScriptedProvider::with_delay("a", 1, Duration::from_millis(50), vec![]);
    let client = client(vec![a.clone()], RetryPolicy::no_retry());

    let calls = (0..10).map(|_| client.call(CompletionRequest::new("same"), CallOptions::new()));
    let results = join_all(calls).await;

    assert_eq!(a.calls(), 1);
    let first = results[0].as_ref().unwrap();
    assert!(results.iter().all(|r| r.as_ref().unwrap() == first));
    let health = client.health();
    assert_eq!(health.coalescer.leaders, 1);
    assert_eq!(health.coalescer.followers, 9);
    assert_eq!(health.coalescer.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cache_bypass_and_invalidation() {
    let a = ScriptedProvider::new("a", 1, vec![]);
    let client = client(vec![a.clone()], RetryPolicy::no_retry());
    let request = CompletionRequest::new("fresh please");

    client.call(request.clone(), CallOptions::new()).await.unwrap();
    client
        .call(request.clone(), CallOptions::new().with_cache(false))
        .await
        .unwrap();
    assert_eq!(a.calls(), 2);

    assert!(client.invalidate(&request).await);
    client.call(request.clone(), CallOptions::new()).await.unwrap();
    assert_eq!(a.calls(), 3);

    assert_eq!(client.invalidate_pattern(&KeyPattern::prefix("llm:")).await, 1);
    assert_eq!(client.cache().stats().size, 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_through_client() {
    let a = ScriptedProvider::new("a", 1, vec![Ok("one".into()), Err(auth_error("a"))]);
    let client = client(vec![a.clone()], RetryPolicy::no_retry());
    let runner = BatchRunner::new(
        BatchConfig::new()
            .with_batch_size(2)
            .with_inter_batch_delay(Duration::from_millis(100)),
    );
    let requests: Vec<_> = (0..5)
        .map(|i| CompletionRequest::new(format!("item {i}")))
        .collect();

    let result = runner.run_through(&client, requests, CallOptions::new()).await;
    assert_eq!(result.batches, 3);
    assert_eq!(result.total_processed, 5);
    assert_eq!(result.success_count(), 4);
    assert_eq!(result.failure_count(), 1);
    assert_eq!(a.calls(), 5);
}

#[tokio::test]
async fn test_health_is_serializable() {
    let client = client(vec![ScriptedProvider::new("a", 1, vec![])], RetryPolicy::no_retry());
    let json = serde_json::to_value(client.health()).unwrap();
    assert_eq!(json["dependency"], "llm");
    assert_eq!(json["circuit"]["state"], "CLOSED");
    assert_eq!(json["providers"]["a"]["priority"], 1);
    assert_eq!(json["cache"]["hits"], 0);
}
