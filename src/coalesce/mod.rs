//! 请求合并模块：同一键的并发请求只触发一次上游调用。
//!
//! # Request coalescing
//!
//! [`RequestCoalescer`] collapses concurrent calls that share a key into one
//! upstream invocation. The first caller (the leader) starts the factory; every
//! caller that arrives while it is running (a follower) attaches to the same
//! pending result. All of them observe the identical value or identical error.
//!
//! The factory runs on its own tokio task, so a caller that gives up waiting
//! does not cancel the work for everybody else.
//!
//! Waiters are woken together once the factory resolves. The order in which
//! they resume is up to the runtime and is not guaranteed to match the order
//! in which they attached.

use crate::{Error, ErrorContext, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight<T> {
    id: u64,
    result: SharedResult<T>,
}

type InFlightMap<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

fn lock_map<T>(
    map: &Mutex<HashMap<String, InFlight<T>>>,
) -> MutexGuard<'_, HashMap<String, InFlight<T>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoalescerStats {
    /// Keys with a factory currently running.
    pub in_flight: usize,
    /// Calls that started a factory.
    pub leaders: u64,
    /// Calls that attached to an already running factory.
    pub followers: u64,
}

pub struct RequestCoalescer<T> {
    inflight: InFlightMap<T>,
    next_id: AtomicU64,
    leaders: AtomicU64,
    followers: AtomicU64,
}

impl<T> Default for RequestCoalescer<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            leaders: AtomicU64::new(0),
            followers: AtomicU64::new(0),
        }
    }
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `key` through `factory`, sharing one invocation with every
    /// concurrent caller of the same key.
    ///
    /// `factory` is only called when no invocation for `key` is in flight.
    /// The map entry is removed before waiters are woken, so a call that
    /// arrives after resolution starts a fresh invocation.
    pub async fn coalesce<F, Fut>(&self, key: &str, factory: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let result = {
            let mut map = lock_map(&self.inflight);
            match map.get(key) {
                Some(existing) => {
                    self.followers.fetch_add(1, Ordering::Relaxed);
                    debug!(cache_key = key, "joining in-flight request");
                    existing.result.clone()
                }
                None => {
                    self.leaders.fetch_add(1, Ordering::Relaxed);
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let result = self.spawn_leader(key, id, factory());
                    map.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            result: result.clone(),
                        },
                    );
                    result
                }
            }
        };
        result.await
    }

    fn spawn_leader<Fut>(&self, key: &str, id: u64, work: Fut) -> SharedResult<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let map = Arc::clone(&self.inflight);
        let owned_key = key.to_string();
        let handle = tokio::spawn(async move {
            let out = work.await;
            let mut map = lock_map(&map);
            if map.get(&owned_key).map(|e| e.id) == Some(id) {
                map.remove(&owned_key);
            }
            out
        });
        let key_for_err = key.to_string();
        async move {
            match handle.await {
                Ok(out) => out,
                Err(join_err) => {
                    warn!(cache_key = %key_for_err, error = %join_err, "coalesced task aborted");
                    Err(Error::runtime_with_context(
                        format!("coalesced request did not complete: {}", join_err),
                        ErrorContext::new()
                            .with_source("coalescer")
                            .with_details(key_for_err),
                    ))
                }
            }
        }
        .boxed()
        .shared()
    }

    pub fn in_flight(&self) -> usize {
        lock_map(&self.inflight).len()
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            in_flight: self.in_flight(),
            leaders: self.leaders.load(Ordering::Relaxed),
            followers: self.followers.load(Ordering::Relaxed),
        }
    }
}

impl<T> std::fmt::Debug for RequestCoalescer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("in_flight", &lock_map(&self.inflight).len())
            .field("leaders", &self.leaders.load(Ordering::Relaxed))
            .field("followers", &self.followers.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ErrorClass;
    use futures::future::join_all;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_invocation() {
        let coalescer = RequestCoalescer::<String>::new();
        let calls = Arc::new(AtomicU32::new(0));

        let waiters = (0..10).map(|_| {
            let calls = Arc::clone(&calls);
            coalescer.coalesce("vector:q1", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok("shared answer".to_string())
            })
        });
        let results = join_all(waiters).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 10);
        for r in results {
            assert_eq!(r.unwrap(), "shared answer");
        }
        let stats = coalescer.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!((stats.leaders, stats.followers), (1, 9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_fans_out_to_all_waiters() {
        let coalescer = RequestCoalescer::<u32>::new();
        let waiters = (0..3).map(|_| {
            coalescer.coalesce("llm:k", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(Error::upstream("openai", ErrorClass::Overloaded, Some(503), "busy"))
            })
        });
        for r in join_all(waiters).await {
            let err = r.unwrap_err();
            assert_eq!(err.class(), Some(ErrorClass::Overloaded));
        }
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_key_starts_fresh() {
        let coalescer = RequestCoalescer::<u32>::new();
        let calls = Arc::new(AtomicU32::new(0));
        for expected in 1..=2 {
            let c = Arc::clone(&calls);
            let v = coalescer
                .coalesce("k", move || async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1) })
                .await
                .unwrap();
            assert_eq!(v, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_leader_does_not_cancel_followers() {
        let coalescer = Arc::new(RequestCoalescer::<u32>::new());

        let leader = {
            let c = Arc::clone(&coalescer);
            tokio::spawn(async move {
                tokio::time::timeout(
                    Duration::from_millis(10),
                    c.coalesce("slow", || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(7)
                    }),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        let follower = coalescer.coalesce("slow", || async { Ok(0) });

        assert_eq!(follower.await.unwrap(), 7);
        assert!(leader.await.unwrap().is_err());
    }
}
