//! Bounded retry with exponential backoff and jitter.

use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type Classifier = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Immutable retry configuration, one per dependency type.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retry.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Delay is scaled by a random factor in `[1 - ratio, 1 + ratio]`.
    pub jitter_ratio: f64,
    classifier: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter_ratio: 0.2,
            classifier: Arc::new(Error::is_retryable),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter_ratio", &self.jitter_ratio)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Replace the default classifier ([`Error::is_retryable`]).
    pub fn with_classifier<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(f);
        self
    }

    pub fn is_retryable(&self, err: &Error) -> bool {
        (self.classifier)(err)
    }

    /// Deterministic part of the backoff for 1-based `attempt`:
    /// `min(max_delay, base_delay * 2^(attempt-1))`.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff with jitter applied, honoring a provider `Retry-After` hint.
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let base = self.base_backoff(attempt);
        let jittered = if self.jitter_ratio > 0.0 {
            let spread = rand::thread_rng().gen_range(-1.0..=1.0) * self.jitter_ratio;
            base.mul_f64((1.0 + spread).max(0.0))
        } else {
            base
        };
        match retry_after_ms {
            Some(ms) => jittered.max(Duration::from_millis(ms)).min(self.max_delay),
            None => jittered,
        }
    }
}

/// Runs one operation under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `operation` (given the 1-based attempt number) until it succeeds,
    /// fails with a non-retryable error, or attempts run out.
    ///
    /// Non-retryable errors are returned as-is. Running out of attempts on a
    /// retryable error yields [`Error::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(v) => {
                    if attempt > 1 {
                        debug!(target_name = label, attempt, "succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(e) if !self.policy.is_retryable(&e) => {
                    debug!(target_name = label, attempt, error = %e, "non-retryable failure");
                    return Err(e);
                }
                Err(e) if attempt >= max => {
                    warn!(target_name = label, attempts = attempt, error = %e, "retries exhausted");
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt, e.retry_after_ms());
                    debug!(
                        target_name = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ErrorClass;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> Error {
        Error::upstream("p", ErrorClass::ServerError, Some(502), "bad gateway")
    }

    #[test]
    fn test_base_backoff_is_capped_exponential() {
        let p = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1_000));
        assert_eq!(p.base_backoff(1), Duration::from_millis(100));
        assert_eq!(p.base_backoff(2), Duration::from_millis(200));
        assert_eq!(p.base_backoff(3), Duration::from_millis(400));
        assert_eq!(p.base_backoff(5), Duration::from_millis(1_000));
        assert_eq!(p.base_backoff(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let p = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(1_000))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter_ratio(0.25);
        for _ in 0..200 {
            let d = p.delay_for(1, None).as_millis();
            assert!((750..=1_250).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn test_retry_after_raises_delay_but_respects_cap() {
        let p = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter_ratio(0.0);
        assert_eq!(p.delay_for(1, Some(300)), Duration::from_millis(300));
        assert_eq!(p.delay_for(1, Some(5_000)), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let exec = RetryExecutor::new(
            RetryPolicy::new()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(100)),
        );
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = exec
            .run("flaky", move |_| async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_invoked_once() {
        let exec = RetryExecutor::new(RetryPolicy::new().with_max_attempts(5));
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = exec
            .run("auth", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::upstream(
                    "p",
                    ErrorClass::Authentication,
                    Some(401),
                    "bad key",
                ))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::NonRetryableUpstream(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_attempts_and_last_error() {
        let exec = RetryExecutor::new(RetryPolicy::new().with_max_attempts(2));
        let err = exec
            .run("down", move |_| async move { Err::<(), _>(transient()) })
            .await
            .unwrap_err();
        match err {
            Error::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, Error::RetryableUpstream(_)));
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_disables_retry() {
        let exec = RetryExecutor::new(RetryPolicy::no_retry());
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let _ = exec
            .run("once", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
