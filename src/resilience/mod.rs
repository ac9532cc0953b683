//! 弹性模式模块：提供熔断器和带退避的重试执行器。
//!
//! # Resilience Primitives Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Per-dependency / per-provider failure isolation |
//! | [`retry`] | Exponential backoff with jitter and `Retry-After` support |
//!
//! ## Circuit Breaker
//!
//! - **Closed**: requests pass; consecutive failures are counted
//! - **Open**: requests fail fast with [`Error::CircuitOpen`](crate::Error::CircuitOpen)
//! - **Half-Open**: one probe at a time until enough successes close it again
//!
//! ```rust
//! use ai_lib_guard::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let breaker = CircuitBreaker::new(
//!     "search",
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_reset_timeout(Duration::from_secs(30)),
//! );
//! let value = breaker.execute(|| async { Ok::<_, ai_lib_guard::Error>(42) }).await?;
//! assert_eq!(value, 42);
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # Ok::<(), ai_lib_guard::Error>(())
//! # }).unwrap();
//! ```
//!
//! ## Retry
//!
//! ```rust
//! use ai_lib_guard::resilience::retry::{RetryExecutor, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new()
//!     .with_max_attempts(3)
//!     .with_base_delay(Duration::from_millis(200));
//! let executor = RetryExecutor::new(policy);
//! assert_eq!(executor.policy().base_backoff(2), Duration::from_millis(400));
//! ```

pub mod circuit_breaker;
pub mod retry;
