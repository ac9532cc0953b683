//! Three-state circuit breaker.
//!
//! ```text
//! CLOSED ──(failure_threshold consecutive failures)──▶ OPEN
//! OPEN ──(first call after reset_timeout)──▶ HALF_OPEN (that call is the probe)
//! HALF_OPEN ──(success_threshold probe successes)──▶ CLOSED
//! HALF_OPEN ──(any probe failure)──▶ OPEN (fresh timeout)
//! ```
//!
//! Only one probe may be in flight while half-open; everyone else is rejected
//! exactly as if the breaker were open.

use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_ms: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_until: Option<Instant>,
    probe_in_flight: bool,
}

impl State {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_until: None,
            probe_in_flight: false,
        }
    }
}

/// Failure-isolation gate for one dependency (or one provider).
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

/// Admission ticket handed out by [`CircuitBreaker::try_acquire`].
///
/// Report the outcome with [`success`](Self::success),
/// [`failure`](Self::failure) or [`ignore`](Self::ignore). Dropping an unsettled
/// probe permit (the caller was cancelled) frees the probe slot without
/// recording anything.
#[must_use = "report the call outcome through the permit"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// Whether this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }

    /// Outcome says nothing about dependency health (e.g. a malformed request).
    pub fn ignore(mut self) {
        self.settled = true;
        if self.probe {
            self.breaker.release_probe();
        }
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            debug!(breaker = %self.breaker.name, "probe abandoned before completion");
            self.breaker.release_probe();
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            state: Mutex::new(State::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` behind the breaker.
    ///
    /// Fails with [`Error::CircuitOpen`] without calling `f` when the breaker
    /// does not admit the call.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.try_acquire()?;
        match f().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                if e.counts_as_failure() {
                    permit.failure();
                } else {
                    permit.ignore();
                }
                Err(e)
            }
        }
    }

    /// Ask for admission. The transition OPEN → HALF_OPEN happens here, on the
    /// first call after the reset timeout.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>> {
        let mut st = self.lock();
        let probe = match st.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let now = Instant::now();
                match st.opened_until {
                    Some(until) if now < until => {
                        return Err(Error::CircuitOpen {
                            dependency: self.name.clone(),
                            retry_after_ms: Some((until - now).as_millis() as u64),
                        });
                    }
                    _ => {
                        st.state = CircuitState::HalfOpen;
                        st.consecutive_successes = 0;
                        st.probe_in_flight = true;
                        info!(breaker = %self.name, "circuit half-open, admitting probe");
                        true
                    }
                }
            }
            CircuitState::HalfOpen => {
                if st.probe_in_flight {
                    return Err(Error::CircuitOpen {
                        dependency: self.name.clone(),
                        retry_after_ms: None,
                    });
                }
                st.probe_in_flight = true;
                true
            }
        };
        Ok(CircuitPermit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    fn on_success(&self, probe: bool) {
        let mut st = self.lock();
        match st.state {
            CircuitState::Closed => st.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                st.probe_in_flight = false;
                st.consecutive_successes = st.consecutive_successes.saturating_add(1);
                if st.consecutive_successes >= self.cfg.success_threshold {
                    *st = State::closed();
                    info!(breaker = %self.name, "circuit closed");
                }
            }
            // Stragglers admitted before the breaker opened.
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut st = self.lock();
        match st.state {
            CircuitState::Closed => {
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                if st.consecutive_failures >= self.cfg.failure_threshold {
                    st.state = CircuitState::Open;
                    st.opened_until = Some(Instant::now() + self.cfg.reset_timeout);
                    warn!(
                        breaker = %self.name,
                        failures = st.consecutive_failures,
                        reset_timeout_ms = self.cfg.reset_timeout.as_millis() as u64,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen if probe => {
                st.state = CircuitState::Open;
                st.opened_until = Some(Instant::now() + self.cfg.reset_timeout);
                st.consecutive_successes = 0;
                st.probe_in_flight = false;
                warn!(breaker = %self.name, "probe failed, circuit reopened");
            }
            _ => {}
        }
    }

    fn release_probe(&self) {
        let mut st = self.lock();
        if st.state == CircuitState::HalfOpen {
            st.probe_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Force the breaker back to CLOSED with all counters reset.
    pub fn reset(&self) {
        *self.lock() = State::closed();
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.lock();
        let open_remaining_ms = match (st.state, st.opened_until) {
            (CircuitState::Open, Some(until)) if until > now => {
                Some((until - now).as_millis() as u64)
            }
            _ => None,
        };
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: st.state,
            failure_threshold: self.cfg.failure_threshold,
            success_threshold: self.cfg.success_threshold,
            reset_timeout_ms: self.cfg.reset_timeout.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            consecutive_successes: st.consecutive_successes,
            open_remaining_ms,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Named breakers, one per provider. Built at startup and shared by reference.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config.clone())
    }

    /// `cfg` only applies when the breaker does not exist yet.
    pub fn get_or_create_with(&self, name: &str, cfg: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(b) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return b.clone();
        }
        self.breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, cfg)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut out: Vec<_> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|b| b.snapshot())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
