//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls test for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= max_failures
//! Open → Half-Open: first call attempt after reset_timeout (lazy, no timer)
//! Half-Open → Closed: any trial call succeeds
//! Half-Open → Open: a trial fails and the trial budget is spent
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency per worker, never shared
//! - Fail fast in Open state without invoking the wrapped call
//! - The wrapped call's error is always handed back to the caller
//! - Half-Open trial failures never touch the Closed failure counter

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// The dependency a breaker guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// The shared store behind the rate limiter.
    RateLimitStore,
    /// The message queue publisher.
    Publisher,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::RateLimitStore => "rate_limit_store",
            Dependency::Publisher => "publisher",
        }
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was short-circuited; the dependency is considered down.
    #[error("circuit breaker open: {dependency} unavailable")]
    Open { dependency: Dependency },

    /// The wrapped call ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub max_failures: u32,
    pub reset_timeout: Duration,
    pub half_open_max_attempts: u32,
}

impl From<&CircuitBreakerConfig> for BreakerPolicy {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            max_failures: config.max_failures.max(1),
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            half_open_max_attempts: config.half_open_max_attempts.max(1),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_trials: u32,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_trials: u32,
    opened_at: Option<Instant>,
}

/// Wraps calls to one dependency and short-circuits them after sustained failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: Dependency,
    /// Owner label for logs and metrics (e.g. the worker's token suffix).
    scope: String,
    policy: BreakerPolicy,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(dependency: Dependency, scope: impl Into<String>, policy: BreakerPolicy) -> Self {
        let scope = scope.into();
        metrics::record_breaker_state(dependency.as_str(), &scope, CircuitState::Closed);
        Self {
            dependency,
            scope,
            policy,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_trials: 0,
                opened_at: None,
            }),
        }
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_trials: inner.half_open_trials,
            opened_at: inner.opened_at,
        }
    }

    /// Run `operation` under breaker protection.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let phase = match self.admit() {
            Some(phase) => phase,
            None => {
                metrics::record_breaker_rejection(self.dependency.as_str(), &self.scope);
                return Err(BreakerError::Open {
                    dependency: self.dependency,
                });
            }
        };

        match operation().await {
            Ok(value) => {
                self.on_success(phase);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(phase);
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    /// Decide whether a call may proceed; returns the state it runs under.
    fn admit(&self) -> Option<CircuitState> {
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or(Duration::MAX);
            if elapsed < self.policy.reset_timeout {
                tracing::debug!(
                    dependency = %self.dependency,
                    scope = %self.scope,
                    "Circuit breaker open, skipping call"
                );
                return None;
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
            inner.half_open_trials = 0;
        }

        match inner.state {
            CircuitState::Closed => Some(CircuitState::Closed),
            CircuitState::HalfOpen => {
                if inner.half_open_trials >= self.policy.half_open_max_attempts {
                    return None;
                }
                inner.half_open_trials += 1;
                Some(CircuitState::HalfOpen)
            }
            CircuitState::Open => None,
        }
    }

    fn on_success(&self, phase: CircuitState) {
        let mut inner = self.lock();
        match (phase, inner.state) {
            (CircuitState::HalfOpen, CircuitState::HalfOpen) => {
                tracing::info!(
                    dependency = %self.dependency,
                    scope = %self.scope,
                    trial = inner.half_open_trials,
                    "Half-open trial succeeded"
                );
                self.transition(&mut inner, CircuitState::Closed);
                inner.consecutive_failures = 0;
                inner.half_open_trials = 0;
                inner.opened_at = None;
            }
            (_, CircuitState::Closed) => inner.consecutive_failures = 0,
            // Outcome of a call admitted before a concurrent transition.
            _ => {}
        }
    }

    fn on_failure(&self, phase: CircuitState) {
        let mut inner = self.lock();
        match (phase, inner.state) {
            (CircuitState::HalfOpen, CircuitState::HalfOpen) => {
                if inner.half_open_trials >= self.policy.half_open_max_attempts {
                    tracing::warn!(
                        dependency = %self.dependency,
                        scope = %self.scope,
                        attempts = inner.half_open_trials,
                        "Half-open trial budget exhausted"
                    );
                    self.open(&mut inner);
                } else {
                    tracing::info!(
                        dependency = %self.dependency,
                        scope = %self.scope,
                        attempt = inner.half_open_trials,
                        max_attempts = self.policy.half_open_max_attempts,
                        "Half-open trial failed, staying half-open"
                    );
                }
            }
            (CircuitState::Closed, CircuitState::Closed) => {
                inner.consecutive_failures += 1;
                tracing::debug!(
                    dependency = %self.dependency,
                    scope = %self.scope,
                    failures = inner.consecutive_failures,
                    "Call failed"
                );
                if inner.consecutive_failures >= self.policy.max_failures {
                    self.open(&mut inner);
                }
            }
            _ => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        self.transition(inner, CircuitState::Open);
        inner.opened_at = Some(Instant::now());
        inner.half_open_trials = 0;
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        if to == CircuitState::Open {
            tracing::warn!(dependency = %self.dependency, scope = %self.scope, from = ?from, "Circuit breaker opened");
        } else {
            tracing::info!(dependency = %self.dependency, scope = %self.scope, from = ?from, to = ?to, "Circuit breaker state changed");
        }
        metrics::record_breaker_state(self.dependency.as_str(), &self.scope, to);
    }
}
