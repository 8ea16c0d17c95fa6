//! Retry logic.
//!
//! # Responsibilities
//! - Re-run an idempotent operation a bounded number of times
//! - Space attempts with backoff + jitter
//! - Hand the last error back once the budget is spent
//!
//! # Design Decisions
//! - Callers decide what is retried; the circuit breaker never retries
//! - Retries live inside collaborators (publisher, startup readiness checks), not in
//!   the worker loop

use std::future::Future;
use std::time::Duration;

use crate::resilience::backoff::calculate_backoff;

/// Bounded retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay. Equal to `base_delay` for a fixed schedule.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
        }
    }
}

/// The operation failed on every attempt.
#[derive(Debug)]
pub struct RetriesExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `operation` until it succeeds or `policy.max_attempts` is reached.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, RetriesExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                tracing::error!(operation = %label, attempts = attempt, error = %e, "Giving up after final attempt");
                return Err(RetriesExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay = calculate_backoff(attempt, policy.base_delay, policy.max_delay);
                tracing::warn!(
                    operation = %label,
                    attempt,
                    max_attempts,
                    delay = ?delay,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
