//! Sliding-window rate limiter shared by every worker of a quota pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::limiter::store::{denial_hint, Admission, AdmissionStore, RateLimitPolicy, StoreError};
use crate::observability::metrics;
use crate::resilience::backoff::jitter;

/// Errors surfaced by the rate limiter.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// The shared store is unreachable or the outcome is unknown.
    #[error("rate limit store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store answered but the answer was unusable.
    #[error("rate limit store error: {0}")]
    Store(String),
}

impl From<StoreError> for LimiterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => LimiterError::StoreUnavailable(msg),
            other => LimiterError::Store(other.to_string()),
        }
    }
}

/// Outcome of [`RateLimiter::wait_for_admission`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Admitted after waiting `waited` in total.
    Admitted { waited: Duration },
    /// The wait budget ran out before an admission was granted.
    TimedOut { waited: Duration },
}

impl AdmissionOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionOutcome::Admitted { .. })
    }
}

/// Atomic admission control over an [`AdmissionStore`].
///
/// Cheap to clone; clones share the store handle and the detected store
/// capabilities.
pub struct RateLimiter<S> {
    store: Arc<S>,
    jitter_ratio: f64,
    script_unsupported: Arc<AtomicBool>,
}

impl<S> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            jitter_ratio: self.jitter_ratio,
            script_unsupported: self.script_unsupported.clone(),
        }
    }
}

impl<S: AdmissionStore> RateLimiter<S> {
    /// Create a limiter with the default 10% jitter.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_jitter(store, 0.1)
    }

    /// Create a limiter adding up to `jitter_ratio` of each hint as jitter.
    pub fn with_jitter(store: Arc<S>, jitter_ratio: f64) -> Self {
        Self {
            store,
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
            script_unsupported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make one atomic admission decision for `key`.
    pub async fn try_acquire(
        &self,
        key: &str,
        policy: RateLimitPolicy,
    ) -> Result<Admission, LimiterError> {
        let member = Uuid::new_v4().to_string();

        if !self.script_unsupported.load(Ordering::Relaxed) {
            match self.store.eval_admission(key, &member, policy).await {
                Ok(admission) => {
                    metrics::record_rate_limit_decision(key, admission.is_allowed());
                    return Ok(admission);
                }
                Err(StoreError::ScriptUnsupported) => {
                    tracing::warn!(key = %key, "Store lacks atomic admission script, using transactional fallback");
                    self.script_unsupported.store(true, Ordering::Relaxed);
                }
                Err(e) => {
                    metrics::record_rate_limit_store_error(key);
                    return Err(e.into());
                }
            }
        }

        let admission = self.acquire_transactional(key, &member, policy).await?;
        metrics::record_rate_limit_decision(key, admission.is_allowed());
        Ok(admission)
    }

    /// Fallback path: insert first, then roll back our own entry if the
    /// window turned out to be full.
    async fn acquire_transactional(
        &self,
        key: &str,
        member: &str,
        policy: RateLimitPolicy,
    ) -> Result<Admission, LimiterError> {
        let snapshot = match self.store.insert_and_count(key, member, policy.window).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // The insert may or may not have landed.
                if let Err(cleanup) = self.store.remove_member(key, member).await {
                    tracing::debug!(key = %key, error = %cleanup, "Rollback after failed transaction also failed");
                }
                metrics::record_rate_limit_store_error(key);
                return Err(e.into());
            }
        };

        if snapshot.count <= policy.capacity {
            return Ok(Admission::Allowed {
                remaining: policy.capacity - snapshot.count,
            });
        }

        if let Err(e) = self.store.remove_member(key, member).await {
            // The stray entry ages out with the window; until then it can only
            // cause extra denials.
            tracing::warn!(key = %key, error = %e, "Failed to roll back denied admission");
        }

        Ok(Admission::Denied {
            retry_after: denial_hint(policy.window, snapshot.oldest_age),
        })
    }

    /// Wait until `key` admits one unit of work, sleeping on each denial for
    /// the store's hint plus jitter.
    ///
    /// Total sleep never exceeds `max_total_wait`; when it would, the call
    /// returns [`AdmissionOutcome::TimedOut`] without having acquired.
    pub async fn wait_for_admission(
        &self,
        key: &str,
        policy: RateLimitPolicy,
        max_total_wait: Duration,
    ) -> Result<AdmissionOutcome, LimiterError> {
        let started = Instant::now();
        let mut slept = Duration::ZERO;

        loop {
            match self.try_acquire(key, policy).await? {
                Admission::Allowed { .. } => {
                    metrics::record_rate_limit_wait(key, started.elapsed());
                    return Ok(AdmissionOutcome::Admitted { waited: slept });
                }
                Admission::Denied { retry_after } => {
                    let remaining = max_total_wait.saturating_sub(slept);
                    if remaining.is_zero() {
                        tracing::debug!(key = %key, waited = ?slept, "Admission wait budget exhausted");
                        metrics::record_rate_limit_wait(key, started.elapsed());
                        return Ok(AdmissionOutcome::TimedOut { waited: slept });
                    }

                    let delay = (retry_after + jitter(retry_after, self.jitter_ratio)).min(remaining);
                    tracing::trace!(key = %key, delay = ?delay, "Rate limited, waiting");
                    tokio::time::sleep(delay).await;
                    slept += delay;
                }
            }
        }
    }
}
