//! Per-identity polling loop.
//!
//! Each cycle runs gate → fetch → publish strictly in sequence:
//!
//! ```text
//! gate:    store breaker → RateLimiter::wait_for_admission
//!            Admitted            → fetch
//!            TimedOut            → skip cycle
//!            breaker open        → sleep breaker_open_delay, next cycle
//!            StoreUnavailable    → fetch when fail_open, else skip
//! fetch:   OriginClient::fetch_next_update (not breaker-wrapped)
//! publish: publish breaker → Publisher::send
//! ```
//!
//! Shutdown is observed between cycles and while the gate sleeps. An
//! in-flight fetch runs to completion unless the shutdown deadline passes
//! first; an in-flight publish always runs to completion. The origin client
//! is closed on every exit path, panics included.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RelayConfig;
use crate::lifecycle::ShutdownListener;
use crate::limiter::{AdmissionOutcome, AdmissionStore, LimiterError, RateLimitPolicy, RateLimiter};
use crate::message::UpdateMessage;
use crate::observability::metrics;
use crate::origin::OriginClient;
use crate::publisher::Publisher;
use crate::resilience::{BreakerError, BreakerPolicy, CircuitBreaker, Dependency};

/// Settings shared by every worker of a cohort.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Quota pool the workers contend on.
    pub key: String,
    pub policy: RateLimitPolicy,
    pub max_total_wait: Duration,
    /// Proceed to fetch when the limiter store is unreachable.
    pub fail_open: bool,
    pub breaker_open_delay: Duration,
    /// Destination queue for relayed updates.
    pub queue: String,
    pub store_breaker: BreakerPolicy,
    pub publish_breaker: BreakerPolicy,
}

impl WorkerSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            key: config.rate_limit.key_for(config.origin.kind),
            policy: config.rate_limit.policy(),
            max_total_wait: config.rate_limit.max_total_wait(),
            fail_open: config.rate_limit.fail_open,
            breaker_open_delay: Duration::from_millis(config.worker.breaker_open_delay_ms),
            queue: config.publisher.queue.clone(),
            store_breaker: BreakerPolicy::from(&config.breakers.store),
            publish_breaker: BreakerPolicy::from(&config.breakers.publisher),
        }
    }
}

/// Where a worker currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Starting,
    Gate,
    Fetch,
    Publish,
    Closing,
    Stopped,
}

impl WorkerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerPhase::Starting,
            1 => WorkerPhase::Gate,
            2 => WorkerPhase::Fetch,
            3 => WorkerPhase::Publish,
            4 => WorkerPhase::Closing,
            _ => WorkerPhase::Stopped,
        }
    }
}

/// Why [`PollingWorker::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Left the loop after the shutdown signal.
    Shutdown,
    /// The origin client could not be opened.
    OpenFailed,
    /// An open or fetch was abandoned at the shutdown deadline.
    Deadline,
}

/// Live counters and phase for one worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    phase: AtomicU8,
    admitted: AtomicU64,
    skipped: AtomicU64,
    fetched: AtomicU64,
    fetch_errors: AtomicU64,
    sent: AtomicU64,
    publish_errors: AtomicU64,
}

/// Copy of [`WorkerStats`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    /// Cycles that passed the gate (including fail-open admissions).
    pub admitted: u64,
    /// Cycles skipped at the gate.
    pub skipped: u64,
    /// Updates received from the origin.
    pub fetched: u64,
    pub fetch_errors: u64,
    pub sent: u64,
    /// Publish failures, breaker rejections included.
    pub publish_errors: u64,
}

impl WorkerStats {
    pub fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn enter(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Result of the gate phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Proceed,
    Skip,
    BreakerOpen,
}

/// Polls one origin identity and relays its updates.
pub struct PollingWorker<O, P, S> {
    origin: O,
    publisher: Arc<P>,
    limiter: RateLimiter<S>,
    settings: Arc<WorkerSettings>,
    store_breaker: CircuitBreaker,
    publish_breaker: CircuitBreaker,
    stats: Arc<WorkerStats>,
}

impl<O, P, S> PollingWorker<O, P, S>
where
    O: OriginClient,
    P: Publisher,
    S: AdmissionStore,
{
    pub fn new(
        origin: O,
        publisher: Arc<P>,
        limiter: RateLimiter<S>,
        settings: Arc<WorkerSettings>,
    ) -> Self {
        let scope = origin.identity().token_suffix().to_string();
        Self {
            store_breaker: CircuitBreaker::new(
                Dependency::RateLimitStore,
                scope.clone(),
                settings.store_breaker,
            ),
            publish_breaker: CircuitBreaker::new(Dependency::Publisher, scope, settings.publish_breaker),
            origin,
            publisher,
            limiter,
            settings,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Counters shared with whoever started the worker.
    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Run until `shutdown` fires. The origin client is closed on return.
    pub async fn run(self, shutdown: ShutdownListener) -> StopReason {
        self.run_until(shutdown, None).await
    }

    /// Like [`run`](Self::run), but an open or fetch still in flight when
    /// `deadline` fires is abandoned. A publish in flight is not.
    pub async fn run_until(
        mut self,
        mut shutdown: ShutdownListener,
        mut deadline: Option<ShutdownListener>,
    ) -> StopReason {
        let identity = self.origin.identity().clone();
        let kind = self.origin.kind();

        let outcome = AssertUnwindSafe(self.drive(&mut shutdown, &mut deadline))
            .catch_unwind()
            .await;

        self.stats.enter(WorkerPhase::Closing);
        self.origin.close().await;
        self.stats.enter(WorkerPhase::Stopped);

        match outcome {
            Ok(reason) => {
                tracing::info!(
                    identity = %identity,
                    origin = %kind,
                    reason = ?reason,
                    stats = ?self.stats.snapshot(),
                    "Worker stopped"
                );
                reason
            }
            Err(panic) => {
                tracing::error!(identity = %identity, origin = %kind, "Worker panicked, origin client closed");
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn drive(
        &mut self,
        shutdown: &mut ShutdownListener,
        deadline: &mut Option<ShutdownListener>,
    ) -> StopReason {
        let identity = self.origin.identity().clone();
        let kind = self.origin.kind();

        let opened = tokio::select! {
            opened = self.origin.open() => opened,
            _ = deadline_passed(deadline) => return StopReason::Deadline,
        };
        if let Err(e) = opened {
            tracing::error!(identity = %identity, origin = %kind, error = %e, "Failed to open origin client");
            return StopReason::OpenFailed;
        }

        tracing::info!(identity = %identity, origin = %kind, key = %self.settings.key, "Worker started");
        self.poll(shutdown, deadline).await
    }

    async fn poll(
        &mut self,
        shutdown: &mut ShutdownListener,
        deadline: &mut Option<ShutdownListener>,
    ) -> StopReason {
        while !shutdown.is_shutdown() {
            self.stats.enter(WorkerPhase::Gate);
            let gate = tokio::select! {
                gate = self.gate() => gate,
                _ = shutdown.recv() => break,
            };

            match gate {
                Gate::Proceed => {
                    if !self.fetch_and_publish(deadline).await {
                        return StopReason::Deadline;
                    }
                }
                Gate::Skip => bump(&self.stats.skipped),
                Gate::BreakerOpen => {
                    bump(&self.stats.skipped);
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.breaker_open_delay) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }
        StopReason::Shutdown
    }

    async fn gate(&self) -> Gate {
        let settings = &*self.settings;
        let limiter = &self.limiter;
        let identity = self.origin.identity();

        let result = self
            .store_breaker
            .call(|| limiter.wait_for_admission(&settings.key, settings.policy, settings.max_total_wait))
            .await;

        match result {
            Ok(AdmissionOutcome::Admitted { waited }) => {
                tracing::trace!(identity = %identity, waited = ?waited, "Cycle admitted");
                bump(&self.stats.admitted);
                Gate::Proceed
            }
            Ok(AdmissionOutcome::TimedOut { waited }) => {
                tracing::debug!(identity = %identity, waited = ?waited, "Admission wait timed out, skipping cycle");
                Gate::Skip
            }
            Err(BreakerError::Open { dependency }) => {
                tracing::warn!(
                    identity = %identity,
                    dependency = %dependency,
                    delay = ?settings.breaker_open_delay,
                    "Rate limit store breaker open"
                );
                Gate::BreakerOpen
            }
            Err(BreakerError::Inner(LimiterError::StoreUnavailable(reason))) if settings.fail_open => {
                tracing::warn!(identity = %identity, reason = %reason, "Rate limit store unavailable, failing open");
                bump(&self.stats.admitted);
                Gate::Proceed
            }
            Err(BreakerError::Inner(e)) => {
                tracing::error!(identity = %identity, error = %e, "Rate limiter failed, skipping cycle");
                Gate::Skip
            }
        }
    }

    /// One fetch and, when it yields an update, one publish. Returns false
    /// when the fetch was abandoned at the deadline.
    async fn fetch_and_publish(&mut self, deadline: &mut Option<ShutdownListener>) -> bool {
        self.stats.enter(WorkerPhase::Fetch);
        let kind = self.origin.kind();
        let started = Instant::now();

        let fetched = tokio::select! {
            fetched = self.origin.fetch_next_update() => Some(fetched),
            _ = deadline_passed(deadline) => None,
        };
        let Some(fetched) = fetched else {
            tracing::warn!(identity = %self.origin.identity(), origin = %kind, "Shutdown deadline passed during fetch, abandoning it");
            return false;
        };

        metrics::record_origin_request(
            kind.as_str(),
            self.origin.identity().token_suffix(),
            started.elapsed(),
            fetched.is_ok(),
        );

        let message = match fetched {
            Ok(Some(message)) => message,
            Ok(None) => return true,
            Err(e) => {
                bump(&self.stats.fetch_errors);
                tracing::warn!(identity = %self.origin.identity(), origin = %kind, error = %e, "Fetch failed");
                return true;
            }
        };

        bump(&self.stats.fetched);
        self.stats.enter(WorkerPhase::Publish);
        self.publish(message).await;
        true
    }

    async fn publish(&self, message: UpdateMessage) {
        let kind = message.origin.as_str();
        let token = self.origin.identity().token_suffix();
        let publisher = &*self.publisher;
        let queue = self.settings.queue.as_str();

        match self.publish_breaker.call(|| publisher.send(&message, queue)).await {
            Ok(()) => {
                bump(&self.stats.sent);
                metrics::record_message_sent(kind, token);
            }
            Err(e) => {
                bump(&self.stats.publish_errors);
                metrics::record_message_error(kind, token);
                tracing::error!(
                    identity = %self.origin.identity(),
                    chat_id = message.chat_id,
                    breaker_open = e.is_open(),
                    error = %e,
                    "Dropping message after publish failure"
                );
            }
        }
    }
}

/// Resolves once `deadline` fires; never without one.
async fn deadline_passed(deadline: &mut Option<ShutdownListener>) {
    match deadline {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}
