//! Worker cohort: one supervised task per identity.
//!
//! # Responsibilities
//! - Spawn a polling worker per identity, all contending on one quota key
//! - Log and count worker crashes without disturbing the others
//! - Stop every worker on request. Past the deadline, an in-flight fetch is
//!   abandoned cooperatively so the origin client still closes; an in-flight
//!   publish is waited for. Tasks still running after a further grace period
//!   are aborted.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

use crate::lifecycle::Shutdown;
use crate::limiter::{AdmissionStore, RateLimiter};
use crate::observability::metrics;
use crate::origin::{OriginClient, OriginKind, WorkerIdentity};
use crate::publisher::Publisher;
use crate::worker::polling::{
    PollingWorker, StopReason, WorkerPhase, WorkerSettings, WorkerStats, WorkerStatsSnapshot,
};

/// Time a worker gets to tear down after the deadline fired, unless it is
/// publishing.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// How a worker task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Tore down after the shutdown signal (or a failed open).
    Completed,
    /// Panicked; carries the panic message.
    Crashed(String),
    /// Cut off at the shutdown deadline.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub identity: WorkerIdentity,
    pub origin: OriginKind,
    pub stats: WorkerStatsSnapshot,
    pub outcome: WorkerOutcome,
}

/// Outcome of [`CohortHandle::stop`].
#[derive(Debug, Clone, Default)]
pub struct CohortReport {
    pub workers: Vec<WorkerReport>,
}

impl CohortReport {
    pub fn crashed(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers
            .iter()
            .filter(|w| matches!(w.outcome, WorkerOutcome::Crashed(_)))
    }

    pub fn aborted(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers
            .iter()
            .filter(|w| w.outcome == WorkerOutcome::Aborted)
    }

    /// Sum of every worker's counters.
    pub fn totals(&self) -> WorkerStatsSnapshot {
        self.workers
            .iter()
            .fold(WorkerStatsSnapshot::default(), |acc, w| WorkerStatsSnapshot {
                admitted: acc.admitted + w.stats.admitted,
                skipped: acc.skipped + w.stats.skipped,
                fetched: acc.fetched + w.stats.fetched,
                fetch_errors: acc.fetch_errors + w.stats.fetch_errors,
                sent: acc.sent + w.stats.sent,
                publish_errors: acc.publish_errors + w.stats.publish_errors,
            })
    }
}

struct WorkerHandle {
    identity: WorkerIdentity,
    origin: OriginKind,
    stats: Arc<WorkerStats>,
    worker: AbortHandle,
    supervisor: JoinHandle<WorkerOutcome>,
}

/// Starts cohorts of polling workers.
pub struct Cohort;

impl Cohort {
    /// Spawn one worker per identity. `make_origin` builds each worker's client.
    pub fn start<O, P, S, F>(
        identities: Vec<WorkerIdentity>,
        mut make_origin: F,
        publisher: Arc<P>,
        limiter: RateLimiter<S>,
        settings: WorkerSettings,
        shutdown_timeout: Duration,
    ) -> CohortHandle
    where
        O: OriginClient,
        P: Publisher,
        S: AdmissionStore,
        F: FnMut(WorkerIdentity) -> O,
    {
        let shutdown = Shutdown::new();
        let deadline = Shutdown::new();
        let settings = Arc::new(settings);

        let workers = identities
            .into_iter()
            .map(|identity| {
                let origin = make_origin(identity.clone());
                let kind = origin.kind();
                let worker = PollingWorker::new(origin, publisher.clone(), limiter.clone(), settings.clone());
                let stats = worker.stats();

                let task = tokio::spawn(worker.run_until(shutdown.subscribe(), Some(deadline.subscribe())));
                let abort = task.abort_handle();
                let supervisor = tokio::spawn(supervise(task, identity.clone(), kind));

                WorkerHandle {
                    identity,
                    origin: kind,
                    stats,
                    worker: abort,
                    supervisor,
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = workers.len(), key = %settings.key, "Cohort started");

        CohortHandle {
            shutdown,
            deadline,
            workers,
            shutdown_timeout,
        }
    }
}

async fn supervise(
    task: JoinHandle<StopReason>,
    identity: WorkerIdentity,
    origin: OriginKind,
) -> WorkerOutcome {
    match task.await {
        Ok(StopReason::Deadline) => WorkerOutcome::Aborted,
        Ok(StopReason::Shutdown | StopReason::OpenFailed) => WorkerOutcome::Completed,
        Err(e) if e.is_panic() => {
            let reason = panic_message(e.into_panic());
            tracing::error!(identity = %identity, origin = %origin, panic = %reason, "Worker crashed, not restarting");
            metrics::record_worker_crash(origin.as_str());
            WorkerOutcome::Crashed(reason)
        }
        Err(_) => WorkerOutcome::Aborted,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Wait out a worker that missed the deadline. Publishing workers are given
/// as long as their publish takes; anything else is aborted after the grace.
async fn stop_late_worker(handle: &mut WorkerHandle, grace: Duration) -> WorkerOutcome {
    loop {
        match tokio::time::timeout(grace, &mut handle.supervisor).await {
            Ok(joined) => return joined.unwrap_or(WorkerOutcome::Aborted),
            Err(_) if handle.stats.phase() == WorkerPhase::Publish => {
                tracing::warn!(identity = %handle.identity, "Waiting for in-flight publish");
            }
            Err(_) => {
                tracing::warn!(
                    identity = %handle.identity,
                    phase = ?handle.stats.phase(),
                    "Worker did not stop after the deadline, aborting"
                );
                handle.worker.abort();
                // The worker is cancelled; this only collects the supervisor.
                let _ = (&mut handle.supervisor).await;
                return WorkerOutcome::Aborted;
            }
        }
    }
}

/// Running cohort.
pub struct CohortHandle {
    shutdown: Shutdown,
    /// Fired once the shutdown timeout has elapsed.
    deadline: Shutdown,
    workers: Vec<WorkerHandle>,
    shutdown_timeout: Duration,
}

impl CohortHandle {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Current counters of every worker.
    pub fn stats(&self) -> Vec<(WorkerIdentity, WorkerStatsSnapshot)> {
        self.workers
            .iter()
            .map(|w| (w.identity.clone(), w.stats.snapshot()))
            .collect()
    }

    /// Workers whose task has already ended (crashed or failed to open).
    pub fn finished(&self) -> usize {
        self.workers.iter().filter(|w| w.supervisor.is_finished()).count()
    }

    /// Signal shutdown and wait for every worker to tear down.
    pub async fn stop(self) -> CohortReport {
        tracing::info!(workers = self.workers.len(), timeout = ?self.shutdown_timeout, "Stopping cohort");
        self.shutdown.trigger();

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut reports = Vec::with_capacity(self.workers.len());

        for mut handle in self.workers {
            let outcome = match tokio::time::timeout_at(deadline, &mut handle.supervisor).await {
                Ok(joined) => joined.unwrap_or(WorkerOutcome::Aborted),
                Err(_) => {
                    tracing::warn!(
                        identity = %handle.identity,
                        phase = ?handle.stats.phase(),
                        "Worker missed shutdown deadline"
                    );
                    self.deadline.trigger();
                    stop_late_worker(&mut handle, STOP_GRACE).await
                }
            };

            reports.push(WorkerReport {
                identity: handle.identity,
                origin: handle.origin,
                stats: handle.stats.snapshot(),
                outcome,
            });
        }

        let report = CohortReport { workers: reports };
        tracing::info!(
            crashed = report.crashed().count(),
            aborted = report.aborted().count(),
            totals = ?report.totals(),
            "Cohort stopped"
        );
        report
    }
}
