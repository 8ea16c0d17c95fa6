//! Worker and cohort behavior under dependency failures.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use update_relay::lifecycle::Shutdown;
use update_relay::limiter::{MemoryStore, RateLimiter};
use update_relay::worker::{Cohort, PollingWorker, StopReason, WorkerOutcome};

mod common;
use common::{OriginBehavior, OriginTally, RecordingPublisher, ScriptedOrigin};

fn generous() -> update_relay::worker::WorkerSettings {
    common::settings(1000, Duration::from_secs(1))
}

#[tokio::test]
async fn test_fail_open_when_store_unavailable() {
    let store = MemoryStore::new();
    store.set_available(false);
    let tally = Arc::new(OriginTally::default());
    let publisher = Arc::new(RecordingPublisher::default());

    let worker = PollingWorker::new(
        ScriptedOrigin::new(common::identities(1).remove(0), OriginBehavior::Updates, tally.clone()),
        publisher.clone(),
        RateLimiter::new(Arc::new(store)),
        Arc::new(generous()),
    );
    let stats = worker.stats();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(worker.run(shutdown.subscribe()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.trigger();
    assert_eq!(task.await.unwrap(), StopReason::Shutdown);

    let stats = stats.snapshot();
    // Three store failures open the store breaker; each failure admitted a cycle.
    assert_eq!(stats.admitted, 3);
    assert_eq!(tally.fetch_count(), 3);
    assert_eq!(publisher.sent_count(), 3);
    assert!(stats.skipped > 0, "breaker-open cycles should be skipped");
    assert!(tally.is_closed());
}

#[tokio::test]
async fn test_fail_closed_skips_fetch() {
    let store = MemoryStore::new();
    store.set_available(false);
    let tally = Arc::new(OriginTally::default());

    let mut settings = generous();
    settings.fail_open = false;

    let worker = PollingWorker::new(
        ScriptedOrigin::new(common::identities(1).remove(0), OriginBehavior::Updates, tally.clone()),
        Arc::new(RecordingPublisher::default()),
        RateLimiter::new(Arc::new(store)),
        Arc::new(settings),
    );
    let stats = worker.stats();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(worker.run(shutdown.subscribe()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.trigger();
    task.await.unwrap();

    assert_eq!(tally.fetch_count(), 0);
    assert_eq!(stats.snapshot().admitted, 0);
    assert!(stats.snapshot().skipped >= 3);
}

#[tokio::test]
async fn test_publish_failures_are_counted_and_breaker_opens() {
    let tally = Arc::new(OriginTally::default());
    let publisher = Arc::new(RecordingPublisher::failing());
    let mut settings = common::settings(1000, Duration::from_secs(1));
    settings.policy = update_relay::limiter::RateLimitPolicy::new(20, Duration::from_millis(100));

    let worker = PollingWorker::new(
        ScriptedOrigin::new(common::identities(1).remove(0), OriginBehavior::Updates, tally.clone()),
        publisher.clone(),
        RateLimiter::new(Arc::new(MemoryStore::new())),
        Arc::new(settings),
    );
    let stats = worker.stats();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(worker.run(shutdown.subscribe()));

    tokio::time::sleep(Duration::from_millis(250)).await;
    shutdown.trigger();
    task.await.unwrap();

    let stats = stats.snapshot();
    assert!(stats.fetched > 3, "worker should keep polling: {:?}", stats);
    assert_eq!(stats.sent, 0);
    assert_eq!(stats.publish_errors, stats.fetched);
    // After three failures the breaker rejects without calling the publisher.
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_fetch_errors_do_not_stop_worker() {
    let tally = Arc::new(OriginTally::default());
    let mut settings = generous();
    settings.policy = update_relay::limiter::RateLimitPolicy::new(5, Duration::from_millis(100));

    let worker = PollingWorker::new(
        ScriptedOrigin::new(common::identities(1).remove(0), OriginBehavior::Fail, tally.clone()),
        Arc::new(RecordingPublisher::default()),
        RateLimiter::new(Arc::new(MemoryStore::new())),
        Arc::new(settings),
    );
    let stats = worker.stats();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(worker.run(shutdown.subscribe()));

    tokio::time::sleep(Duration::from_millis(250)).await;
    shutdown.trigger();
    task.await.unwrap();

    let stats = stats.snapshot();
    assert!(stats.fetch_errors >= 10, "{:?}", stats);
    assert_eq!(stats.fetched, 0);
    assert!(tally.is_closed());
}

#[tokio::test]
async fn test_shutdown_interrupts_admission_wait() {
    let tally = Arc::new(OriginTally::default());
    let publisher = Arc::new(RecordingPublisher::default());

    let cohort = Cohort::start(
        common::identities(1),
        |identity| ScriptedOrigin::new(identity, OriginBehavior::Updates, tally.clone()),
        publisher.clone(),
        RateLimiter::new(Arc::new(MemoryStore::new())),
        common::settings(1, Duration::from_secs(10)),
        Duration::from_secs(5),
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = Instant::now();
    let report = cohort.stop().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.workers[0].outcome, WorkerOutcome::Completed);
    assert_eq!(tally.fetch_count(), 1);
    assert_eq!(publisher.sent_count(), 1);
    assert!(tally.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crashed_worker_is_isolated() {
    let healthy = Arc::new(OriginTally::default());
    let crashing = Arc::new(OriginTally::default());
    let publisher = Arc::new(RecordingPublisher::default());

    let mut settings = generous();
    settings.policy = update_relay::limiter::RateLimitPolicy::new(20, Duration::from_millis(100));

    let cohort = Cohort::start(
        common::identities(3),
        |identity| {
            if identity.token_suffix() == "0001" {
                ScriptedOrigin::new(identity, OriginBehavior::Panic, crashing.clone())
            } else {
                ScriptedOrigin::new(identity, OriginBehavior::Updates, healthy.clone())
            }
        },
        publisher.clone(),
        RateLimiter::new(Arc::new(MemoryStore::new())),
        settings,
        Duration::from_secs(5),
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cohort.finished(), 1);
    let before = healthy.fetch_count();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(healthy.fetch_count() > before, "healthy workers kept polling");

    let report = cohort.stop().await;
    let crashed: Vec<_> = report.crashed().collect();
    assert_eq!(crashed.len(), 1);
    assert_eq!(crashed[0].identity.token_suffix(), "0001");
    assert!(matches!(&crashed[0].outcome, WorkerOutcome::Crashed(msg) if msg.contains("scripted origin panic")));

    assert_eq!(healthy.closed.load(Ordering::SeqCst), 2);
    assert_eq!(crashing.closed.load(Ordering::SeqCst), 1);
    assert_eq!(report.aborted().count(), 0);
}

#[tokio::test]
async fn test_hung_worker_is_aborted_at_deadline() {
    let tally = Arc::new(OriginTally::default());

    let cohort = Cohort::start(
        common::identities(1),
        |identity| ScriptedOrigin::new(identity, OriginBehavior::Hang, tally.clone()),
        Arc::new(RecordingPublisher::default()),
        RateLimiter::new(Arc::new(MemoryStore::new())),
        generous(),
        Duration::from_millis(100),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    let report = cohort.stop().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.workers[0].outcome, WorkerOutcome::Aborted);
    assert_eq!(report.aborted().count(), 1);
    assert_eq!(tally.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_publish() {
    let tally = Arc::new(OriginTally::default());
    let publisher = Arc::new(RecordingPublisher::slow(Duration::from_millis(500)));

    let cohort = Cohort::start(
        common::identities(1),
        |identity| ScriptedOrigin::new(identity, OriginBehavior::Updates, tally.clone()),
        publisher.clone(),
        RateLimiter::new(Arc::new(MemoryStore::new())),
        generous(),
        Duration::from_millis(100),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = cohort.stop().await;

    assert_eq!(report.workers[0].outcome, WorkerOutcome::Completed);
    assert_eq!(tally.fetch_count(), 1);
    assert_eq!(publisher.sent_count(), 1);
    assert_eq!(tally.closed.load(Ordering::SeqCst), 1);
}
