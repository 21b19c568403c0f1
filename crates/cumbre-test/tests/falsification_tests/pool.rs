//! Falsification Tests: Category B - Worker Pool (F013-F026)
//!
//! # Toyota Way: Jidoka (自働化)
//! One defective item must not stop the line. A panic or a hung request is
//! recorded as a failure and the workers keep going.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cumbre_core::{FailureKind, Outcome, PoolConfig, work_fn};
use cumbre_limiter::RateLimiter;
use cumbre_pool::WorkerPool;
use cumbre_test::{ChaosConfig, SimulatedTarget};

fn sleeper(latency: Duration) -> Arc<dyn cumbre_core::WorkItem> {
    work_fn(move || async move {
        tokio::time::sleep(latency).await;
        Outcome::Success
    })
}

// =============================================================================
// F013-F016: Parallelism
// =============================================================================

/// F013: Four workers run twenty 100ms items in about five rounds
///
/// # Falsification Attempt
/// Real time. Serial execution would take 2s; unbounded parallelism 100ms.
#[tokio::test]
async fn f013_bounded_parallelism_real_time() {
    let pool = WorkerPool::new(PoolConfig::with_workers(4)).unwrap();
    let start = std::time::Instant::now();
    for _ in 0..20 {
        pool.submit(sleeper(Duration::from_millis(100))).unwrap();
    }
    let records = pool.wait_completion().await;
    let elapsed = start.elapsed();

    assert_eq!(records.len(), 20);
    assert!(records.iter().all(cumbre_core::ExecutionRecord::is_success));
    assert!(
        elapsed >= Duration::from_millis(450) && elapsed <= Duration::from_millis(700),
        "F013 FALSIFIED: 20 x 100ms on 4 workers took {elapsed:?}"
    );
}

/// F014: Concurrency never exceeds the worker count
#[tokio::test(start_paused = true)]
async fn f014_concurrency_bounded_by_workers() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(25))
        .build()
        .unwrap();
    let pool = WorkerPool::new(PoolConfig::with_workers(6)).unwrap();
    for _ in 0..120 {
        pool.submit(target.work()).unwrap();
    }
    pool.wait_completion().await;

    assert_eq!(target.hits(), 120);
    assert_eq!(
        target.peak_in_flight(),
        6,
        "F014 FALSIFIED: peak concurrency {}",
        target.peak_in_flight()
    );
}

/// F015: Every submission gets a distinct task id and exactly one record
#[tokio::test(start_paused = true)]
async fn f015_one_record_per_submission() {
    let pool = WorkerPool::new(PoolConfig::with_workers(3)).unwrap();
    let mut ids = HashSet::new();
    for _ in 0..50 {
        assert!(ids.insert(pool.submit(sleeper(Duration::from_millis(5))).unwrap()));
    }
    let records = pool.wait_completion().await;
    let recorded: HashSet<_> = records.iter().map(|r| r.task_id).collect();

    assert_eq!(records.len(), 50);
    assert_eq!(recorded, ids, "F015 FALSIFIED: records do not match submissions");
}

/// F016: Shrinking the pool keeps already queued work
#[tokio::test(start_paused = true)]
async fn f016_resize_keeps_queue() {
    let pool = WorkerPool::new(PoolConfig::with_workers(8)).unwrap();
    for _ in 0..40 {
        pool.submit(sleeper(Duration::from_millis(10))).unwrap();
    }
    assert_eq!(pool.set_workers(2).unwrap(), 2);
    let records = pool.wait_completion().await;

    assert_eq!(records.len(), 40, "F016 FALSIFIED: queued work lost on resize");
    assert_eq!(pool.current_workers(), 2);
}

// =============================================================================
// F017-F020: Fault Isolation
// =============================================================================

/// F017: A panicking item is recorded as `Panicked` and the pool survives
#[tokio::test(start_paused = true)]
async fn f017_panic_isolated() {
    let target = SimulatedTarget::builder()
        .chaos(ChaosConfig::panics(1.0))
        .build()
        .unwrap();
    let pool = WorkerPool::new(PoolConfig::with_workers(2)).unwrap();
    pool.submit(target.work()).unwrap();
    pool.submit(sleeper(Duration::from_millis(1))).unwrap();
    let records = pool.wait_completion().await;

    assert_eq!(records.len(), 2);
    let panicked = records
        .iter()
        .filter(|r| r.outcome.failure_kind() == Some(&FailureKind::Panicked))
        .count();
    assert_eq!(panicked, 1, "F017 FALSIFIED: panic not classified");
    assert_eq!(records.iter().filter(|r| r.is_success()).count(), 1);
}

/// F018: An item exceeding the task timeout is recorded as `TaskTimeout`
#[tokio::test(start_paused = true)]
async fn f018_task_timeout_enforced() {
    let config = PoolConfig {
        task_timeout: Some(Duration::from_millis(50)),
        ..PoolConfig::with_workers(1)
    };
    let pool = WorkerPool::new(config).unwrap();
    pool.submit(sleeper(Duration::from_secs(60))).unwrap();
    pool.submit(sleeper(Duration::from_millis(10))).unwrap();

    let start = tokio::time::Instant::now();
    let records = pool.wait_completion().await;

    assert!(start.elapsed() < Duration::from_secs(1), "F018 FALSIFIED: hung item blocked the worker");
    assert_eq!(
        records[0].outcome.failure_kind(),
        Some(&FailureKind::TaskTimeout)
    );
    assert!(records[1].is_success());
}

/// F019: Failures are grouped by kind in the metrics
#[tokio::test(start_paused = true)]
async fn f019_failures_grouped_by_kind() {
    let target = SimulatedTarget::builder().fail_every(4).build().unwrap();
    let pool = WorkerPool::new(PoolConfig::with_workers(1)).unwrap();
    for _ in 0..20 {
        pool.submit(target.work()).unwrap();
    }
    pool.wait_completion().await;

    let metrics = pool.stats().metrics;
    assert_eq!(metrics.total_requests, 20);
    assert_eq!(metrics.error_count, 5);
    assert!((metrics.error_rate - 0.25).abs() < 1e-9);
    assert_eq!(metrics.errors_by_kind.get("InjectedFailure"), Some(&5));
}

/// F020: Labels produce a per-label breakdown
#[tokio::test(start_paused = true)]
async fn f020_label_breakdown() {
    let pool = WorkerPool::new(PoolConfig::with_workers(2)).unwrap();
    for i in 0..30 {
        let label = if i % 3 == 0 { "/write" } else { "/read" };
        pool.submit_labeled(label, sleeper(Duration::from_millis(5)))
            .unwrap();
    }
    pool.wait_completion().await;

    let labels = pool.aggregator().label_stats(Duration::from_secs(1));
    assert_eq!(labels["/write"].total_requests, 10);
    assert_eq!(labels["/read"].total_requests, 20);
}

// =============================================================================
// F021-F023: Rate-Limited Pools
// =============================================================================

/// F021: A rate-limited pool runs no faster than its limiter
#[tokio::test(start_paused = true)]
async fn f021_pool_obeys_limiter() {
    let limiter = Arc::new(RateLimiter::fixed(10, Duration::from_secs(1)).unwrap());
    let pool = WorkerPool::builder(PoolConfig::with_workers(8))
        .limiter(limiter)
        .build()
        .unwrap();
    let start = tokio::time::Instant::now();
    for _ in 0..21 {
        pool.submit(sleeper(Duration::from_millis(1))).unwrap();
    }
    pool.wait_completion().await;

    assert!(
        start.elapsed() >= Duration::from_secs(2),
        "F021 FALSIFIED: 21 permits at 10/s in {:?}",
        start.elapsed()
    );
    assert!(pool.stats().rate_limited);
}

/// F022: Permit timeouts are rejections, not errors
#[tokio::test(start_paused = true)]
async fn f022_permit_timeout_is_rejection() {
    let limiter = Arc::new(RateLimiter::fixed(1, Duration::from_secs(5)).unwrap());
    let config = PoolConfig {
        rate_wait_timeout: Some(Duration::from_millis(100)),
        ..PoolConfig::with_workers(4)
    };
    let pool = WorkerPool::builder(config).limiter(limiter).build().unwrap();
    for _ in 0..4 {
        pool.submit(sleeper(Duration::from_millis(1))).unwrap();
    }
    let records = pool.wait_completion().await;

    let rejected = records.iter().filter(|r| r.is_rejection()).count();
    assert_eq!(rejected, 3, "F022 FALSIFIED: {rejected} rejections");
    let metrics = pool.stats().metrics;
    assert_eq!(metrics.rejected_count, 3);
    assert_eq!(metrics.error_count, 0);
    assert_eq!(metrics.total_requests, 1);
}

// =============================================================================
// F023-F026: Shutdown
// =============================================================================

/// F023: Submitting after shutdown fails
#[tokio::test]
async fn f023_submit_after_shutdown_fails() {
    let pool = WorkerPool::new(PoolConfig::with_workers(1)).unwrap();
    pool.shutdown(true).await;
    assert!(pool.is_closed());
    assert!(
        pool.submit(sleeper(Duration::ZERO)).is_err(),
        "F023 FALSIFIED: closed pool accepted work"
    );
}

/// F024: A draining shutdown runs everything already queued
#[tokio::test(start_paused = true)]
async fn f024_drain_runs_queue() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(10))
        .build()
        .unwrap();
    let pool = WorkerPool::new(PoolConfig::with_workers(2)).unwrap();
    for _ in 0..10 {
        pool.submit(target.work()).unwrap();
    }
    pool.shutdown(true).await;

    assert_eq!(target.hits(), 10, "F024 FALSIFIED: drain skipped queued work");
    assert_eq!(pool.pending(), 0);
}

/// F025: A non-draining shutdown discards the queue but lets running items finish
#[tokio::test(start_paused = true)]
async fn f025_no_drain_discards_queue() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(100))
        .build()
        .unwrap();
    let pool = WorkerPool::new(PoolConfig::with_workers(2)).unwrap();
    for _ in 0..10 {
        pool.submit(target.work()).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    pool.shutdown(false).await;
    let records = pool.wait_completion().await;

    assert_eq!(target.hits(), 2, "F025 FALSIFIED: queued work ran after shutdown");
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(cumbre_core::ExecutionRecord::is_success));
    assert_eq!(pool.pending(), 0);
}

/// F026: Dropping a pool does not hang the runtime
#[tokio::test(start_paused = true)]
async fn f026_drop_releases_workers() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_secs(1))
        .build()
        .unwrap();
    {
        let pool = WorkerPool::new(PoolConfig::with_workers(4)).unwrap();
        for _ in 0..100 {
            pool.submit(target.work()).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(
        target.hits() <= 4,
        "F026 FALSIFIED: dropped pool kept running ({} hits)",
        target.hits()
    );
}
