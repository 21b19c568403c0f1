//! Falsification Tests: Category C - Adaptive Concurrency (F027-F036)
//!
//! # Toyota Way: Kaizen (改善)
//! Small, continuous adjustments. The controller moves one worker at a time
//! and never leaves its bounds.

use std::time::Duration;

use cumbre_core::{AdaptiveConfig, PoolConfig, WindowStats};
use cumbre_pool::{AdjustmentReason, ConcurrencyController, WorkerPool};
use cumbre_test::SimulatedTarget;
use proptest::prelude::*;
use tokio::time::Instant;

fn window(error_rate: f64, tps: f64) -> WindowStats {
    WindowStats {
        span: Duration::from_secs(2),
        completed: 100,
        errors: (error_rate * 100.0) as u64,
        error_rate,
        tps,
    }
}

fn controller(config: &AdaptiveConfig, current: usize, now: Instant) -> ConcurrencyController {
    ConcurrencyController::new(config, 100, current, now).unwrap()
}

// =============================================================================
// F027-F030: Error-Driven Shrinking
// =============================================================================

/// F027: A pool seeing 20% failures shrinks within one interval
///
/// # Falsification Attempt
/// Start at 8 workers with a 5% error threshold and a target of 10 TPS; every
/// fifth request fails. After one adjustment interval the pool must be smaller.
#[tokio::test(start_paused = true)]
async fn f027_error_rate_shrinks_pool() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(10))
        .fail_every(5)
        .build()
        .unwrap();
    let pool = WorkerPool::new(PoolConfig::with_workers(8)).unwrap();
    pool.enable_adaptive(
        &AdaptiveConfig::targeting(10.0, 2, 10)
            .with_error_threshold(0.05)
            .with_interval(Duration::from_millis(500)),
    )
    .unwrap();
    assert_eq!(pool.current_workers(), 8);

    let deadline = Instant::now() + Duration::from_millis(700);
    while Instant::now() < deadline {
        pool.wait_below(16).await;
        pool.submit(target.work()).unwrap();
    }
    pool.shutdown(false).await;
    pool.wait_completion().await;

    let stats = pool.stats();
    assert!(
        stats.current_workers < 8,
        "F027 FALSIFIED: still {} workers at 20% errors",
        stats.current_workers
    );
    assert!(stats.current_workers >= 2);
    assert!(
        stats
            .adjustments
            .iter()
            .all(|a| a.reason == AdjustmentReason::ErrorRate)
    );
}

/// F028: Error shrinking stops at the floor
#[test]
fn f028_error_shrink_floor() {
    let config = AdaptiveConfig::targeting(10.0, 3, 10).with_interval(Duration::from_secs(1));
    let mut now = Instant::now();
    let mut ctrl = controller(&config, 5, now);
    for _ in 0..10 {
        now += Duration::from_secs(1);
        ctrl.evaluate(now, &window(0.5, 10.0));
    }
    assert_eq!(
        ctrl.current_workers(),
        3,
        "F028 FALSIFIED: shrank below min_workers"
    );
}

/// F029: Nothing changes before the interval elapses
#[test]
fn f029_no_adjustment_before_interval() {
    let config = AdaptiveConfig::targeting(10.0, 1, 10).with_interval(Duration::from_secs(2));
    let now = Instant::now();
    let mut ctrl = controller(&config, 5, now);
    assert_eq!(ctrl.evaluate(now + Duration::from_millis(1999), &window(0.9, 0.0)), None);
    assert_eq!(ctrl.current_workers(), 5);
    assert!(ctrl.history().is_empty());
}

/// F030: Errors take priority over a throughput shortfall
#[test]
fn f030_errors_beat_growth() {
    let config = AdaptiveConfig::targeting(100.0, 1, 10)
        .with_interval(Duration::from_secs(1))
        .with_growth_cooldown(Duration::ZERO);
    let now = Instant::now();
    let mut ctrl = controller(&config, 5, now);
    assert_eq!(ctrl.evaluate(now + Duration::from_secs(1), &window(0.2, 1.0)), Some(4));
    assert_eq!(ctrl.history()[0].reason, AdjustmentReason::ErrorRate);
}

// =============================================================================
// F031-F034: Throughput Tracking
// =============================================================================

/// F031: Growth below target waits for the cooldown
#[test]
fn f031_growth_respects_cooldown() {
    let config = AdaptiveConfig::targeting(100.0, 1, 10)
        .with_interval(Duration::from_secs(1))
        .with_growth_cooldown(Duration::from_secs(10));
    let start = Instant::now();
    let mut ctrl = controller(&config, 2, start);

    let mut grown_at = Vec::new();
    for s in 1..=25 {
        let now = start + Duration::from_secs(s);
        if ctrl.evaluate(now, &window(0.0, 10.0)).is_some() {
            grown_at.push(s);
        }
    }
    assert_eq!(grown_at, vec![10, 20], "F031 FALSIFIED: grew at {grown_at:?}");
    assert_eq!(ctrl.current_workers(), 4);
}

/// F032: Overshooting the target by more than 20% shrinks
#[test]
fn f032_overshoot_shrinks() {
    let config = AdaptiveConfig::targeting(100.0, 1, 10).with_interval(Duration::from_secs(1));
    let now = Instant::now();
    let mut ctrl = controller(&config, 5, now);
    assert_eq!(ctrl.evaluate(now + Duration::from_secs(1), &window(0.0, 121.0)), Some(4));
    assert_eq!(ctrl.history()[0].reason, AdjustmentReason::AboveTarget);
}

/// F033: Throughput within [0.9, 1.2] of target holds steady
#[test]
fn f033_band_holds() {
    let config = AdaptiveConfig::targeting(100.0, 1, 10)
        .with_interval(Duration::from_secs(1))
        .with_growth_cooldown(Duration::ZERO);
    let start = Instant::now();
    let mut ctrl = controller(&config, 5, start);
    for (s, tps) in [(1, 91.0), (2, 100.0), (3, 119.0)] {
        assert_eq!(ctrl.evaluate(start + Duration::from_secs(s), &window(0.0, tps)), None);
    }
    assert_eq!(ctrl.current_workers(), 5);
}

/// F034: Manual resizing of an adaptive pool is clamped to the bounds
#[tokio::test]
async fn f034_manual_resize_clamped() {
    let pool = WorkerPool::new(PoolConfig::with_workers(20)).unwrap();
    pool.enable_adaptive(&AdaptiveConfig::targeting(50.0, 2, 6)).unwrap();
    assert_eq!(pool.current_workers(), 6);
    assert_eq!(pool.set_workers(50).unwrap(), 6);
    assert_eq!(pool.set_workers(1).unwrap(), 2);

    pool.disable_adaptive();
    assert_eq!(pool.set_workers(12).unwrap(), 12);
    pool.shutdown(true).await;
}

// =============================================================================
// F035-F036: Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// F035: Any sequence of windows keeps the size within bounds
    #[test]
    fn f035_size_stays_in_bounds(
        min in 1usize..5,
        extra in 0usize..10,
        start in 1usize..20,
        windows in prop::collection::vec((0.0f64..1.0, 0.0f64..300.0), 1..60),
    ) {
        let max = min + extra;
        let config = AdaptiveConfig::targeting(100.0, min, max)
            .with_interval(Duration::from_secs(1))
            .with_growth_cooldown(Duration::from_secs(2));
        let origin = Instant::now();
        let mut ctrl = controller(&config, start, origin);
        prop_assert!((min..=max).contains(&ctrl.current_workers()));

        for (i, (error_rate, tps)) in windows.into_iter().enumerate() {
            let before = ctrl.current_workers();
            let now = origin + Duration::from_secs(i as u64 + 1);
            ctrl.evaluate(now, &window(error_rate, tps));
            let after = ctrl.current_workers();
            prop_assert!((min..=max).contains(&after));
            prop_assert!(before.abs_diff(after) <= 1);
        }
    }

    /// F036: History records every change and never exceeds its bound
    #[test]
    fn f036_history_matches_changes(rates in prop::collection::vec(0.0f64..1.0, 1..200)) {
        let config = AdaptiveConfig::targeting(100.0, 1, 50)
            .with_error_threshold(0.5)
            .with_interval(Duration::from_secs(1))
            .with_growth_cooldown(Duration::ZERO);
        let origin = Instant::now();
        let mut ctrl = controller(&config, 25, origin);
        let mut changes = 0usize;
        for (i, rate) in rates.iter().enumerate() {
            let now = origin + Duration::from_secs(i as u64 + 1);
            if ctrl.evaluate(now, &window(*rate, 50.0)).is_some() {
                changes += 1;
            }
        }
        let history = ctrl.history();
        prop_assert_eq!(history.len(), changes.min(100));
        for pair in history.windows(2) {
            prop_assert_eq!(pair[0].to, pair[1].from);
        }
    }
}
