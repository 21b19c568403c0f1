//! Falsification Tests: Category D - Ramp Search (F037-F050)
//!
//! # Toyota Way: Genchi Genbutsu (現地現物)
//! Go and see. Each claim about the search is checked against a simulated
//! target whose breaking point is known in advance.

use std::sync::Arc;
use std::time::Duration;

use cumbre_core::{Outcome, RampConfig, Strategy};
use cumbre_ramp::{
    RampSearchEngine, SearchKind, Target, TerminationReason, levels, target_fn,
};
use cumbre_test::SimulatedTarget;

fn quick(config: RampConfig) -> RampConfig {
    config
        .with_duration(Duration::from_secs(1))
        .with_cooldown(Duration::ZERO)
        .with_thresholds(0.05, Duration::from_secs(2))
}

// =============================================================================
// F037-F041: Capacity Discovery
// =============================================================================

/// F037: Binary search over 1..100 settles near a capacity of 50
///
/// # Falsification Attempt
/// The target fails every request beyond 50 in flight. The best level must
/// not exceed the capacity and must land close to it.
#[tokio::test(start_paused = true)]
async fn f037_binary_search_finds_capacity() {
    let target = SimulatedTarget::with_capacity(50, Duration::from_millis(20)).unwrap();
    let engine = RampSearchEngine::new(target.clone());
    let config = quick(RampConfig::new(1, 100, Strategy::Binary));
    let report = engine.find_max_concurrency(&config).await.unwrap();

    let best = report.best_level().expect("F037 FALSIFIED: no passing level");
    assert!(
        (40..=55).contains(&best),
        "F037 FALSIFIED: best level {best} for capacity 50"
    );
    assert_eq!(best, 50);
    assert_eq!(report.termination_reason, TerminationReason::ThresholdExceeded);
    assert_eq!(report.fallback_level, Some(50));
    assert_eq!(report.trials.last().map(|t| t.level), Some(64));
    assert!(report.trials.iter().all(|t| t.level <= 64));
}

/// F038: Linear search stops at the first failing level
#[tokio::test(start_paused = true)]
async fn f038_linear_stops_at_first_failure() {
    let target = SimulatedTarget::with_capacity(6, Duration::from_millis(20)).unwrap();
    let engine = RampSearchEngine::new(target);
    let config = quick(RampConfig::new(2, 20, Strategy::Linear).with_step(2));
    let report = engine.find_max_concurrency(&config).await.unwrap();

    let tried: Vec<u32> = report.trials.iter().map(|t| t.level).collect();
    assert_eq!(tried, vec![2, 4, 6, 8], "F038 FALSIFIED: tried {tried:?}");
    assert_eq!(report.best_level(), Some(6));
    assert_eq!(report.fallback_level, None);
}

/// F039: A target that never breaks runs every level
#[tokio::test(start_paused = true)]
async fn f039_unbroken_target_reaches_max() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(10))
        .build()
        .unwrap();
    let engine = RampSearchEngine::new(target);
    let config = quick(RampConfig::new(1, 20, Strategy::Exponential).with_step(1));
    let report = engine.find_max_concurrency(&config).await.unwrap();

    let expected = levels(Strategy::Exponential, 1, 20, 1);
    let tried: Vec<u32> = report.trials.iter().map(|t| t.level).collect();
    assert_eq!(tried, expected);
    assert_eq!(report.termination_reason, TerminationReason::MaxLevelReached);
    assert!(!report.interrupted);
    assert!(report.best.is_some());
}

/// F040: Slow responses fail a level even without errors
#[tokio::test(start_paused = true)]
async fn f040_latency_threshold_fails_level() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(300))
        .build()
        .unwrap();
    let engine = RampSearchEngine::new(target);
    let config = quick(RampConfig::new(1, 5, Strategy::Linear))
        .with_thresholds(0.05, Duration::from_millis(100));
    let report = engine.find_max_concurrency(&config).await.unwrap();

    assert_eq!(report.trials.len(), 1);
    assert_eq!(report.trials[0].error_rate, 0.0);
    assert!(report.best.is_none(), "F040 FALSIFIED: slow level accepted");
    assert_eq!(report.termination_reason, TerminationReason::ThresholdExceeded);
}

/// F041: Warm-up trials are run but not reported
#[tokio::test(start_paused = true)]
async fn f041_warmup_not_reported() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(10))
        .build()
        .unwrap();
    let engine = RampSearchEngine::new(target.clone());
    let config = quick(RampConfig::new(1, 2, Strategy::Linear))
        .with_warmup(Duration::from_millis(500));
    let report = engine.find_max_concurrency(&config).await.unwrap();

    assert_eq!(report.trials.len(), 2);
    let reported: u64 = report.trials.iter().map(|t| t.total_requests).sum();
    assert!(
        target.hits() > reported,
        "F041 FALSIFIED: warm-up traffic missing ({} hits, {reported} reported)",
        target.hits()
    );
}

// =============================================================================
// F042-F045: Throughput Search
// =============================================================================

/// F042: A single-level throughput search reports that level as best
#[tokio::test(start_paused = true)]
async fn f042_single_level_tps_passes() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(5))
        .build()
        .unwrap();
    let engine = RampSearchEngine::new(target);
    let config = quick(RampConfig::new(5, 5, Strategy::Linear)).with_duration(Duration::from_secs(2));
    let report = engine.find_max_tps(&config).await.unwrap();

    assert_eq!(report.search, SearchKind::Tps);
    assert_eq!(report.trials.len(), 1);
    assert_eq!(report.trials[0].workers, 10);
    assert_eq!(report.best.as_ref(), Some(&report.trials[0]));
    assert_eq!(report.termination_reason, TerminationReason::MaxLevelReached);
    let tps = report.trials[0].tps;
    assert!(tps > 3.5 && tps <= 5.5, "F042 FALSIFIED: {tps} TPS at 5 permits/s");
}

/// F043: A target that always fails has no best level
#[tokio::test(start_paused = true)]
async fn f043_failing_target_has_no_best() {
    let target: Arc<dyn Target> = target_fn(|_| async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Outcome::task_failure("ServiceUnavailable", "always down")
    });
    let engine = RampSearchEngine::new(target);
    let config = quick(RampConfig::new(5, 5, Strategy::Linear));
    let report = engine.find_max_tps(&config).await.unwrap();

    assert_eq!(report.trials.len(), 1);
    assert!(report.best.is_none(), "F043 FALSIFIED: failing level chosen");
    assert_eq!(report.termination_reason, TerminationReason::ThresholdExceeded);
    assert_eq!(
        report.trials[0].errors_by_kind.keys().collect::<Vec<_>>(),
        vec!["ServiceUnavailable"]
    );
}

/// F044: Throughput search caps the request rate at each level
#[tokio::test(start_paused = true)]
async fn f044_tps_levels_are_rate_limited() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(1))
        .build()
        .unwrap();
    let engine = RampSearchEngine::new(target);
    let config = quick(RampConfig::new(10, 30, Strategy::Linear).with_step(10))
        .with_duration(Duration::from_secs(2));
    let report = engine.find_max_tps(&config).await.unwrap();

    assert_eq!(report.trials.len(), 3);
    for trial in &report.trials {
        let cap = f64::from(trial.level) * 1.1;
        assert!(
            trial.tps <= cap,
            "F044 FALSIFIED: level {} ran at {} TPS",
            trial.level,
            trial.tps
        );
    }
    assert_eq!(report.best_level(), Some(30));
}

/// F045: Invalid configuration fails fast without running trials
#[tokio::test]
async fn f045_invalid_config_fails_fast() {
    let target = SimulatedTarget::builder().build().unwrap();
    let engine = RampSearchEngine::new(target.clone());

    let reversed = RampConfig::new(10, 5, Strategy::Linear);
    assert!(engine.find_max_concurrency(&reversed).await.is_err());
    let zero = RampConfig::new(0, 5, Strategy::Binary);
    assert!(engine.find_max_tps(&zero).await.is_err());

    assert_eq!(target.hits(), 0, "F045 FALSIFIED: trials ran for bad config");
}

// =============================================================================
// F046-F048: Interruption
// =============================================================================

/// F046: Stopping mid-search keeps finished trials and discards the rest
#[tokio::test(start_paused = true)]
async fn f046_stop_returns_partial_report() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(10))
        .build()
        .unwrap();
    let engine = RampSearchEngine::new(target);
    let handle = engine.stop_handle();
    let config = quick(RampConfig::new(1, 100, Strategy::Linear));

    let (report, ()) = tokio::join!(engine.find_max_concurrency(&config), async {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.stop();
    });
    let report = report.unwrap();

    assert!(report.interrupted, "F046 FALSIFIED: report not marked interrupted");
    assert_eq!(report.termination_reason, TerminationReason::Interrupted);
    assert_eq!(report.trials.len(), 2);
    assert_eq!(report.best_level(), Some(2));
}

/// F047: A stopped engine can run a fresh search
#[tokio::test(start_paused = true)]
async fn f047_engine_reusable_after_stop() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(10))
        .build()
        .unwrap();
    let engine = RampSearchEngine::new(target);
    engine.stop_test();

    let config = quick(RampConfig::new(1, 2, Strategy::Linear));
    let report = engine.find_max_concurrency(&config).await.unwrap();

    assert!(!report.interrupted, "F047 FALSIFIED: stale stop leaked into new search");
    assert_eq!(report.trials.len(), 2);
}

/// F048: Stopping during the cooldown ends the search without a new trial
#[tokio::test(start_paused = true)]
async fn f048_stop_during_cooldown() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(10))
        .build()
        .unwrap();
    let engine = RampSearchEngine::new(target);
    let handle = engine.stop_handle();
    let config = quick(RampConfig::new(1, 10, Strategy::Linear)).with_cooldown(Duration::from_secs(30));

    let start = tokio::time::Instant::now();
    let (report, ()) = tokio::join!(engine.find_max_concurrency(&config), async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.stop();
    });
    let report = report.unwrap();

    assert_eq!(report.trials.len(), 1);
    assert!(report.interrupted);
    assert!(
        start.elapsed() < Duration::from_secs(6),
        "F048 FALSIFIED: cooldown ignored the stop"
    );
}

// =============================================================================
// F049-F050: Paths and Reporting
// =============================================================================

/// F049: Weighted paths receive traffic in proportion, unweighted none
#[tokio::test(start_paused = true)]
async fn f049_weighted_paths() {
    let target = SimulatedTarget::builder()
        .latency(Duration::from_millis(5))
        .build()
        .unwrap();
    let engine = RampSearchEngine::new(target.clone());
    let config = quick(RampConfig::new(4, 4, Strategy::Linear))
        .with_duration(Duration::from_secs(5))
        .with_paths(["/search", "/checkout", "/admin"])
        .with_path_weight("/search", 4)
        .with_path_weight("/checkout", 1);
    let report = engine.find_max_concurrency(&config).await.unwrap();

    let hits = target.path_hits();
    assert!(!hits.contains_key("/admin"), "F049 FALSIFIED: unweighted path hit");
    let search = hits["/search"] as f64;
    let checkout = hits["/checkout"] as f64;
    let share = search / (search + checkout);
    assert!((0.75..0.85).contains(&share), "F049 FALSIFIED: /search share {share}");

    let trial = &report.trials[0];
    let per_path: u64 = trial.path_stats.values().map(|s| s.total_requests).sum();
    assert_eq!(per_path, trial.total_requests);
}

/// F050: The report serializes with its search metadata
#[tokio::test(start_paused = true)]
async fn f050_report_json() {
    let target = SimulatedTarget::with_capacity(3, Duration::from_millis(10)).unwrap();
    let engine = RampSearchEngine::new(target);
    let config = quick(RampConfig::new(1, 8, Strategy::Binary));
    let report = engine.find_max_concurrency(&config).await.unwrap();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["test_id"].as_str(), Some(report.test_id.to_string().as_str()));
    assert_eq!(json["termination_reason"], "threshold_exceeded");
    assert_eq!(json["parameters"]["max"], 8);
    assert!(json["trials"].as_array().is_some_and(|t| !t.is_empty()));
    assert!(json["started_at"].as_str().is_some_and(|s| s.ends_with('Z')));
}
