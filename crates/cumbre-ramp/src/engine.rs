//! Ramp search driver.
//!
//! # Toyota Way: Genchi Genbutsu (現地現物)
//! Capacity is measured, not guessed: each level runs against the real target
//! and the search stops at the first level that breaks a threshold.

use std::sync::Arc;
use std::time::SystemTime;

use cumbre_core::{RampConfig, Result, Strategy};
use tokio::sync::watch;
use uuid::Uuid;

use crate::report::{
    RampReport, SearchKind, SearchParameters, TerminationReason, TrialResult, select_best,
};
use crate::strategy::levels;
use crate::target::Target;
use crate::trial::{PathSelector, TrialPlan, run_trial};

/// Cooperative cancellation for a running search.
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self {
            flag: Arc::new(watch::channel(false).0),
        }
    }
}

impl StopHandle {
    /// Requests the search to stop.
    pub fn stop(&self) {
        self.flag.send_replace(true);
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.flag.borrow()
    }

    /// Completes once a stop is requested.
    pub async fn stopped(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    fn reset(&self) {
        self.flag.send_replace(false);
    }
}

/// Finds the highest concurrency or throughput a target sustains.
pub struct RampSearchEngine {
    target: Arc<dyn Target>,
    stop: StopHandle,
}

impl RampSearchEngine {
    /// Creates an engine driving `target`.
    #[must_use]
    pub fn new(target: Arc<dyn Target>) -> Self {
        Self {
            target,
            stop: StopHandle::default(),
        }
    }

    /// Handle that stops the current search from another task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stops the current search after the level in progress is discarded.
    pub fn stop_test(&self) {
        tracing::info!("ramp search stop requested");
        self.stop.stop();
    }

    /// Ramps the number of concurrent workers.
    ///
    /// # Errors
    /// Returns a configuration error for invalid parameters. Failures during
    /// the search produce an interrupted report instead.
    pub async fn find_max_concurrency(&self, config: &RampConfig) -> Result<RampReport> {
        self.search(SearchKind::Concurrency, config).await
    }

    /// Ramps the permitted request rate, with twice as many workers as
    /// permits per second.
    ///
    /// # Errors
    /// Returns a configuration error for invalid parameters. Failures during
    /// the search produce an interrupted report instead.
    pub async fn find_max_tps(&self, config: &RampConfig) -> Result<RampReport> {
        self.search(SearchKind::Tps, config).await
    }

    async fn search(&self, kind: SearchKind, config: &RampConfig) -> Result<RampReport> {
        config.validate()?;
        let selector = PathSelector::new(config)?;
        let sequence = levels(config.strategy, config.start, config.max, config.step);
        let rt_threshold_ms = config.response_time_threshold_ms();

        self.stop.reset();
        let test_id = Uuid::new_v4();
        let started_at = now_rfc3339();
        tracing::info!(
            %test_id,
            search = %kind,
            strategy = %config.strategy,
            levels = ?sequence,
            "ramp search started"
        );

        let mut trials: Vec<TrialResult> = Vec::new();
        let mut termination = TerminationReason::MaxLevelReached;
        let mut fallback_level = None;
        let mut error = None;

        for (i, &level) in sequence.iter().enumerate() {
            if i > 0 && !self.pause(config).await {
                termination = TerminationReason::Interrupted;
                break;
            }

            if let Some(warmup) = config.warmup {
                let plan = TrialPlan {
                    kind,
                    level,
                    duration: warmup,
                };
                tracing::debug!(level, "warm-up trial");
                match run_trial(&self.target, &selector, config, plan, &self.stop).await {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        termination = TerminationReason::Interrupted;
                        break;
                    }
                    Err(e) => {
                        tracing::error!(level, error = %e, "warm-up trial failed");
                        error = Some(e.to_string());
                        termination = TerminationReason::Interrupted;
                        break;
                    }
                }
            }

            tracing::info!(level, search = %kind, "trial started");
            let plan = TrialPlan {
                kind,
                level,
                duration: config.duration_per_step,
            };
            let trial = match run_trial(&self.target, &selector, config, plan, &self.stop).await {
                Ok(Some(trial)) => trial,
                Ok(None) => {
                    termination = TerminationReason::Interrupted;
                    break;
                }
                Err(e) => {
                    tracing::error!(level, error = %e, "trial failed");
                    error = Some(e.to_string());
                    termination = TerminationReason::Interrupted;
                    break;
                }
            };

            tracing::info!(
                level,
                tps = trial.tps,
                error_rate = trial.error_rate,
                avg_latency_ms = trial.avg_latency_ms,
                p95_latency_ms = trial.p95_latency_ms,
                "trial finished"
            );
            let passed = trial.passes(config.error_threshold, rt_threshold_ms);
            trials.push(trial);

            if !passed {
                tracing::warn!(
                    level,
                    error_threshold = config.error_threshold,
                    response_time_threshold_ms = rt_threshold_ms,
                    "threshold exceeded"
                );
                if config.strategy == Strategy::Binary && trials.len() > 1 {
                    fallback_level = trials.get(trials.len() - 2).map(|t| t.level);
                }
                termination = TerminationReason::ThresholdExceeded;
                break;
            }
        }

        let best = select_best(&trials, config.error_threshold, rt_threshold_ms);
        let interrupted = termination == TerminationReason::Interrupted;
        tracing::info!(
            %test_id,
            reason = %termination,
            trials = trials.len(),
            best_level = ?best.as_ref().map(|t| t.level),
            "ramp search finished"
        );

        Ok(RampReport {
            test_id,
            search: kind,
            strategy: config.strategy,
            parameters: SearchParameters::from(config),
            trials,
            best,
            fallback_level,
            termination_reason: termination,
            interrupted,
            error,
            started_at,
            finished_at: now_rfc3339(),
        })
    }

    /// Cooldown between levels. Returns false if a stop arrived meanwhile.
    async fn pause(&self, config: &RampConfig) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        if config.cooldown.is_zero() {
            return true;
        }
        tokio::select! {
            () = self.stop.stopped() => false,
            () = tokio::time::sleep(config.cooldown) => true,
        }
    }
}

fn now_rfc3339() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}
