//! Adaptive concurrency controller.
//!
//! # Toyota Way: Kaizen (改善)
//! Small, continuous corrections: the pool grows or shrinks by one worker per
//! evaluation, driven by the error rate and throughput it actually observes.
//!
//! # Rules
//!
//! Evaluated at most once per `adjustment_interval`, over completions in the
//! last `adjustment_interval`:
//!
//! 1. error rate above threshold: shrink by one
//! 2. throughput below 90% of target: grow by one (after `growth_cooldown`)
//! 3. throughput above 120% of target: shrink by one
//!
//! Rules 2 and 3 only apply when a target is set. The size always stays within
//! `[min_workers, max_workers]`.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, SystemTime};

use cumbre_core::{AdaptiveConfig, EngineError, Result, WindowStats};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Retained resize history.
const HISTORY_LIMIT: usize = 100;

/// Below this fraction of the target the controller grows.
const GROW_BELOW: f64 = 0.9;

/// Above this fraction of the target the controller shrinks.
const SHRINK_ABOVE: f64 = 1.2;

/// Why the controller changed the pool size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// Error rate exceeded the threshold.
    ErrorRate,
    /// Throughput fell short of the target.
    BelowTarget,
    /// Throughput overshot the target.
    AboveTarget,
    /// The size was set explicitly or clamped into bounds.
    Manual,
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorRate => write!(f, "error_rate"),
            Self::BelowTarget => write!(f, "below_target"),
            Self::AboveTarget => write!(f, "above_target"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// One entry of the resize history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    /// Size before the change.
    pub from: usize,
    /// Size after the change.
    pub to: usize,
    /// Trigger.
    pub reason: AdjustmentReason,
    /// Error rate observed at the time.
    pub error_rate: f64,
    /// Throughput observed at the time.
    pub tps: f64,
    /// Wall-clock time of the change.
    pub at: SystemTime,
}

/// Feedback loop deciding the pool size.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    current_workers: usize,
    min_workers: usize,
    max_workers: usize,
    target_tps: Option<f64>,
    error_threshold: f64,
    adjustment_interval: Duration,
    growth_cooldown: Duration,
    last_adjustment: Instant,
    last_growth: Instant,
    history: VecDeque<AdjustmentRecord>,
}

impl ConcurrencyController {
    /// Creates a controller for a pool currently running `current_workers`.
    ///
    /// `pool_max` bounds the controller when the config leaves `max_workers`
    /// unset. The starting size is clamped into `[min_workers, max_workers]`.
    ///
    /// # Errors
    /// Returns a configuration error if the bounds are inconsistent.
    pub fn new(
        config: &AdaptiveConfig,
        pool_max: usize,
        current_workers: usize,
        now: Instant,
    ) -> Result<Self> {
        config.validate()?;
        let max_workers = config.max_workers.unwrap_or(pool_max);
        if max_workers < config.min_workers {
            return Err(EngineError::config(format!(
                "max_workers ({max_workers}) must be >= min_workers ({})",
                config.min_workers
            )));
        }
        Ok(Self {
            current_workers: current_workers.clamp(config.min_workers, max_workers),
            min_workers: config.min_workers,
            max_workers,
            target_tps: config.target_tps,
            error_threshold: config.error_threshold,
            adjustment_interval: config.adjustment_interval,
            growth_cooldown: config.growth_cooldown,
            last_adjustment: now,
            last_growth: now,
            history: VecDeque::new(),
        })
    }

    /// Current target size.
    #[must_use]
    pub const fn current_workers(&self) -> usize {
        self.current_workers
    }

    /// Lower bound.
    #[must_use]
    pub const fn min_workers(&self) -> usize {
        self.min_workers
    }

    /// Upper bound.
    #[must_use]
    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Span of completions each evaluation looks at.
    #[must_use]
    pub const fn window_span(&self) -> Duration {
        self.adjustment_interval
    }

    /// Returns true once `adjustment_interval` has passed since the last
    /// evaluation.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_adjustment) >= self.adjustment_interval
    }

    /// Resize history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<AdjustmentRecord> {
        self.history.iter().cloned().collect()
    }

    /// Evaluates the rules against `window` and returns the new size if it
    /// changed. Does nothing before the interval has elapsed.
    pub fn evaluate(&mut self, now: Instant, window: &WindowStats) -> Option<usize> {
        if !self.is_due(now) {
            return None;
        }
        self.last_adjustment = now;

        let current = self.current_workers;
        let (next, reason) = if window.error_rate > self.error_threshold {
            (
                current.saturating_sub(1).max(self.min_workers),
                AdjustmentReason::ErrorRate,
            )
        } else if let Some(target) = self.target_tps {
            if window.tps < GROW_BELOW * target
                && current < self.max_workers
                && now.saturating_duration_since(self.last_growth) >= self.growth_cooldown
            {
                (current + 1, AdjustmentReason::BelowTarget)
            } else if window.tps > SHRINK_ABOVE * target {
                (
                    current.saturating_sub(1).max(self.min_workers),
                    AdjustmentReason::AboveTarget,
                )
            } else {
                (current, AdjustmentReason::Manual)
            }
        } else {
            (current, AdjustmentReason::Manual)
        };

        if next == current {
            return None;
        }
        if next > current {
            self.last_growth = now;
        }
        tracing::info!(
            from = current,
            to = next,
            %reason,
            error_rate = window.error_rate,
            tps = window.tps,
            "adaptive concurrency adjustment"
        );
        self.apply(next, reason, window.error_rate, window.tps);
        Some(next)
    }

    /// Records an externally requested size, clamped into bounds. Returns the
    /// size actually applied.
    pub fn set_workers(&mut self, workers: usize) -> usize {
        let next = workers.clamp(self.min_workers, self.max_workers);
        if next != self.current_workers {
            self.apply(next, AdjustmentReason::Manual, 0.0, 0.0);
        }
        next
    }

    fn apply(&mut self, next: usize, reason: AdjustmentReason, error_rate: f64, tps: f64) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(AdjustmentRecord {
            from: self.current_workers,
            to: next,
            reason,
            error_rate,
            tps,
            at: SystemTime::now(),
        });
        self.current_workers = next;
    }
}
