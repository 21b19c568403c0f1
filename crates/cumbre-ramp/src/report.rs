//! Trial results and ramp reports.

use std::collections::BTreeMap;
use std::fmt;

use cumbre_core::{LabelStats, RampConfig, Result, Strategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-path breakdown inside a trial.
pub type PathStats = LabelStats;

/// What the search varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    /// Number of concurrent workers.
    Concurrency,
    /// Permitted requests per second.
    Tps,
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concurrency => write!(f, "concurrency"),
            Self::Tps => write!(f, "tps"),
        }
    }
}

/// Why the search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// A trial broke the error-rate or latency threshold.
    ThresholdExceeded,
    /// Every level passed.
    MaxLevelReached,
    /// Stopped on request or by an internal error.
    Interrupted,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThresholdExceeded => write!(f, "threshold_exceeded"),
            Self::MaxLevelReached => write!(f, "max_level_reached"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Measurements of one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Probed level (workers or permits per second).
    pub level: u32,
    /// Workers used.
    pub workers: usize,
    /// Wall-clock length of the trial, including in-flight completion.
    pub duration_ms: f64,
    /// Completed requests (rejections excluded).
    pub total_requests: u64,
    /// Successful requests.
    pub success_count: u64,
    /// Failed requests.
    pub error_count: u64,
    /// Requests that never got a rate-limit permit.
    pub rejected_count: u64,
    /// `error_count / total_requests`.
    pub error_rate: f64,
    /// Average latency of successful requests.
    pub avg_latency_ms: f64,
    /// 90th percentile latency.
    pub p90_latency_ms: f64,
    /// 95th percentile latency.
    pub p95_latency_ms: f64,
    /// 99th percentile latency.
    pub p99_latency_ms: f64,
    /// Completed requests per second of trial.
    pub tps: f64,
    /// Failure counts by kind.
    pub errors_by_kind: BTreeMap<String, u64>,
    /// Per-path breakdown when paths were configured.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub path_stats: BTreeMap<String, PathStats>,
    /// Start of the trial (RFC 3339).
    pub started_at: String,
}

impl TrialResult {
    /// Returns true if the trial stayed within both thresholds.
    #[must_use]
    pub fn passes(&self, error_threshold: f64, response_time_threshold_ms: f64) -> bool {
        self.error_rate <= error_threshold && self.avg_latency_ms <= response_time_threshold_ms
    }
}

/// Search parameters echoed into the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameters {
    /// First level.
    pub start: u32,
    /// Last level.
    pub max: u32,
    /// Step.
    pub step: u32,
    /// Measured duration per level.
    pub duration_per_step_ms: f64,
    /// Error-rate threshold.
    pub error_threshold: f64,
    /// Average-latency threshold.
    pub response_time_threshold_ms: f64,
    /// Paths exercised.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// Path weights.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub path_weights: BTreeMap<String, u32>,
}

impl From<&RampConfig> for SearchParameters {
    fn from(config: &RampConfig) -> Self {
        Self {
            start: config.start,
            max: config.max,
            step: config.step,
            duration_per_step_ms: config.duration_per_step.as_secs_f64() * 1000.0,
            error_threshold: config.error_threshold,
            response_time_threshold_ms: config.response_time_threshold_ms(),
            paths: config.paths.clone(),
            path_weights: config.path_weights.clone(),
        }
    }
}

/// Outcome of a ramp search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RampReport {
    /// Unique id of this search.
    pub test_id: Uuid,
    /// What was varied.
    pub search: SearchKind,
    /// Level sequence strategy.
    pub strategy: Strategy,
    /// Search parameters.
    pub parameters: SearchParameters,
    /// Completed trials in execution order.
    pub trials: Vec<TrialResult>,
    /// Highest-throughput passing trial.
    pub best: Option<TrialResult>,
    /// Last passing level before the failing one (binary strategy).
    pub fallback_level: Option<u32>,
    /// Why the search ended.
    pub termination_reason: TerminationReason,
    /// True if stopped early.
    pub interrupted: bool,
    /// Internal error that ended the search, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Search start (RFC 3339).
    pub started_at: String,
    /// Search end (RFC 3339).
    pub finished_at: String,
}

impl RampReport {
    /// Level of the best trial.
    #[must_use]
    pub fn best_level(&self) -> Option<u32> {
        self.best.as_ref().map(|t| t.level)
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    /// Returns a serialization error if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Highest-TPS trial within both thresholds; ties go to the lower average
/// latency.
#[must_use]
pub fn select_best(
    trials: &[TrialResult],
    error_threshold: f64,
    response_time_threshold_ms: f64,
) -> Option<TrialResult> {
    trials
        .iter()
        .filter(|t| t.passes(error_threshold, response_time_threshold_ms))
        .max_by(|a, b| {
            a.tps
                .total_cmp(&b.tps)
                .then_with(|| b.avg_latency_ms.total_cmp(&a.avg_latency_ms))
        })
        .cloned()
}
