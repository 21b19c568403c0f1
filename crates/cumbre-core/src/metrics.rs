//! Thread-safe aggregation of execution outcomes.
//!
//! # Toyota Way: Visual Management (目で見る管理)
//! Every completed task lands here; snapshots, percentiles and throughput are
//! derived on demand from one consistent view.
//!
//! # Implementation
//!
//! All mutation goes through a single lock, so a snapshot is never torn.
//! Records are counted in completion order. Rate-limit rejections are
//! tallied separately and do not count as requests or errors.
//!
//! Mean, min and max latency are exact over every success. Percentiles are
//! taken over the most recent [`LATENCY_SAMPLE_CAPACITY`] successes so a
//! long-lived pool holds bounded memory.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::outcome::ExecutionRecord;

/// Completions older than this are dropped from the recent-activity window.
const RECENT_HORIZON: Duration = Duration::from_secs(60);

/// Upper bound on remembered completions for windowed statistics.
const RECENT_CAPACITY: usize = 10_000;

/// Successful latencies kept for percentiles.
pub const LATENCY_SAMPLE_CAPACITY: usize = 50_000;

/// Span used by [`MetricsAggregator::current_tps`].
pub const TPS_WINDOW: Duration = Duration::from_secs(1);

/// Computes a percentile from a sorted slice.
///
/// Uses `sorted[floor(n * p / 100)]`, clamped to the last element.
/// Returns 0 for an empty slice.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * p / 100.0).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Shared collector of execution records.
#[derive(Debug)]
pub struct MetricsAggregator {
    state: Mutex<AggregatorState>,
}

#[derive(Debug)]
struct AggregatorState {
    started: Instant,
    total: u64,
    success: u64,
    errors: u64,
    rejected: u64,
    /// Most recent latencies of successful executions, in milliseconds.
    latencies_ms: VecDeque<f64>,
    latency_sum_ms: f64,
    latency_min_ms: f64,
    latency_max_ms: f64,
    errors_by_kind: BTreeMap<String, u64>,
    by_label: BTreeMap<String, LabelState>,
    /// (completion time, failed) for windowed rates.
    recent: VecDeque<(Instant, bool)>,
}

#[derive(Debug, Default)]
struct LabelState {
    total: u64,
    success: u64,
    latency_sum_ms: f64,
}

impl AggregatorState {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            total: 0,
            success: 0,
            errors: 0,
            rejected: 0,
            latencies_ms: VecDeque::new(),
            latency_sum_ms: 0.0,
            latency_min_ms: f64::INFINITY,
            latency_max_ms: 0.0,
            errors_by_kind: BTreeMap::new(),
            by_label: BTreeMap::new(),
            recent: VecDeque::new(),
        }
    }

    fn push_latency(&mut self, ms: f64) {
        self.latency_sum_ms += ms;
        self.latency_min_ms = self.latency_min_ms.min(ms);
        self.latency_max_ms = self.latency_max_ms.max(ms);
        if self.latencies_ms.len() == LATENCY_SAMPLE_CAPACITY {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(ms);
    }

    fn evict(&mut self, now: Instant) {
        while self
            .recent
            .front()
            .is_some_and(|(at, _)| now.saturating_duration_since(*at) > RECENT_HORIZON)
        {
            self.recent.pop_front();
        }
        while self.recent.len() > RECENT_CAPACITY {
            self.recent.pop_front();
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// Creates an empty aggregator. The throughput clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AggregatorState::new()),
        }
    }

    /// Appends one execution record.
    pub fn record(&self, record: &ExecutionRecord) {
        let now = Instant::now();
        let mut state = self.state.lock();

        if record.is_rejection() {
            state.rejected += 1;
            return;
        }

        state.total += 1;
        let failed = match record.outcome.failure_kind() {
            None => {
                state.success += 1;
                state.push_latency(record.duration_ms);
                false
            }
            Some(kind) => {
                state.errors += 1;
                *state.errors_by_kind.entry(kind.to_string()).or_insert(0) += 1;
                true
            }
        };

        if let Some(label) = &record.label {
            let entry = state.by_label.entry(label.clone()).or_default();
            entry.total += 1;
            if !failed {
                entry.success += 1;
                entry.latency_sum_ms += record.duration_ms;
            }
        }

        state.recent.push_back((now, failed));
        state.evict(now);
    }

    /// Total requests recorded (rejections excluded).
    #[must_use]
    pub fn total(&self) -> u64 {
        self.state.lock().total
    }

    /// Clears all data and restarts the throughput clock.
    pub fn reset(&self) {
        *self.state.lock() = AggregatorState::new();
    }

    /// Returns a consistent snapshot of everything recorded so far.
    ///
    /// Throughput is computed over the time since creation or the last reset.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let elapsed = state.started.elapsed();

        let mut sorted: Vec<f64> = state.latencies_ms.iter().copied().collect();
        let errors_by_kind = state.errors_by_kind.clone();
        let (total, success, errors, rejected) =
            (state.total, state.success, state.errors, state.rejected);
        let (avg_latency_ms, min_latency_ms, max_latency_ms) = if success > 0 {
            (
                state.latency_sum_ms / success as f64,
                state.latency_min_ms,
                state.latency_max_ms,
            )
        } else {
            (0.0, 0.0, 0.0)
        };
        drop(state);

        sorted.sort_by(f64::total_cmp);

        MetricsSnapshot {
            total_requests: total,
            success_count: success,
            error_count: errors,
            rejected_count: rejected,
            error_rate: ratio(errors, total),
            avg_latency_ms,
            min_latency_ms,
            max_latency_ms,
            p50_latency_ms: percentile(&sorted, 50.0),
            p90_latency_ms: percentile(&sorted, 90.0),
            p95_latency_ms: percentile(&sorted, 95.0),
            p99_latency_ms: percentile(&sorted, 99.0),
            tps: per_second(total, elapsed),
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            errors_by_kind,
        }
    }

    /// Per-label breakdown; `elapsed` is the span used for per-label TPS.
    #[must_use]
    pub fn label_stats(&self, elapsed: Duration) -> BTreeMap<String, LabelStats> {
        let state = self.state.lock();
        state
            .by_label
            .iter()
            .map(|(label, s)| {
                let errors = s.total - s.success;
                let stats = LabelStats {
                    total_requests: s.total,
                    success_count: s.success,
                    error_count: errors,
                    error_rate: ratio(errors, s.total),
                    avg_latency_ms: if s.success > 0 {
                        s.latency_sum_ms / s.success as f64
                    } else {
                        0.0
                    },
                    tps: per_second(s.total, elapsed),
                };
                (label.clone(), stats)
            })
            .collect()
    }

    /// Error rate and throughput over the most recent `span`.
    #[must_use]
    pub fn window(&self, span: Duration) -> WindowStats {
        let now = Instant::now();
        let state = self.state.lock();
        let (completed, errors) = state
            .recent
            .iter()
            .rev()
            .take_while(|(at, _)| now.saturating_duration_since(*at) <= span)
            .fold((0u64, 0u64), |(n, e), (_, failed)| (n + 1, e + u64::from(*failed)));

        WindowStats {
            span,
            completed,
            errors,
            error_rate: ratio(errors, completed),
            tps: per_second(completed, span),
        }
    }

    /// Completed requests per second over the last second.
    #[must_use]
    pub fn current_tps(&self) -> f64 {
        self.window(TPS_WINDOW).tps
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

fn per_second(count: u64, span: Duration) -> f64 {
    let secs = span.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// Point-in-time view of an aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Requests executed (rejections excluded).
    pub total_requests: u64,
    /// Successful requests.
    pub success_count: u64,
    /// Failed requests.
    pub error_count: u64,
    /// Attempts rejected by the rate limiter.
    pub rejected_count: u64,
    /// `error_count / total_requests`, 0 when nothing ran.
    pub error_rate: f64,
    /// Mean latency of successful requests.
    pub avg_latency_ms: f64,
    /// Fastest successful request.
    pub min_latency_ms: f64,
    /// Slowest successful request.
    pub max_latency_ms: f64,
    /// Median latency.
    pub p50_latency_ms: f64,
    /// 90th percentile latency.
    pub p90_latency_ms: f64,
    /// 95th percentile latency.
    pub p95_latency_ms: f64,
    /// 99th percentile latency.
    pub p99_latency_ms: f64,
    /// Requests per second since the aggregator started.
    pub tps: f64,
    /// Time covered by this snapshot.
    pub elapsed_ms: f64,
    /// Failure counts keyed by failure kind.
    pub errors_by_kind: BTreeMap<String, u64>,
}

/// Per-label slice of the metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelStats {
    /// Requests sent with this label.
    pub total_requests: u64,
    /// Successful requests.
    pub success_count: u64,
    /// Failed requests.
    pub error_count: u64,
    /// Failure ratio.
    pub error_rate: f64,
    /// Mean latency of successful requests.
    pub avg_latency_ms: f64,
    /// Requests per second over the supplied span.
    pub tps: f64,
}

/// Rates over a recent window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// Window length.
    pub span: Duration,
    /// Completions inside the window.
    pub completed: u64,
    /// Failures inside the window.
    pub errors: u64,
    /// `errors / completed`.
    pub error_rate: f64,
    /// `completed / span`.
    pub tps: f64,
}
