//! Running one level of a ramp search.
//!
//! A trial builds a fresh pool (and, for throughput search, a fresh limiter),
//! feeds it for the trial duration with back-pressure, then stops feeding and
//! waits for requests already in flight. Throughput is measured over the
//! feeding period only.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cumbre_core::{EngineError, MetricsAggregator, PoolConfig, RampConfig, Result};
use cumbre_limiter::RateLimiter;
use cumbre_pool::WorkerPool;
use rand::SeedableRng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use tokio::time::Instant;

use crate::engine::StopHandle;
use crate::report::{SearchKind, TrialResult};
use crate::target::{PathWork, Target};

/// Pending items per worker the feeder keeps queued.
const BACKLOG_PER_WORKER: usize = 2;

/// Window a throughput trial's permit rate applies to.
const TPS_WINDOW: Duration = Duration::from_secs(1);

/// Weighted random choice among configured paths.
#[derive(Debug, Clone)]
pub struct PathSelector {
    paths: Vec<String>,
    index: Option<WeightedIndex<u32>>,
}

impl PathSelector {
    /// Builds the selector for `config`.
    ///
    /// Without paths every request goes to the bare target. Without weights
    /// all paths are equally likely; with weights, only weighted paths are
    /// chosen.
    ///
    /// # Errors
    /// Returns a configuration error if no path has a positive weight.
    pub fn new(config: &RampConfig) -> Result<Self> {
        if config.paths.is_empty() {
            return Ok(Self {
                paths: Vec::new(),
                index: None,
            });
        }
        let weights: Vec<u32> = config
            .paths
            .iter()
            .map(|path| {
                if config.path_weights.is_empty() {
                    1
                } else {
                    config.path_weights.get(path).copied().unwrap_or(0)
                }
            })
            .collect();
        let index = WeightedIndex::new(&weights)
            .map_err(|e| EngineError::config(format!("invalid path weights: {e}")))?;
        Ok(Self {
            paths: config.paths.clone(),
            index: Some(index),
        })
    }

    /// Picks the path for the next request.
    pub fn pick<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        self.index
            .as_ref()
            .map(|index| self.paths[index.sample(rng)].clone())
    }
}

/// What to run at one level.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrialPlan {
    pub(crate) kind: SearchKind,
    pub(crate) level: u32,
    pub(crate) duration: Duration,
}

impl TrialPlan {
    pub(crate) fn workers(&self) -> usize {
        match self.kind {
            SearchKind::Concurrency => self.level as usize,
            SearchKind::Tps => self.level as usize * 2,
        }
    }
}

/// Runs one trial. Returns `None` if a stop was requested before the trial
/// finished.
pub(crate) async fn run_trial(
    target: &Arc<dyn Target>,
    selector: &PathSelector,
    config: &RampConfig,
    plan: TrialPlan,
    stop: &StopHandle,
) -> Result<Option<TrialResult>> {
    let workers = plan.workers();
    let aggregator = Arc::new(MetricsAggregator::new());
    let pool_config = PoolConfig {
        max_workers: workers,
        rate_wait_timeout: config.rate_wait_timeout,
        task_timeout: config.task_timeout,
        collect_records: false,
    };
    let mut builder = WorkerPool::builder(pool_config).aggregator(Arc::clone(&aggregator));
    if plan.kind == SearchKind::Tps {
        builder = builder.limiter(Arc::new(RateLimiter::fixed(plan.level, TPS_WINDOW)?));
    }
    let pool = builder.build()?;
    if let Some(adaptive) = &config.adaptive {
        pool.enable_adaptive(adaptive)?;
    }

    let mut rng = StdRng::from_rng(&mut rand::rng());
    let backlog = workers * BACKLOG_PER_WORKER;
    let started_at = SystemTime::now();
    let start = Instant::now();
    let deadline = start + plan.duration;
    let mut stopped = false;

    loop {
        tokio::select! {
            biased;
            () = stop.stopped() => {
                stopped = true;
                break;
            }
            () = tokio::time::sleep_until(deadline) => break,
            () = pool.wait_below(backlog) => {
                let path = selector.pick(&mut rng);
                let work = Arc::new(PathWork {
                    target: Arc::clone(target),
                    path: path.clone(),
                });
                match path {
                    Some(path) => pool.submit_labeled(path, work)?,
                    None => pool.submit(work)?,
                };
            }
        }
    }
    // Requests still in flight at the deadline are counted but their drain
    // time is not part of the trial length.
    let elapsed = start.elapsed();

    pool.shutdown(false).await;
    pool.wait_completion().await;

    if stopped {
        tracing::info!(level = plan.level, "trial interrupted, discarding");
        return Ok(None);
    }

    let snapshot = aggregator.snapshot();
    let secs = elapsed.as_secs_f64();
    let tps = if secs > 0.0 {
        snapshot.total_requests as f64 / secs
    } else {
        0.0
    };

    Ok(Some(TrialResult {
        level: plan.level,
        workers,
        duration_ms: secs * 1000.0,
        total_requests: snapshot.total_requests,
        success_count: snapshot.success_count,
        error_count: snapshot.error_count,
        rejected_count: snapshot.rejected_count,
        error_rate: snapshot.error_rate,
        avg_latency_ms: snapshot.avg_latency_ms,
        p90_latency_ms: snapshot.p90_latency_ms,
        p95_latency_ms: snapshot.p95_latency_ms,
        p99_latency_ms: snapshot.p99_latency_ms,
        tps,
        errors_by_kind: snapshot.errors_by_kind,
        path_stats: aggregator.label_stats(elapsed),
        started_at: humantime::format_rfc3339_millis(started_at).to_string(),
    }))
}
