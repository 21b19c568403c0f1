//! Async rate limiter.
//!
//! # Toyota Way: Heijunka (平準化)
//! Load levelling: requests leave the limiter at a steady pace instead of in
//! bursts that overwhelm the target.
//!
//! # Implementation
//!
//! Callers serialize through one async mutex that is held across the sleep, so
//! grant spacing is exact. Statistics live behind a separate synchronous lock
//! and can be read while a caller sleeps.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use cumbre_core::metrics::{TPS_WINDOW, percentile};
use cumbre_core::{EngineError, LimiterMode, RateLimiterConfig, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::gate::Gate;

/// Wait-latency samples kept for percentiles.
const WAIT_SAMPLES: usize = 1000;

/// Shortest span used when converting grants to a rate.
const MIN_TPS_SPAN: Duration = Duration::from_millis(1);

/// Rate limiter shared by all workers of a pool.
pub struct RateLimiter {
    mode: LimiterMode,
    window: Duration,
    gate: tokio::sync::Mutex<GateState>,
    stats: parking_lot::Mutex<StatsState>,
}

#[derive(Debug)]
struct GateState {
    rate: u32,
    /// Capacity tracks the rate unless an explicit burst was configured.
    explicit_capacity: Option<u32>,
    gate: Gate,
}

#[derive(Debug)]
struct StatsState {
    created: Instant,
    configured_rate: u32,
    total: u64,
    granted: u64,
    rejected: u64,
    waits_ms: VecDeque<f64>,
    grants: VecDeque<Instant>,
}

impl StatsState {
    fn evict(&mut self, now: Instant) {
        while self
            .grants
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) > TPS_WINDOW)
        {
            self.grants.pop_front();
        }
    }

    fn current_tps(&mut self, now: Instant) -> f64 {
        self.evict(now);
        if self.grants.len() < 2 {
            return 0.0;
        }
        let oldest = self.grants.front().copied().unwrap_or(now);
        let span = now.saturating_duration_since(oldest).max(MIN_TPS_SPAN);
        self.grants.len() as f64 / span.as_secs_f64()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("mode", &self.mode)
            .field("window", &self.window)
            .field("configured_rate", &self.stats.lock().configured_rate)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter from validated configuration.
    ///
    /// # Errors
    /// Returns a configuration error if the rate, window or capacity is zero.
    pub fn new(config: &RateLimiterConfig) -> Result<Self> {
        config.validate()?;
        let now = Instant::now();
        Ok(Self {
            mode: config.mode,
            window: config.window,
            gate: tokio::sync::Mutex::new(GateState {
                rate: config.rate,
                explicit_capacity: config.burst_capacity,
                gate: Gate::new(config.mode, config.rate, config.capacity(), config.window, now),
            }),
            stats: parking_lot::Mutex::new(StatsState {
                created: now,
                configured_rate: config.rate,
                total: 0,
                granted: 0,
                rejected: 0,
                waits_ms: VecDeque::with_capacity(WAIT_SAMPLES),
                grants: VecDeque::new(),
            }),
        })
    }

    /// Fixed-interval limiter granting `rate` permits per `window`.
    ///
    /// # Errors
    /// Returns a configuration error if `rate` or `window` is zero.
    pub fn fixed(rate: u32, window: Duration) -> Result<Self> {
        Self::new(&RateLimiterConfig::fixed(rate, window))
    }

    /// Token bucket limiter granting `rate` permits per `window`, bursting up
    /// to `rate`.
    ///
    /// # Errors
    /// Returns a configuration error if `rate` or `window` is zero.
    pub fn token_bucket(rate: u32, window: Duration) -> Result<Self> {
        Self::new(&RateLimiterConfig::token_bucket(rate, window))
    }

    /// Algorithm in use.
    #[must_use]
    pub const fn mode(&self) -> LimiterMode {
        self.mode
    }

    /// Waits for a permit.
    ///
    /// Returns `false` only when no permit can be granted within `timeout`;
    /// in that case the call returns as soon as that is known, without
    /// sleeping. `None` waits as long as necessary.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);

        let mut state = match deadline {
            Some(deadline) => {
                if let Ok(state) = tokio::time::timeout_at(deadline, self.gate.lock()).await {
                    state
                } else {
                    self.record_rejection();
                    return false;
                }
            }
            None => self.gate.lock().await,
        };

        let now = Instant::now();
        let wait = state.gate.wait_for(now);
        if let Some(deadline) = deadline {
            if wait > deadline.saturating_duration_since(now) {
                drop(state);
                tracing::debug!(
                    wait_ms = wait.as_secs_f64() * 1000.0,
                    "rate limit permit not available within timeout"
                );
                self.record_rejection();
                return false;
            }
        }

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        let granted_at = Instant::now();
        state.gate.grant(granted_at);
        drop(state);

        self.record_grant(started, granted_at);
        true
    }

    /// Grants per second over the last second.
    #[must_use]
    pub fn current_tps(&self) -> f64 {
        self.stats.lock().current_tps(Instant::now())
    }

    /// Snapshot of limiter statistics.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let mut stats = self.stats.lock();
        let current_tps = stats.current_tps(now);
        let mut waits: Vec<f64> = stats.waits_ms.iter().copied().collect();
        let elapsed = now.saturating_duration_since(stats.created).as_secs_f64();
        let average_tps = if elapsed > 0.0 {
            stats.granted as f64 / elapsed
        } else {
            0.0
        };
        let (total_requests, rejected, configured_rate) =
            (stats.total, stats.rejected, stats.configured_rate);
        drop(stats);

        waits.sort_by(f64::total_cmp);
        let avg_wait_ms = if waits.is_empty() {
            0.0
        } else {
            waits.iter().sum::<f64>() / waits.len() as f64
        };

        RateLimiterStats {
            total_requests,
            rejected,
            avg_wait_ms,
            p95_wait_ms: percentile(&waits, 95.0),
            p99_wait_ms: percentile(&waits, 99.0),
            mode: self.mode,
            configured_rate,
            current_tps,
            average_tps,
        }
    }

    /// Changes the permit rate.
    ///
    /// When no explicit burst capacity was configured, the token bucket's
    /// capacity follows the new rate.
    ///
    /// # Errors
    /// Returns a configuration error if `new_rate` is zero.
    pub async fn update_rate(&self, new_rate: u32) -> Result<()> {
        if new_rate == 0 {
            return Err(EngineError::config("rate must be greater than 0"));
        }
        let mut state = self.gate.lock().await;
        let old_rate = state.rate;
        state.rate = new_rate;
        let capacity = state.explicit_capacity.unwrap_or(new_rate);
        let window = self.window;
        match &mut state.gate {
            Gate::Fixed(gate) => gate.set_rate(new_rate, window),
            Gate::Bucket(bucket) => bucket.set_capacity(capacity, Instant::now()),
        }
        drop(state);

        self.stats.lock().configured_rate = new_rate;
        tracing::info!(old_rate, new_rate, mode = %self.mode, "rate limit updated");
        Ok(())
    }

    fn record_rejection(&self) {
        let mut stats = self.stats.lock();
        stats.total += 1;
        stats.rejected += 1;
    }

    fn record_grant(&self, started: Instant, granted_at: Instant) {
        let waited_ms = granted_at.saturating_duration_since(started).as_secs_f64() * 1000.0;
        let mut stats = self.stats.lock();
        stats.total += 1;
        stats.granted += 1;
        if stats.waits_ms.len() == WAIT_SAMPLES {
            stats.waits_ms.pop_front();
        }
        stats.waits_ms.push_back(waited_ms);
        stats.grants.push_back(granted_at);
        stats.evict(granted_at);
        drop(stats);
        tracing::trace!(waited_ms, "rate limit permit granted");
    }
}

/// Limiter statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    /// Calls to `wait`, granted or not.
    pub total_requests: u64,
    /// Calls that timed out.
    pub rejected: u64,
    /// Average wait of granted calls, in milliseconds.
    pub avg_wait_ms: f64,
    /// 95th percentile wait.
    pub p95_wait_ms: f64,
    /// 99th percentile wait.
    pub p99_wait_ms: f64,
    /// Algorithm.
    pub mode: LimiterMode,
    /// Current permits per window.
    pub configured_rate: u32,
    /// Grants per second over the last second.
    pub current_tps: f64,
    /// Grants per second since creation.
    pub average_tps: f64,
}
