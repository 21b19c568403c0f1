//! Cumbre: Adaptive, Rate-Limited Load Testing
//!
//! Part of the PAIML Sovereign AI Stack.
//!
//! Cumbre drives a system under test with a bounded, resizable worker pool,
//! paces it with a rate limiter, and ramps concurrency or throughput level by
//! level until an error-rate or response-time threshold breaks.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cumbre::prelude::*;
//! use std::time::Duration;
//!
//! # async fn run() -> cumbre::core::Result<()> {
//! let target = target_fn(|_path| async { Outcome::Success });
//! let engine = RampSearchEngine::new(target);
//! let config = RampConfig::new(1, 100, Strategy::Binary)
//!     .with_duration(Duration::from_secs(5));
//! let report = engine.find_max_concurrency(&config).await?;
//! println!("best level: {:?}", report.best_level());
//! # Ok(())
//! # }
//! ```

pub use cumbre_core as core;
pub use cumbre_limiter as limiter;
pub use cumbre_pool as pool;
pub use cumbre_ramp as ramp;

/// Prelude module for common imports.
pub mod prelude {
    pub use cumbre_core::{
        AdaptiveConfig, EngineConfig, EngineError, ExecutionRecord, FailureKind, LimiterMode,
        MetricsAggregator, MetricsSnapshot, Outcome, PoolConfig, RampConfig, RateLimiterConfig,
        Strategy, WorkItem, work_fn,
    };
    pub use cumbre_limiter::{RateLimiter, RateLimiterStats};
    pub use cumbre_pool::{AdjustmentReason, PoolStats, WorkerPool};
    pub use cumbre_ramp::{
        RampReport, RampSearchEngine, SearchKind, StopHandle, Target, TerminationReason,
        TrialResult, target_fn,
    };
}
