// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # cumbre-core
//!
//! Core types shared by the cumbre load-testing engine.
//!
//! - [`WorkItem`] and [`Outcome`] describe a unit of work and its result
//! - [`MetricsAggregator`] collects [`ExecutionRecord`]s into snapshots
//! - [`EngineConfig`] and its sections configure limiter, pool, controller and ramp
//! - [`EngineError`] covers engine failures (work failures are outcomes, not errors)
//!
//! ## Iron Lotus Framework
//!
//! - **Jidoka**: Invalid configuration is rejected before any work starts
//! - **Visual Management**: One aggregator, one consistent snapshot
//! - **Muda**: Bounded sample buffers, no unbounded history

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod outcome;

pub use config::{
    AdaptiveConfig, EngineConfig, LimiterMode, PoolConfig, RampConfig, RateLimiterConfig,
    Strategy,
};
pub use error::{EngineError, Result};
pub use metrics::{LabelStats, MetricsAggregator, MetricsSnapshot, WindowStats, percentile};
pub use outcome::{ExecutionRecord, FailureKind, FnWork, Outcome, TaskId, WorkItem, work_fn};
