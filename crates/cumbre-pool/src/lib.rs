// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # cumbre-pool
//!
//! Worker pool for the cumbre load-testing engine.
//!
//! - [`WorkerPool`] runs [`WorkItem`](cumbre_core::WorkItem)s on a bounded set
//!   of tokio workers, optionally gated by a
//!   [`RateLimiter`](cumbre_limiter::RateLimiter)
//! - [`ConcurrencyController`] resizes the pool from observed error rate and
//!   throughput
//!
//! ## Example
//!
//! ```rust,ignore
//! use cumbre_core::{PoolConfig, Outcome, work_fn};
//! use cumbre_pool::WorkerPool;
//!
//! let pool = WorkerPool::new(PoolConfig::with_workers(4))?;
//! pool.submit(work_fn(|| async { Outcome::Success }))?;
//! let records = pool.wait_completion().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod controller;
pub mod pool;

pub use controller::{AdjustmentReason, AdjustmentRecord, ConcurrencyController};
pub use cumbre_core::{EngineError, Result};
pub use pool::{PoolStats, WorkerPool, WorkerPoolBuilder};
