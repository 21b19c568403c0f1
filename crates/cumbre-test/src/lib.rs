//! # cumbre-test
//!
//! Testing infrastructure for the cumbre load engine.
//!
//! This crate provides:
//! - **Simulated targets**: Systems under test with a known breaking point
//! - **Chaos injection**: Latency, errors and panics at configurable rates
//! - **Falsification tests**: Popperian tests for engine behavior
//!
//! ## Iron Lotus Framework
//!
//! - **Built-in Quality** (品質の作り込み): Quality cannot be inspected in
//! - **Popperian Falsification**: Tests designed to refute claims
//!
//! ## Example
//!
//! ```rust,ignore
//! use cumbre_ramp::RampSearchEngine;
//! use cumbre_test::SimulatedTarget;
//!
//! let target = SimulatedTarget::with_capacity(50, Duration::from_millis(20))?;
//! let engine = RampSearchEngine::new(target.clone());
//! let report = engine.find_max_concurrency(&config).await?;
//! assert!(report.best_level().is_some_and(|l| l <= 50));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod chaos;
pub mod error;
pub mod harness;

pub use chaos::{ChaosConfig, ChaosInjector};
pub use error::{Result, TestError};
pub use harness::{SimulatedTarget, SimulatedTargetBuilder};
