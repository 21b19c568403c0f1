// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # cumbre-ramp
//!
//! Capacity search for the cumbre load-testing engine.
//!
//! [`RampSearchEngine`] steps a [`Target`] through increasing levels of
//! concurrency ([`RampSearchEngine::find_max_concurrency`]) or permitted
//! throughput ([`RampSearchEngine::find_max_tps`]) until a trial exceeds the
//! error-rate or latency threshold, and reports the best level in a
//! [`RampReport`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use cumbre_core::{Outcome, RampConfig, Strategy};
//! use cumbre_ramp::{RampSearchEngine, target_fn};
//!
//! let engine = RampSearchEngine::new(target_fn(|path| async move { Outcome::Success }));
//! let report = engine
//!     .find_max_concurrency(&RampConfig::new(1, 64, Strategy::Binary))
//!     .await?;
//! println!("{}", report.to_json()?);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod engine;
pub mod report;
pub mod strategy;
pub mod target;
pub mod trial;

pub use cumbre_core::{EngineError, RampConfig, Result, Strategy};
pub use engine::{RampSearchEngine, StopHandle};
pub use report::{
    PathStats, RampReport, SearchKind, SearchParameters, TerminationReason, TrialResult,
    select_best,
};
pub use strategy::levels;
pub use target::{Target, target_fn};
pub use trial::PathSelector;
