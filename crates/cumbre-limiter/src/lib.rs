// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # cumbre-limiter
//!
//! Async rate limiting for the cumbre load-testing engine.
//!
//! - **Fixed**: one permit every `window / rate`, exactly spaced
//! - **Token bucket**: bursts up to capacity, refilled continuously
//!
//! ## Example
//!
//! ```rust,ignore
//! use cumbre_limiter::RateLimiter;
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::fixed(5, Duration::from_secs(1))?;
//! if limiter.wait(Some(Duration::from_millis(500))).await {
//!     // permit granted
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

mod gate;
pub mod limiter;

pub use cumbre_core::{EngineError, LimiterMode, RateLimiterConfig, Result};
pub use limiter::{RateLimiter, RateLimiterStats};
