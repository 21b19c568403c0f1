//! Popperian Falsification Tests for Cumbre
//!
//! # Reference
//! Popper, K. (1959). *The Logic of Scientific Discovery*. Routledge.
//!
//! > "A theory which is not refutable by any conceivable event is non-scientific."
//!
//! Each test in this module attempts to falsify a specific claim about the
//! load engine. A passing test means the claim survived the falsification
//! attempt.

// Allow test-specific patterns that are denied in production code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::float_cmp)]

mod controller;
mod pool;
mod ramp;
