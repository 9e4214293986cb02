//! # drift-decay — Time-decay value function.
//!
//! Every output loses value over time with a fixed half-life. Outputs flagged
//! with income instead converge toward an income limit: from below along a
//! bounded growth curve, from above by exponential decay of the excess.
//!
//! - [`curve`]: the pure function and its shape parameters.
//! - [`engine`]: [`DecayEngine`], the [`DecayCalculator`](drift_core::traits::DecayCalculator)
//!   used for both balances and fees.

pub mod curve;
pub mod engine;

pub use curve::{IncomeShape, value};
pub use engine::DecayEngine;
