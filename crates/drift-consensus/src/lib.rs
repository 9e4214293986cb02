//! # drift-consensus — Block assembly and chain reconciliation.
//!
//! [`BlockAssembler`] turns the pending pool into the next block on the
//! validation tick. [`ChainReconciler`] compares the host chain with the
//! neighbors' chains on the verification ticks and adopts the winner.
//!
//! Both talk to the identity registry through [`registration`], which bounds
//! every query with the validation timeout.

pub mod engine;
pub mod reconcile;
pub mod registration;

pub use engine::BlockAssembler;
pub use reconcile::{ChainReconciler, ReconcileOutcome};
