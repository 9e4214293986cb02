//! Integration test suite for Drift.
//!
//! Nodes are wired to each other in-process through [`helpers::LocalNeighbor`]
//! and driven tick by tick with a [`helpers::ManualClock`], so multi-node
//! scenarios run deterministically without sockets or wall-clock waits.

pub mod helpers;
