//! # drift-network — Node-to-node protocol for Drift.
//!
//! Nodes talk JSON-RPC over HTTP. [`protocol`] defines the method set once
//! for both sides: the node serves it, [`RpcNeighbor`] consumes it through
//! the generated client and adapts it to the
//! [`Neighbor`](drift_core::traits::Neighbor) trait.

pub mod config;
pub mod neighbor;
pub mod protocol;

pub use config::NetworkConfig;
pub use neighbor::{RpcNeighbor, neighborhood};
pub use protocol::{DriftApiClient, DriftApiServer};
