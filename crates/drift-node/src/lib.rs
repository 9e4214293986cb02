//! # drift-node — Node composition, scheduling, and RPC.
//!
//! - [`config::NodeConfig`] — file and environment configuration
//! - [`scheduler::Scheduler`] — wall-clock aligned periodic jobs
//! - [`registry`] — open and allow-list identity registries
//! - [`node::Node`] — ledger, pool, assembler and reconciler wired together
//! - [`rpc`] — JSON-RPC server

pub mod config;
pub mod node;
pub mod registry;
pub mod rpc;
pub mod scheduler;

pub use config::NodeConfig;
pub use node::{Node, NodeSchedulers};
pub use rpc::start_rpc_server;
pub use scheduler::{Job, Scheduler, SchedulerState};
