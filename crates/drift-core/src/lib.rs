//! # drift-core
//! Foundation types, capability traits, ledger, and transaction pool for the
//! Drift protocol.

pub mod block_validation;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod mempool;
pub mod settings;
pub mod traits;
pub mod types;
pub mod utxo;
