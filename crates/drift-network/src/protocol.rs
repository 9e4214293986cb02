//! The JSON-RPC method set every Drift node serves.
//!
//! Methods live in the `drift` namespace (`drift_getBlocks`, ...). The
//! `rpc` macro generates both [`DriftApiServer`], implemented by the node,
//! and [`DriftApiClient`], implemented for any jsonrpsee client.

use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;

use drift_core::mempool::TransactionRequest;
use drift_core::settings::ProtocolSettings;
use drift_core::types::{Address, Block, Hash256, Transaction, Utxo};

/// Error codes returned by the server.
pub mod codes {
    /// Generic server-side failure.
    pub const INTERNAL: i32 = -1;
    /// The requested object does not exist.
    pub const NOT_FOUND: i32 = -5;
    /// Malformed request parameters.
    pub const INVALID_PARAMS: i32 = -22;
    /// The transaction was refused by the pool.
    pub const TRANSACTION_REJECTED: i32 = -25;
}

/// Create a JSON-RPC error.
pub fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

#[rpc(server, client, namespace = "drift")]
pub trait DriftApi {
    /// Blocks from `start_height` onwards, at most `blocks_count_limit`.
    #[method(name = "getBlocks")]
    async fn get_blocks(&self, start_height: u64) -> Result<Vec<Block>, ErrorObjectOwned>;

    /// Pending transactions, in admission order.
    #[method(name = "getTransactions")]
    async fn get_transactions(&self) -> Result<Vec<Transaction>, ErrorObjectOwned>;

    /// Submit a transaction to the pool. Returns its id.
    #[method(name = "addTransaction")]
    async fn add_transaction(&self, request: TransactionRequest) -> Result<Hash256, ErrorObjectOwned>;

    /// Unspent outputs owned by `address`.
    #[method(name = "getUtxos")]
    async fn get_utxos(&self, address: Address) -> Result<Vec<Utxo>, ErrorObjectOwned>;

    /// Balance of `address` aged to the current time.
    #[method(name = "getAmount")]
    async fn get_amount(&self, address: Address) -> Result<u64, ErrorObjectOwned>;

    /// Timestamp of the genesis block, `None` on an empty chain.
    #[method(name = "getFirstBlockTimestamp")]
    async fn get_first_block_timestamp(&self) -> Result<Option<i64>, ErrorObjectOwned>;

    #[method(name = "getSettings")]
    async fn get_settings(&self) -> Result<ProtocolSettings, ErrorObjectOwned>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_carries_code_and_message() {
        let err = rpc_error(codes::NOT_FOUND, "no such block");
        assert_eq!(err.code(), codes::NOT_FOUND);
        assert_eq!(err.message(), "no such block");
        assert!(err.data().is_none());
    }
}
