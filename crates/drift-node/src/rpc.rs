//! JSON-RPC server for the Drift node.
//!
//! Serves the [`DriftApi`](drift_network::protocol::DriftApiServer) method
//! set over HTTP with jsonrpsee 0.24. The same methods are what
//! [`RpcNeighbor`](drift_network::RpcNeighbor) calls on other nodes.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;

use drift_core::error::{DriftError, MempoolError};
use drift_core::mempool::TransactionRequest;
use drift_core::settings::ProtocolSettings;
use drift_core::types::{Address, Block, Hash256, Transaction, Utxo};
use drift_network::protocol::{DriftApiServer, codes, rpc_error};

use crate::node::Node;

/// RPC server implementation backed by a running node.
pub struct RpcServerImpl {
    node: Arc<Node>,
}

impl RpcServerImpl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

fn mempool_error(e: MempoolError) -> ErrorObjectOwned {
    match e {
        MempoolError::EmptyChain => rpc_error(codes::NOT_FOUND, &e.to_string()),
        MempoolError::Transaction(inner) => rpc_error(codes::TRANSACTION_REJECTED, &inner.to_string()),
    }
}

#[async_trait]
impl DriftApiServer for RpcServerImpl {
    async fn get_blocks(&self, start_height: u64) -> Result<Vec<Block>, ErrorObjectOwned> {
        Ok(self.node.blocks_from(start_height))
    }

    async fn get_transactions(&self) -> Result<Vec<Transaction>, ErrorObjectOwned> {
        Ok(self.node.transactions())
    }

    async fn add_transaction(&self, request: TransactionRequest) -> Result<Hash256, ErrorObjectOwned> {
        self.node.add_transaction(request).map_err(mempool_error)
    }

    async fn get_utxos(&self, address: Address) -> Result<Vec<Utxo>, ErrorObjectOwned> {
        Ok(self.node.utxos(&address))
    }

    async fn get_amount(&self, address: Address) -> Result<u64, ErrorObjectOwned> {
        Ok(self.node.amount(&address))
    }

    async fn get_first_block_timestamp(&self) -> Result<Option<i64>, ErrorObjectOwned> {
        Ok(self.node.first_block_timestamp())
    }

    async fn get_settings(&self) -> Result<ProtocolSettings, ErrorObjectOwned> {
        Ok(self.node.settings().clone())
    }
}

/// Start the JSON-RPC server on `addr`.
///
/// Returns a handle that stops the server when `stop()` is called or the
/// handle is dropped.
pub async fn start_rpc_server(addr: &str, node: Arc<Node>) -> Result<ServerHandle, DriftError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| DriftError::Rpc(format!("{addr}: {e}")))?;

    let rpc_impl = RpcServerImpl::new(node);
    Ok(server.start(rpc_impl.into_rpc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::error::TransactionError;
    use drift_core::traits::Neighbor;
    use drift_network::RpcNeighbor;
    use std::time::Duration;

    use crate::config::{NodeConfig, ValidatorConfig};
    use crate::registry::OpenRegistry;

    const T0: i64 = 1_000 * 60_000_000_000;

    fn node() -> Arc<Node> {
        let config = NodeConfig {
            rpc_port: 0,
            validator: ValidatorConfig { address: Some(Address([1; 32])) },
            ..NodeConfig::default()
        };
        Node::with_parts(config, Vec::new(), Arc::new(OpenRegistry), Arc::new(|| T0))
    }

    #[test]
    fn mempool_errors_map_to_codes() {
        assert_eq!(mempool_error(MempoolError::EmptyChain).code(), codes::NOT_FOUND);
        let rejected = mempool_error(TransactionError::FeeTooLow { fee: 1, minimum: 2 }.into());
        assert_eq!(rejected.code(), codes::TRANSACTION_REJECTED);
        assert_eq!(rejected.message(), "fee too low: 1 < 2");
    }

    #[tokio::test]
    async fn start_rpc_server_rejects_bad_address() {
        let err = start_rpc_server("not an address", node()).await.unwrap_err();
        assert!(matches!(err, DriftError::Rpc(_)));
    }

    #[tokio::test]
    async fn neighbor_reads_served_chain() {
        let node = node();
        node.validate(T0).await;

        let server = Server::builder().build("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.start(RpcServerImpl::new(Arc::clone(&node)).into_rpc());

        let neighbor = RpcNeighbor::new(&addr.to_string(), Duration::from_secs(5)).unwrap();
        let blocks = neighbor.get_blocks(0).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].timestamp, T0);
        assert_eq!(neighbor.get_utxos(&Address([1; 32])).await.unwrap().len(), 1);
        assert!(neighbor.get_transactions().await.unwrap().is_empty());

        handle.stop().unwrap();
    }
}
