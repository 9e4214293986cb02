//! [`Neighbor`] adapter over the JSON-RPC client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonrpsee::core::client::Error as ClientError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use drift_core::error::NetworkError;
use drift_core::mempool::TransactionRequest;
use drift_core::traits::Neighbor;
use drift_core::types::{Address, Block, Transaction, Utxo};

use crate::config::NetworkConfig;
use crate::protocol::DriftApiClient;

/// A remote node reached over HTTP JSON-RPC.
pub struct RpcNeighbor {
    target: String,
    client: HttpClient,
}

impl fmt::Debug for RpcNeighbor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcNeighbor").field("target", &self.target).finish_non_exhaustive()
    }
}

impl RpcNeighbor {
    /// Client for `target` (`host:port` or URL); every request is bounded by
    /// `timeout`.
    pub fn new(target: &str, timeout: Duration) -> Result<Self, NetworkError> {
        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint_url(target))
            .map_err(|e| NetworkError::Unreachable(format!("{target}: {e}")))?;
        Ok(Self { target: target.to_string(), client })
    }

    fn map_error(&self, error: ClientError) -> NetworkError {
        match error {
            ClientError::Call(object) => NetworkError::Rejected(object.message().to_string()),
            ClientError::RequestTimeout => NetworkError::Timeout,
            ClientError::ParseError(e) => NetworkError::InvalidResponse(e.to_string()),
            other => NetworkError::Unreachable(format!("{}: {other}", self.target)),
        }
    }
}

#[async_trait]
impl Neighbor for RpcNeighbor {
    fn target(&self) -> &str {
        &self.target
    }

    async fn get_blocks(&self, from_height: u64) -> Result<Vec<Block>, NetworkError> {
        DriftApiClient::get_blocks(&self.client, from_height)
            .await
            .map_err(|e| self.map_error(e))
    }

    async fn get_transactions(&self) -> Result<Vec<Transaction>, NetworkError> {
        DriftApiClient::get_transactions(&self.client)
            .await
            .map_err(|e| self.map_error(e))
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<(), NetworkError> {
        let id = DriftApiClient::add_transaction(&self.client, request.clone())
            .await
            .map_err(|e| self.map_error(e))?;
        debug!(neighbor = %self.target, tx = %id, "sent transaction");
        Ok(())
    }

    async fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>, NetworkError> {
        DriftApiClient::get_utxos(&self.client, *address)
            .await
            .map_err(|e| self.map_error(e))
    }
}

/// Neighbors for `config`: at most `max_outbounds_count` seeds, picked at
/// random, never the host itself. Seeds whose client cannot be built are
/// skipped.
pub fn neighborhood(config: &NetworkConfig) -> Vec<Arc<dyn Neighbor>> {
    let mut targets = config.neighbor_targets();
    targets.shuffle(&mut rand::thread_rng());
    targets
        .into_iter()
        .filter_map(|target| match RpcNeighbor::new(&target, config.connection_timeout()) {
            Ok(neighbor) => Some(Arc::new(neighbor) as Arc<dyn Neighbor>),
            Err(e) => {
                warn!(%target, "skipping seed: {e}");
                None
            }
        })
        .take(config.max_outbounds_count)
        .collect()
}

fn endpoint_url(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{target}")
    }
}
