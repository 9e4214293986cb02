//! Shared test helpers for integration tests.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;

use drift_core::constants::NANOS_PER_SECOND;
use drift_core::crypto::KeyPair;
use drift_core::error::NetworkError;
use drift_core::mempool::TransactionRequest;
use drift_core::settings::ProtocolSettings;
use drift_core::traits::{Clock, Neighbor};
use drift_core::types::{Address, Block, Hash256, Output, Transaction, Utxo};
use drift_node_lib::config::{NodeConfig, ValidatorConfig};
use drift_node_lib::registry::OpenRegistry;
use drift_node_lib::Node;

/// Block spacing used by every test network.
pub const DELTA: i64 = 60 * NANOS_PER_SECOND;
/// Timestamp of the genesis block.
pub const T0: i64 = 1_000 * DELTA;
pub const GENESIS_AMOUNT: u64 = 1_000_000;
pub const FEE: u64 = 10;

/// Protocol settings without aging, so balances are exact.
pub fn settings() -> ProtocolSettings {
    ProtocolSettings {
        genesis_amount: GENESIS_AMOUNT,
        minimal_transaction_fee: FEE,
        half_life_days: 0.0,
        validation_timeout_secs: 1,
        blocks_count_limit: 3,
        ..ProtocolSettings::default()
    }
}

/// Deterministic key from a seed byte.
pub fn key(seed: u8) -> KeyPair {
    KeyPair::from_secret_bytes([seed; 32])
}

/// Timestamp of the block at `height`.
pub fn block_time(height: i64) -> i64 {
    T0 + height * DELTA
}

// ----------------------------------------------------------------------
// Clock
// ----------------------------------------------------------------------

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(now)))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------
// In-process neighbors
// ----------------------------------------------------------------------

/// A neighbor backed by another in-process [`Node`].
pub struct LocalNeighbor {
    target: String,
    node: OnceLock<Weak<Node>>,
    reachable: AtomicBool,
}

impl LocalNeighbor {
    pub fn new(target: &str) -> Arc<Self> {
        Arc::new(Self {
            target: target.to_string(),
            node: OnceLock::new(),
            reachable: AtomicBool::new(true),
        })
    }

    /// Point this neighbor at `node`. Only the first call has an effect.
    pub fn connect(&self, node: &Arc<Node>) {
        let _ = self.node.set(Arc::downgrade(node));
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn node(&self) -> Result<Arc<Node>, NetworkError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(NetworkError::Unreachable(self.target.clone()));
        }
        self.node
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| NetworkError::Unreachable(self.target.clone()))
    }
}

#[async_trait]
impl Neighbor for LocalNeighbor {
    fn target(&self) -> &str {
        &self.target
    }

    async fn get_blocks(&self, from_height: u64) -> Result<Vec<Block>, NetworkError> {
        Ok(self.node()?.blocks_from(from_height))
    }

    async fn get_transactions(&self) -> Result<Vec<Transaction>, NetworkError> {
        Ok(self.node()?.transactions())
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<(), NetworkError> {
        self.node()?
            .add_transaction(request.clone())
            .map(|_| ())
            .map_err(|e| NetworkError::Rejected(e.to_string()))
    }

    async fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>, NetworkError> {
        Ok(self.node()?.utxos(address))
    }
}

/// A neighbor serving a fixed chain, paged like a real node.
pub struct StaticNeighbor {
    target: String,
    blocks: Vec<Block>,
    page: usize,
}

impl StaticNeighbor {
    pub fn new(target: &str, blocks: Vec<Block>) -> Arc<Self> {
        Arc::new(Self { target: target.to_string(), blocks, page: settings().blocks_count_limit as usize })
    }
}

#[async_trait]
impl Neighbor for StaticNeighbor {
    fn target(&self) -> &str {
        &self.target
    }

    async fn get_blocks(&self, from_height: u64) -> Result<Vec<Block>, NetworkError> {
        Ok(self.blocks.iter().skip(from_height as usize).take(self.page).cloned().collect())
    }

    async fn get_transactions(&self) -> Result<Vec<Transaction>, NetworkError> {
        Ok(Vec::new())
    }

    async fn send_transaction(&self, _: &TransactionRequest) -> Result<(), NetworkError> {
        Err(NetworkError::Rejected("read only".into()))
    }

    async fn get_utxos(&self, _: &Address) -> Result<Vec<Utxo>, NetworkError> {
        Ok(Vec::new())
    }
}

// ----------------------------------------------------------------------
// Networks
// ----------------------------------------------------------------------

/// A fully connected set of in-process nodes sharing one clock.
pub struct Cluster {
    pub nodes: Vec<Arc<Node>>,
    pub clock: Arc<ManualClock>,
    /// `(from, to, link)` for every directed link.
    links: Vec<(usize, usize, Arc<LocalNeighbor>)>,
}

impl Cluster {
    /// One node per entry; `Some(address)` makes the node a validator.
    pub fn new(validators: &[Option<Address>]) -> Self {
        let clock = ManualClock::new(T0);
        let mut links = Vec::new();
        let mut nodes = Vec::with_capacity(validators.len());

        for (i, validator) in validators.iter().enumerate() {
            let mut neighbors: Vec<Arc<dyn Neighbor>> = Vec::new();
            for j in (0..validators.len()).filter(|&j| j != i) {
                let link = LocalNeighbor::new(&target(j));
                neighbors.push(Arc::clone(&link) as Arc<dyn Neighbor>);
                links.push((i, j, link));
            }
            nodes.push(Node::with_parts(
                node_config(i, *validator),
                neighbors,
                Arc::new(OpenRegistry),
                Arc::clone(&clock) as Arc<dyn Clock>,
            ));
        }
        for (_, to, link) in &links {
            link.connect(&nodes[*to]);
        }

        Self { nodes, clock, links }
    }

    pub fn node(&self, index: usize) -> &Arc<Node> {
        &self.nodes[index]
    }

    /// Make node `index` unreachable from every other node.
    pub fn isolate(&self, index: usize) {
        for (_, to, link) in &self.links {
            if *to == index {
                link.set_reachable(false);
            }
        }
    }

    /// Undo [`isolate`](Self::isolate).
    pub fn reconnect(&self, index: usize) {
        for (_, to, link) in &self.links {
            if *to == index {
                link.set_reachable(true);
            }
        }
    }

    /// Move the shared clock to `timestamp` and run one verification round on
    /// every node, in index order.
    pub async fn verify_all(&self, timestamp: i64) {
        self.clock.set(timestamp);
        for node in &self.nodes {
            node.verify(timestamp).await;
        }
    }

    /// Tip hash of every node.
    pub fn tips(&self) -> Vec<Option<Hash256>> {
        self.nodes.iter().map(|n| n.ledger().copy().last_hash()).collect()
    }
}

/// Host target of node `index` in a [`Cluster`].
pub fn target(index: usize) -> String {
    format!("node-{index}")
}

pub fn node_config(index: usize, validator: Option<Address>) -> NodeConfig {
    let mut config = NodeConfig {
        protocol: settings(),
        validator: ValidatorConfig { address: validator },
        ..NodeConfig::default()
    };
    config.network.host_target = target(index);
    config
}

/// A single node with no neighbors.
pub fn solo_node(validator: Address, clock: &Arc<ManualClock>) -> Arc<Node> {
    Node::with_parts(
        node_config(0, Some(validator)),
        Vec::new(),
        Arc::new(OpenRegistry),
        Arc::clone(clock) as Arc<dyn Clock>,
    )
}

/// Run `count` validation ticks on `node`, starting at height `first`.
pub async fn validate_heights(node: &Node, first: i64, count: i64) {
    for height in first..first + count {
        node.validate(block_time(height)).await;
    }
}

// ----------------------------------------------------------------------
// Transactions
// ----------------------------------------------------------------------

/// Spend `utxo` (owned by `key`): `amount` to `to`, the rest minus `fee` back
/// to `key` when non-zero.
pub fn transfer(
    key: &KeyPair,
    utxo: &Utxo,
    to: Address,
    amount: u64,
    fee: u64,
    timestamp: i64,
) -> Transaction {
    let mut outputs = vec![Output::new(to, false, amount)];
    let change = utxo.output.value - amount - fee;
    if change > 0 {
        outputs.push(Output::new(key.address(), false, change));
    }
    Transaction::new(vec![key.sign_input(&utxo.outpoint)], outputs, timestamp).unwrap()
}

/// The only UTXO of `address` on `node`.
pub fn single_utxo(node: &Node, address: &Address) -> Utxo {
    let utxos = node.utxos(address);
    assert_eq!(utxos.len(), 1, "expected one UTXO for {address}, found {utxos:?}");
    utxos.into_iter().next().unwrap()
}

/// Rebuild the `previous_hash` links of `blocks` after tampering.
pub fn relink(blocks: &mut [Block]) {
    let mut previous = Hash256::ZERO;
    for block in blocks {
        block.previous_hash = previous;
        previous = block.hash();
    }
}
