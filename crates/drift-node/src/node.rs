//! Node composition.
//!
//! The [`Node`] wires the ledger, the transaction pool, the block assembler
//! and the chain reconciler to the configured neighbors and registry. The
//! two periodic duties are exposed as [`Job`]s for the [`Scheduler`]:
//! block validation once per interval, chain verification on the
//! sub-ticks in between.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use drift_consensus::{BlockAssembler, ChainReconciler, ReconcileOutcome};
use drift_core::crypto::Ed25519Verifier;
use drift_core::error::{MempoolError, NetworkError};
use drift_core::ledger::Ledger;
use drift_core::mempool::{TransactionRequest, TransactionsPool};
use drift_core::settings::ProtocolSettings;
use drift_core::traits::{Clock, DecayCalculator, Neighbor, Registry, SystemClock, Verifier};
use drift_core::types::{Address, Block, Hash256, Transaction, Utxo};
use drift_core::utxo::UtxoOverlay;
use drift_decay::DecayEngine;
use drift_network::neighborhood;

use crate::config::NodeConfig;
use crate::registry;
use crate::scheduler::{Job, Scheduler};

/// A running Drift node.
pub struct Node {
    config: NodeConfig,
    clock: Arc<dyn Clock>,
    ledger: Arc<Ledger>,
    pool: Arc<TransactionsPool>,
    neighbors: Vec<Arc<dyn Neighbor>>,
    /// `None` when no validator address is configured.
    assembler: Option<BlockAssembler>,
    reconciler: ChainReconciler,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("host", &self.config.network.host_target)
            .field("blocks", &self.ledger.len())
            .field("pending", &self.pool.len())
            .field("neighbors", &self.neighbors.len())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Create a node reaching its seeds over JSON-RPC, using the registry
    /// and system clock described by `config`.
    pub fn new(config: NodeConfig) -> Arc<Self> {
        let neighbors = neighborhood(&config.network);
        let registry = registry::from_config(&config.registry);
        Self::with_parts(config, neighbors, registry, Arc::new(SystemClock))
    }

    /// Create a node from explicit collaborators.
    pub fn with_parts(
        config: NodeConfig,
        neighbors: Vec<Arc<dyn Neighbor>>,
        registry: Arc<dyn Registry>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let settings = config.protocol.clone();
        let decay: Arc<dyn DecayCalculator> = Arc::new(DecayEngine::from_settings(&settings));
        let verifier: Arc<dyn Verifier> = Arc::new(Ed25519Verifier);

        let ledger = Arc::new(Ledger::new(settings.clone(), Arc::clone(&decay)));
        let pool = Arc::new(TransactionsPool::new(settings, decay, Arc::clone(&verifier)));
        let assembler = config.validator.address.map(|address| {
            BlockAssembler::new(
                Arc::clone(&ledger),
                Arc::clone(&pool),
                Arc::clone(&registry),
                Arc::clone(&verifier),
                address,
            )
        });
        let reconciler = ChainReconciler::new(Arc::clone(&ledger), registry, verifier);

        info!(
            host = %config.network.host_target,
            neighbors = neighbors.len(),
            validator = ?config.validator.address,
            "node created"
        );

        Arc::new(Self { config, clock, ledger, pool, neighbors, assembler, reconciler })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn settings(&self) -> &ProtocolSettings {
        self.ledger.settings()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn pool(&self) -> &Arc<TransactionsPool> {
        &self.pool
    }

    pub fn neighbors(&self) -> &[Arc<dyn Neighbor>] {
        &self.neighbors
    }

    /// Address credited by this node's blocks, if it validates.
    pub fn validator(&self) -> Option<Address> {
        self.assembler.as_ref().map(|a| a.validator())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn blocks_from(&self, height: u64) -> Vec<Block> {
        self.ledger.blocks_from(height)
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.pool.transactions()
    }

    pub fn utxos(&self, address: &Address) -> Vec<Utxo> {
        self.ledger.copy().utxos_of(address)
    }

    /// Balance of `address` aged to the current time.
    pub fn amount(&self, address: &Address) -> u64 {
        self.ledger.calculate_total_amount(self.clock.now(), address)
    }

    pub fn first_block_timestamp(&self) -> Option<i64> {
        self.ledger.copy().first_timestamp()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Admit `request` into the pool and forward it to every neighbor except
    /// the one it came from.
    pub fn add_transaction(&self, request: TransactionRequest) -> Result<Hash256, MempoolError> {
        let view = self.ledger.copy();
        let id = self.pool.add_transaction(&request, &view)?;
        self.broadcast(&request, id);
        Ok(id)
    }

    fn broadcast(&self, request: &TransactionRequest, id: Hash256) {
        let forwarded = Arc::new(request.forwarded_by(&self.config.network.host_target));
        for neighbor in &self.neighbors {
            if request.broadcaster_target.as_deref() == Some(neighbor.target()) {
                continue;
            }
            let neighbor = Arc::clone(neighbor);
            let forwarded = Arc::clone(&forwarded);
            tokio::spawn(async move {
                if let Err(e) = neighbor.send_transaction(&forwarded).await {
                    debug!(neighbor = neighbor.target(), tx = %id, "forward failed: {e}");
                }
            });
        }
    }

    /// Pull the pending transactions of every neighbor into the pool. Returns
    /// how many were admitted.
    ///
    /// Each transaction is admitted with the fee it pays at the next block
    /// timestamp. Pulled transactions are not forwarded again.
    pub async fn catch_up(&self) -> usize {
        let view = self.ledger.copy();
        let Some(tip_timestamp) = view.last_timestamp() else {
            debug!("skipping transaction catch-up on an empty chain");
            return 0;
        };
        let next_timestamp = tip_timestamp + self.settings().validation_interval_nanos();
        let timeout = self.settings().validation_timeout();

        let mut requests = JoinSet::new();
        for neighbor in &self.neighbors {
            let neighbor = Arc::clone(neighbor);
            requests.spawn(async move {
                let result = tokio::time::timeout(timeout, neighbor.get_transactions())
                    .await
                    .unwrap_or(Err(NetworkError::Timeout));
                (neighbor.target().to_string(), result)
            });
        }

        let mut admitted = 0;
        while let Some(joined) = requests.join_next().await {
            let (target, transactions) = match joined {
                Ok((target, Ok(transactions))) => (target, transactions),
                Ok((target, Err(e))) => {
                    debug!(neighbor = %target, "transaction catch-up failed: {e}");
                    continue;
                }
                Err(e) => {
                    warn!("transaction catch-up task failed: {e}");
                    continue;
                }
            };
            for tx in transactions {
                if self.pool.contains(&tx.id()) {
                    continue;
                }
                let fee = match tx.fee(
                    self.settings(),
                    self.ledger.decay().as_ref(),
                    view.as_ref(),
                    next_timestamp,
                ) {
                    Ok(fee) => fee,
                    Err(e) => {
                        debug!(neighbor = %target, tx = %tx.id(), "skipping pulled transaction: {e}");
                        continue;
                    }
                };
                let request = TransactionRequest::new(tx, fee).forwarded_by(&target);
                match self.pool.add_transaction(&request, &view) {
                    Ok(_) => admitted += 1,
                    Err(e) => debug!(neighbor = %target, "pulled transaction refused: {e}"),
                }
            }
        }
        if admitted > 0 {
            info!(admitted, "caught up pending transactions");
        }
        admitted
    }

    // ------------------------------------------------------------------
    // Periodic duties
    // ------------------------------------------------------------------

    /// Assemble the block for `timestamp`. No-op if the node does not
    /// validate.
    pub async fn validate(&self, timestamp: i64) {
        let Some(assembler) = &self.assembler else {
            return;
        };
        match assembler.validate(timestamp).await {
            Ok(hash) => debug!(at = %format_timestamp(timestamp), %hash, "validation done"),
            Err(e) => error!(at = %format_timestamp(timestamp), "validation failed: {e}"),
        }
    }

    /// Reconcile the chain with the neighbors at `timestamp`.
    pub async fn verify(&self, timestamp: i64) -> ReconcileOutcome {
        let outcome = self.reconciler.reconcile(&self.neighbors, timestamp).await;
        if matches!(outcome, ReconcileOutcome::Replaced { .. }) {
            self.prune_pool();
        }
        debug!(at = %format_timestamp(timestamp), ?outcome, blocks = self.ledger.len(), "verification done");
        outcome
    }

    /// Drop pending transactions that no longer apply on top of the current
    /// chain, e.g. because an adopted chain already contains them. Returns
    /// how many were dropped.
    pub fn prune_pool(&self) -> usize {
        let view = self.ledger.copy();
        let Some(tip_timestamp) = view.last_timestamp() else {
            return 0;
        };
        let next_timestamp = tip_timestamp + self.settings().validation_interval_nanos();
        let mut overlay = UtxoOverlay::new(view.utxos());
        let stale: Vec<Hash256> = self
            .pool
            .snapshot()
            .iter()
            .filter(|tx| overlay.apply(tx, next_timestamp).is_err())
            .map(|tx| tx.id())
            .collect();
        let removed = self.pool.remove(stale.iter());
        if removed > 0 {
            debug!(removed, "pruned pending transactions");
        }
        removed
    }

    /// Startup synchronisation: adopt the neighbors' chain, then their
    /// pending transactions.
    pub async fn synchronize(&self) {
        self.verify(self.clock.now()).await;
        self.catch_up().await;
    }

    /// Schedulers driving [`validate`](Self::validate) and
    /// [`verify`](Self::verify). Neither is started.
    pub fn schedulers(self: &Arc<Self>) -> NodeSchedulers {
        let settings = self.settings();
        let interval = settings.validation_interval_nanos();
        let validation = self.assembler.as_ref().map(|_| {
            Scheduler::new(
                "validation",
                Arc::new(ValidationJob(Arc::clone(self))),
                Arc::clone(&self.clock),
                interval,
                1,
                0,
            )
        });
        let verification = Scheduler::new(
            "verification",
            Arc::new(VerificationJob(Arc::clone(self))),
            Arc::clone(&self.clock),
            interval,
            settings.verifications_count_per_validation,
            1,
        );
        NodeSchedulers { validation, verification }
    }
}

/// The node's periodic schedulers.
#[derive(Debug)]
pub struct NodeSchedulers {
    pub validation: Option<Scheduler>,
    pub verification: Scheduler,
}

impl NodeSchedulers {
    pub fn start(&self) {
        if let Some(validation) = &self.validation {
            validation.start();
        }
        self.verification.start();
    }

    pub fn stop(&self) {
        if let Some(validation) = &self.validation {
            validation.stop();
        }
        self.verification.stop();
    }
}

struct ValidationJob(Arc<Node>);

#[async_trait]
impl Job for ValidationJob {
    async fn run(&self, timestamp: i64) {
        self.0.validate(timestamp).await;
    }
}

struct VerificationJob(Arc<Node>);

#[async_trait]
impl Job for VerificationJob {
    async fn run(&self, timestamp: i64) {
        self.0.verify(timestamp).await;
    }
}

/// RFC 3339 rendering of a nanosecond timestamp, for logs.
pub fn format_timestamp(nanos: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::Millis, true)
}
