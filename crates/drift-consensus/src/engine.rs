//! Block assembly.
//!
//! On every validation tick the node turns its pending pool into the next
//! block. The result always passes [`validate_block`] against the chain it
//! extends: transactions that would make it fail are evicted instead of
//! failing the whole block.
//!
//! Assembly order:
//!
//! 1. transactions timestamped past the block window are deferred to a later
//!    block and stay in the pool;
//! 2. too old, malformed and badly signed transactions are evicted;
//! 3. the rest is shuffled, so no sender can predict which of its
//!    transactions survive step 4;
//! 4. per sender, transactions are dropped from the front of the shuffled
//!    order until the sender's total spend fits its balance;
//! 5. transactions paying income to an address that is neither registered
//!    nor approved by the registry are evicted;
//! 6. the remaining transactions are applied in order, evicting failures and
//!    summing the fees into the validator reward.
//!
//! The block is committed only if the chain tip is still the one assembly
//! started from. A reconciliation that replaced the chain in the meantime
//! aborts the tick and leaves the pool untouched.
//!
//! [`validate_block`]: drift_core::block_validation::validate_block

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use drift_core::block_validation::registration_candidates;
use drift_core::error::BlockError;
use drift_core::ledger::{Ledger, LedgerView};
use drift_core::mempool::{TransactionsPool, check_well_formed};
use drift_core::traits::{DecayCalculator, Registry, UtxoFinder, Verifier};
use drift_core::types::{Address, Hash256, OutPoint, Transaction, Utxo};
use drift_core::utxo::UtxoOverlay;

use crate::registration::RegistryAnswers;

/// Builds and commits the next block from the pending pool.
pub struct BlockAssembler {
    ledger: Arc<Ledger>,
    pool: Arc<TransactionsPool>,
    registry: Arc<dyn Registry>,
    verifier: Arc<dyn Verifier>,
    validator: Address,
}

impl fmt::Debug for BlockAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAssembler")
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl BlockAssembler {
    pub fn new(
        ledger: Arc<Ledger>,
        pool: Arc<TransactionsPool>,
        registry: Arc<dyn Registry>,
        verifier: Arc<dyn Verifier>,
        validator: Address,
    ) -> Self {
        Self { ledger, pool, registry, verifier, validator }
    }

    pub fn validator(&self) -> Address {
        self.validator
    }

    /// Assemble and commit the block for `timestamp`. Returns its hash.
    ///
    /// On an empty chain this creates the genesis block. A tick that does not
    /// land exactly one interval after the tip commits nothing.
    pub async fn validate(&self, timestamp: i64) -> Result<Hash256, BlockError> {
        let view = self.ledger.copy();
        let Some(tip_timestamp) = view.last_timestamp() else {
            return self.genesis(timestamp);
        };
        if tip_timestamp == timestamp {
            return Err(BlockError::DuplicateTimestamp(timestamp));
        }
        let settings = self.ledger.settings();
        if timestamp != tip_timestamp + settings.validation_interval_nanos() {
            return Err(BlockError::MissingBlock { tip: tip_timestamp, requested: timestamp });
        }

        let max_timestamp = timestamp + settings.transaction_timestamp_tolerance();
        let (deferred, current): (Vec<_>, Vec<_>) = self
            .pool
            .snapshot()
            .into_iter()
            .partition(|tx| tx.timestamp() > max_timestamp);
        let drained: Vec<Hash256> = current.iter().map(Transaction::id).collect();

        let outputs = PendingOutputs::new(&view, &current, timestamp);
        let mut candidates: Vec<Transaction> = current
            .into_iter()
            .filter(|tx| self.is_admissible(tx, tip_timestamp, &outputs))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        let candidates = self.enforce_budgets(candidates, &view, &outputs, timestamp);

        let answers = RegistryAnswers::collect(
            &self.registry,
            registration_candidates(&candidates, &view, self.verifier.as_ref()),
            settings.validation_timeout(),
        )
        .await;
        let candidates: Vec<Transaction> = candidates
            .into_iter()
            .filter(|tx| {
                tx.outputs()
                    .iter()
                    .filter(|o| o.has_income)
                    .all(|o| view.is_registered(&o.address) || answers.approves(&o.address))
            })
            .collect();

        let (mut transactions, total_fees) = self.apply(candidates, &view, timestamp);

        let added: Vec<Address> =
            registration_candidates(&transactions, &view, self.verifier.as_ref())
                .into_iter()
                .filter(|a| answers.approves(a))
                .collect();
        let removed = self.revoked(&view).await;

        let reward = Transaction::reward(self.validator, false, timestamp, total_fees)
            .map_err(|source| BlockError::Transaction { index: transactions.len(), source })?;
        transactions.push(reward);

        let included = transactions.len() - 1;
        let Some(hash) = self.ledger.add_block_if_tip(
            view.len(),
            view.last_hash(),
            timestamp,
            transactions,
            added,
            removed,
        ) else {
            warn!(timestamp, expected_len = view.len(), "chain replaced during validation, block dropped");
            return Err(BlockError::TipMoved { expected_len: view.len() });
        };
        let removed_from_pool = self.pool.remove(drained.iter());
        info!(
            %hash,
            included,
            evicted = removed_from_pool.saturating_sub(included),
            deferred = deferred.len(),
            reward = total_fees,
            "validated block"
        );
        Ok(hash)
    }

    fn genesis(&self, timestamp: i64) -> Result<Hash256, BlockError> {
        let amount = self.ledger.settings().genesis_amount;
        let reward = Transaction::reward(self.validator, true, timestamp, amount)
            .map_err(|source| BlockError::Transaction { index: 0, source })?;
        let hash = self
            .ledger
            .add_block_if_tip(0, None, timestamp, vec![reward], vec![self.validator], Vec::new())
            .ok_or(BlockError::TipMoved { expected_len: 0 })?;
        info!(%hash, validator = %self.validator, amount, "created genesis block");
        Ok(hash)
    }

    fn is_admissible(&self, tx: &Transaction, min_timestamp: i64, outputs: &PendingOutputs<'_>) -> bool {
        let verdict = check_well_formed(tx)
            .and_then(|()| tx.verify_signatures(outputs, self.verifier.as_ref()));
        match verdict {
            Err(e) => {
                debug!(tx = %tx.id(), "evicted transaction: {e}");
                false
            }
            Ok(()) if tx.timestamp() < min_timestamp || tx.outputs().iter().any(|o| o.has_reward) => {
                debug!(tx = %tx.id(), timestamp = tx.timestamp(), "evicted stale transaction");
                false
            }
            Ok(()) => true,
        }
    }

    /// Drop transactions from the front of `txs` until every sender's total
    /// spend fits its balance in `view`.
    fn enforce_budgets(
        &self,
        txs: Vec<Transaction>,
        view: &LedgerView,
        outputs: &PendingOutputs<'_>,
        timestamp: i64,
    ) -> Vec<Transaction> {
        let decay = self.ledger.decay().as_ref();
        let spends: Vec<BTreeMap<Address, u64>> = txs
            .iter()
            .map(|tx| spend_by_sender(tx, outputs, decay, timestamp))
            .collect();
        let mut kept = vec![true; txs.len()];
        let mut balances: HashMap<Address, u64> = HashMap::new();

        loop {
            let mut totals: BTreeMap<Address, u64> = BTreeMap::new();
            for spend in spends.iter().zip(&kept).filter(|(_, k)| **k).map(|(s, _)| s) {
                for (address, value) in spend {
                    let total = totals.entry(*address).or_default();
                    *total = total.saturating_add(*value);
                }
            }
            let over = totals.into_iter().find_map(|(address, total)| {
                let balance = *balances
                    .entry(address)
                    .or_insert_with(|| view.calculate_total_amount(timestamp, &address, decay));
                (total > balance).then_some(address)
            });
            let Some(address) = over else { break };
            match (0..txs.len()).find(|&i| kept[i] && spends[i].contains_key(&address)) {
                Some(index) => {
                    debug!(tx = %txs[index].id(), sender = %address, "evicted over-budget transaction");
                    kept[index] = false;
                }
                None => break,
            }
        }

        txs.into_iter()
            .zip(kept)
            .filter_map(|(tx, keep)| keep.then_some(tx))
            .collect()
    }

    /// Apply `txs` in order on top of `view`, skipping failures. Returns the
    /// applied transactions and their total fee.
    fn apply(&self, txs: Vec<Transaction>, view: &LedgerView, timestamp: i64) -> (Vec<Transaction>, u64) {
        let settings = self.ledger.settings();
        let decay = self.ledger.decay().as_ref();
        let mut overlay = UtxoOverlay::new(view.utxos());
        let mut applied = Vec::with_capacity(txs.len() + 1);
        let mut total_fees = 0u64;

        for tx in txs {
            let fee = match tx.fee(settings, decay, &overlay, timestamp) {
                Ok(fee) => fee,
                Err(e) => {
                    debug!(tx = %tx.id(), "evicted transaction: {e}");
                    continue;
                }
            };
            let Some(sum) = total_fees.checked_add(fee) else {
                debug!(tx = %tx.id(), "evicted transaction: fee overflow");
                continue;
            };
            if let Err(e) = overlay.apply(&tx, timestamp) {
                debug!(tx = %tx.id(), "evicted transaction: {e}");
                continue;
            }
            total_fees = sum;
            applied.push(tx);
        }
        (applied, total_fees)
    }

    /// Registered addresses the registry no longer accepts. Addresses whose
    /// query fails stay registered.
    async fn revoked(&self, view: &LedgerView) -> Vec<Address> {
        let registered = view.registered_addresses();
        if registered.is_empty() {
            return Vec::new();
        }
        let answers = RegistryAnswers::collect(
            &self.registry,
            registered.iter().copied(),
            self.ledger.settings().validation_timeout(),
        )
        .await;
        registered
            .iter()
            .filter(|a| answers.rejects(a))
            .copied()
            .collect()
    }
}

/// Aged value each sender spends in `tx`.
fn spend_by_sender(
    tx: &Transaction,
    outputs: &PendingOutputs<'_>,
    decay: &dyn DecayCalculator,
    timestamp: i64,
) -> BTreeMap<Address, u64> {
    let mut spend = BTreeMap::new();
    for input in tx.inputs() {
        if let Some(utxo) = outputs.find_utxo(&input.outpoint()) {
            let total: &mut u64 = spend.entry(utxo.output.address).or_default();
            *total = total.saturating_add(utxo.value(decay, timestamp));
        }
    }
    spend
}

/// Committed outputs plus those created by the pending transactions, as if
/// they were all included in the block at `timestamp`.
struct PendingOutputs<'a> {
    view: &'a LedgerView,
    created: HashMap<OutPoint, Utxo>,
}

impl<'a> PendingOutputs<'a> {
    fn new(view: &'a LedgerView, pending: &[Transaction], timestamp: i64) -> Self {
        let mut created = HashMap::new();
        for tx in pending {
            for (index, output) in tx.outputs().iter().enumerate() {
                let Ok(output_index) = u16::try_from(index) else { break };
                let outpoint = OutPoint { transaction_id: tx.id(), output_index };
                created.insert(
                    outpoint,
                    Utxo { outpoint, output: output.clone(), origin_timestamp: timestamp },
                );
            }
        }
        Self { view, created }
    }
}

impl UtxoFinder for PendingOutputs<'_> {
    fn find_utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.view
            .find_utxo(outpoint)
            .or_else(|| self.created.get(outpoint).cloned())
    }
}
