//! The blockchain of a node and its derived state.
//!
//! [`LedgerView`] is an immutable-by-convention snapshot: the blocks, the
//! unspent outputs they leave and the registered-address set they evolve.
//! [`Ledger`] holds the current view behind a lock and is the single commit
//! point for new blocks and for chain replacement.
//!
//! Blocks reaching the ledger have already been validated by the caller.
//! A transaction that no longer applies is a bug upstream: it is logged at
//! error level and skipped, the block is still appended.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

use crate::settings::ProtocolSettings;
use crate::traits::{DecayCalculator, UtxoFinder};
use crate::types::{Address, Block, Hash256, OutPoint, Transaction, Utxo};
use crate::utxo::UtxoSet;

/// A chain of blocks together with the state it derives.
#[derive(Debug, Clone, Default)]
pub struct LedgerView {
    blocks: Vec<Arc<Block>>,
    utxos: UtxoSet,
    registered: BTreeSet<Address>,
}

impl LedgerView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `blocks` from genesis.
    pub fn from_blocks<I>(blocks: I) -> Self
    where
        I: IntoIterator<Item = Arc<Block>>,
    {
        let mut view = Self::new();
        for block in blocks {
            view.apply_block(block);
        }
        view
    }

    /// Append a block and update the derived state.
    pub fn apply_block(&mut self, block: Arc<Block>) {
        for tx in &block.transactions {
            if let Err(e) = self.utxos.apply(tx, block.timestamp) {
                error!(tx = %tx.id(), block_timestamp = block.timestamp, "skipped inconsistent transaction: {e}");
            }
        }
        for address in &block.removed_registered_addresses {
            self.registered.remove(address);
        }
        self.registered
            .extend(block.added_registered_addresses.iter().copied());
        self.blocks.push(block);
    }

    pub fn blocks(&self) -> &[Arc<Block>] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn last_block(&self) -> Option<&Arc<Block>> {
        self.blocks.last()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.blocks.last().map(|b| b.timestamp)
    }

    pub fn last_hash(&self) -> Option<Hash256> {
        self.blocks.last().map(|b| b.hash())
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.blocks.first().map(|b| b.timestamp)
    }

    /// Whether `tx` is part of the last committed block.
    pub fn last_block_contains(&self, tx: &Transaction) -> bool {
        self.blocks
            .last()
            .is_some_and(|b| b.transactions.iter().any(|t| t == tx))
    }

    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    pub fn utxos_of(&self, address: &Address) -> Vec<Utxo> {
        self.utxos.utxos_of(address)
    }

    pub fn is_registered(&self, address: &Address) -> bool {
        self.registered.contains(address)
    }

    pub fn registered_addresses(&self) -> &BTreeSet<Address> {
        &self.registered
    }

    /// Sum of the address's unspent outputs aged to `timestamp`.
    pub fn calculate_total_amount(
        &self,
        timestamp: i64,
        address: &Address,
        decay: &dyn DecayCalculator,
    ) -> u64 {
        self.utxos
            .utxos_of(address)
            .iter()
            .fold(0u64, |acc, utxo| acc.saturating_add(utxo.value(decay, timestamp)))
    }
}

impl UtxoFinder for LedgerView {
    fn find_utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.find_utxo(outpoint)
    }
}

/// The node's chain, shared between the pool, the assembler, the reconciler
/// and the RPC server.
pub struct Ledger {
    view: RwLock<Arc<LedgerView>>,
    decay: Arc<dyn DecayCalculator>,
    settings: ProtocolSettings,
}

impl Ledger {
    pub fn new(settings: ProtocolSettings, decay: Arc<dyn DecayCalculator>) -> Self {
        Self {
            view: RwLock::new(Arc::new(LedgerView::new())),
            decay,
            settings,
        }
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    pub fn decay(&self) -> &Arc<dyn DecayCalculator> {
        &self.decay
    }

    /// Commit a new block on top of the current tip and return its hash.
    ///
    /// No validation happens here.
    pub fn add_block(
        &self,
        timestamp: i64,
        transactions: Vec<Transaction>,
        added_registered_addresses: Vec<Address>,
        removed_registered_addresses: Vec<Address>,
    ) -> Hash256 {
        let mut guard = self.view.write();
        append_block(
            Arc::make_mut(&mut guard),
            timestamp,
            transactions,
            added_registered_addresses,
            removed_registered_addresses,
        )
    }

    /// Commit a new block only if the tip is still the one the caller built
    /// it on. Returns `None` and leaves the chain untouched otherwise.
    pub fn add_block_if_tip(
        &self,
        expected_len: usize,
        expected_tip: Option<Hash256>,
        timestamp: i64,
        transactions: Vec<Transaction>,
        added_registered_addresses: Vec<Address>,
        removed_registered_addresses: Vec<Address>,
    ) -> Option<Hash256> {
        let mut guard = self.view.write();
        if guard.len() != expected_len || guard.last_hash() != expected_tip {
            return None;
        }
        Some(append_block(
            Arc::make_mut(&mut guard),
            timestamp,
            transactions,
            added_registered_addresses,
            removed_registered_addresses,
        ))
    }

    /// Snapshot of the current blocks.
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.view.read().blocks.clone()
    }

    /// Cheap snapshot of the whole view; later commits do not affect it.
    pub fn copy(&self) -> Arc<LedgerView> {
        Arc::clone(&self.view.read())
    }

    pub fn len(&self) -> usize {
        self.view.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.read().is_empty()
    }

    /// At most `blocks_count_limit` blocks starting at `height`.
    pub fn blocks_from(&self, height: u64) -> Vec<Block> {
        let view = self.copy();
        let start = usize::try_from(height).unwrap_or(usize::MAX);
        let limit = usize::try_from(self.settings.blocks_count_limit).unwrap_or(usize::MAX);
        view.blocks
            .iter()
            .skip(start)
            .take(limit)
            .map(|b| Block::clone(b))
            .collect()
    }

    pub fn calculate_total_amount(&self, timestamp: i64, address: &Address) -> u64 {
        self.copy()
            .calculate_total_amount(timestamp, address, self.decay.as_ref())
    }

    /// Replace the chain with `view` if the tip is still the one the caller
    /// started from. Returns whether the replacement happened.
    pub fn replace_if_tip(
        &self,
        expected_len: usize,
        expected_tip: Option<Hash256>,
        view: LedgerView,
    ) -> bool {
        let mut guard = self.view.write();
        if guard.len() != expected_len || guard.last_hash() != expected_tip {
            return false;
        }
        let (old_len, new_len) = (guard.len(), view.len());
        let tip = view.last_hash();
        *guard = Arc::new(view);
        info!(old_len, new_len, tip = ?tip, "replaced blockchain");
        true
    }
}

fn append_block(
    view: &mut LedgerView,
    timestamp: i64,
    transactions: Vec<Transaction>,
    added_registered_addresses: Vec<Address>,
    removed_registered_addresses: Vec<Address>,
) -> Hash256 {
    let block = Block {
        previous_hash: view.last_hash().unwrap_or(Hash256::ZERO),
        transactions,
        timestamp,
        added_registered_addresses,
        removed_registered_addresses,
    };
    let hash = block.hash();
    let count = block.transactions.len();
    view.apply_block(Arc::new(block));
    info!(height = view.len() - 1, %hash, transactions = count, "added block");
    hash
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("len", &self.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Input, Output};

    struct NoDecay;

    impl DecayCalculator for NoDecay {
        fn value(&self, initial_value: u64, _: bool, _: i64, _: i64) -> u64 {
            initial_value
        }
    }

    /// Halves the value for every elapsed unit of 100ns.
    struct StepDecay;

    impl DecayCalculator for StepDecay {
        fn value(&self, initial_value: u64, _: bool, origin: i64, current: i64) -> u64 {
            let steps = ((current - origin).max(0) / 100).min(63) as u32;
            initial_value >> steps
        }
    }

    fn addr(b: u8) -> Address {
        Address([b; 32])
    }

    fn ledger() -> Ledger {
        Ledger::new(ProtocolSettings::default(), Arc::new(NoDecay))
    }

    fn genesis(ledger: &Ledger) -> Transaction {
        let reward = Transaction::reward(addr(1), true, 0, 1_000).unwrap();
        ledger.add_block(0, vec![reward.clone()], vec![addr(1)], vec![]);
        reward
    }

    // --- add_block ---

    #[test]
    fn first_block_links_to_zero() {
        let ledger = ledger();
        genesis(&ledger);
        let blocks = ledger.blocks();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].previous_hash.is_zero());
    }

    #[test]
    fn blocks_link_by_hash() {
        let ledger = ledger();
        genesis(&ledger);
        let reward = Transaction::reward(addr(2), false, 60, 0).unwrap();
        let hash = ledger.add_block(60, vec![reward], vec![], vec![]);
        let blocks = ledger.blocks();
        assert_eq!(blocks[1].previous_hash, blocks[0].hash());
        assert_eq!(blocks[1].hash(), hash);
    }

    #[test]
    fn registered_set_follows_blocks() {
        let ledger = ledger();
        genesis(&ledger);
        assert!(ledger.copy().is_registered(&addr(1)));
        let reward = Transaction::reward(addr(2), false, 60, 0).unwrap();
        ledger.add_block(60, vec![reward], vec![addr(2)], vec![addr(1)]);
        let view = ledger.copy();
        assert!(!view.is_registered(&addr(1)));
        assert!(view.is_registered(&addr(2)));
    }

    #[test]
    fn inconsistent_transaction_is_skipped() {
        let ledger = ledger();
        genesis(&ledger);
        let bogus = Transaction::new(
            vec![Input {
                output_index: 9,
                transaction_id: Hash256([9; 32]),
                public_key: vec![0; 32],
                signature: vec![0; 64],
            }],
            vec![Output::new(addr(3), false, 10)],
            1,
        )
        .unwrap();
        ledger.add_block(60, vec![bogus], vec![], vec![]);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.calculate_total_amount(60, &addr(3)), 0);
    }

    #[test]
    fn add_block_if_tip_appends_on_match() {
        let ledger = ledger();
        genesis(&ledger);
        let tip = ledger.copy().last_hash();
        let hash = ledger.add_block_if_tip(1, tip, 60, vec![], vec![], vec![]).unwrap();
        let blocks = ledger.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].hash(), hash);
        assert_eq!(Some(blocks[1].previous_hash), tip);
    }

    #[test]
    fn add_block_if_tip_refuses_moved_tip() {
        let ledger = ledger();
        assert!(ledger.add_block_if_tip(0, None, 0, vec![], vec![], vec![]).is_some());
        let tip = ledger.copy().last_hash();
        ledger.add_block(60, vec![], vec![], vec![]);
        assert!(ledger.add_block_if_tip(1, tip, 60, vec![], vec![], vec![]).is_none());
        assert!(ledger.add_block_if_tip(0, None, 0, vec![], vec![], vec![]).is_none());
        assert_eq!(ledger.len(), 2);
    }

    // --- snapshots ---

    #[test]
    fn snapshot_is_not_mutated_by_later_commit() {
        let ledger = ledger();
        genesis(&ledger);
        let snapshot = ledger.copy();
        let blocks = ledger.blocks();
        ledger.add_block(60, vec![], vec![], vec![]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(blocks.len(), 1);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn blocks_from_respects_limit() {
        let settings = ProtocolSettings { blocks_count_limit: 2, ..ProtocolSettings::default() };
        let ledger = Ledger::new(settings, Arc::new(NoDecay));
        for i in 0..5 {
            ledger.add_block(i * 60, vec![], vec![], vec![]);
        }
        let page = ledger.blocks_from(1);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].timestamp, 60);
        assert!(ledger.blocks_from(10).is_empty());
    }

    // --- balances ---

    #[test]
    fn total_amount_sums_outputs() {
        let ledger = ledger();
        let reward = genesis(&ledger);
        let outpoint = OutPoint { transaction_id: reward.id(), output_index: 0 };
        let tx = Transaction::new(
            vec![Input {
                output_index: outpoint.output_index,
                transaction_id: outpoint.transaction_id,
                public_key: vec![0; 32],
                signature: vec![0; 64],
            }],
            vec![Output::new(addr(2), false, 300), Output::new(addr(1), true, 690)],
            10,
        )
        .unwrap();
        ledger.add_block(60, vec![tx], vec![], vec![]);
        assert_eq!(ledger.calculate_total_amount(60, &addr(2)), 300);
        assert_eq!(ledger.calculate_total_amount(60, &addr(1)), 690);
        assert_eq!(ledger.calculate_total_amount(60, &addr(9)), 0);
    }

    #[test]
    fn total_amount_is_aged() {
        let ledger = Ledger::new(ProtocolSettings::default(), Arc::new(StepDecay));
        ledger.add_block(0, vec![Transaction::reward(addr(1), false, 0, 1_000).unwrap()], vec![], vec![]);
        assert_eq!(ledger.calculate_total_amount(0, &addr(1)), 1_000);
        assert_eq!(ledger.calculate_total_amount(200, &addr(1)), 250);
    }

    // --- replace_if_tip ---

    #[test]
    fn replace_if_tip_swaps_on_match() {
        let ledger = ledger();
        genesis(&ledger);
        let other = LedgerView::from_blocks(vec![Arc::new(Block {
            previous_hash: Hash256::ZERO,
            transactions: vec![Transaction::reward(addr(5), false, 0, 1).unwrap()],
            timestamp: 0,
            added_registered_addresses: vec![],
            removed_registered_addresses: vec![],
        })]);
        let tip = ledger.copy().last_hash();
        assert!(ledger.replace_if_tip(1, tip, other));
        assert_eq!(ledger.calculate_total_amount(0, &addr(5)), 1);
    }

    #[test]
    fn replace_if_tip_refuses_stale_expectation() {
        let ledger = ledger();
        genesis(&ledger);
        let tip = ledger.copy().last_hash();
        ledger.add_block(60, vec![], vec![], vec![]);
        assert!(!ledger.replace_if_tip(1, tip, LedgerView::new()));
        assert_eq!(ledger.len(), 2);
    }
}
