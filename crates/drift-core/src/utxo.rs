//! Unspent output set and a borrowed overlay for speculative application.
//!
//! [`UtxoSet`] is the derived state of a ledger: every unspent output with
//! the timestamp of the block that created it, indexed by address.
//! [`UtxoOverlay`] evaluates a sequence of pending transactions on top of a
//! set without cloning it.
//!
//! Both enforce the same rules when applying a transaction:
//! - a transaction id is applied at most once,
//! - every input spends a known, unspent output, at most once,
//! - an address holds at most one income-bearing output.
//!
//! Zero-value outputs without income create nothing.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::TransactionError;
use crate::traits::UtxoFinder;
use crate::types::{Address, Hash256, OutPoint, Transaction, Utxo};

/// Read access shared by [`UtxoSet`] and [`UtxoOverlay`].
trait UtxoSource: UtxoFinder {
    fn contains_transaction(&self, id: &Hash256) -> bool;

    /// Outpoints of income-bearing outputs held by `address`.
    fn income_outpoints(&self, address: &Address) -> Vec<OutPoint>;
}

/// Changes a transaction makes once checked.
struct Staged {
    spent: Vec<OutPoint>,
    created: Vec<Utxo>,
}

fn stage(
    source: &impl UtxoSource,
    tx: &Transaction,
    timestamp: i64,
) -> Result<Staged, TransactionError> {
    if source.contains_transaction(&tx.id()) {
        return Err(TransactionError::DuplicateTransaction(tx.id().to_string()));
    }

    let mut spent = Vec::with_capacity(tx.inputs().len());
    for input in tx.inputs() {
        let outpoint = input.outpoint();
        if spent.contains(&outpoint) || source.find_utxo(&outpoint).is_none() {
            return Err(TransactionError::UnknownUtxo(outpoint.to_string()));
        }
        spent.push(outpoint);
    }

    let mut created = Vec::with_capacity(tx.outputs().len());
    let mut income_addresses = HashSet::new();
    for (index, output) in tx.outputs().iter().enumerate() {
        if output.has_income {
            let held = source
                .income_outpoints(&output.address)
                .into_iter()
                .any(|op| !spent.contains(&op));
            if held || !income_addresses.insert(output.address) {
                return Err(TransactionError::MultipleIncomes(output.address.to_string()));
            }
        } else if output.value == 0 {
            continue;
        }
        let output_index = u16::try_from(index)
            .map_err(|_| TransactionError::MalformedInput("too many outputs".into()))?;
        created.push(Utxo {
            outpoint: OutPoint { transaction_id: tx.id(), output_index },
            output: output.clone(),
            origin_timestamp: timestamp,
        });
    }
    Ok(Staged { spent, created })
}

/// All unspent outputs of a chain.
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, Utxo>,
    by_address: HashMap<Address, BTreeSet<OutPoint>>,
    transaction_ids: HashSet<Hash256>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spend the inputs of `tx` and create its outputs, stamped with the
    /// block `timestamp`. Leaves the set untouched on error.
    pub fn apply(&mut self, tx: &Transaction, timestamp: i64) -> Result<(), TransactionError> {
        let staged = stage(self, tx, timestamp)?;
        for outpoint in staged.spent {
            if let Some(utxo) = self.utxos.remove(&outpoint) {
                self.unindex(&utxo);
            }
        }
        for utxo in staged.created {
            self.by_address
                .entry(utxo.output.address)
                .or_default()
                .insert(utxo.outpoint);
            self.utxos.insert(utxo.outpoint, utxo);
        }
        self.transaction_ids.insert(tx.id());
        Ok(())
    }

    fn unindex(&mut self, utxo: &Utxo) {
        if let Some(set) = self.by_address.get_mut(&utxo.output.address) {
            set.remove(&utxo.outpoint);
            if set.is_empty() {
                self.by_address.remove(&utxo.output.address);
            }
        }
    }

    /// Unspent outputs owned by `address`, in outpoint order.
    pub fn utxos_of(&self, address: &Address) -> Vec<Utxo> {
        self.by_address
            .get(address)
            .map(|set| set.iter().filter_map(|op| self.utxos.get(op).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn contains_transaction(&self, id: &Hash256) -> bool {
        self.transaction_ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    /// Start a speculative overlay on top of this set.
    pub fn overlay(&self) -> UtxoOverlay<'_> {
        UtxoOverlay::new(self)
    }
}

impl UtxoFinder for UtxoSet {
    fn find_utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.get(outpoint).cloned()
    }
}

impl UtxoSource for UtxoSet {
    fn contains_transaction(&self, id: &Hash256) -> bool {
        self.transaction_ids.contains(id)
    }

    fn income_outpoints(&self, address: &Address) -> Vec<OutPoint> {
        self.by_address
            .get(address)
            .into_iter()
            .flatten()
            .filter(|op| self.utxos.get(*op).is_some_and(|u| u.output.has_income))
            .copied()
            .collect()
    }
}

/// Local spends and creations layered over a borrowed [`UtxoSet`].
#[derive(Debug)]
pub struct UtxoOverlay<'a> {
    base: &'a UtxoSet,
    spent: HashSet<OutPoint>,
    created: HashMap<OutPoint, Utxo>,
    transaction_ids: HashSet<Hash256>,
}

impl<'a> UtxoOverlay<'a> {
    pub fn new(base: &'a UtxoSet) -> Self {
        Self {
            base,
            spent: HashSet::new(),
            created: HashMap::new(),
            transaction_ids: HashSet::new(),
        }
    }

    /// Same rules as [`UtxoSet::apply`], recorded locally.
    pub fn apply(&mut self, tx: &Transaction, timestamp: i64) -> Result<(), TransactionError> {
        let staged = stage(self, tx, timestamp)?;
        for outpoint in staged.spent {
            if self.created.remove(&outpoint).is_none() {
                self.spent.insert(outpoint);
            }
        }
        for utxo in staged.created {
            self.created.insert(utxo.outpoint, utxo);
        }
        self.transaction_ids.insert(tx.id());
        Ok(())
    }
}

impl UtxoFinder for UtxoOverlay<'_> {
    fn find_utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
        if let Some(utxo) = self.created.get(outpoint) {
            return Some(utxo.clone());
        }
        if self.spent.contains(outpoint) {
            return None;
        }
        self.base.find_utxo(outpoint)
    }
}

impl UtxoSource for UtxoOverlay<'_> {
    fn contains_transaction(&self, id: &Hash256) -> bool {
        self.transaction_ids.contains(id) || self.base.contains_transaction(id)
    }

    fn income_outpoints(&self, address: &Address) -> Vec<OutPoint> {
        let mut outpoints: Vec<OutPoint> = self
            .base
            .income_outpoints(address)
            .into_iter()
            .filter(|op| !self.spent.contains(op))
            .collect();
        outpoints.extend(
            self.created
                .values()
                .filter(|u| u.output.has_income && u.output.address == *address)
                .map(|u| u.outpoint),
        );
        outpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Input, Output};

    fn addr(b: u8) -> Address {
        Address([b; 32])
    }

    fn spend(outpoint: OutPoint) -> Input {
        Input {
            output_index: outpoint.output_index,
            transaction_id: outpoint.transaction_id,
            public_key: vec![0; 32],
            signature: vec![0; 64],
        }
    }

    fn funded() -> (UtxoSet, OutPoint) {
        let mut set = UtxoSet::new();
        let reward = Transaction::reward(addr(1), false, 0, 100).unwrap();
        set.apply(&reward, 0).unwrap();
        let outpoint = OutPoint { transaction_id: reward.id(), output_index: 0 };
        (set, outpoint)
    }

    // --- UtxoSet ---

    #[test]
    fn apply_creates_and_indexes() {
        let (set, outpoint) = funded();
        assert_eq!(set.len(), 1);
        let utxos = set.utxos_of(&addr(1));
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].outpoint, outpoint);
        assert_eq!(utxos[0].origin_timestamp, 0);
    }

    #[test]
    fn apply_spends_inputs() {
        let (mut set, outpoint) = funded();
        let tx = Transaction::new(
            vec![spend(outpoint)],
            vec![Output::new(addr(2), false, 60), Output::new(addr(1), false, 39)],
            10,
        )
        .unwrap();
        set.apply(&tx, 60).unwrap();
        assert!(set.find_utxo(&outpoint).is_none());
        assert_eq!(set.utxos_of(&addr(2))[0].origin_timestamp, 60);
        assert_eq!(set.utxos_of(&addr(1)).len(), 1);
    }

    #[test]
    fn double_spend_is_rejected() {
        let (mut set, outpoint) = funded();
        let tx1 = Transaction::new(vec![spend(outpoint)], vec![Output::new(addr(2), false, 1)], 1)
            .unwrap();
        let tx2 = Transaction::new(vec![spend(outpoint)], vec![Output::new(addr(3), false, 1)], 2)
            .unwrap();
        set.apply(&tx1, 60).unwrap();
        assert!(matches!(set.apply(&tx2, 60), Err(TransactionError::UnknownUtxo(_))));
    }

    #[test]
    fn same_input_twice_in_one_tx_is_rejected() {
        let (mut set, outpoint) = funded();
        let tx = Transaction::new(
            vec![spend(outpoint), spend(outpoint)],
            vec![Output::new(addr(2), false, 1)],
            1,
        )
        .unwrap();
        assert!(set.apply(&tx, 60).is_err());
        assert!(set.find_utxo(&outpoint).is_some());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let (mut set, _) = funded();
        let reward = Transaction::reward(addr(1), false, 0, 100).unwrap();
        assert!(matches!(
            set.apply(&reward, 0),
            Err(TransactionError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn zero_value_output_creates_nothing() {
        let mut set = UtxoSet::new();
        let tx = Transaction::reward(addr(1), false, 0, 0).unwrap();
        set.apply(&tx, 0).unwrap();
        assert!(set.is_empty());
        assert!(set.contains_transaction(&tx.id()));
    }

    #[test]
    fn zero_value_income_output_is_kept() {
        let mut set = UtxoSet::new();
        set.apply(&Transaction::reward(addr(1), true, 0, 0).unwrap(), 0).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn second_income_output_is_rejected() {
        let mut set = UtxoSet::new();
        set.apply(&Transaction::reward(addr(1), true, 0, 5).unwrap(), 0).unwrap();
        let err = set.apply(&Transaction::reward(addr(1), true, 1, 5).unwrap(), 60);
        assert!(matches!(err, Err(TransactionError::MultipleIncomes(_))));
    }

    #[test]
    fn income_can_move_when_old_income_is_spent() {
        let mut set = UtxoSet::new();
        let reward = Transaction::reward(addr(1), true, 0, 5).unwrap();
        set.apply(&reward, 0).unwrap();
        let outpoint = OutPoint { transaction_id: reward.id(), output_index: 0 };
        let tx = Transaction::new(vec![spend(outpoint)], vec![Output::new(addr(1), true, 4)], 1)
            .unwrap();
        set.apply(&tx, 60).unwrap();
        assert_eq!(set.utxos_of(&addr(1)).len(), 1);
    }

    // --- UtxoOverlay ---

    #[test]
    fn overlay_does_not_touch_base() {
        let (set, outpoint) = funded();
        let mut overlay = set.overlay();
        let tx = Transaction::new(vec![spend(outpoint)], vec![Output::new(addr(2), false, 99)], 1)
            .unwrap();
        overlay.apply(&tx, 60).unwrap();
        assert!(overlay.find_utxo(&outpoint).is_none());
        assert!(set.find_utxo(&outpoint).is_some());
    }

    #[test]
    fn overlay_chains_transactions() {
        let (set, outpoint) = funded();
        let mut overlay = set.overlay();
        let tx1 = Transaction::new(vec![spend(outpoint)], vec![Output::new(addr(2), false, 99)], 1)
            .unwrap();
        overlay.apply(&tx1, 60).unwrap();
        let created = OutPoint { transaction_id: tx1.id(), output_index: 0 };
        let tx2 = Transaction::new(vec![spend(created)], vec![Output::new(addr(3), false, 98)], 2)
            .unwrap();
        overlay.apply(&tx2, 60).unwrap();
        assert!(overlay.find_utxo(&created).is_none());
        assert!(matches!(overlay.apply(&tx1, 60), Err(TransactionError::DuplicateTransaction(_))));
    }

    #[test]
    fn overlay_rejects_base_duplicates() {
        let (set, _) = funded();
        let mut overlay = set.overlay();
        let reward = Transaction::reward(addr(1), false, 0, 100).unwrap();
        assert!(overlay.apply(&reward, 0).is_err());
    }

    #[test]
    fn overlay_tracks_income_uniqueness() {
        let set = UtxoSet::new();
        let mut overlay = set.overlay();
        overlay.apply(&Transaction::reward(addr(1), true, 0, 5).unwrap(), 0).unwrap();
        let err = overlay.apply(&Transaction::reward(addr(1), true, 1, 5).unwrap(), 0);
        assert!(matches!(err, Err(TransactionError::MultipleIncomes(_))));
    }
}
