//! Pool of pending transactions.
//!
//! Admission validates a transaction against a read-only [`LedgerView`]
//! snapshot and the transactions already pending; the write lock is taken
//! only for the final insert. Block assembly drains the pool through
//! [`TransactionsPool::snapshot`] and [`TransactionsPool::remove`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MempoolError, TransactionError};
use crate::ledger::LedgerView;
use crate::settings::ProtocolSettings;
use crate::traits::{DecayCalculator, Verifier};
use crate::types::{Hash256, Transaction};
use crate::utxo::UtxoOverlay;

/// A transaction submitted to a node, with the fee the sender declares.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransactionRequest {
    pub transaction: Transaction,
    pub fee: u64,
    /// Node that forwarded the request, skipped when fanning it out again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcaster_target: Option<String>,
}

impl TransactionRequest {
    pub fn new(transaction: Transaction, fee: u64) -> Self {
        Self { transaction, fee, broadcaster_target: None }
    }

    /// Same request, marked as forwarded by `target`.
    pub fn forwarded_by(&self, target: &str) -> Self {
        Self { broadcaster_target: Some(target.to_string()), ..self.clone() }
    }
}

/// A pending transaction with its admission order.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub transaction: Transaction,
    pub fee: u64,
    pub sequence: u64,
}

/// Pending transactions indexed by id.
pub struct TransactionsPool {
    entries: RwLock<HashMap<Hash256, PoolEntry>>,
    next_sequence: AtomicU64,
    settings: ProtocolSettings,
    decay: Arc<dyn DecayCalculator>,
    verifier: Arc<dyn Verifier>,
}

impl TransactionsPool {
    pub fn new(
        settings: ProtocolSettings,
        decay: Arc<dyn DecayCalculator>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
            settings,
            decay,
            verifier,
        }
    }

    /// Validate `request` against `view` and the pending transactions, then
    /// insert it. Returns the transaction id.
    pub fn add_transaction(
        &self,
        request: &TransactionRequest,
        view: &LedgerView,
    ) -> Result<Hash256, MempoolError> {
        let tip_timestamp = view.last_timestamp().ok_or(MempoolError::EmptyChain)?;
        let tx = &request.transaction;
        let id = tx.id();

        if request.fee < self.settings.minimal_transaction_fee {
            return Err(TransactionError::FeeTooLow {
                fee: request.fee,
                minimum: self.settings.minimal_transaction_fee,
            }
            .into());
        }
        check_well_formed(tx)?;

        let interval = self.settings.validation_interval_nanos();
        let min = tip_timestamp;
        let max = tip_timestamp + interval + self.settings.transaction_timestamp_tolerance();
        if tx.timestamp() < min || tx.timestamp() > max {
            return Err(TransactionError::TimestampOutOfWindow {
                timestamp: tx.timestamp(),
                min,
                max,
            }
            .into());
        }

        if self.contains(&id) || view.last_block_contains(tx) || view.utxos().contains_transaction(&id)
        {
            return Err(TransactionError::DuplicateTransaction(id.to_string()).into());
        }

        let pending = self.snapshot();
        let mut overlay = UtxoOverlay::new(view.utxos());
        for pending_tx in &pending {
            // Left unstaged: its inputs are gone from this view, and assembly
            // evicts it.
            if let Err(e) = overlay.apply(pending_tx, tip_timestamp + interval) {
                warn!(tx = %pending_tx.id(), "pending transaction no longer applies: {e}");
            }
        }

        tx.verify_signatures(&overlay, self.verifier.as_ref())?;

        let next_timestamp = tip_timestamp + interval;
        let have = tx.input_value(self.decay.as_ref(), &overlay, next_timestamp)?;
        let need = tx
            .total_output_value()
            .and_then(|v| v.checked_add(request.fee))
            .ok_or(TransactionError::ValueOverflow)?;
        if have < need {
            return Err(TransactionError::InsufficientBalance { have, need }.into());
        }
        overlay.apply(tx, next_timestamp)?;

        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return Err(TransactionError::DuplicateTransaction(id.to_string()).into());
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        entries.insert(id, PoolEntry { transaction: tx.clone(), fee: request.fee, sequence });
        debug!(%id, fee = request.fee, pending = entries.len(), "added transaction to pool");
        Ok(id)
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Pending transactions in admission order.
    pub fn snapshot(&self) -> Vec<Transaction> {
        let entries = self.entries.read();
        let mut sorted: Vec<&PoolEntry> = entries.values().collect();
        sorted.sort_by_key(|e| e.sequence);
        sorted.into_iter().map(|e| e.transaction.clone()).collect()
    }

    /// Alias of [`snapshot`](Self::snapshot) served to neighbors.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.snapshot()
    }

    pub fn remove<'a, I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a Hash256>,
    {
        let mut entries = self.entries.write();
        ids.into_iter().filter(|id| entries.remove(*id).is_some()).count()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for TransactionsPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionsPool")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Structural checks that need no ledger state.
pub fn check_well_formed(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.is_reward() {
        return Err(TransactionError::MalformedInput("reward transactions are not accepted".into()));
    }
    if tx.outputs().is_empty() {
        return Err(TransactionError::MalformedInput("no outputs".into()));
    }
    for (index, input) in tx.inputs().iter().enumerate() {
        if input.public_key.len() != 32 || input.signature.len() != 64 {
            return Err(TransactionError::MalformedInput(format!(
                "input {index}: key or signature has a wrong length"
            )));
        }
    }
    Ok(())
}
