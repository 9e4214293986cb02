//! Block validation for the Drift protocol.
//!
//! [`validate_block`] checks one block against the state of the chain it
//! extends. The caller supplies that state as a [`LedgerView`] whose last
//! block is the parent; for a block received from a neighbor this view is
//! built from the neighbor's own chain, never from the host's.
//!
//! Registry-dependent rules (validator eligibility, registered-address
//! delta) need async I/O and live in the reconciler; this module provides
//! the deterministic part, [`registration_candidates`].

use std::collections::{BTreeSet, HashMap};

use crate::error::{BlockError, TransactionError};
use crate::ledger::LedgerView;
use crate::mempool::check_well_formed;
use crate::settings::ProtocolSettings;
use crate::traits::{DecayCalculator, UtxoFinder, Verifier};
use crate::types::{Address, Block, Hash256, Transaction};
use crate::utxo::UtxoOverlay;

/// Collaborators needed to validate a block.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    pub settings: &'a ProtocolSettings,
    pub decay: &'a dyn DecayCalculator,
    pub verifier: &'a dyn Verifier,
}

/// Summary of a successfully validated block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBlock {
    /// Sum of all non-reward transaction fees.
    pub total_fees: u64,
    /// Value of the reward output.
    pub reward: u64,
}

fn tx_error(index: usize) -> impl Fn(TransactionError) -> BlockError {
    move |source| BlockError::Transaction { index, source }
}

/// Validate `block` as the successor of `view`'s last block.
///
/// `now` is the current time; blocks from the future are rejected.
pub fn validate_block(
    block: &Block,
    view: &LedgerView,
    now: i64,
    ctx: &ValidationContext<'_>,
) -> Result<ValidatedBlock, BlockError> {
    let expected_previous = view.last_hash().unwrap_or(Hash256::ZERO);
    if block.previous_hash != expected_previous {
        return Err(BlockError::PreviousHashMismatch { height: view.len() });
    }
    if block.timestamp > now {
        return Err(BlockError::TimestampInFuture { timestamp: block.timestamp, now });
    }

    let reward = reward_value(block)?;

    // --- Genesis ---

    let Some(previous_timestamp) = view.last_timestamp() else {
        if block.transactions.len() != 1 {
            return Err(BlockError::Transaction {
                index: 1,
                source: TransactionError::MalformedInput("genesis holds only its reward".into()),
            });
        }
        if reward > ctx.settings.genesis_amount {
            return Err(BlockError::RewardExceedsFees {
                reward,
                fees: ctx.settings.genesis_amount,
            });
        }
        return Ok(ValidatedBlock { total_fees: 0, reward });
    };

    // --- Timestamp ---

    let expected = previous_timestamp + ctx.settings.validation_interval_nanos();
    if block.timestamp != expected {
        return Err(BlockError::UnexpectedTimestamp { got: block.timestamp, expected });
    }

    // --- Transactions ---

    let min = previous_timestamp;
    let max = block.timestamp + ctx.settings.transaction_timestamp_tolerance();
    let mut overlay = UtxoOverlay::new(view.utxos());
    // sender -> (aged value spent, index of its last transaction)
    let mut spent_by: HashMap<Address, (u64, usize)> = HashMap::new();
    let mut total_fees = 0u64;

    for (index, tx) in block.transactions.iter().enumerate() {
        if tx.is_reward() {
            continue;
        }
        let to_block_error = tx_error(index);
        check_well_formed(tx).map_err(&to_block_error)?;
        if tx.outputs().iter().any(|o| o.has_reward) {
            return Err(to_block_error(TransactionError::MalformedInput(
                "reward flag on a transfer".into(),
            )));
        }
        if tx.timestamp() < min || tx.timestamp() > max {
            return Err(to_block_error(TransactionError::TimestampOutOfWindow {
                timestamp: tx.timestamp(),
                min,
                max,
            }));
        }
        tx.verify_signatures(&overlay, ctx.verifier).map_err(&to_block_error)?;
        for output in tx.outputs().iter().filter(|o| o.has_income) {
            if !view.is_registered(&output.address)
                && !block.added_registered_addresses.contains(&output.address)
            {
                return Err(to_block_error(TransactionError::UnregisteredIncome(
                    output.address.to_string(),
                )));
            }
        }

        let fee = tx
            .fee(ctx.settings, ctx.decay, &overlay, block.timestamp)
            .map_err(&to_block_error)?;
        for input in tx.inputs() {
            if let Some(utxo) = overlay.find_utxo(&input.outpoint()) {
                let entry = spent_by.entry(utxo.output.address).or_default();
                entry.0 = entry.0.saturating_add(utxo.value(ctx.decay, block.timestamp));
                entry.1 = index;
            }
        }
        overlay.apply(tx, block.timestamp).map_err(&to_block_error)?;
        total_fees = total_fees
            .checked_add(fee)
            .ok_or_else(|| to_block_error(TransactionError::ValueOverflow))?;
    }

    // --- Per-sender budget ---

    for (address, &(spent, index)) in &spent_by {
        let have = view.calculate_total_amount(block.timestamp, address, ctx.decay);
        if spent > have {
            return Err(BlockError::Transaction {
                index,
                source: TransactionError::InsufficientBalance { have, need: spent },
            });
        }
    }

    // --- Reward ---

    if reward > total_fees {
        return Err(BlockError::RewardExceedsFees { reward, fees: total_fees });
    }

    Ok(ValidatedBlock { total_fees, reward })
}

/// Value of the single reward output of `block`.
fn reward_value(block: &Block) -> Result<u64, BlockError> {
    let mut rewards = block.transactions.iter().filter(|tx| tx.is_reward());
    let reward = rewards.next().ok_or(BlockError::MissingReward)?;
    if rewards.next().is_some() || reward.outputs().len() != 1 {
        return Err(BlockError::MultipleRewards);
    }
    Ok(reward.outputs()[0].value)
}

/// Addresses a block should register: senders of non-reward transactions
/// with a non-zero value and recipients of income outputs, minus the
/// addresses `view` already registers. The registry filters this set.
pub fn registration_candidates(
    transactions: &[Transaction],
    view: &LedgerView,
    verifier: &dyn Verifier,
) -> BTreeSet<Address> {
    let mut candidates = BTreeSet::new();
    for tx in transactions {
        if !tx.is_reward() && tx.total_output_value().is_some_and(|v| v > 0) {
            for input in tx.inputs() {
                if let Ok(address) = verifier.address(&input.public_key) {
                    candidates.insert(address);
                }
            }
        }
        candidates.extend(
            tx.outputs()
                .iter()
                .filter(|o| o.has_income)
                .map(|o| o.address),
        );
    }
    candidates.retain(|a| !view.is_registered(a));
    candidates
}
