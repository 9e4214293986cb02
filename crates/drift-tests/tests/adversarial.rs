//! Adversarial tests: transactions and chains crafted to break the ledger.
//!
//! Every attack must be refused locally, leave the victim's state untouched,
//! and never crash the node.

use std::sync::Arc;

use drift_consensus::ReconcileOutcome;
use drift_core::block_validation::{ValidationContext, validate_block};
use drift_core::crypto::Ed25519Verifier;
use drift_core::error::{MempoolError, TransactionError};
use drift_core::mempool::TransactionRequest;
use drift_core::traits::{Clock, Neighbor};
use drift_core::types::{Address, Block, Output, Transaction};
use drift_decay::DecayEngine;
use drift_node_lib::Node;
use drift_node_lib::registry::{AllowListRegistry, OpenRegistry};
use drift_tests::helpers::*;
use proptest::prelude::*;

/// A validator with a genesis block paying `GENESIS_AMOUNT` to `key(1)`.
async fn funded_node() -> Arc<Node> {
    let clock = ManualClock::new(block_time(1));
    let node = solo_node(key(1).address(), &clock);
    node.validate(block_time(0)).await;
    node
}

fn rejection(node: &Node, tx: Transaction, fee: u64) -> TransactionError {
    match node.add_transaction(TransactionRequest::new(tx, fee)) {
        Err(MempoolError::Transaction(e)) => e,
        other => panic!("expected a transaction error, got {other:?}"),
    }
}

/// Observer node whose only neighbor serves `blocks`.
fn observer(blocks: Vec<Block>, now: i64) -> Arc<Node> {
    let neighbor = StaticNeighbor::new("attacker", blocks);
    Node::with_parts(
        node_config(1, None),
        vec![neighbor as Arc<dyn Neighbor>],
        Arc::new(OpenRegistry),
        ManualClock::new(now) as Arc<dyn Clock>,
    )
}

/// An honest three-block chain from a solo validator.
async fn honest_chain() -> Vec<Block> {
    let clock = ManualClock::new(block_time(2));
    let node = solo_node(key(1).address(), &clock);
    validate_heights(&node, 0, 3).await;
    node.blocks_from(0)
}

// ======================================================================
// Pool attacks
// ======================================================================

#[tokio::test]
async fn double_spend_in_pool_is_refused() {
    let node = funded_node().await;
    let utxo = single_utxo(&node, &key(1).address());
    let first = transfer(&key(1), &utxo, key(2).address(), 100, FEE, T0 + 1);
    let second = transfer(&key(1), &utxo, key(3).address(), 100, FEE, T0 + 2);

    node.add_transaction(TransactionRequest::new(first, FEE)).unwrap();
    assert!(matches!(rejection(&node, second, FEE), TransactionError::UnknownUtxo(_)));
    assert_eq!(node.pool().len(), 1);
}

#[tokio::test]
async fn spending_someone_elses_output_is_refused() {
    let node = funded_node().await;
    let utxo = single_utxo(&node, &key(1).address());
    let thief = key(9);
    let tx = Transaction::new(
        vec![thief.sign_input(&utxo.outpoint)],
        vec![Output::new(thief.address(), false, 500_000)],
        T0 + 1,
    )
    .unwrap();
    assert_eq!(rejection(&node, tx, FEE), TransactionError::SignatureInvalid { index: 0 });
}

#[tokio::test]
async fn tampered_signature_is_refused() {
    let node = funded_node().await;
    let utxo = single_utxo(&node, &key(1).address());
    let mut input = key(1).sign_input(&utxo.outpoint);
    input.signature[0] ^= 0xFF;
    let tx = Transaction::new(
        vec![input],
        vec![Output::new(key(2).address(), false, 1_000)],
        T0 + 1,
    )
    .unwrap();
    assert_eq!(rejection(&node, tx, FEE), TransactionError::SignatureInvalid { index: 0 });
}

#[tokio::test]
async fn minted_reward_is_refused() {
    let node = funded_node().await;
    let tx = Transaction::reward(key(9).address(), false, T0 + 1, 1_000_000).unwrap();
    assert!(matches!(rejection(&node, tx, FEE), TransactionError::MalformedInput(_)));
}

#[tokio::test]
async fn overspending_is_refused() {
    let node = funded_node().await;
    let utxo = single_utxo(&node, &key(1).address());
    let tx = Transaction::new(
        vec![key(1).sign_input(&utxo.outpoint)],
        vec![Output::new(key(2).address(), false, GENESIS_AMOUNT)],
        T0 + 1,
    )
    .unwrap();
    assert!(matches!(
        rejection(&node, tx, FEE),
        TransactionError::InsufficientBalance { need, .. } if need == GENESIS_AMOUNT + FEE
    ));
}

#[tokio::test]
async fn fee_below_floor_is_refused() {
    let node = funded_node().await;
    let utxo = single_utxo(&node, &key(1).address());
    let tx = transfer(&key(1), &utxo, key(2).address(), 100, FEE - 1, T0 + 1);
    assert_eq!(
        rejection(&node, tx, FEE - 1),
        TransactionError::FeeTooLow { fee: FEE - 1, minimum: FEE }
    );
}

#[tokio::test]
async fn replayed_transaction_is_refused_after_inclusion() {
    let node = funded_node().await;
    let utxo = single_utxo(&node, &key(1).address());
    // Stamped at the next block so it is still inside the window afterwards.
    let tx = transfer(&key(1), &utxo, key(2).address(), 100, FEE, block_time(1));
    node.add_transaction(TransactionRequest::new(tx.clone(), FEE)).unwrap();
    node.validate(block_time(1)).await;
    assert!(node.pool().is_empty());

    assert!(matches!(rejection(&node, tx, FEE), TransactionError::DuplicateTransaction(_)));
}

#[tokio::test]
async fn far_future_transaction_is_refused() {
    let node = funded_node().await;
    let utxo = single_utxo(&node, &key(1).address());
    let tx = transfer(&key(1), &utxo, key(2).address(), 100, FEE, block_time(5));
    assert!(matches!(rejection(&node, tx, FEE), TransactionError::TimestampOutOfWindow { .. }));
}

// ======================================================================
// Chain attacks
// ======================================================================

#[tokio::test]
async fn inflated_reward_chain_is_rejected() {
    let mut blocks = honest_chain().await;
    let last = blocks.last_mut().unwrap();
    last.transactions = vec![Transaction::reward(key(1).address(), false, last.timestamp, 5).unwrap()];
    relink(&mut blocks);

    let node = observer(blocks, block_time(2));
    assert_eq!(node.verify(block_time(2)).await, ReconcileOutcome::Kept);
    assert!(node.ledger().is_empty());
}

#[tokio::test]
async fn inflated_genesis_is_rejected() {
    let mut blocks = honest_chain().await;
    blocks[0].transactions =
        vec![Transaction::reward(key(1).address(), true, T0, GENESIS_AMOUNT * 2).unwrap()];
    relink(&mut blocks);

    let node = observer(blocks, block_time(2));
    assert_eq!(node.verify(block_time(2)).await, ReconcileOutcome::Kept);
    assert!(node.ledger().is_empty());
}

#[tokio::test]
async fn broken_link_chain_is_rejected() {
    let mut blocks = honest_chain().await;
    blocks[2].previous_hash = blocks[0].hash();

    let node = observer(blocks, block_time(2));
    assert_eq!(node.verify(block_time(2)).await, ReconcileOutcome::Kept);
}

#[tokio::test]
async fn skipped_interval_chain_is_rejected() {
    let mut blocks = honest_chain().await;
    let shifted = block_time(3);
    blocks[2].timestamp = shifted;
    blocks[2].transactions = vec![Transaction::reward(key(1).address(), false, shifted, 0).unwrap()];
    relink(&mut blocks);

    let node = observer(blocks, block_time(3));
    assert_eq!(node.verify(block_time(3)).await, ReconcileOutcome::Kept);
}

#[tokio::test]
async fn chain_from_unregistered_validator_is_rejected() {
    let blocks = honest_chain().await;
    let neighbor = StaticNeighbor::new("attacker", blocks);
    let node = Node::with_parts(
        node_config(1, None),
        vec![neighbor as Arc<dyn Neighbor>],
        Arc::new(AllowListRegistry::new([key(2).address()])),
        ManualClock::new(block_time(2)) as Arc<dyn Clock>,
    );
    assert_eq!(node.verify(block_time(2)).await, ReconcileOutcome::Kept);
    assert!(node.ledger().is_empty());
}

#[tokio::test]
async fn honest_chain_is_adopted() {
    let blocks = honest_chain().await;
    let tip = blocks.last().unwrap().hash();
    let node = observer(blocks, block_time(2));
    let outcome = node.verify(block_time(2)).await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Replaced { target: "attacker".into(), len: 3, tip }
    );
}

// ======================================================================
// Property: assembly never produces an invalid block
// ======================================================================

/// Five funded accounts: key 1 keeps the change, keys 2..=5 get 100_000 each.
async fn distributed_node() -> Arc<Node> {
    let node = funded_node().await;
    let utxo = single_utxo(&node, &key(1).address());
    let mut outputs: Vec<Output> =
        (2..=5).map(|seed| Output::new(key(seed).address(), false, 100_000)).collect();
    outputs.push(Output::new(key(1).address(), false, GENESIS_AMOUNT - 400_000 - FEE));
    let tx = Transaction::new(vec![key(1).sign_input(&utxo.outpoint)], outputs, T0 + 1).unwrap();
    node.add_transaction(TransactionRequest::new(tx, FEE)).unwrap();
    node.validate(block_time(1)).await;
    assert_eq!(node.ledger().len(), 2);
    node
}

fn total_supply(node: &Node, timestamp: i64) -> u64 {
    (1..=5).map(|seed| node.ledger().calculate_total_amount(timestamp, &key(seed).address())).sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn assembled_block_is_valid_and_conserves_value(
        spends in proptest::collection::vec((2u8..=5, 1u8..=5, 1u64..=30_000), 1..12),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let node = distributed_node().await;
            let before = total_supply(&node, block_time(2));

            // Each sender chains its spends through its own change output;
            // assembly evicts whatever overruns the sender's balance.
            let mut heads: Vec<_> = (0..=5u8)
                .map(|seed| node.utxos(&key(seed).address()).into_iter().next())
                .collect();
            for (i, (sender, recipient, amount)) in spends.into_iter().enumerate() {
                let Some(utxo) = heads[sender as usize].clone() else { continue };
                if amount + FEE >= utxo.output.value {
                    continue;
                }
                let to: Address = key(recipient).address();
                let tx = transfer(&key(sender), &utxo, to, amount, FEE, block_time(1) + 1 + i as i64);
                let change = tx.outputs().len() - 1;
                let next = node
                    .add_transaction(TransactionRequest::new(tx.clone(), FEE))
                    .ok()
                    .map(|_| drift_core::types::Utxo {
                        outpoint: drift_core::types::OutPoint {
                            transaction_id: tx.id(),
                            output_index: change as u16,
                        },
                        output: tx.outputs()[change].clone(),
                        origin_timestamp: block_time(2),
                    });
                heads[sender as usize] = next;
            }

            let parent = node.ledger().copy();
            node.validate(block_time(2)).await;
            let view = node.ledger().copy();
            prop_assert_eq!(view.len(), 3);
            prop_assert!(node.pool().is_empty());

            let settings = settings();
            let decay = DecayEngine::from_settings(&settings);
            let ctx = ValidationContext { settings: &settings, decay: &decay, verifier: &Ed25519Verifier };
            let block = view.last_block().unwrap();
            prop_assert!(validate_block(block, &parent, block_time(2), &ctx).is_ok());
            prop_assert_eq!(total_supply(&node, block_time(2)), before);
            Ok(())
        })?;
    }
}
