//! Trait interfaces for the Drift protocol.
//!
//! These traits define the contracts between crates:
//! - [`DecayCalculator`] — value function (drift-decay implements)
//! - [`UtxoFinder`] — UTXO lookup over a ledger view or overlay
//! - [`Signer`] / [`Verifier`] — detached signatures and address derivation
//! - [`Clock`] — wall-clock source for scheduling and validation
//! - [`Neighbor`] — a remote node (drift-network implements)
//! - [`Registry`] — external identity registry (drift-node implements)

use async_trait::async_trait;

use crate::error::{CryptoError, NetworkError, RegistryError};
use crate::mempool::TransactionRequest;
use crate::types::{Address, Block, OutPoint, Transaction, Utxo};

/// Ages an output value over elapsed time.
///
/// The same function is used for balances and for fees, so every node of a
/// network must evaluate it identically.
pub trait DecayCalculator: Send + Sync {
    /// Value of an output created at `origin_timestamp` with `initial_value`,
    /// evaluated at `current_timestamp`.
    fn value(
        &self,
        initial_value: u64,
        has_income: bool,
        origin_timestamp: i64,
        current_timestamp: i64,
    ) -> u64;
}

/// Resolves an outpoint to the unspent output it designates.
pub trait UtxoFinder {
    /// Returns `None` if the output is unknown or already spent.
    fn find_utxo(&self, outpoint: &OutPoint) -> Option<Utxo>;
}

/// Checks detached signatures and derives addresses from public keys.
pub trait Verifier: Send + Sync {
    fn verify(&self, message: &[u8], public_key: &[u8], signature: &[u8]) -> bool;

    fn address(&self, public_key: &[u8]) -> Result<Address, CryptoError>;
}

/// Produces detached signatures.
pub trait Signer {
    fn sign(&self, message: &[u8]) -> Vec<u8>;

    fn public_key(&self) -> Vec<u8>;
}

/// Nanoseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

impl<F> Clock for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now(&self) -> i64 {
        self()
    }
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// A remote node.
///
/// Implementations bound every call with their own timeout; callers treat any
/// error as "this neighbor is unavailable for now".
#[async_trait]
pub trait Neighbor: Send + Sync {
    /// Identifier of the remote node, e.g. `host:port`.
    fn target(&self) -> &str;

    /// Blocks from `from_height` onwards, at most one page.
    async fn get_blocks(&self, from_height: u64) -> Result<Vec<Block>, NetworkError>;

    /// Pending transactions of the remote pool.
    async fn get_transactions(&self) -> Result<Vec<Transaction>, NetworkError>;

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<(), NetworkError>;

    async fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>, NetworkError>;
}

/// External identity registry deciding income eligibility.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn is_registered(&self, address: &Address) -> Result<bool, RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash256;
    use std::collections::HashMap;

    // ------------------------------------------------------------------
    // Mocks
    // ------------------------------------------------------------------

    struct NoDecay;

    impl DecayCalculator for NoDecay {
        fn value(&self, initial_value: u64, _: bool, _: i64, _: i64) -> u64 {
            initial_value
        }
    }

    struct MapFinder(HashMap<OutPoint, Utxo>);

    impl UtxoFinder for MapFinder {
        fn find_utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
            self.0.get(outpoint).cloned()
        }
    }

    struct StaticNeighbor;

    #[async_trait]
    impl Neighbor for StaticNeighbor {
        fn target(&self) -> &str {
            "127.0.0.1:8106"
        }

        async fn get_blocks(&self, _from_height: u64) -> Result<Vec<Block>, NetworkError> {
            Ok(Vec::new())
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

    struct DenyAll;

    #[async_trait]
    impl Registry for DenyAll {
        async fn is_registered(&self, _: &Address) -> Result<bool, RegistryError> {
            Ok(false)
        }
    }

    // ------------------------------------------------------------------
    // Behaviour
    // ------------------------------------------------------------------

    #[test]
    fn closure_is_a_clock() {
        let clock = || 42i64;
        assert_eq!(Clock::now(&clock), 42);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800 * 1_000_000_000);
    }

    #[test]
    fn finder_resolves_known_outpoint() {
        let outpoint = OutPoint { transaction_id: Hash256([1; 32]), output_index: 0 };
        let utxo = Utxo {
            outpoint,
            output: crate::types::Output::new(Address([2; 32]), false, 10),
            origin_timestamp: 0,
        };
        let finder = MapFinder(HashMap::from([(outpoint, utxo.clone())]));
        assert_eq!(finder.find_utxo(&outpoint), Some(utxo));
        let other = OutPoint { transaction_id: Hash256([1; 32]), output_index: 1 };
        assert_eq!(finder.find_utxo(&other), None);
    }

    #[test]
    fn mock_decay_is_identity() {
        assert_eq!(NoDecay.value(7, true, 0, 1_000), 7);
    }

    #[tokio::test]
    async fn mock_neighbor_and_registry() {
        assert!(StaticNeighbor.get_blocks(0).await.unwrap().is_empty());
        assert!(!DenyAll.is_registered(&Address::default()).await.unwrap());
    }

    // ------------------------------------------------------------------
    // Object safety: verify each trait is dyn-compatible
    // ------------------------------------------------------------------

    fn _assert_decay_calculator_object_safe(_: &dyn DecayCalculator) {}
    fn _assert_utxo_finder_object_safe(_: &dyn UtxoFinder) {}
    fn _assert_verifier_object_safe(_: &dyn Verifier) {}
    fn _assert_signer_object_safe(_: &dyn Signer) {}
    fn _assert_clock_object_safe(_: &dyn Clock) {}
    fn _assert_neighbor_object_safe(_: &dyn Neighbor) {}
    fn _assert_registry_object_safe(_: &dyn Registry) {}
}
