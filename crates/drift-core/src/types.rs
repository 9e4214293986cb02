//! Core protocol types: transactions, blocks, UTXOs.
//!
//! All monetary values are in particles (1 DRIFT = 10^8 particles).
//! All timestamps are nanoseconds since the Unix epoch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, TransactionError};
use crate::settings::ProtocolSettings;
use crate::traits::{DecayCalculator, UtxoFinder, Verifier};

/// Hex text form for fixed 32-byte values.
mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32 bytes"))
    }
}

/// Hex text form for variable-length byte strings (keys, signatures).
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(D::Error::custom)
    }
}

/// A 32-byte hash value.
///
/// Used for transaction IDs (BLAKE3) and block hashes (SHA-256).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode,
)]
#[serde(transparent)]
pub struct Hash256(#[serde(with = "hex32")] pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Previous hash of the genesis block.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An account address: BLAKE3 hash of an Ed25519 public key.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode,
)]
#[serde(transparent)]
pub struct Address(#[serde(with = "hex32")] pub [u8; 32]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidAddress(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidAddress(format!("expected 32 bytes: {s}")))?;
        Ok(Self(bytes))
    }
}

/// Coordinates of one output: the transaction that created it and its index.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub transaction_id: Hash256,
    pub output_index: u16,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.output_index)
    }
}

/// A transaction output. `value` is the amount at creation time, never the
/// aged amount.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode)]
pub struct Output {
    pub address: Address,
    pub has_reward: bool,
    pub has_income: bool,
    pub value: u64,
}

impl Output {
    pub fn new(address: Address, has_income: bool, value: u64) -> Self {
        Self { address, has_reward: false, has_income, value }
    }
}

/// A transaction input, spending the output at `(transaction_id, output_index)`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode)]
pub struct Input {
    pub output_index: u16,
    pub transaction_id: Hash256,
    /// Ed25519 public key (32 bytes).
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    /// Ed25519 signature (64 bytes) over [`Input::signing_message`].
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl Input {
    /// Size of the message covered by an input signature.
    pub const SIGNING_MESSAGE_SIZE: usize = 32 + 2;

    pub fn outpoint(&self) -> OutPoint {
        OutPoint { transaction_id: self.transaction_id, output_index: self.output_index }
    }

    /// Bytes covered by the input signature: `transaction_id || output_index (u16 LE)`.
    pub fn signing_message(&self) -> Vec<u8> {
        signing_message(&self.outpoint())
    }
}

/// Canonical signing message for spending `outpoint`.
pub fn signing_message(outpoint: &OutPoint) -> Vec<u8> {
    let mut data = Vec::with_capacity(Input::SIGNING_MESSAGE_SIZE);
    data.extend_from_slice(outpoint.transaction_id.as_bytes());
    data.extend_from_slice(&outpoint.output_index.to_le_bytes());
    data
}

/// Serialized form of a [`Transaction`]; the id is checked when converting back.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransactionRecord {
    pub id: Hash256,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub timestamp: i64,
}

/// An immutable transaction. Construction always computes the id.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(try_from = "TransactionRecord", into = "TransactionRecord")]
pub struct Transaction {
    id: Hash256,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    timestamp: i64,
}

impl Transaction {
    pub fn new(
        inputs: Vec<Input>,
        outputs: Vec<Output>,
        timestamp: i64,
    ) -> Result<Self, TransactionError> {
        let id = compute_id(&inputs, &outputs, timestamp)?;
        Ok(Self { id, inputs, outputs, timestamp })
    }

    /// Reward transaction paying `value` to a validator: no inputs, one output.
    pub fn reward(
        address: Address,
        has_income: bool,
        timestamp: i64,
        value: u64,
    ) -> Result<Self, TransactionError> {
        let output = Output { address, has_reward: true, has_income, value };
        Self::new(Vec::new(), vec![output], timestamp)
    }

    pub fn id(&self) -> Hash256 {
        self.id
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// True iff the transaction has no inputs.
    pub fn is_reward(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Sum of all output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Verify every input signature against the UTXO it spends.
    pub fn verify_signatures(
        &self,
        finder: &dyn UtxoFinder,
        verifier: &dyn Verifier,
    ) -> Result<(), TransactionError> {
        for (index, input) in self.inputs.iter().enumerate() {
            if input.public_key.len() != 32 || input.signature.len() != 64 {
                return Err(TransactionError::MalformedInput(format!(
                    "input {index}: key or signature has a wrong length"
                )));
            }
            let utxo = finder
                .find_utxo(&input.outpoint())
                .ok_or_else(|| TransactionError::UnknownUtxo(input.outpoint().to_string()))?;
            let address = verifier
                .address(&input.public_key)
                .map_err(|e| TransactionError::MalformedInput(e.to_string()))?;
            if address != utxo.output.address
                || !verifier.verify(&input.signing_message(), &input.public_key, &input.signature)
            {
                return Err(TransactionError::SignatureInvalid { index });
            }
        }
        Ok(())
    }

    /// Sum of the input values aged to `timestamp`.
    pub fn input_value(
        &self,
        decay: &dyn DecayCalculator,
        finder: &dyn UtxoFinder,
        timestamp: i64,
    ) -> Result<u64, TransactionError> {
        self.inputs.iter().try_fold(0u64, |acc, input| {
            let utxo = finder
                .find_utxo(&input.outpoint())
                .ok_or_else(|| TransactionError::UnknownUtxo(input.outpoint().to_string()))?;
            acc.checked_add(utxo.value(decay, timestamp))
                .ok_or(TransactionError::ValueOverflow)
        })
    }

    /// Fee paid by this transaction at `timestamp`: aged inputs minus outputs.
    pub fn fee(
        &self,
        settings: &ProtocolSettings,
        decay: &dyn DecayCalculator,
        finder: &dyn UtxoFinder,
        timestamp: i64,
    ) -> Result<u64, TransactionError> {
        let inputs = self.input_value(decay, finder, timestamp)?;
        let outputs = self.total_output_value().ok_or(TransactionError::ValueOverflow)?;
        if outputs > inputs {
            return Err(TransactionError::FeeNegative { inputs, outputs });
        }
        let fee = inputs - outputs;
        if fee < settings.minimal_transaction_fee {
            return Err(TransactionError::FeeTooLow {
                fee,
                minimum: settings.minimal_transaction_fee,
            });
        }
        Ok(fee)
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = TransactionError;

    fn try_from(record: TransactionRecord) -> Result<Self, Self::Error> {
        let tx = Transaction::new(record.inputs, record.outputs, record.timestamp)?;
        if tx.id != record.id {
            return Err(TransactionError::InvalidId {
                provided: record.id.to_string(),
                computed: tx.id.to_string(),
            });
        }
        Ok(tx)
    }
}

impl From<Transaction> for TransactionRecord {
    fn from(tx: Transaction) -> Self {
        Self { id: tx.id, inputs: tx.inputs, outputs: tx.outputs, timestamp: tx.timestamp }
    }
}

/// BLAKE3 over the bincode standard encodings of inputs, outputs and timestamp.
fn compute_id(
    inputs: &[Input],
    outputs: &[Output],
    timestamp: i64,
) -> Result<Hash256, TransactionError> {
    let config = bincode::config::standard();
    let encode = |e: bincode::error::EncodeError| TransactionError::Serialization(e.to_string());
    let mut hasher = blake3::Hasher::new();
    hasher.update(&bincode::encode_to_vec(inputs, config).map_err(encode)?);
    hasher.update(&bincode::encode_to_vec(outputs, config).map_err(encode)?);
    hasher.update(&bincode::encode_to_vec(timestamp, config).map_err(encode)?);
    Ok(Hash256(hasher.finalize().into()))
}

/// An unspent output together with the timestamp of the block that created it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub output: Output,
    pub origin_timestamp: i64,
}

impl Utxo {
    /// Value of this output aged to `timestamp`.
    pub fn value(&self, decay: &dyn DecayCalculator, timestamp: i64) -> u64 {
        decay.value(
            self.output.value,
            self.output.has_income,
            self.origin_timestamp,
            timestamp,
        )
    }
}

/// A block of transactions. Exactly one transaction is the validator reward.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub previous_hash: Hash256,
    pub transactions: Vec<Transaction>,
    pub timestamp: i64,
    pub added_registered_addresses: Vec<Address>,
    pub removed_registered_addresses: Vec<Address>,
}

impl Block {
    /// Compute the block hash (SHA-256).
    ///
    /// Explicit layout: previous_hash || timestamp || tx_count || tx ids ||
    /// added_count || added || removed_count || removed, integers little-endian.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(
            32 + 8 * 4
                + 32 * (self.transactions.len()
                    + self.added_registered_addresses.len()
                    + self.removed_registered_addresses.len()),
        );
        data.extend_from_slice(self.previous_hash.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&(self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            data.extend_from_slice(tx.id().as_bytes());
        }
        data.extend_from_slice(&(self.added_registered_addresses.len() as u64).to_le_bytes());
        for address in &self.added_registered_addresses {
            data.extend_from_slice(address.as_bytes());
        }
        data.extend_from_slice(&(self.removed_registered_addresses.len() as u64).to_le_bytes());
        for address in &self.removed_registered_addresses {
            data.extend_from_slice(address.as_bytes());
        }
        Hash256(Sha256::digest(&data).into())
    }

    /// The first reward transaction of the block.
    pub fn reward(&self) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.is_reward())
    }

    /// Address credited with the block reward.
    pub fn validator(&self) -> Option<Address> {
        self.reward()
            .and_then(|tx| tx.outputs().first())
            .map(|output| output.address)
    }
}
