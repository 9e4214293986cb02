//! Error types for the Drift protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("malformed input: {0}")] MalformedInput(String),
    #[error("wrong transaction id: provided {provided}, computed {computed}")] InvalidId { provided: String, computed: String },
    #[error("unknown UTXO: {0}")] UnknownUtxo(String),
    #[error("invalid signature on input {index}")] SignatureInvalid { index: usize },
    #[error("insufficient balance: have {have}, need {need}")] InsufficientBalance { have: u64, need: u64 },
    #[error("duplicate transaction: {0}")] DuplicateTransaction(String),
    #[error("timestamp {timestamp} outside [{min}, {max}]")] TimestampOutOfWindow { timestamp: i64, min: i64, max: i64 },
    #[error("fee too low: {fee} < {minimum}")] FeeTooLow { fee: u64, minimum: u64 },
    #[error("fee is negative: inputs {inputs} < outputs {outputs}")] FeeNegative { inputs: u64, outputs: u64 },
    #[error("income requested for several UTXOs of address {0}")] MultipleIncomes(String),
    #[error("income output address is not registered: {0}")] UnregisteredIncome(String),
    #[error("value overflow")] ValueOverflow,
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("previous hash mismatch at height {height}")] PreviousHashMismatch { height: usize },
    #[error("unexpected timestamp: got {got}, expected {expected}")] UnexpectedTimestamp { got: i64, expected: i64 },
    #[error("timestamp in the future: {timestamp} > {now}")] TimestampInFuture { timestamp: i64, now: i64 },
    #[error("block has no reward")] MissingReward,
    #[error("multiple rewards in block")] MultipleRewards,
    #[error("reward {reward} exceeds fees {fees}")] RewardExceedsFees { reward: u64, fees: u64 },
    #[error("a block with timestamp {0} already exists")] DuplicateTimestamp(i64),
    #[error("a block is missing: tip {tip}, requested {requested}")] MissingBlock { tip: i64, requested: i64 },
    #[error("chain changed during validation: expected {expected_len} blocks")] TipMoved { expected_len: usize },
    #[error("tx error in {index}: {source}")] Transaction { index: usize, source: TransactionError },
}

/// Mismatch between the registered-address delta a block claims and the one
/// recomputed locally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationMismatch {
    #[error("missing registered address: {0}")] Missing(String),
    #[error("extra registered address: {0}")] Extra(String),
    #[error("wrongly removed address: {0}")] WronglyRemoved(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("neighbor chain is a fork: {0}")] ChainForkMismatch(String),
    #[error("neighbor chain is too short: {len} blocks")] ChainTooShort { len: usize },
    #[error(transparent)] RegistrationMismatch(#[from] RegistrationMismatch),
    #[error("validator is not registered: {0}")] UnregisteredValidator(String),
    #[error("registry unavailable: {0}")] RegistryUnavailable(String),
    #[error("block {height} is invalid: {source}")] Block { height: usize, source: BlockError },
    #[error("neighbor failure: {0}")] Neighbor(#[from] NetworkError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry request failed: {0}")] Unavailable(String),
    #[error("registry request timed out")] Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("neighbor unreachable: {0}")] Unreachable(String),
    #[error("request rejected: {0}")] Rejected(String),
    #[error("invalid response: {0}")] InvalidResponse(String),
    #[error("timeout")] Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("invalid address: {0}")] InvalidAddress(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("the blockchain is empty")] EmptyChain,
    #[error(transparent)] Transaction(#[from] TransactionError),
}

#[derive(Error, Debug)]
pub enum DriftError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Registry(#[from] RegistryError),
    #[error(transparent)] Network(#[from] NetworkError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error("config: {0}")] Config(String),
    #[error("rpc: {0}")] Rpc(String),
}
