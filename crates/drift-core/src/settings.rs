//! Protocol settings shared by every node of a network.
//!
//! Two nodes with different settings disagree on fees, balances and block
//! timestamps, so these values are exposed over RPC and are expected to be
//! identical across a network.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BLOCKS_COUNT_LIMIT, DEFAULT_GENESIS_AMOUNT, DEFAULT_HALF_LIFE_DAYS,
    DEFAULT_INCOME_BASE, DEFAULT_INCOME_LIMIT, DEFAULT_MINIMAL_TRANSACTION_FEE,
    DEFAULT_TIE_BREAK_WINDOW, DEFAULT_VALIDATION_INTERVAL_SECS, DEFAULT_VALIDATION_TIMEOUT_SECS,
    DEFAULT_VERIFICATIONS_COUNT_PER_VALIDATION, NANOS_PER_DAY, NANOS_PER_SECOND,
};

/// Consensus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Amount paid to the validator of the genesis block.
    pub genesis_amount: u64,
    /// Half-life of an output value, in days.
    pub half_life_days: f64,
    /// Income curve shape parameter.
    pub income_base: u64,
    /// Income curve asymptote.
    pub income_limit: u64,
    /// Fee floor for non-reward transactions.
    pub minimal_transaction_fee: u64,
    /// Block spacing Δ, in seconds.
    pub validation_interval_secs: u64,
    /// Timeout for a single neighbor or registry request, in seconds.
    pub validation_timeout_secs: u64,
    /// Reconciliation sub-ticks per validation interval.
    pub verifications_count_per_validation: u32,
    /// Maximum number of blocks returned by one `get_blocks` call.
    pub blocks_count_limit: u64,
    /// Extra nanoseconds a transaction timestamp may exceed its block window by.
    /// `None` means one validation interval.
    pub transaction_timestamp_tolerance_nanos: Option<i64>,
    /// Trailing blocks inspected by the reward-recipient tie-break.
    pub tie_break_window: usize,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            genesis_amount: DEFAULT_GENESIS_AMOUNT,
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
            income_base: DEFAULT_INCOME_BASE,
            income_limit: DEFAULT_INCOME_LIMIT,
            minimal_transaction_fee: DEFAULT_MINIMAL_TRANSACTION_FEE,
            validation_interval_secs: DEFAULT_VALIDATION_INTERVAL_SECS,
            validation_timeout_secs: DEFAULT_VALIDATION_TIMEOUT_SECS,
            verifications_count_per_validation: DEFAULT_VERIFICATIONS_COUNT_PER_VALIDATION,
            blocks_count_limit: DEFAULT_BLOCKS_COUNT_LIMIT,
            transaction_timestamp_tolerance_nanos: None,
            tie_break_window: DEFAULT_TIE_BREAK_WINDOW,
        }
    }
}

impl ProtocolSettings {
    /// Block spacing Δ in nanoseconds.
    pub fn validation_interval_nanos(&self) -> i64 {
        self.validation_interval_secs as i64 * NANOS_PER_SECOND
    }

    /// Block spacing Δ as a [`Duration`].
    pub fn validation_interval(&self) -> Duration {
        Duration::from_secs(self.validation_interval_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    /// Half-life in nanoseconds, as used by the value function.
    pub fn half_life_nanos(&self) -> f64 {
        self.half_life_days * NANOS_PER_DAY as f64
    }

    /// Tolerance applied past a block window for transaction timestamps.
    pub fn transaction_timestamp_tolerance(&self) -> i64 {
        self.transaction_timestamp_tolerance_nanos
            .unwrap_or_else(|| self.validation_interval_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interval_in_nanos() {
        let s = ProtocolSettings::default();
        assert_eq!(s.validation_interval_nanos(), 60 * NANOS_PER_SECOND);
        assert_eq!(s.validation_interval(), Duration::from_secs(60));
    }

    #[test]
    fn tolerance_defaults_to_interval() {
        let s = ProtocolSettings::default();
        assert_eq!(s.transaction_timestamp_tolerance(), s.validation_interval_nanos());
    }

    #[test]
    fn tolerance_override() {
        let s = ProtocolSettings {
            transaction_timestamp_tolerance_nanos: Some(0),
            ..ProtocolSettings::default()
        };
        assert_eq!(s.transaction_timestamp_tolerance(), 0);
    }

    #[test]
    fn half_life_nanos_scales_days() {
        let s = ProtocolSettings {
            half_life_days: 1.0,
            ..ProtocolSettings::default()
        };
        assert_eq!(s.half_life_nanos(), NANOS_PER_DAY as f64);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let s: ProtocolSettings =
            serde_json::from_str(r#"{"minimal_transaction_fee": 7}"#).unwrap();
        assert_eq!(s.minimal_transaction_fee, 7);
        assert_eq!(s.genesis_amount, DEFAULT_GENESIS_AMOUNT);
    }
}
