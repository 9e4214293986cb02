//! Protocol constants. All monetary values in particles (1 DRIFT = 10^8 particles).
//! All timestamps are nanoseconds since the Unix epoch.

pub const COIN: u64 = 100_000_000;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Nanoseconds in one day.
pub const NANOS_PER_DAY: i64 = 24 * 60 * 60 * NANOS_PER_SECOND;

/// Amount credited to the first validator by the genesis block.
pub const DEFAULT_GENESIS_AMOUNT: u64 = 100_000 * COIN;

/// Time after which an output without income has lost half of its value.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 373.59;

/// Value an income-bearing output reaches after one half-life when it starts at zero.
pub const DEFAULT_INCOME_BASE: u64 = 10 * COIN;

/// Asymptotic value of an income-bearing output.
pub const DEFAULT_INCOME_LIMIT: u64 = 50 * COIN;

/// Fee floor for any non-reward transaction.
pub const DEFAULT_MINIMAL_TRANSACTION_FEE: u64 = 1_000;

/// Spacing between two consecutive blocks (Δ).
pub const DEFAULT_VALIDATION_INTERVAL_SECS: u64 = 60;

/// Upper bound for any single neighbor request during reconciliation.
pub const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 60;

/// Reconciliation sub-ticks per validation interval.
pub const DEFAULT_VERIFICATIONS_COUNT_PER_VALIDATION: u32 = 6;

/// Maximum number of blocks served by one `get_blocks` request.
pub const DEFAULT_BLOCKS_COUNT_LIMIT: u64 = 1_440;

/// Trailing blocks inspected by the reward-recipient tie-break.
pub const DEFAULT_TIE_BREAK_WINDOW: usize = 3;

/// Default JSON-RPC port of a node.
pub const DEFAULT_RPC_PORT: u16 = 8106;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanos_per_day_matches_seconds() {
        assert_eq!(NANOS_PER_DAY, 86_400 * NANOS_PER_SECOND);
    }

    #[test]
    fn income_base_below_limit() {
        assert!(DEFAULT_INCOME_BASE < DEFAULT_INCOME_LIMIT);
    }

    #[test]
    fn genesis_amount_above_income_limit() {
        assert!(DEFAULT_GENESIS_AMOUNT > DEFAULT_INCOME_LIMIT);
    }
}
