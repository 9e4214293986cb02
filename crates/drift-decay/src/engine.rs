//! Decay engine implementing the [`DecayCalculator`] trait.

use drift_core::settings::ProtocolSettings;
use drift_core::traits::DecayCalculator;

use crate::curve::{self, IncomeShape};

/// The production value function, parameterised by the protocol settings.
///
/// The income shape is computed once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayEngine {
    half_life_nanos: f64,
    income_base: u64,
    income_limit: u64,
    shape: IncomeShape,
}

impl DecayEngine {
    pub fn new(half_life_nanos: f64, income_base: u64, income_limit: u64) -> Self {
        Self {
            half_life_nanos,
            income_base,
            income_limit,
            shape: IncomeShape::new(income_base, income_limit),
        }
    }

    pub fn from_settings(settings: &ProtocolSettings) -> Self {
        Self::new(settings.half_life_nanos(), settings.income_base, settings.income_limit)
    }

    pub fn half_life_nanos(&self) -> f64 {
        self.half_life_nanos
    }

    pub fn income_base(&self) -> u64 {
        self.income_base
    }

    pub fn income_limit(&self) -> u64 {
        self.income_limit
    }
}

impl Default for DecayEngine {
    fn default() -> Self {
        Self::from_settings(&ProtocolSettings::default())
    }
}

impl DecayCalculator for DecayEngine {
    fn value(
        &self,
        initial_value: u64,
        has_income: bool,
        origin_timestamp: i64,
        current_timestamp: i64,
    ) -> u64 {
        curve::value_with_shape(
            current_timestamp,
            origin_timestamp,
            self.half_life_nanos,
            self.income_limit,
            self.shape,
            initial_value,
            has_income,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::constants::{COIN, NANOS_PER_DAY};
    use proptest::prelude::*;

    fn engine() -> DecayEngine {
        DecayEngine::default()
    }

    // --- construction ---

    #[test]
    fn from_settings_uses_half_life_in_nanos() {
        let settings = ProtocolSettings { half_life_days: 2.0, ..ProtocolSettings::default() };
        let e = DecayEngine::from_settings(&settings);
        assert_eq!(e.half_life_nanos(), 2.0 * NANOS_PER_DAY as f64);
        assert_eq!(e.income_limit(), settings.income_limit);
    }

    // --- value ---

    #[test]
    fn half_life_is_exact() {
        let settings = ProtocolSettings { half_life_days: 1.0, ..ProtocolSettings::default() };
        let e = DecayEngine::from_settings(&settings);
        assert_eq!(e.value(10 * COIN, false, 0, NANOS_PER_DAY), 5 * COIN);
    }

    #[test]
    fn income_output_grows_then_stays_bounded() {
        let e = engine();
        let day = e.value(0, true, 0, NANOS_PER_DAY);
        let year = e.value(0, true, 0, 365 * NANOS_PER_DAY);
        assert!(day > 0);
        assert!(year > day);
        assert!(year <= e.income_limit());
    }

    #[test]
    fn income_above_limit_decays_toward_it() {
        let e = engine();
        let big = 10 * e.income_limit();
        let later = e.value(big, true, 0, 365 * NANOS_PER_DAY);
        assert!(later < big);
        assert!(later >= e.income_limit());
    }

    // --- dyn compatibility ---

    #[test]
    fn engine_is_object_safe() {
        let e = engine();
        let dyn_e: &dyn DecayCalculator = &e;
        assert_eq!(dyn_e.value(42, false, 5, 5), 42);
    }

    // --- proptest ---

    proptest! {
        #[test]
        fn matches_pure_function(
            y in 0u64..(1_000_000 * COIN),
            income in any::<bool>(),
            origin in 0i64..(1i64 << 60),
            elapsed in 0i64..(1i64 << 55),
        ) {
            let e = engine();
            let expected = curve::value(
                origin + elapsed,
                origin,
                e.half_life_nanos(),
                e.income_base,
                e.income_limit,
                y,
                income,
            );
            prop_assert_eq!(e.value(y, income, origin, origin + elapsed), expected);
        }
    }
}
