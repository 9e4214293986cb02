//! The value function.
//!
//! With `y` the initial value, `l` the income limit, `h` the half-life and
//! `t` the elapsed time:
//!
//! - without income: `floor(y * 2^(-t/h))`;
//! - with income and `y < l`: `floor(-l * exp(-((t ln2)/(k2 h) + (-ln((l-y)/l))^(1/k1))^k1)) + l`;
//! - with income and `y > l`: `floor((y - l) * 2^(-t/h)) + l`;
//! - with income and `y == l`: `l`.
//!
//! `2^(-t/h)` is evaluated with `exp2`, so one half-life halves a value
//! exactly.

use std::cmp::Ordering;
use std::f64::consts::LN_2;

/// Shape parameters of the income curve, derived from the income base `b`
/// and limit `l`.
///
/// `k1 = 3 - 2 ln(2b) / ln(l)` and `k2 = ln2 / (-ln(1 - b/l))^(1/k1)` when
/// `l > b > 0`, otherwise both are 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IncomeShape {
    pub k1: f64,
    pub k2: f64,
}

impl IncomeShape {
    pub fn new(income_base: u64, income_limit: u64) -> Self {
        if income_base == 0 || income_limit <= income_base {
            return Self { k1: 1.0, k2: 1.0 };
        }
        let b = income_base as f64;
        let l = income_limit as f64;
        let k1 = 3.0 - 2.0 * (2.0 * b).ln() / l.ln();
        let k2 = LN_2 / (-(1.0 - b / l).ln()).powf(1.0 / k1);
        Self { k1, k2 }
    }
}

/// Value at `current_timestamp` of an output created at `origin_timestamp`
/// with `initial_value`.
///
/// No elapsed time (or a current timestamp before the origin) returns the
/// initial value unchanged. A non-positive half-life disables aging.
pub fn value(
    current_timestamp: i64,
    origin_timestamp: i64,
    half_life_nanos: f64,
    income_base: u64,
    income_limit: u64,
    initial_value: u64,
    has_income: bool,
) -> u64 {
    value_with_shape(
        current_timestamp,
        origin_timestamp,
        half_life_nanos,
        income_limit,
        IncomeShape::new(income_base, income_limit),
        initial_value,
        has_income,
    )
}

/// [`value`] with precomputed shape parameters.
pub fn value_with_shape(
    current_timestamp: i64,
    origin_timestamp: i64,
    half_life_nanos: f64,
    income_limit: u64,
    shape: IncomeShape,
    initial_value: u64,
    has_income: bool,
) -> u64 {
    if current_timestamp <= origin_timestamp || half_life_nanos <= 0.0 {
        return initial_value;
    }
    let elapsed = current_timestamp.abs_diff(origin_timestamp) as f64;
    if !has_income {
        return decay(initial_value, elapsed, half_life_nanos);
    }
    match initial_value.cmp(&income_limit) {
        Ordering::Less => grow(initial_value, income_limit, elapsed, half_life_nanos, shape),
        Ordering::Greater => {
            decay(initial_value - income_limit, elapsed, half_life_nanos) + income_limit
        }
        Ordering::Equal => income_limit,
    }
}

/// `floor(y * 2^(-t/h))`.
fn decay(initial_value: u64, elapsed: f64, half_life: f64) -> u64 {
    let factor = (-elapsed / half_life).exp2();
    (initial_value as f64 * factor).floor() as u64
}

/// Income growth from `y < l` toward `l`.
fn grow(
    initial_value: u64,
    income_limit: u64,
    elapsed: f64,
    half_life: f64,
    shape: IncomeShape,
) -> u64 {
    let l = income_limit as f64;
    let y = initial_value as f64;
    let start = (-((l - y) / l).ln()).powf(1.0 / shape.k1);
    let progress = elapsed * LN_2 / (shape.k2 * half_life);
    let remaining = (-(progress + start).powf(shape.k1)).exp();
    let result = (-l * remaining).floor() + l;
    if result <= 0.0 {
        0
    } else {
        (result as u64).min(income_limit)
    }
}
