//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round down to a multiple of `step` (quantity lot or price tick).
///
/// The result carries exactly the number of decimal places implied by the
/// step, so `to_string()` yields the exchange's expected format.
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    let floored = ((value / step).floor() * step).max(Decimal::ZERO);
    floored.round_dp_with_strategy(step_decimals(step), RoundingStrategy::ToZero)
}

/// Number of significant decimal places implied by a step size.
///
/// `0.00100000` -> 3, `1.00000000` -> 0.
pub fn step_decimals(step: Decimal) -> u32 {
    step.normalize().scale()
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Arithmetic mean, zero for an empty slice.
pub fn mean(values: &[Decimal]) -> Decimal {
    let sum: Decimal = values.iter().copied().sum();
    safe_div(sum, Decimal::from(values.len()))
}

/// Reduce an amount by a percentage (0.1 = 0.1%).
pub fn less_percent(value: Decimal, pct: Decimal) -> Decimal {
    value - value * pct / Decimal::ONE_HUNDRED
}
