//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Safe division that returns zero if the divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Percent change from `from` to `to` (e.g. 100 -> 105 is 5).
pub fn pct_change(from: Decimal, to: Decimal) -> Decimal {
    safe_div(to - from, from) * dec!(100)
}

/// Lossy conversion for statistical aggregation.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(0.0)
}

/// Lossy conversion back from statistical aggregation.
pub fn from_f64(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(dec!(100), dec!(105)), dec!(5));
        assert_eq!(pct_change(dec!(100), dec!(95)), dec!(-5));
        assert_eq!(pct_change(Decimal::ZERO, dec!(5)), Decimal::ZERO);
    }

    #[test]
    fn test_f64_round_trip_is_close() {
        let value = dec!(123.456);
        let back = from_f64(to_f64(value));
        assert!((back - value).abs() < dec!(0.0001));
    }
}
