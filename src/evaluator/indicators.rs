//! Indicator math over candle series.
//!
//! All functions take the series oldest-first and return `None` when the
//! window is too short, which the evaluator reports as an element failure
//! rather than a fabricated value. EMA-family indicators carry their
//! rolling value across ticks through an explicit state struct persisted
//! in the session scratch map.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::market::Candle;
use crate::utils::decimal::{from_f64, to_f64};

/// Rolling EMA value carried across ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaState {
    pub value: Decimal,
}

/// Rolling MACD component EMAs carried across ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacdState {
    pub fast: Decimal,
    pub slow: Decimal,
    pub signal: Decimal,
}

/// Simple moving average over the last `period` values.
pub fn sma(closes: &[Decimal], period: u32) -> Option<Decimal> {
    let period = period as usize;
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let sum: Decimal = window.iter().copied().sum();
    Some(sum / Decimal::from(period))
}

/// Exponential moving average step.
///
/// Seeds with the SMA of the last `period` closes when no prior state
/// exists; otherwise folds the latest close into the carried value.
pub fn ema(closes: &[Decimal], period: u32, prev: Option<Decimal>) -> Option<Decimal> {
    let latest = *closes.last()?;
    match prev {
        Some(prev) => {
            let alpha = dec!(2) / (Decimal::from(period) + dec!(1));
            Some(latest * alpha + prev * (Decimal::ONE - alpha))
        }
        None => sma(closes, period),
    }
}

/// Relative strength index over the last `period` price changes.
pub fn rsi(closes: &[Decimal], period: u32) -> Option<Decimal> {
    let period = period as usize;
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let window = &closes[closes.len() - period - 1..];
    let mut gains = Decimal::ZERO;
    let mut losses = Decimal::ZERO;
    for pair in window.windows(2) {
        let change = pair[1] - pair[0];
        if change >= Decimal::ZERO {
            gains += change;
        } else {
            losses -= change;
        }
    }

    if losses == Decimal::ZERO {
        return Some(dec!(100));
    }
    let rs = gains / losses;
    Some(dec!(100) - dec!(100) / (Decimal::ONE + rs))
}

/// MACD histogram (macd line minus signal line), with rolling EMA state.
///
/// Returns the histogram and the updated state to persist.
pub fn macd(
    closes: &[Decimal],
    fast_period: u32,
    slow_period: u32,
    signal_period: u32,
    prev: Option<&MacdState>,
) -> Option<(Decimal, MacdState)> {
    let fast = ema(closes, fast_period, prev.map(|s| s.fast))?;
    let slow = ema(closes, slow_period, prev.map(|s| s.slow))?;
    let macd_line = fast - slow;

    let signal = match prev {
        Some(state) => {
            let alpha = dec!(2) / (Decimal::from(signal_period) + dec!(1));
            macd_line * alpha + state.signal * (Decimal::ONE - alpha)
        }
        None => macd_line,
    };

    Some((macd_line - signal, MacdState { fast, slow, signal }))
}

/// One Bollinger band value: middle SMA plus/minus `std_dev` standard
/// deviations.
pub fn bollinger(
    closes: &[Decimal],
    period: u32,
    std_dev: Decimal,
    band: crate::strategy::BollingerBand,
) -> Option<Decimal> {
    use crate::strategy::BollingerBand;

    let middle = sma(closes, period)?;
    if matches!(band, BollingerBand::Middle) {
        return Some(middle);
    }

    let window = &closes[closes.len() - period as usize..];
    let mean = to_f64(middle);
    let variance: f64 = window
        .iter()
        .map(|c| (to_f64(*c) - mean).powi(2))
        .sum::<f64>()
        / window.len() as f64;
    let deviation = from_f64(variance.sqrt());

    match band {
        BollingerBand::Upper => Some(middle + std_dev * deviation),
        BollingerBand::Lower => Some(middle - std_dev * deviation),
        BollingerBand::Middle => unreachable!(),
    }
}

/// Stochastic %K over the last `k_period` candles (0-100).
pub fn stochastic_k(candles: &[Candle], k_period: u32) -> Option<Decimal> {
    let k_period = k_period as usize;
    if k_period == 0 || candles.len() < k_period {
        return None;
    }

    let window = &candles[candles.len() - k_period..];
    let close = window.last()?.close;
    let lowest = window.iter().map(|c| c.low).min()?;
    let highest = window.iter().map(|c| c.high).max()?;

    if highest == lowest {
        return Some(dec!(50));
    }
    Some((close - lowest) / (highest - lowest) * dec!(100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn closes(values: &[i64]) -> Vec<Decimal> {
        values.iter().map(|v| Decimal::from(*v)).collect()
    }

    #[test]
    fn test_sma_window() {
        assert_eq!(sma(&closes(&[1, 2, 3, 4]), 2), Some(dec!(3.5)));
        assert_eq!(sma(&closes(&[1, 2]), 3), None);
    }

    #[test]
    fn test_ema_seeds_then_folds() {
        let series = closes(&[10, 20, 30]);
        // First tick: seeded from SMA(3) = 20.
        let seeded = ema(&series, 3, None).unwrap();
        assert_eq!(seeded, dec!(20));

        // Next tick with a new close of 40: alpha = 0.5.
        let mut next = series.clone();
        next.push(dec!(40));
        let folded = ema(&next, 3, Some(seeded)).unwrap();
        assert_eq!(folded, dec!(30)); // 40*0.5 + 20*0.5
    }

    #[test]
    fn test_rsi_bounds() {
        // Monotonic rise: no losses, RSI pegged at 100.
        assert_eq!(rsi(&closes(&[1, 2, 3, 4, 5]), 4), Some(dec!(100)));

        // Alternating equal gains and losses: RSI 50.
        let mixed = closes(&[10, 12, 10, 12, 10]);
        assert_eq!(rsi(&mixed, 4), Some(dec!(50)));

        assert_eq!(rsi(&closes(&[1, 2]), 4), None);
    }

    #[test]
    fn test_macd_histogram_starts_flat() {
        let series = closes(&[10, 11, 12, 13, 14, 15]);
        // With no prior state the signal line equals the macd line.
        let (histogram, state) = macd(&series, 2, 4, 3, None).unwrap();
        assert_eq!(histogram, Decimal::ZERO);

        let mut next = series.clone();
        next.push(dec!(20));
        let (histogram, _) = macd(&next, 2, 4, 3, Some(&state)).unwrap();
        assert!(histogram > Decimal::ZERO); // fast EMA pulls ahead on the spike
    }

    #[test]
    fn test_bollinger_bands_bracket_middle() {
        let series = closes(&[10, 12, 14, 16, 18]);
        let middle = bollinger(&series, 5, dec!(2), crate::strategy::BollingerBand::Middle).unwrap();
        let upper = bollinger(&series, 5, dec!(2), crate::strategy::BollingerBand::Upper).unwrap();
        let lower = bollinger(&series, 5, dec!(2), crate::strategy::BollingerBand::Lower).unwrap();
        assert_eq!(middle, dec!(14));
        assert!(upper > middle);
        assert!(lower < middle);
        assert_eq!(upper - middle, middle - lower);
    }

    #[test]
    fn test_stochastic_k() {
        let now = Utc::now();
        let candles: Vec<Candle> = [10, 20, 15]
            .iter()
            .map(|p| Candle::flat(now, Decimal::from(*p), dec!(1)))
            .collect();
        // close=15, low=10, high=20 -> 50%.
        assert_eq!(stochastic_k(&candles, 3), Some(dec!(50)));
        assert_eq!(stochastic_k(&candles, 5), None);
    }
}
