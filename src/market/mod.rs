//! Market data types and the feed boundary.
//!
//! A `MarketSnapshot` is the immutable per-tick view of the market: one
//! quote per trading pair plus candle series at the intervals indicators
//! sample. Snapshots are produced by a `MarketDataFeed` implementation
//! outside this crate (or by the in-crate mock for paper trading).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Candle sampling interval for indicator series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl CandleInterval {
    /// Interval length in minutes.
    pub fn minutes(&self) -> u32 {
        match self {
            CandleInterval::OneMinute => 1,
            CandleInterval::FiveMinutes => 5,
            CandleInterval::FifteenMinutes => 15,
            CandleInterval::OneHour => 60,
            CandleInterval::FourHours => 240,
            CandleInterval::OneDay => 1440,
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::OneHour => "1h",
            CandleInterval::FourHours => "4h",
            CandleInterval::OneDay => "1d",
        };
        write!(f, "{}", s)
    }
}

/// A single OHLCV candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Flat candle at a single price, for tests and synthetic series.
    pub fn flat(open_time: DateTime<Utc>, price: Decimal, volume: Decimal) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }
}

/// Current quote for one trading pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub pair: String,
    pub price: Decimal,
    pub volume_24h: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Immutable view of the market for one evaluation tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub as_of: DateTime<Utc>,
    quotes: HashMap<String, Quote>,
    /// Candle series keyed by pair, then by sampling interval.
    series: HashMap<String, HashMap<CandleInterval, Vec<Candle>>>,
    /// Current network base gas price in gwei, if the feed provides one.
    pub gas_price_gwei: Option<Decimal>,
}

impl MarketSnapshot {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            ..Default::default()
        }
    }

    /// Attach the current quote for a pair.
    pub fn with_quote(mut self, pair: &str, price: Decimal, volume_24h: Decimal) -> Self {
        self.quotes.insert(
            pair.to_string(),
            Quote {
                pair: pair.to_string(),
                price,
                volume_24h,
                as_of: self.as_of,
            },
        );
        self
    }

    /// Attach a candle series for a pair at a sampling interval.
    pub fn with_series(
        mut self,
        pair: &str,
        interval: CandleInterval,
        candles: Vec<Candle>,
    ) -> Self {
        self.series
            .entry(pair.to_string())
            .or_default()
            .insert(interval, candles);
        self
    }

    /// Attach a network base gas price.
    pub fn with_gas_price(mut self, gwei: Decimal) -> Self {
        self.gas_price_gwei = Some(gwei);
        self
    }

    pub fn quote(&self, pair: &str) -> Option<&Quote> {
        self.quotes.get(pair)
    }

    pub fn price(&self, pair: &str) -> Option<Decimal> {
        self.quotes.get(pair).map(|q| q.price)
    }

    pub fn candles(&self, pair: &str, interval: CandleInterval) -> Option<&[Candle]> {
        self.series
            .get(pair)
            .and_then(|by_interval| by_interval.get(&interval))
            .map(|v| v.as_slice())
    }

    /// Close prices for a pair at an interval, oldest first.
    pub fn closes(&self, pair: &str, interval: CandleInterval) -> Option<Vec<Decimal>> {
        self.candles(pair, interval)
            .map(|c| c.iter().map(|candle| candle.close).collect())
    }

    pub fn pairs(&self) -> impl Iterator<Item = &String> {
        self.quotes.keys()
    }
}

/// Boundary to the external market-data collaborator.
///
/// Must be callable within a tick's timeout budget; the session controller
/// treats a feed error as a tick-level failure, not a crash.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Produce a snapshot covering `pairs` as of the given instant.
    async fn snapshot(
        &self,
        pairs: &[String],
        as_of: DateTime<Utc>,
    ) -> anyhow::Result<MarketSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_builder_and_lookup() {
        let now = Utc::now();
        let snapshot = MarketSnapshot::new(now)
            .with_quote("SOL/USDC", dec!(105), dec!(1_000_000))
            .with_series(
                "SOL/USDC",
                CandleInterval::OneHour,
                vec![Candle::flat(now, dec!(104), dec!(10))],
            );

        assert_eq!(snapshot.price("SOL/USDC"), Some(dec!(105)));
        assert_eq!(
            snapshot
                .closes("SOL/USDC", CandleInterval::OneHour)
                .unwrap(),
            vec![dec!(104)]
        );
        assert!(snapshot.price("ETH/USDC").is_none());
        assert!(snapshot.candles("SOL/USDC", CandleInterval::OneDay).is_none());
    }

    #[test]
    fn test_interval_minutes() {
        assert_eq!(CandleInterval::OneMinute.minutes(), 1);
        assert_eq!(CandleInterval::FourHours.minutes(), 240);
        assert_eq!(CandleInterval::OneHour.to_string(), "1h");
    }
}
