//! Mock collaborators for paper trading and tests.
//!
//! `MockVenue` simulates the signing/broadcast boundary with scripted
//! behavior (fill, hang, fail N times) and enough position tracking to
//! attribute realized profit on exits. `MockMarketFeed` serves snapshots
//! from seeded candle history. Both power Paper/Sandbox sessions and the
//! executor/controller test suites.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::{ExecutionVenue, OrderRequest, SubmitReceipt, TxReport, TxStatus, VenueError};
use crate::evaluator::TradeSide;
use crate::market::{Candle, CandleInterval, MarketDataFeed, MarketSnapshot};

/// Scripted venue behavior.
#[derive(Debug, Clone)]
pub enum MockVenueBehavior {
    /// Fill immediately at the marked price.
    Fill,
    /// Never resolve; the executor's attempt timeout fires first.
    Hang,
    /// Fail every submission with this error.
    Fail(VenueError),
    /// Fail the first N submissions, then fill.
    FailTimes(u32, VenueError),
}

#[derive(Debug, Clone, Default)]
struct MockPosition {
    qty: Decimal,
    avg_price: Decimal,
}

#[derive(Debug, Default)]
struct MockVenueState {
    prices: HashMap<String, Decimal>,
    positions: HashMap<String, MockPosition>,
    reports: HashMap<String, TxReport>,
    submissions: Vec<OrderRequest>,
    failures_served: u32,
    tx_counter: u64,
}

/// In-process execution venue for paper trading.
pub struct MockVenue {
    behavior: MockVenueBehavior,
    state: Arc<RwLock<MockVenueState>>,
    /// Taker fee applied to fills.
    fee_rate: Decimal,
}

impl MockVenue {
    pub fn new(behavior: MockVenueBehavior) -> Self {
        Self {
            behavior,
            state: Arc::new(RwLock::new(MockVenueState::default())),
            fee_rate: dec!(0.001),
        }
    }

    /// Mark a fill price for a pair.
    pub async fn set_price(&self, pair: &str, price: Decimal) {
        self.state
            .write()
            .await
            .prices
            .insert(pair.to_string(), price);
    }

    /// Orders submitted so far (including failed attempts).
    pub async fn submission_count(&self) -> usize {
        self.state.read().await.submissions.len()
    }

    /// Net position for a pair.
    pub async fn position_qty(&self, pair: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(pair)
            .map(|p| p.qty)
            .unwrap_or(Decimal::ZERO)
    }

    async fn fill(&self, order: &OrderRequest) -> Result<SubmitReceipt, VenueError> {
        let mut state = self.state.write().await;

        let price = order
            .limit_price
            .or_else(|| state.prices.get(&order.pair).copied())
            .ok_or_else(|| VenueError::Rejected(format!("no mark price for {}", order.pair)))?;

        let notional = order.size * price;
        let fee = notional * self.fee_rate;

        // Position bookkeeping: weighted-average entries, realized P/L on exits.
        let realized = {
            let position = state.positions.entry(order.pair.clone()).or_default();
            match order.side {
                TradeSide::Buy | TradeSide::Swap => {
                    let total_cost = position.avg_price * position.qty + notional;
                    position.qty += order.size;
                    if position.qty > Decimal::ZERO {
                        position.avg_price = total_cost / position.qty;
                    }
                    None
                }
                TradeSide::Sell => {
                    let closed = order.size.min(position.qty);
                    let profit = if closed > Decimal::ZERO {
                        (price - position.avg_price) * closed
                    } else {
                        Decimal::ZERO
                    };
                    position.qty -= closed;
                    if position.qty == Decimal::ZERO {
                        position.avg_price = Decimal::ZERO;
                    }
                    Some(profit)
                }
            }
        };

        state.tx_counter += 1;
        let tx_hash = format!("0xmock{:016x}", state.tx_counter);
        state.reports.insert(
            tx_hash.clone(),
            TxReport {
                status: TxStatus::Confirmed,
                fee_usd: Some(fee),
                gas_used_gwei: Some(dec!(0.05)),
                realized_profit_usd: realized,
            },
        );

        debug!(
            pair = %order.pair,
            side = ?order.side,
            size = %order.size,
            %price,
            %tx_hash,
            "mock venue filled order"
        );
        Ok(SubmitReceipt {
            tx_hash,
            status: TxStatus::Confirmed,
        })
    }
}

#[async_trait]
impl ExecutionVenue for MockVenue {
    async fn submit(&self, order: &OrderRequest) -> Result<SubmitReceipt, VenueError> {
        self.state.write().await.submissions.push(order.clone());

        match &self.behavior {
            MockVenueBehavior::Fill => self.fill(order).await,
            MockVenueBehavior::Hang => {
                // Outlive any sane transaction timeout.
                tokio::time::sleep(std::time::Duration::from_secs(24 * 3600)).await;
                Err(VenueError::Timeout)
            }
            MockVenueBehavior::Fail(error) => Err(error.clone()),
            MockVenueBehavior::FailTimes(n, error) => {
                let should_fail = {
                    let mut state = self.state.write().await;
                    if state.failures_served < *n {
                        state.failures_served += 1;
                        true
                    } else {
                        false
                    }
                };
                if should_fail {
                    Err(error.clone())
                } else {
                    self.fill(order).await
                }
            }
        }
    }

    async fn tx_status(&self, tx_hash: &str) -> Result<TxReport, VenueError> {
        self.state
            .read()
            .await
            .reports
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| VenueError::Rpc(format!("unknown transaction {}", tx_hash)))
    }
}

/// In-process market feed serving snapshots from seeded history.
pub struct MockMarketFeed {
    history: Arc<RwLock<HashMap<String, Vec<Decimal>>>>,
    interval: CandleInterval,
    gas_price_gwei: Decimal,
}

impl MockMarketFeed {
    pub fn new(interval: CandleInterval) -> Self {
        Self {
            history: Arc::new(RwLock::new(HashMap::new())),
            interval,
            gas_price_gwei: dec!(10),
        }
    }

    /// Seed a full close-price history for a pair, oldest first.
    pub async fn set_history(&self, pair: &str, closes: Vec<Decimal>) {
        self.history
            .write()
            .await
            .insert(pair.to_string(), closes);
    }

    /// Append one close, as a live feed would on each candle.
    pub async fn push_close(&self, pair: &str, close: Decimal) {
        self.history
            .write()
            .await
            .entry(pair.to_string())
            .or_default()
            .push(close);
    }

    /// Deterministic synthetic price path for demo runs: a drifting wave
    /// around `base`.
    pub async fn seed_synthetic(&self, pair: &str, base: Decimal, len: usize) {
        let mut closes = Vec::with_capacity(len);
        for i in 0..len {
            let phase = i as f64 / 7.0;
            let wave = phase.sin() * 0.02 + (i as f64 / len.max(1) as f64) * 0.01;
            let factor = Decimal::from_f64_retain(1.0 + wave).unwrap_or(Decimal::ONE);
            closes.push(base * factor);
        }
        self.set_history(pair, closes).await;
    }

    fn candles(closes: &[Decimal], interval: CandleInterval, as_of: DateTime<Utc>) -> Vec<Candle> {
        let step = ChronoDuration::minutes(interval.minutes() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let age = (closes.len() - 1 - i) as i32;
                Candle::flat(as_of - step * age, *close, dec!(1000))
            })
            .collect()
    }
}

#[async_trait]
impl MarketDataFeed for MockMarketFeed {
    async fn snapshot(
        &self,
        pairs: &[String],
        as_of: DateTime<Utc>,
    ) -> anyhow::Result<MarketSnapshot> {
        let history = self.history.read().await;
        let mut snapshot = MarketSnapshot::new(as_of).with_gas_price(self.gas_price_gwei);

        for pair in pairs {
            let Some(closes) = history.get(pair) else {
                anyhow::bail!("no seeded history for pair {}", pair);
            };
            let Some(last) = closes.last() else {
                anyhow::bail!("empty history for pair {}", pair);
            };
            snapshot = snapshot
                .with_quote(pair, *last, dec!(1_000_000))
                .with_series(pair, self.interval, Self::candles(closes, self.interval, as_of));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::ActionKind;
    use uuid::Uuid;

    fn order(side: TradeSide, size: Decimal) -> OrderRequest {
        OrderRequest {
            client_order_id: Uuid::new_v4(),
            pair: "SOL/USDC".to_string(),
            side,
            action: ActionKind::Buy,
            size,
            limit_price: None,
            slippage_tolerance: None,
            gas_price_gwei: None,
            network: "mainnet".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fill_tracks_position_and_realizes_profit() {
        let venue = MockVenue::new(MockVenueBehavior::Fill);
        venue.set_price("SOL/USDC", dec!(100)).await;

        let receipt = venue.submit(&order(TradeSide::Buy, dec!(2))).await.unwrap();
        assert_eq!(receipt.status, TxStatus::Confirmed);
        assert_eq!(venue.position_qty("SOL/USDC").await, dec!(2));

        // Price moves up; selling 1 realizes 10 USD.
        venue.set_price("SOL/USDC", dec!(110)).await;
        let receipt = venue.submit(&order(TradeSide::Sell, dec!(1))).await.unwrap();
        let report = venue.tx_status(&receipt.tx_hash).await.unwrap();
        assert_eq!(report.realized_profit_usd, Some(dec!(10)));
        assert_eq!(venue.position_qty("SOL/USDC").await, dec!(1));
    }

    #[tokio::test]
    async fn test_fail_times_then_fills() {
        let venue = MockVenue::new(MockVenueBehavior::FailTimes(
            1,
            VenueError::NonceConflict,
        ));
        venue.set_price("SOL/USDC", dec!(100)).await;

        assert!(venue.submit(&order(TradeSide::Buy, dec!(1))).await.is_err());
        assert!(venue.submit(&order(TradeSide::Buy, dec!(1))).await.is_ok());
        assert_eq!(venue.submission_count().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_pair_is_rejected() {
        let venue = MockVenue::new(MockVenueBehavior::Fill);
        let err = venue
            .submit(&order(TradeSide::Buy, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_feed_serves_seeded_history() {
        let feed = MockMarketFeed::new(CandleInterval::OneHour);
        feed.set_history("SOL/USDC", vec![dec!(100), dec!(102), dec!(105)])
            .await;

        let snapshot = feed
            .snapshot(&["SOL/USDC".to_string()], Utc::now())
            .await
            .unwrap();
        assert_eq!(snapshot.price("SOL/USDC"), Some(dec!(105)));
        assert_eq!(
            snapshot
                .closes("SOL/USDC", CandleInterval::OneHour)
                .unwrap()
                .len(),
            3
        );

        // Unknown pair is an error, not an empty snapshot.
        assert!(feed
            .snapshot(&["ETH/USDC".to_string()], Utc::now())
            .await
            .is_err());
    }
}
