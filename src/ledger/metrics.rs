//! Incremental performance metrics.
//!
//! One tracker per session, folded forward as trades settle. Reads are a
//! snapshot of the accumulators; nothing replays trade history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::execution::{BotTrade, TradeStatus};
use crate::utils::decimal::{from_f64, to_f64};

/// Aggregate performance figures for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotPerformanceMetrics {
    pub total_trades: u64,
    pub completed_trades: u64,
    pub failed_trades: u64,
    pub canceled_trades: u64,
    /// Winning fraction of completed trades, 0-100.
    pub win_rate_pct: Decimal,
    pub avg_profit_usd: Decimal,
    pub avg_loss_usd: Decimal,
    /// Gross profit over gross loss; zero when no losses yet.
    pub profit_factor: Decimal,
    pub total_profit_usd: Decimal,
    /// Worst peak-to-trough drop of the cumulative profit curve, 0-1.
    pub max_drawdown_pct: Decimal,
    /// Per-trade Sharpe ratio (mean/stddev of realized profit).
    pub sharpe_ratio: Decimal,
    pub total_fees_usd: Decimal,
    pub total_gas_gwei: Decimal,
}

/// Accumulators behind `BotPerformanceMetrics`.
#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    total_trades: u64,
    completed: u64,
    failed: u64,
    canceled: u64,
    wins: u64,
    losses: u64,
    gross_profit_usd: Decimal,
    gross_loss_usd: Decimal,
    total_profit_usd: Decimal,
    total_fees_usd: Decimal,
    total_gas_gwei: Decimal,
    equity_usd: Decimal,
    peak_equity_usd: Decimal,
    max_drawdown_pct: Decimal,
    // Welford accumulators over per-trade profit, for the Sharpe ratio.
    sample_count: u64,
    mean: f64,
    m2: f64,
}

impl PerformanceTracker {
    /// Fold one settled trade into the accumulators. Pending trades are
    /// ignored; they fold in when they reach a terminal status.
    pub fn record(&mut self, trade: &BotTrade) {
        match trade.status {
            TradeStatus::Pending => return,
            TradeStatus::Completed => self.completed += 1,
            TradeStatus::Failed => self.failed += 1,
            TradeStatus::Canceled => self.canceled += 1,
        }
        self.total_trades += 1;

        if let Some(fee) = trade.fee_usd {
            self.total_fees_usd += fee;
        }
        if let Some(gas) = trade.gas_used_gwei {
            self.total_gas_gwei += gas;
        }

        if trade.status != TradeStatus::Completed {
            return;
        }

        let profit = trade.profit_usd.unwrap_or(Decimal::ZERO);
        self.total_profit_usd += profit;
        if profit > Decimal::ZERO {
            self.wins += 1;
            self.gross_profit_usd += profit;
        } else if profit < Decimal::ZERO {
            self.losses += 1;
            self.gross_loss_usd += -profit;
        }

        // Equity curve over cumulative realized profit.
        self.equity_usd += profit;
        if self.equity_usd > self.peak_equity_usd {
            self.peak_equity_usd = self.equity_usd;
        } else if self.peak_equity_usd > Decimal::ZERO {
            let drawdown = (self.peak_equity_usd - self.equity_usd) / self.peak_equity_usd;
            if drawdown > self.max_drawdown_pct {
                self.max_drawdown_pct = drawdown;
            }
        }

        // Welford online mean/variance.
        self.sample_count += 1;
        let value = to_f64(profit);
        let delta = value - self.mean;
        self.mean += delta / self.sample_count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Current aggregate view.
    pub fn snapshot(&self) -> BotPerformanceMetrics {
        let win_rate_pct = if self.completed > 0 {
            Decimal::from(self.wins) / Decimal::from(self.completed) * Decimal::from(100)
        } else {
            Decimal::ZERO
        };
        let avg_profit_usd = if self.wins > 0 {
            self.gross_profit_usd / Decimal::from(self.wins)
        } else {
            Decimal::ZERO
        };
        let avg_loss_usd = if self.losses > 0 {
            self.gross_loss_usd / Decimal::from(self.losses)
        } else {
            Decimal::ZERO
        };
        let profit_factor = if self.gross_loss_usd > Decimal::ZERO {
            self.gross_profit_usd / self.gross_loss_usd
        } else {
            Decimal::ZERO
        };

        let sharpe_ratio = if self.sample_count > 1 {
            let variance = self.m2 / self.sample_count as f64;
            let std_dev = variance.sqrt();
            if std_dev > 1e-10 {
                from_f64(self.mean / std_dev)
            } else {
                Decimal::ZERO
            }
        } else {
            Decimal::ZERO
        };

        BotPerformanceMetrics {
            total_trades: self.total_trades,
            completed_trades: self.completed,
            failed_trades: self.failed,
            canceled_trades: self.canceled,
            win_rate_pct,
            avg_profit_usd,
            avg_loss_usd,
            profit_factor,
            total_profit_usd: self.total_profit_usd,
            max_drawdown_pct: self.max_drawdown_pct,
            sharpe_ratio,
            total_fees_usd: self.total_fees_usd,
            total_gas_gwei: self.total_gas_gwei,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::TradeSide;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn trade(status: TradeStatus, profit: Option<Decimal>) -> BotTrade {
        BotTrade {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            bot_id: Uuid::new_v4(),
            strategy_id: Uuid::new_v4(),
            wallet_id: None,
            timestamp: Utc::now(),
            side: TradeSide::Sell,
            status,
            pair: "SOL/USDC".to_string(),
            amount: dec!(1),
            price: Some(dec!(100)),
            usd_value: Some(dec!(100)),
            profit_usd: profit,
            profit_pct: None,
            tx_hash: None,
            gas_used_gwei: Some(dec!(0.1)),
            gas_price_gwei: None,
            fee_usd: Some(dec!(0.25)),
            network: "mainnet".to_string(),
            error: None,
            duration_ms: 10,
        }
    }

    #[test]
    fn test_win_rate_and_profit_factor() {
        let mut tracker = PerformanceTracker::default();
        tracker.record(&trade(TradeStatus::Completed, Some(dec!(30))));
        tracker.record(&trade(TradeStatus::Completed, Some(dec!(10))));
        tracker.record(&trade(TradeStatus::Completed, Some(dec!(-20))));
        tracker.record(&trade(TradeStatus::Failed, None));

        let metrics = tracker.snapshot();
        assert_eq!(metrics.total_trades, 4);
        assert_eq!(metrics.completed_trades, 3);
        assert_eq!(metrics.failed_trades, 1);
        // 2 of 3 completed trades won.
        assert!(metrics.win_rate_pct > dec!(66) && metrics.win_rate_pct < dec!(67));
        assert_eq!(metrics.avg_profit_usd, dec!(20));
        assert_eq!(metrics.avg_loss_usd, dec!(20));
        assert_eq!(metrics.profit_factor, dec!(2));
        assert_eq!(metrics.total_profit_usd, dec!(20));
    }

    #[test]
    fn test_drawdown_tracks_peak_to_trough() {
        let mut tracker = PerformanceTracker::default();
        tracker.record(&trade(TradeStatus::Completed, Some(dec!(100))));
        tracker.record(&trade(TradeStatus::Completed, Some(dec!(-40))));
        tracker.record(&trade(TradeStatus::Completed, Some(dec!(60))));

        let metrics = tracker.snapshot();
        // Peak 100, trough 60: 40% drawdown.
        assert_eq!(metrics.max_drawdown_pct, dec!(0.4));
        assert_eq!(metrics.total_profit_usd, dec!(120));
    }

    #[test]
    fn test_pending_trades_do_not_count() {
        let mut tracker = PerformanceTracker::default();
        tracker.record(&trade(TradeStatus::Pending, None));
        assert_eq!(tracker.snapshot().total_trades, 0);
    }

    #[test]
    fn test_gas_and_fees_accumulate_across_outcomes() {
        let mut tracker = PerformanceTracker::default();
        tracker.record(&trade(TradeStatus::Completed, Some(dec!(5))));
        tracker.record(&trade(TradeStatus::Failed, None));

        let metrics = tracker.snapshot();
        assert_eq!(metrics.total_fees_usd, dec!(0.5));
        assert_eq!(metrics.total_gas_gwei, dec!(0.2));
    }
}
