//! The risk gate.
//!
//! Applies a session's resource and risk policy to the actions a tick
//! proposed. Checks run in a fixed order and short-circuit on the first
//! failure per action; a rejection is a policy outcome, not a fault —
//! it is logged at WARNING and recorded, and the session keeps running.
//!
//! Callers pass order proposals only; alert actions bypass the gate.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{BotExecutionConfig, GasPolicy};
use crate::evaluator::TradeProposal;
use crate::market::MarketSnapshot;

/// Mutable per-session counters the gate projects against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRuntimeCounters {
    /// Trades currently in flight.
    pub open_trades: u32,
    /// Trades dispatched during the current UTC day.
    pub trades_today: u32,
    /// The UTC day `trades_today` counts against.
    pub day: NaiveDate,
    /// Notional currently deployed, in USD.
    pub open_exposure_usd: Decimal,
    /// Session profit/loss as a fraction of the capital base.
    pub profit_pct: Decimal,
    /// High-water profit fraction, for trailing stops.
    pub peak_profit_pct: Decimal,
}

impl SessionRuntimeCounters {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            open_trades: 0,
            trades_today: 0,
            day,
            open_exposure_usd: Decimal::ZERO,
            profit_pct: Decimal::ZERO,
            peak_profit_pct: Decimal::ZERO,
        }
    }

    /// Reset the daily counter when the UTC day changes.
    pub fn roll_over(&mut self, today: NaiveDate) {
        if today != self.day {
            debug!(from = %self.day, to = %today, "daily trade counter rolled over");
            self.day = today;
            self.trades_today = 0;
        }
    }

    /// Fold a realized profit delta (fraction of capital base) into the
    /// running figures.
    pub fn record_profit(&mut self, delta_pct: Decimal) {
        self.profit_pct += delta_pct;
        if self.profit_pct > self.peak_profit_pct {
            self.peak_profit_pct = self.profit_pct;
        }
    }
}

/// Why the gate suppressed an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    ConcurrentTradeLimit {
        limit: u32,
    },
    DailyTradeLimit {
        limit: u32,
    },
    ExposureCap {
        projected_pct: Decimal,
        limit_pct: Decimal,
    },
    PriceUnavailable {
        pair: String,
    },
    StopLossBreached {
        profit_pct: Decimal,
    },
    TakeProfitReached {
        profit_pct: Decimal,
    },
    SlippageUnattachable,
    GasUnresolvable,
    GasCeilingExceeded {
        resolved_gwei: Decimal,
        ceiling_gwei: Decimal,
    },
}

impl RejectReason {
    /// Stable kebab-case code for logs and clients.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::ConcurrentTradeLimit { .. } => "concurrent-trade-limit",
            RejectReason::DailyTradeLimit { .. } => "daily-trade-limit",
            RejectReason::ExposureCap { .. } => "exposure-cap",
            RejectReason::PriceUnavailable { .. } => "price-unavailable",
            RejectReason::StopLossBreached { .. } => "stop-loss-breached",
            RejectReason::TakeProfitReached { .. } => "take-profit-reached",
            RejectReason::SlippageUnattachable => "slippage-unattachable",
            RejectReason::GasUnresolvable => "gas-unresolvable",
            RejectReason::GasCeilingExceeded { .. } => "gas-ceiling-exceeded",
        }
    }
}

/// An action that cleared every check, annotated with the resolved
/// execution parameters. Semantics are unchanged from the proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmittedAction {
    pub proposal: TradeProposal,
    /// Slippage tolerance attached to market-style orders.
    pub slippage_tolerance: Option<Decimal>,
    /// Concrete gas price, when the policy is not venue-default.
    pub gas_price_gwei: Option<Decimal>,
    /// Notional used for exposure projection.
    pub notional_usd: Decimal,
}

/// Per-action outcome of a gate pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GateDecision {
    Admitted(AdmittedAction),
    Rejected {
        proposal: TradeProposal,
        reason: RejectReason,
    },
}

impl GateDecision {
    pub fn admitted(&self) -> Option<&AdmittedAction> {
        match self {
            GateDecision::Admitted(action) => Some(action),
            GateDecision::Rejected { .. } => None,
        }
    }
}

/// Stateless policy applicator; all state lives in the counters.
#[derive(Debug, Default)]
pub struct RiskGate;

impl RiskGate {
    /// Run every proposal through the ordered checks.
    ///
    /// Admissions in the same batch count toward the concurrent, daily,
    /// and exposure projections of the proposals behind them.
    pub fn admit(
        &self,
        proposals: Vec<TradeProposal>,
        config: &BotExecutionConfig,
        counters: &SessionRuntimeCounters,
        snapshot: &MarketSnapshot,
    ) -> Vec<GateDecision> {
        let mut decisions = Vec::with_capacity(proposals.len());
        let mut projected_open = counters.open_trades;
        let mut projected_today = counters.trades_today;
        let mut projected_exposure = counters.open_exposure_usd;

        for proposal in proposals {
            match self.check_one(
                &proposal,
                config,
                counters,
                snapshot,
                projected_open,
                projected_today,
                projected_exposure,
            ) {
                Ok(admitted) => {
                    projected_open += 1;
                    projected_today += 1;
                    projected_exposure += admitted.notional_usd;
                    decisions.push(GateDecision::Admitted(admitted));
                }
                Err(reason) => {
                    warn!(
                        element = %proposal.element_id,
                        pair = %proposal.pair,
                        action = %proposal.action,
                        reason = reason.code(),
                        "risk gate rejected proposed action"
                    );
                    decisions.push(GateDecision::Rejected { proposal, reason });
                }
            }
        }
        decisions
    }

    #[allow(clippy::too_many_arguments)]
    fn check_one(
        &self,
        proposal: &TradeProposal,
        config: &BotExecutionConfig,
        counters: &SessionRuntimeCounters,
        snapshot: &MarketSnapshot,
        projected_open: u32,
        projected_today: u32,
        projected_exposure: Decimal,
    ) -> Result<AdmittedAction, RejectReason> {
        // 1. Concurrency cap.
        if projected_open >= config.max_concurrent_trades {
            return Err(RejectReason::ConcurrentTradeLimit {
                limit: config.max_concurrent_trades,
            });
        }

        // 2. Daily cap.
        if projected_today >= config.max_daily_trades {
            return Err(RejectReason::DailyTradeLimit {
                limit: config.max_daily_trades,
            });
        }

        // 3. Projected exposure.
        let price = proposal
            .limit_price
            .or_else(|| snapshot.price(&proposal.pair))
            .ok_or_else(|| RejectReason::PriceUnavailable {
                pair: proposal.pair.clone(),
            })?;
        let notional = proposal.size * price;
        let projected_pct = (projected_exposure + notional) / config.capital_base_usd;
        if projected_pct > config.max_exposure_pct {
            return Err(RejectReason::ExposureCap {
                projected_pct,
                limit_pct: config.max_exposure_pct,
            });
        }

        // 4. Global stop-loss / take-profit: suppress new entries once breached.
        if proposal.action.opens_position() {
            if stop_loss_breached(config, counters) {
                return Err(RejectReason::StopLossBreached {
                    profit_pct: counters.profit_pct,
                });
            }
            if let Some(take_profit) = config.take_profit_pct {
                if counters.profit_pct >= take_profit {
                    return Err(RejectReason::TakeProfitReached {
                        profit_pct: counters.profit_pct,
                    });
                }
            }
        }

        // 5. Slippage must be attachable to market-style orders.
        let slippage_tolerance = if proposal.action.needs_slippage() {
            if config.slippage_tolerance <= Decimal::ZERO {
                return Err(RejectReason::SlippageUnattachable);
            }
            Some(config.slippage_tolerance)
        } else {
            None
        };

        // 6. Gas policy must resolve under its ceiling.
        let gas_price_gwei = match &config.gas {
            GasPolicy::UseDefault => None,
            GasPolicy::Multiplier {
                multiplier,
                ceiling_gwei,
            } => {
                let base = snapshot
                    .gas_price_gwei
                    .ok_or(RejectReason::GasUnresolvable)?;
                let resolved = base * multiplier;
                if resolved > *ceiling_gwei {
                    return Err(RejectReason::GasCeilingExceeded {
                        resolved_gwei: resolved,
                        ceiling_gwei: *ceiling_gwei,
                    });
                }
                Some(resolved)
            }
        };

        Ok(AdmittedAction {
            proposal: proposal.clone(),
            slippage_tolerance,
            gas_price_gwei,
            notional_usd: notional,
        })
    }
}

/// Whether the configured stop-loss (fixed or trailing) is breached.
fn stop_loss_breached(config: &BotExecutionConfig, counters: &SessionRuntimeCounters) -> bool {
    if let Some(stop_loss) = config.stop_loss_pct {
        if counters.profit_pct <= -stop_loss {
            return true;
        }
        // Trailing offset: the stop ratchets up from the profit high-water mark.
        if let Some(trailing) = config.trailing_stop_pct {
            if counters.peak_profit_pct > Decimal::ZERO
                && counters.peak_profit_pct - counters.profit_pct >= trailing
            {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::ActionKind;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn proposal(action: ActionKind, size: Decimal) -> TradeProposal {
        TradeProposal {
            element_id: "buy".to_string(),
            action,
            pair: "SOL/USDC".to_string(),
            size,
            limit_price: None,
            trigger_price: None,
            message: None,
        }
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot::new(Utc::now())
            .with_quote("SOL/USDC", dec!(100), dec!(1_000_000))
            .with_gas_price(dec!(20))
    }

    fn counters() -> SessionRuntimeCounters {
        SessionRuntimeCounters::new(Utc::now().date_naive())
    }

    #[test]
    fn test_admits_within_limits_with_annotations() {
        let gate = RiskGate;
        let config = BotExecutionConfig {
            gas: GasPolicy::Multiplier {
                multiplier: dec!(1.5),
                ceiling_gwei: dec!(50),
            },
            ..Default::default()
        };

        let decisions = gate.admit(
            vec![proposal(ActionKind::Buy, dec!(0.5))],
            &config,
            &counters(),
            &snapshot(),
        );
        let admitted = decisions[0].admitted().expect("should admit");
        assert_eq!(admitted.slippage_tolerance, Some(config.slippage_tolerance));
        assert_eq!(admitted.gas_price_gwei, Some(dec!(30.0)));
        assert_eq!(admitted.notional_usd, dec!(50));
        // Semantics unchanged.
        assert_eq!(admitted.proposal.size, dec!(0.5));
    }

    #[test]
    fn test_daily_limit_rejects_with_code() {
        let gate = RiskGate;
        let config = BotExecutionConfig {
            max_daily_trades: 1,
            ..Default::default()
        };
        let mut counters = counters();
        counters.trades_today = 1;

        let decisions = gate.admit(
            vec![proposal(ActionKind::Buy, dec!(0.5))],
            &config,
            &counters,
            &snapshot(),
        );
        match &decisions[0] {
            GateDecision::Rejected { reason, .. } => {
                assert_eq!(reason.code(), "daily-trade-limit");
            }
            GateDecision::Admitted(_) => panic!("should have rejected"),
        }
    }

    #[test]
    fn test_daily_counter_rolls_over_at_midnight() {
        let mut counters = counters();
        counters.trades_today = 5;
        let tomorrow = counters.day.succ_opt().unwrap();
        counters.roll_over(tomorrow);
        assert_eq!(counters.trades_today, 0);
        assert_eq!(counters.day, tomorrow);
    }

    #[test]
    fn test_exposure_projection_counts_batch_admissions() {
        let gate = RiskGate;
        let config = BotExecutionConfig {
            max_exposure_pct: dec!(0.01), // 1% of 10_000 = 100 USD
            ..Default::default()
        };

        // Two 0.6 SOL buys at 100: each 60 USD, together over the cap.
        let decisions = gate.admit(
            vec![
                proposal(ActionKind::Buy, dec!(0.6)),
                proposal(ActionKind::Buy, dec!(0.6)),
            ],
            &config,
            &counters(),
            &snapshot(),
        );
        assert!(decisions[0].admitted().is_some());
        match &decisions[1] {
            GateDecision::Rejected { reason, .. } => assert_eq!(reason.code(), "exposure-cap"),
            GateDecision::Admitted(_) => panic!("second buy must breach projected exposure"),
        }
    }

    #[test]
    fn test_stop_loss_suppresses_entries_but_not_exits() {
        let gate = RiskGate;
        let config = BotExecutionConfig {
            stop_loss_pct: Some(dec!(0.05)),
            ..Default::default()
        };
        let mut counters = counters();
        counters.profit_pct = dec!(-0.06);

        let decisions = gate.admit(
            vec![
                proposal(ActionKind::Buy, dec!(0.5)),
                proposal(ActionKind::Sell, dec!(0.5)),
            ],
            &config,
            &counters,
            &snapshot(),
        );
        match &decisions[0] {
            GateDecision::Rejected { reason, .. } => {
                assert_eq!(reason.code(), "stop-loss-breached")
            }
            GateDecision::Admitted(_) => panic!("entry must be suppressed"),
        }
        assert!(decisions[1].admitted().is_some(), "exit stays allowed");
    }

    #[test]
    fn test_trailing_stop_ratchets_from_peak() {
        let config = BotExecutionConfig {
            stop_loss_pct: Some(dec!(0.10)),
            trailing_stop_pct: Some(dec!(0.03)),
            ..Default::default()
        };
        let mut counters = counters();
        counters.record_profit(dec!(0.08));
        assert!(!stop_loss_breached(&config, &counters));

        // Gave back 4% from the peak: the 3% trailing offset is breached
        // even though the fixed stop at -10% is far away.
        counters.record_profit(dec!(-0.04));
        assert!(stop_loss_breached(&config, &counters));
    }

    #[test]
    fn test_gas_ceiling_rejection() {
        let gate = RiskGate;
        let config = BotExecutionConfig {
            gas: GasPolicy::Multiplier {
                multiplier: dec!(3),
                ceiling_gwei: dec!(50),
            },
            ..Default::default()
        };

        // Base 20 gwei * 3 = 60 > 50 ceiling.
        let decisions = gate.admit(
            vec![proposal(ActionKind::Buy, dec!(0.5))],
            &config,
            &counters(),
            &snapshot(),
        );
        match &decisions[0] {
            GateDecision::Rejected { reason, .. } => {
                assert_eq!(reason.code(), "gas-ceiling-exceeded")
            }
            GateDecision::Admitted(_) => panic!("should reject above ceiling"),
        }
    }

    #[test]
    fn test_limit_order_skips_slippage() {
        let gate = RiskGate;
        let config = BotExecutionConfig {
            slippage_tolerance: Decimal::ZERO,
            ..Default::default()
        };

        let mut limit = proposal(ActionKind::LimitOrder, dec!(0.5));
        limit.limit_price = Some(dec!(95));
        let market = proposal(ActionKind::Buy, dec!(0.5));

        let decisions = gate.admit(vec![limit, market], &config, &counters(), &snapshot());
        assert!(decisions[0].admitted().is_some());
        match &decisions[1] {
            GateDecision::Rejected { reason, .. } => {
                assert_eq!(reason.code(), "slippage-unattachable")
            }
            GateDecision::Admitted(_) => panic!("market order needs slippage"),
        }
    }
}
