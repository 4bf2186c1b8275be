//! Pure strategy-graph evaluation.
//!
//! One call to [`evaluate`] walks the validated DAG post-order from the
//! root against a market snapshot: operands and children are always
//! evaluated before their parent, nothing short-circuits (every reachable
//! element's result is recorded so the logs can explain why no action
//! fired), and a failure inside one element is contained there — the
//! element records a failed result and contributes `Null` upward.
//!
//! Actions never execute here. An action's evaluation yields a proposal
//! value that only bubbles past a logic gate whose output was true, so
//! actions on untaken paths are observed but never proposed.

mod indicators;

pub use indicators::{EmaState, MacdState};

use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

use crate::market::MarketSnapshot;
use crate::strategy::{
    ActionKind, ConditionSpec, CompareOp, CrossDirection, ElementFamily, ElementId, ElementKind,
    IndicatorKind, LogicOp, LogicSpec, Operand, Strategy, StrategyElement, ThresholdOp,
    TriggerKind,
};

/// Per-session, per-element state persisted between ticks (rolling
/// indicator windows). The only mutable state that crosses tick
/// boundaries; slots are opaque JSON so the controller can persist the
/// whole map without knowing indicator internals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScratchState {
    slots: HashMap<ElementId, serde_json::Value>,
}

impl ScratchState {
    pub fn get<T: DeserializeOwned>(&self, element_id: &str) -> Option<T> {
        self.slots
            .get(element_id)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn set<T: Serialize>(&mut self, element_id: &str, state: &T) {
        if let Ok(value) = serde_json::to_value(state) {
            self.slots.insert(element_id.to_string(), value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Direction of a proposed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
    Swap,
}

/// A proposed trade: a value object, not an executed order. Takes effect
/// only after passing the risk gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub element_id: ElementId,
    pub action: ActionKind,
    pub pair: String,
    pub size: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TradeProposal {
    /// Order direction; `None` for alerts.
    pub fn side(&self) -> Option<TradeSide> {
        match self.action {
            ActionKind::Buy | ActionKind::LimitOrder => Some(TradeSide::Buy),
            ActionKind::Sell | ActionKind::StopLoss | ActionKind::TakeProfit => {
                Some(TradeSide::Sell)
            }
            ActionKind::Swap => Some(TradeSide::Swap),
            ActionKind::Alert => None,
        }
    }
}

/// What one element produced this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ElementOutput {
    Boolean(bool),
    Numeric(Decimal),
    Proposal(TradeProposal),
    Null,
}

impl ElementOutput {
    /// Truthiness in a boolean context: a fired proposal counts as true,
    /// `Null` (a contained failure) as false.
    pub fn truthy(&self) -> bool {
        matches!(self, ElementOutput::Boolean(true) | ElementOutput::Proposal(_))
    }

    pub fn as_numeric(&self) -> Option<Decimal> {
        match self {
            ElementOutput::Numeric(value) => Some(*value),
            _ => None,
        }
    }
}

/// Per-element record of one tick, mirroring the evaluated subgraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementExecutionResult {
    pub element_id: ElementId,
    pub family: ElementFamily,
    pub name: String,
    pub duration_ms: u64,
    pub success: bool,
    pub output: ElementOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementExecutionResult>,
}

impl ElementExecutionResult {
    /// Walk the result tree depth-first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a ElementExecutionResult)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Outcome of one evaluation tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickEvaluation {
    pub root_output: ElementOutput,
    pub root_result: ElementExecutionResult,
    pub proposals: Vec<TradeProposal>,
}

type CacheEntry = (ElementExecutionResult, Vec<TradeProposal>);

struct EvalCtx<'a> {
    strategy: &'a Strategy,
    snapshot: &'a MarketSnapshot,
    scratch: &'a mut ScratchState,
    /// Shared nodes evaluate once per tick; EMA state must not fold twice.
    cache: HashMap<ElementId, CacheEntry>,
}

/// Evaluate a strategy graph against a market snapshot.
///
/// Assumes the graph validated; a reference broken at runtime is treated
/// as a contained element failure, never a panic.
pub fn evaluate(
    strategy: &Strategy,
    snapshot: &MarketSnapshot,
    scratch: &mut ScratchState,
) -> TickEvaluation {
    let mut ctx = EvalCtx {
        strategy,
        snapshot,
        scratch,
        cache: HashMap::new(),
    };

    let root_id = strategy.root_element_id.clone();
    let (root_result, proposals) = eval_element(&root_id, &mut ctx);

    // A shared action under two true gates still proposes once.
    let mut seen = std::collections::HashSet::new();
    let proposals: Vec<TradeProposal> = proposals
        .into_iter()
        .filter(|p| seen.insert(p.element_id.clone()))
        .collect();

    debug!(
        root = %root_id,
        output = ?root_result.output,
        proposals = proposals.len(),
        "strategy graph evaluated"
    );

    TickEvaluation {
        root_output: root_result.output.clone(),
        root_result,
        proposals,
    }
}

fn eval_element(id: &ElementId, ctx: &mut EvalCtx<'_>) -> CacheEntry {
    if let Some(hit) = ctx.cache.get(id) {
        return hit.clone();
    }

    let started = Instant::now();
    let Some(element) = ctx.strategy.element(id) else {
        let result = ElementExecutionResult {
            element_id: id.clone(),
            family: ElementFamily::Logic,
            name: String::new(),
            duration_ms: 0,
            success: false,
            output: ElementOutput::Null,
            error: Some(format!("element '{}' not found in strategy", id)),
            children: Vec::new(),
        };
        return (result, Vec::new());
    };
    let element = element.clone();

    let (outcome, children, proposals) = match &element.kind {
        ElementKind::Trigger(trigger) => eval_trigger(&element, trigger, ctx),
        ElementKind::Indicator(indicator) => {
            (eval_indicator(&element.id, indicator, ctx), Vec::new(), Vec::new())
        }
        ElementKind::Condition(spec) => eval_condition(spec, ctx),
        ElementKind::Logic(spec) => eval_logic(spec, ctx),
        ElementKind::Action(spec) => {
            let proposal = TradeProposal {
                element_id: element.id.clone(),
                action: spec.action,
                pair: spec.pair.clone(),
                size: spec.size,
                limit_price: spec.limit_price,
                trigger_price: spec.trigger_price,
                message: spec.message.clone(),
            };
            (
                Ok(ElementOutput::Proposal(proposal.clone())),
                Vec::new(),
                vec![proposal],
            )
        }
    };

    let (output, error) = match outcome {
        Ok(output) => (output, None),
        Err(message) => (ElementOutput::Null, Some(message)),
    };
    // A failed element never proposes.
    let proposals = if error.is_some() { Vec::new() } else { proposals };

    let result = ElementExecutionResult {
        element_id: element.id.clone(),
        family: element.family(),
        name: element.name.clone(),
        duration_ms: started.elapsed().as_millis() as u64,
        success: error.is_none(),
        output,
        error,
        children,
    };

    ctx.cache
        .insert(element.id.clone(), (result.clone(), proposals.clone()));
    (result, proposals)
}

type EvalOutcome = (
    Result<ElementOutput, String>,
    Vec<ElementExecutionResult>,
    Vec<TradeProposal>,
);

fn eval_trigger(
    element: &StrategyElement,
    trigger: &TriggerKind,
    ctx: &mut EvalCtx<'_>,
) -> EvalOutcome {
    match trigger {
        TriggerKind::PriceMove {
            pair,
            change_pct,
            lookback,
            interval,
        } => {
            let outcome = match ctx.snapshot.closes(pair, *interval) {
                Some(closes) if closes.len() > *lookback as usize => {
                    let latest = closes[closes.len() - 1];
                    let past = closes[closes.len() - 1 - *lookback as usize];
                    if past == Decimal::ZERO {
                        Err("reference price is zero".to_string())
                    } else {
                        let moved = ((latest - past) / past * Decimal::from(100)).abs();
                        Ok(ElementOutput::Boolean(moved >= change_pct.abs()))
                    }
                }
                _ => Err(format!(
                    "insufficient {} history for pair {}",
                    interval, pair
                )),
            };
            (outcome, Vec::new(), Vec::new())
        }
        TriggerKind::VolumeSpike {
            pair,
            multiplier,
            lookback,
            interval,
        } => {
            let outcome = match ctx.snapshot.candles(pair, *interval) {
                Some(candles) if candles.len() > *lookback as usize => {
                    let latest = &candles[candles.len() - 1];
                    let window = &candles[candles.len() - 1 - *lookback as usize..candles.len() - 1];
                    let total: Decimal = window.iter().map(|c| c.volume).sum();
                    let average = total / Decimal::from(*lookback);
                    Ok(ElementOutput::Boolean(
                        average > Decimal::ZERO && latest.volume >= *multiplier * average,
                    ))
                }
                _ => Err(format!(
                    "insufficient {} history for pair {}",
                    interval, pair
                )),
            };
            (outcome, Vec::new(), Vec::new())
        }
        TriggerKind::PriceThreshold { pair, op, value } => {
            let outcome = match ctx.snapshot.price(pair) {
                Some(price) => Ok(ElementOutput::Boolean(match op {
                    ThresholdOp::Above => price > *value,
                    ThresholdOp::Below => price < *value,
                })),
                None => Err(format!("no quote for pair {}", pair)),
            };
            (outcome, Vec::new(), Vec::new())
        }
        TriggerKind::TimeWindow { start, end } => {
            let now = ctx.snapshot.as_of.time();
            // Windows crossing midnight wrap around.
            let inside = if start <= end {
                now >= *start && now <= *end
            } else {
                now >= *start || now <= *end
            };
            (Ok(ElementOutput::Boolean(inside)), Vec::new(), Vec::new())
        }
        TriggerKind::IndicatorCross {
            fast,
            slow,
            direction,
        } => {
            let (fast_result, _) = eval_element(fast, ctx);
            let (slow_result, _) = eval_element(slow, ctx);
            let outcome = match (
                fast_result.output.as_numeric(),
                slow_result.output.as_numeric(),
            ) {
                (Some(fast_value), Some(slow_value)) => {
                    Ok(ElementOutput::Boolean(match direction {
                        CrossDirection::Above => fast_value > slow_value,
                        CrossDirection::Below => fast_value < slow_value,
                    }))
                }
                _ => Err(format!(
                    "cross inputs unavailable for element '{}'",
                    element.id
                )),
            };
            (outcome, vec![fast_result, slow_result], Vec::new())
        }
    }
}

fn eval_indicator(
    element_id: &ElementId,
    indicator: &IndicatorKind,
    ctx: &mut EvalCtx<'_>,
) -> Result<ElementOutput, String> {
    let pair = indicator.pair();
    let interval = indicator.interval();

    let too_short = || {
        format!(
            "insufficient {} history for pair {}",
            interval, pair
        )
    };

    match indicator {
        IndicatorKind::Sma { period, .. } => {
            let closes = ctx.snapshot.closes(pair, interval).ok_or_else(too_short)?;
            indicators::sma(&closes, *period)
                .map(ElementOutput::Numeric)
                .ok_or_else(too_short)
        }
        IndicatorKind::Ema { period, .. } => {
            let closes = ctx.snapshot.closes(pair, interval).ok_or_else(too_short)?;
            let prev = ctx
                .scratch
                .get::<EmaState>(element_id)
                .map(|state| state.value);
            let value = indicators::ema(&closes, *period, prev).ok_or_else(too_short)?;
            ctx.scratch.set(element_id, &EmaState { value });
            Ok(ElementOutput::Numeric(value))
        }
        IndicatorKind::Rsi { period, .. } => {
            let closes = ctx.snapshot.closes(pair, interval).ok_or_else(too_short)?;
            indicators::rsi(&closes, *period)
                .map(ElementOutput::Numeric)
                .ok_or_else(too_short)
        }
        IndicatorKind::Macd {
            fast_period,
            slow_period,
            signal_period,
            ..
        } => {
            let closes = ctx.snapshot.closes(pair, interval).ok_or_else(too_short)?;
            let prev = ctx.scratch.get::<MacdState>(element_id);
            let (histogram, state) = indicators::macd(
                &closes,
                *fast_period,
                *slow_period,
                *signal_period,
                prev.as_ref(),
            )
            .ok_or_else(too_short)?;
            ctx.scratch.set(element_id, &state);
            Ok(ElementOutput::Numeric(histogram))
        }
        IndicatorKind::Bollinger {
            period,
            std_dev,
            band,
            ..
        } => {
            let closes = ctx.snapshot.closes(pair, interval).ok_or_else(too_short)?;
            indicators::bollinger(&closes, *period, *std_dev, *band)
                .map(ElementOutput::Numeric)
                .ok_or_else(too_short)
        }
        IndicatorKind::Stochastic { k_period, .. } => {
            let candles = ctx.snapshot.candles(pair, interval).ok_or_else(too_short)?;
            indicators::stochastic_k(candles, *k_period)
                .map(ElementOutput::Numeric)
                .ok_or_else(too_short)
        }
    }
}

fn eval_condition(spec: &ConditionSpec, ctx: &mut EvalCtx<'_>) -> EvalOutcome {
    let mut children = Vec::new();

    let resolve = |operand: &Operand, ctx: &mut EvalCtx<'_>, children: &mut Vec<ElementExecutionResult>| -> Result<Decimal, String> {
        match operand {
            Operand::Const(value) => Ok(*value),
            Operand::Element(id) => {
                let (result, _) = eval_element(id, ctx);
                let value = result.output.as_numeric();
                children.push(result);
                value.ok_or_else(|| format!("operand '{}' yielded no numeric value", id))
            }
        }
    };

    let left = resolve(&spec.left, ctx, &mut children);
    let right = resolve(&spec.right, ctx, &mut children);
    let bound = spec
        .bound
        .as_ref()
        .map(|operand| resolve(operand, ctx, &mut children));

    let outcome = (|| {
        let left = left?;
        let right = right?;
        let value = match spec.op {
            CompareOp::GreaterThan => left > right,
            CompareOp::LessThan => left < right,
            CompareOp::Equals => left == right,
            CompareOp::Between | CompareOp::Outside => {
                let bound = bound
                    .transpose()?
                    .ok_or_else(|| "range comparison is missing its bound".to_string())?;
                let (low, high) = if right <= bound {
                    (right, bound)
                } else {
                    (bound, right)
                };
                // Between includes both endpoints; outside is its complement.
                let inside = left >= low && left <= high;
                match spec.op {
                    CompareOp::Between => inside,
                    _ => !inside,
                }
            }
        };
        Ok(ElementOutput::Boolean(value))
    })();

    (outcome, children, Vec::new())
}

fn eval_logic(spec: &LogicSpec, ctx: &mut EvalCtx<'_>) -> EvalOutcome {
    let mut children = Vec::new();
    let mut child_proposals: Vec<Vec<TradeProposal>> = Vec::new();

    for child_id in &spec.children {
        let (result, proposals) = eval_element(child_id, ctx);
        children.push(result);
        child_proposals.push(proposals);
    }

    // Boolean combination is taken over non-action children; actions are
    // payloads the gate fires, not votes.
    let vote = |result: &ElementExecutionResult| result.family != ElementFamily::Action;
    let truthy = |result: &ElementExecutionResult| result.output.truthy();

    let gate = match spec.op {
        LogicOp::And => children.iter().filter(|c| vote(c)).all(truthy),
        LogicOp::Or => children.iter().filter(|c| vote(c)).any(truthy),
        LogicOp::Not => children.first().map(|c| !truthy(c)).unwrap_or(false),
        LogicOp::IfThen => {
            let guard = children.first().map(truthy).unwrap_or(false);
            guard
                && children
                    .iter()
                    .skip(1)
                    .filter(|c| vote(c))
                    .all(truthy)
        }
        LogicOp::IfThenElse => {
            let guard = children.first().map(truthy).unwrap_or(false);
            let branch = if guard { children.get(1) } else { children.get(2) };
            branch.map(truthy).unwrap_or(false)
        }
    };

    let proposals = if !gate {
        Vec::new()
    } else {
        match spec.op {
            LogicOp::IfThenElse => {
                let guard_true = children.first().map(truthy).unwrap_or(false);
                let selected = if guard_true { 1 } else { 2 };
                child_proposals
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| *i == 0 || *i == selected)
                    .flat_map(|(_, p)| p)
                    .collect()
            }
            _ => child_proposals.into_iter().flatten().collect(),
        }
    };

    (Ok(ElementOutput::Boolean(gate)), children, proposals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Candle, CandleInterval, MarketSnapshot};
    use crate::strategy::{ActionSpec, LogicSpec, Strategy};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn snapshot(price: Decimal, rsi_closes: &[i64]) -> MarketSnapshot {
        let now = Utc::now();
        let candles: Vec<Candle> = rsi_closes
            .iter()
            .map(|p| Candle::flat(now, Decimal::from(*p), dec!(100)))
            .collect();
        MarketSnapshot::new(now)
            .with_quote("SOL/USDC", price, dec!(1_000_000))
            .with_series("SOL/USDC", CandleInterval::OneHour, candles)
    }

    fn price_above(id: &str, value: Decimal) -> StrategyElement {
        StrategyElement::new(
            id,
            "price above",
            ElementKind::Trigger(TriggerKind::PriceThreshold {
                pair: "SOL/USDC".to_string(),
                op: ThresholdOp::Above,
                value,
            }),
        )
    }

    fn rsi_element(id: &str, period: u32) -> StrategyElement {
        StrategyElement::new(
            id,
            "rsi",
            ElementKind::Indicator(IndicatorKind::Rsi {
                pair: "SOL/USDC".to_string(),
                period,
                interval: CandleInterval::OneHour,
            }),
        )
    }

    fn rsi_below(id: &str, operand: &str, value: Decimal) -> StrategyElement {
        StrategyElement::new(
            id,
            "rsi below",
            ElementKind::Condition(ConditionSpec {
                left: Operand::Element(operand.to_string()),
                op: CompareOp::LessThan,
                right: Operand::Const(value),
                bound: None,
            }),
        )
    }

    fn buy(id: &str, size: Decimal) -> StrategyElement {
        StrategyElement::new(
            id,
            "buy",
            ElementKind::Action(ActionSpec {
                action: ActionKind::Buy,
                pair: "SOL/USDC".to_string(),
                size,
                limit_price: None,
                trigger_price: None,
                message: None,
            }),
        )
    }

    fn and(id: &str, children: &[&str]) -> StrategyElement {
        StrategyElement::new(
            id,
            "and",
            ElementKind::Logic(LogicSpec {
                op: LogicOp::And,
                children: children.iter().map(|c| c.to_string()).collect(),
            }),
        )
    }

    /// AND(priceAbove(100), rsiBelow(30)) -> BUY(0.5)
    fn scenario_strategy() -> Strategy {
        Strategy::from_parts(
            "scenario",
            Uuid::new_v4(),
            "root",
            vec![
                and("root", &["price", "cond", "buy"]),
                price_above("price", dec!(100)),
                rsi_element("rsi", 4),
                rsi_below("cond", "rsi", dec!(30)),
                buy("buy", dec!(0.5)),
            ],
        )
    }

    #[test]
    fn test_scenario_a_true_path_proposes_one_buy() {
        let strategy = scenario_strategy();
        // Falling closes push RSI to 0; price 105 > 100.
        let snapshot = snapshot(dec!(105), &[120, 115, 110, 107, 105]);
        let mut scratch = ScratchState::default();

        let tick = evaluate(&strategy, &snapshot, &mut scratch);
        assert_eq!(tick.root_output, ElementOutput::Boolean(true));
        assert_eq!(tick.proposals.len(), 1);
        let proposal = &tick.proposals[0];
        assert_eq!(proposal.action, ActionKind::Buy);
        assert_eq!(proposal.size, dec!(0.5));
        assert_eq!(proposal.side(), Some(TradeSide::Buy));
    }

    #[test]
    fn test_scenario_b_false_path_proposes_nothing() {
        let strategy = scenario_strategy();
        let snapshot = snapshot(dec!(95), &[120, 115, 110, 107, 95]);
        let mut scratch = ScratchState::default();

        let tick = evaluate(&strategy, &snapshot, &mut scratch);
        assert_eq!(tick.root_output, ElementOutput::Boolean(false));
        assert!(tick.proposals.is_empty());

        // The AND node's result is recorded with output false.
        assert_eq!(tick.root_result.output, ElementOutput::Boolean(false));
        // No short-circuit: all three children were still evaluated.
        assert_eq!(tick.root_result.children.len(), 3);
        assert!(tick.root_result.children.iter().all(|c| c.success));
    }

    #[test]
    fn test_element_failure_is_contained() {
        let strategy = Strategy::from_parts(
            "broken-indicator",
            Uuid::new_v4(),
            "root",
            vec![
                and("root", &["price", "cond"]),
                price_above("price", dec!(100)),
                rsi_element("rsi", 50), // window far larger than history
                rsi_below("cond", "rsi", dec!(30)),
            ],
        );
        let snapshot = snapshot(dec!(105), &[100, 101, 102]);
        let mut scratch = ScratchState::default();

        let tick = evaluate(&strategy, &snapshot, &mut scratch);
        // The rsi element failed, the condition failed on the null operand,
        // but the gate still produced a boolean and the tick survived.
        assert_eq!(tick.root_output, ElementOutput::Boolean(false));
        assert!(tick.root_result.success);

        let mut failures = 0;
        tick.root_result.walk(&mut |result| {
            if !result.success {
                failures += 1;
            }
        });
        assert_eq!(failures, 2);
    }

    #[test]
    fn test_if_then_else_selects_branch_proposals() {
        let strategy = Strategy::from_parts(
            "branch",
            Uuid::new_v4(),
            "root",
            vec![
                StrategyElement::new(
                    "root",
                    "if-then-else",
                    ElementKind::Logic(LogicSpec {
                        op: LogicOp::IfThenElse,
                        children: vec![
                            "price".to_string(),
                            "buy".to_string(),
                            "sell".to_string(),
                        ],
                    }),
                ),
                price_above("price", dec!(100)),
                buy("buy", dec!(0.5)),
                StrategyElement::new(
                    "sell",
                    "sell",
                    ElementKind::Action(ActionSpec {
                        action: ActionKind::Sell,
                        pair: "SOL/USDC".to_string(),
                        size: dec!(0.25),
                        limit_price: None,
                        trigger_price: None,
                        message: None,
                    }),
                ),
            ],
        );
        let mut scratch = ScratchState::default();

        // Guard true: the then-branch buy fires, the else-branch sell does not.
        let tick = evaluate(&strategy, &snapshot(dec!(105), &[]), &mut scratch);
        assert_eq!(tick.proposals.len(), 1);
        assert_eq!(tick.proposals[0].action, ActionKind::Buy);

        // Guard false: only the else-branch sell fires.
        let tick = evaluate(&strategy, &snapshot(dec!(95), &[]), &mut scratch);
        assert_eq!(tick.proposals.len(), 1);
        assert_eq!(tick.proposals[0].action, ActionKind::Sell);
    }

    #[test]
    fn test_ema_state_persists_across_ticks() {
        let strategy = Strategy::from_parts(
            "ema",
            Uuid::new_v4(),
            "root",
            vec![
                and("root", &["cond"]),
                StrategyElement::new(
                    "ema",
                    "ema",
                    ElementKind::Indicator(IndicatorKind::Ema {
                        pair: "SOL/USDC".to_string(),
                        period: 3,
                        interval: CandleInterval::OneHour,
                    }),
                ),
                rsi_below("cond", "ema", dec!(1_000_000)),
            ],
        );
        let mut scratch = ScratchState::default();

        evaluate(&strategy, &snapshot(dec!(100), &[10, 20, 30]), &mut scratch);
        let first: EmaState = scratch.get("ema").unwrap();
        assert_eq!(first.value, dec!(20)); // seeded from SMA

        evaluate(
            &strategy,
            &snapshot(dec!(100), &[10, 20, 30, 40]),
            &mut scratch,
        );
        let second: EmaState = scratch.get("ema").unwrap();
        assert_eq!(second.value, dec!(30)); // folded, not reseeded
    }

    #[test]
    fn test_shared_element_evaluates_once() {
        // Both conditions reference the same EMA; its state must fold once.
        let strategy = Strategy::from_parts(
            "shared",
            Uuid::new_v4(),
            "root",
            vec![
                and("root", &["c1", "c2"]),
                StrategyElement::new(
                    "ema",
                    "ema",
                    ElementKind::Indicator(IndicatorKind::Ema {
                        pair: "SOL/USDC".to_string(),
                        period: 3,
                        interval: CandleInterval::OneHour,
                    }),
                ),
                rsi_below("c1", "ema", dec!(1_000_000)),
                rsi_below("c2", "ema", dec!(1_000_000)),
            ],
        );
        let mut scratch = ScratchState::default();
        evaluate(&strategy, &snapshot(dec!(100), &[10, 20, 30]), &mut scratch);
        evaluate(
            &strategy,
            &snapshot(dec!(100), &[10, 20, 30, 40]),
            &mut scratch,
        );
        let state: EmaState = scratch.get("ema").unwrap();
        assert_eq!(state.value, dec!(30)); // one fold per tick, not two
    }

    #[test]
    fn test_between_includes_endpoints() {
        let strategy = Strategy::from_parts(
            "range",
            Uuid::new_v4(),
            "root",
            vec![
                and("root", &["cond"]),
                StrategyElement::new(
                    "cond",
                    "in range",
                    ElementKind::Condition(ConditionSpec {
                        left: Operand::Element("rsi".to_string()),
                        op: CompareOp::Between,
                        right: Operand::Const(dec!(100)),
                        bound: Some(Operand::Const(dec!(40))),
                    }),
                ),
                rsi_element("rsi", 4),
            ],
        );
        let mut scratch = ScratchState::default();
        // Monotonic rise pegs RSI at exactly 100, the upper endpoint.
        let tick = evaluate(
            &strategy,
            &snapshot(dec!(100), &[1, 2, 3, 4, 5]),
            &mut scratch,
        );
        assert_eq!(tick.root_output, ElementOutput::Boolean(true));
    }
}
