//! Typed strategy graph elements.
//!
//! The element family is a closed set: trigger, indicator, condition,
//! logic, action. Elements never hold pointers to each other; references
//! are explicit ids resolved against the owning strategy's element map,
//! which keeps cloning, forking, and cycle detection cheap.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::CandleInterval;

/// Opaque unique key of an element within its strategy.
pub type ElementId = String;

/// The five element families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementFamily {
    Trigger,
    Indicator,
    Condition,
    Logic,
    Action,
}

impl fmt::Display for ElementFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementFamily::Trigger => "trigger",
            ElementFamily::Indicator => "indicator",
            ElementFamily::Condition => "condition",
            ElementFamily::Logic => "logic",
            ElementFamily::Action => "action",
        };
        write!(f, "{}", s)
    }
}

/// What an element's evaluation yields, used for operand type checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Boolean,
    Numeric,
    Proposal,
}

/// Direction for indicator cross triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossDirection {
    /// Fast value is above the slow value.
    Above,
    /// Fast value is below the slow value.
    Below,
}

/// Trigger variants: "has a real-world event occurred".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    /// Price changed by at least `change_pct` percent over `lookback` candles.
    PriceMove {
        pair: String,
        change_pct: Decimal,
        lookback: u32,
        interval: CandleInterval,
    },
    /// Latest candle volume exceeds `multiplier` times the lookback average.
    VolumeSpike {
        pair: String,
        multiplier: Decimal,
        lookback: u32,
        interval: CandleInterval,
    },
    /// Current price compared against a fixed threshold.
    PriceThreshold {
        pair: String,
        op: ThresholdOp,
        value: Decimal,
    },
    /// Current time of day falls inside [start, end] UTC.
    TimeWindow {
        start: chrono::NaiveTime,
        end: chrono::NaiveTime,
    },
    /// One numeric element is above/below another this tick.
    IndicatorCross {
        fast: ElementId,
        slow: ElementId,
        direction: CrossDirection,
    },
}

/// Comparison used by threshold triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOp {
    Above,
    Below,
}

/// Which Bollinger band a Bollinger element outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BollingerBand {
    Upper,
    Middle,
    Lower,
}

/// Indicator variants; numeric output sampled at `interval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndicatorKind {
    Sma {
        pair: String,
        period: u32,
        interval: CandleInterval,
    },
    /// Carries rolling EMA state in the session scratch map across ticks.
    Ema {
        pair: String,
        period: u32,
        interval: CandleInterval,
    },
    Rsi {
        pair: String,
        period: u32,
        interval: CandleInterval,
    },
    /// Outputs the MACD histogram (macd line minus signal line).
    Macd {
        pair: String,
        fast_period: u32,
        slow_period: u32,
        signal_period: u32,
        interval: CandleInterval,
    },
    Bollinger {
        pair: String,
        period: u32,
        std_dev: Decimal,
        band: BollingerBand,
        interval: CandleInterval,
    },
    /// Outputs %K (0-100).
    Stochastic {
        pair: String,
        k_period: u32,
        interval: CandleInterval,
    },
}

impl IndicatorKind {
    pub fn pair(&self) -> &str {
        match self {
            IndicatorKind::Sma { pair, .. }
            | IndicatorKind::Ema { pair, .. }
            | IndicatorKind::Rsi { pair, .. }
            | IndicatorKind::Macd { pair, .. }
            | IndicatorKind::Bollinger { pair, .. }
            | IndicatorKind::Stochastic { pair, .. } => pair,
        }
    }

    pub fn interval(&self) -> CandleInterval {
        match self {
            IndicatorKind::Sma { interval, .. }
            | IndicatorKind::Ema { interval, .. }
            | IndicatorKind::Rsi { interval, .. }
            | IndicatorKind::Macd { interval, .. }
            | IndicatorKind::Bollinger { interval, .. }
            | IndicatorKind::Stochastic { interval, .. } => *interval,
        }
    }
}

/// Condition operand: another element's numeric output, or a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Element(ElementId),
    Const(Decimal),
}

/// Comparison operators for conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    GreaterThan,
    LessThan,
    Equals,
    /// left within [right, bound], endpoints inclusive.
    Between,
    /// left outside [right, bound], endpoints exclusive of the range.
    Outside,
}

impl CompareOp {
    /// Range operators need the secondary bound operand.
    pub fn needs_bound(&self) -> bool {
        matches!(self, CompareOp::Between | CompareOp::Outside)
    }
}

/// A condition over one or two operands plus an optional range bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub left: Operand,
    pub op: CompareOp,
    /// Right operand, or the primary bound for range tests.
    pub right: Operand,
    /// Secondary bound, required for Between/Outside.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<Operand>,
}

/// Boolean combinators over child elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
    And,
    Or,
    Not,
    /// children[0] is the guard; remaining children form the then-arm.
    IfThen,
    /// children[0] guard, children[1] then-arm, children[2] else-arm.
    IfThenElse,
}

/// A logic gate over an ordered child list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicSpec {
    pub op: LogicOp,
    pub children: Vec<ElementId>,
}

/// Order intent families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Buy,
    Sell,
    Swap,
    Alert,
    LimitOrder,
    StopLoss,
    TakeProfit,
}

impl ActionKind {
    /// Everything but alerts reaches the risk gate and the executor.
    pub fn is_order(&self) -> bool {
        !matches!(self, ActionKind::Alert)
    }

    /// Order intents that open exposure (gated by stop-loss suppression).
    pub fn opens_position(&self) -> bool {
        matches!(self, ActionKind::Buy | ActionKind::Swap | ActionKind::LimitOrder)
    }

    /// Market-style orders that require a slippage tolerance.
    pub fn needs_slippage(&self) -> bool {
        matches!(self, ActionKind::Buy | ActionKind::Sell | ActionKind::Swap)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Buy => "buy",
            ActionKind::Sell => "sell",
            ActionKind::Swap => "swap",
            ActionKind::Alert => "alert",
            ActionKind::LimitOrder => "limit_order",
            ActionKind::StopLoss => "stop_loss",
            ActionKind::TakeProfit => "take_profit",
        };
        write!(f, "{}", s)
    }
}

/// Parameters describing an order intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action: ActionKind,
    pub pair: String,
    /// Order size in base units. Zero for alerts.
    #[serde(default)]
    pub size: Decimal,
    /// Required for limit orders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// Required for stop-loss / take-profit intents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<Decimal>,
    /// Alert text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Closed sum over the five families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "spec", rename_all = "snake_case")]
pub enum ElementKind {
    Trigger(TriggerKind),
    Indicator(IndicatorKind),
    Condition(ConditionSpec),
    Logic(LogicSpec),
    Action(ActionSpec),
}

/// One node of a strategy graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyElement {
    pub id: ElementId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ElementId>,
    #[serde(flatten)]
    pub kind: ElementKind,
}

impl StrategyElement {
    pub fn new(id: impl Into<ElementId>, name: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: None,
            kind,
        }
    }

    pub fn family(&self) -> ElementFamily {
        match self.kind {
            ElementKind::Trigger(_) => ElementFamily::Trigger,
            ElementKind::Indicator(_) => ElementFamily::Indicator,
            ElementKind::Condition(_) => ElementFamily::Condition,
            ElementKind::Logic(_) => ElementFamily::Logic,
            ElementKind::Action(_) => ElementFamily::Action,
        }
    }

    pub fn output_type(&self) -> OutputType {
        match self.kind {
            ElementKind::Trigger(_) | ElementKind::Condition(_) | ElementKind::Logic(_) => {
                OutputType::Boolean
            }
            ElementKind::Indicator(_) => OutputType::Numeric,
            ElementKind::Action(_) => OutputType::Proposal,
        }
    }

    /// Every element id this element references.
    pub fn references(&self) -> Vec<&ElementId> {
        match &self.kind {
            ElementKind::Trigger(TriggerKind::IndicatorCross { fast, slow, .. }) => {
                vec![fast, slow]
            }
            ElementKind::Trigger(_) | ElementKind::Indicator(_) | ElementKind::Action(_) => vec![],
            ElementKind::Condition(spec) => {
                let mut refs = Vec::new();
                for operand in [Some(&spec.left), Some(&spec.right), spec.bound.as_ref()]
                    .into_iter()
                    .flatten()
                {
                    if let Operand::Element(id) = operand {
                        refs.push(id);
                    }
                }
                refs
            }
            ElementKind::Logic(spec) => spec.children.iter().collect(),
        }
    }

    /// Parameter problems local to this element (no graph context needed).
    pub fn parameter_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        match &self.kind {
            ElementKind::Trigger(trigger) => match trigger {
                TriggerKind::PriceMove { lookback, .. }
                | TriggerKind::VolumeSpike { lookback, .. } => {
                    if *lookback == 0 {
                        issues.push("lookback must be at least 1".to_string());
                    }
                }
                TriggerKind::PriceThreshold { value, .. } => {
                    if *value <= Decimal::ZERO {
                        issues.push("threshold value must be positive".to_string());
                    }
                }
                TriggerKind::TimeWindow { start, end } => {
                    if start == end {
                        issues.push("time window must span a non-zero range".to_string());
                    }
                }
                TriggerKind::IndicatorCross { .. } => {}
            },
            ElementKind::Indicator(indicator) => {
                let period_ok = match indicator {
                    IndicatorKind::Sma { period, .. }
                    | IndicatorKind::Ema { period, .. }
                    | IndicatorKind::Rsi { period, .. }
                    | IndicatorKind::Bollinger { period, .. } => *period >= 1,
                    IndicatorKind::Stochastic { k_period, .. } => *k_period >= 1,
                    IndicatorKind::Macd {
                        fast_period,
                        slow_period,
                        signal_period,
                        ..
                    } => {
                        if fast_period >= slow_period {
                            issues.push("macd fast period must be below slow period".to_string());
                        }
                        *fast_period >= 1 && *slow_period >= 1 && *signal_period >= 1
                    }
                };
                if !period_ok {
                    issues.push("indicator period must be at least 1".to_string());
                }
                if let IndicatorKind::Bollinger { std_dev, .. } = indicator {
                    if *std_dev <= Decimal::ZERO {
                        issues.push("bollinger std_dev must be positive".to_string());
                    }
                }
            }
            ElementKind::Condition(spec) => {
                if spec.op.needs_bound() && spec.bound.is_none() {
                    issues.push(format!("{:?} requires a secondary bound operand", spec.op));
                }
                if !spec.op.needs_bound() && spec.bound.is_some() {
                    issues.push(format!("{:?} does not take a secondary bound", spec.op));
                }
            }
            ElementKind::Logic(spec) => match spec.op {
                LogicOp::Not => {
                    if spec.children.len() != 1 {
                        issues.push("not takes exactly one child".to_string());
                    }
                }
                LogicOp::IfThen => {
                    if spec.children.len() < 2 {
                        issues.push("if-then needs a guard and at least one arm child".to_string());
                    }
                }
                LogicOp::IfThenElse => {
                    if spec.children.len() != 3 {
                        issues.push("if-then-else takes exactly three children".to_string());
                    }
                }
                LogicOp::And | LogicOp::Or => {
                    if spec.children.is_empty() {
                        issues.push("and/or needs at least one child".to_string());
                    }
                }
            },
            ElementKind::Action(spec) => {
                match spec.action {
                    ActionKind::Alert => {
                        if spec.message.as_deref().unwrap_or("").is_empty() {
                            issues.push("alert requires a message".to_string());
                        }
                    }
                    ActionKind::LimitOrder => {
                        if spec.limit_price.is_none() {
                            issues.push("limit order requires a limit price".to_string());
                        }
                    }
                    ActionKind::StopLoss | ActionKind::TakeProfit => {
                        if spec.trigger_price.is_none() {
                            issues.push(format!("{} requires a trigger price", spec.action));
                        }
                    }
                    ActionKind::Buy | ActionKind::Sell | ActionKind::Swap => {}
                }
                if spec.action.is_order() && spec.size <= Decimal::ZERO {
                    issues.push("order size must be positive".to_string());
                }
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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

    #[test]
    fn test_references_cover_operands_children_and_cross() {
        let condition = StrategyElement::new(
            "c1",
            "price above",
            ElementKind::Condition(ConditionSpec {
                left: Operand::Element("ind1".to_string()),
                op: CompareOp::GreaterThan,
                right: Operand::Const(dec!(100)),
                bound: None,
            }),
        );
        assert_eq!(condition.references(), vec![&"ind1".to_string()]);

        let gate = StrategyElement::new(
            "l1",
            "and",
            ElementKind::Logic(LogicSpec {
                op: LogicOp::And,
                children: vec!["c1".to_string(), "a1".to_string()],
            }),
        );
        assert_eq!(gate.references().len(), 2);

        let cross = StrategyElement::new(
            "t1",
            "golden cross",
            ElementKind::Trigger(TriggerKind::IndicatorCross {
                fast: "fast".to_string(),
                slow: "slow".to_string(),
                direction: CrossDirection::Above,
            }),
        );
        assert_eq!(cross.references().len(), 2);
    }

    #[test]
    fn test_parameter_issues() {
        assert!(buy("a1", dec!(0.5)).parameter_issues().is_empty());
        assert!(!buy("a1", Decimal::ZERO).parameter_issues().is_empty());

        let between_missing_bound = StrategyElement::new(
            "c1",
            "range",
            ElementKind::Condition(ConditionSpec {
                left: Operand::Element("x".to_string()),
                op: CompareOp::Between,
                right: Operand::Const(dec!(10)),
                bound: None,
            }),
        );
        assert_eq!(between_missing_bound.parameter_issues().len(), 1);

        let bad_macd = StrategyElement::new(
            "i1",
            "macd",
            ElementKind::Indicator(IndicatorKind::Macd {
                pair: "SOL/USDC".to_string(),
                fast_period: 26,
                slow_period: 12,
                signal_period: 9,
                interval: CandleInterval::OneHour,
            }),
        );
        assert!(!bad_macd.parameter_issues().is_empty());
    }

    #[test]
    fn test_output_types_per_family() {
        assert_eq!(buy("a", dec!(1)).output_type(), OutputType::Proposal);
        let sma = StrategyElement::new(
            "i",
            "sma",
            ElementKind::Indicator(IndicatorKind::Sma {
                pair: "SOL/USDC".to_string(),
                period: 14,
                interval: CandleInterval::OneHour,
            }),
        );
        assert_eq!(sma.output_type(), OutputType::Numeric);
    }

    #[test]
    fn test_element_serde_round_trip() {
        let element = buy("a1", dec!(0.5));
        let json = serde_json::to_string(&element).unwrap();
        let back: StrategyElement = serde_json::from_str(&json).unwrap();
        assert_eq!(element, back);
    }
}
