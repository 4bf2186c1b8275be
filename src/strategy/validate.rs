//! Structural and semantic validation of strategy graphs.
//!
//! Errors block execution (a session may not start on an invalid graph);
//! warnings flag suspect-but-runnable structure such as unreachable
//! elements and actions no logic path can ever fire.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::element::{
    ElementFamily, ElementId, ElementKind, Operand, OutputType, StrategyElement, TriggerKind,
};
use super::graph::Strategy;

/// One validation finding, tied to an element where possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub element_id: Option<ElementId>,
    pub message: String,
}

/// Outcome of validating a strategy graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn single_error(element_id: Option<ElementId>, message: String) -> Self {
        Self {
            errors: vec![ValidationIssue {
                element_id,
                message,
            }],
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, element_id: Option<&str>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            element_id: element_id.map(|s| s.to_string()),
            message: message.into(),
        });
    }

    fn warning(&mut self, element_id: Option<&str>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            element_id: element_id.map(|s| s.to_string()),
            message: message.into(),
        });
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "valid ({} warnings)", self.warnings.len())
        } else {
            let first = &self.errors[0];
            write!(
                f,
                "{} errors, first: {}{}",
                self.errors.len(),
                first
                    .element_id
                    .as_deref()
                    .map(|id| format!("[{}] ", id))
                    .unwrap_or_default(),
                first.message
            )
        }
    }
}

/// Validate a strategy graph.
pub fn validate(strategy: &Strategy) -> ValidationReport {
    let mut report = ValidationReport::default();
    let elements: HashMap<&ElementId, &StrategyElement> =
        strategy.elements().map(|e| (&e.id, e)).collect();

    check_root(strategy, &elements, &mut report);
    check_references(&elements, &mut report);
    check_parameters(&elements, &mut report);
    check_operand_types(&elements, &mut report);

    // A cycle makes reachability meaningless; report it and stop there so
    // the caller sees exactly one cycle error naming a participant.
    if let Some(participant) = find_cycle(&elements) {
        report.error(
            Some(&participant),
            "cycle detected among element references",
        );
        return report;
    }

    check_reachability(strategy, &elements, &mut report);
    report
}

fn check_root(
    strategy: &Strategy,
    elements: &HashMap<&ElementId, &StrategyElement>,
    report: &mut ValidationReport,
) {
    match elements.get(&strategy.root_element_id) {
        None => report.error(
            Some(&strategy.root_element_id),
            "root element id does not resolve to any element",
        ),
        Some(root) if root.family() != ElementFamily::Logic => report.error(
            Some(&strategy.root_element_id),
            format!("root element must be a logic gate, found {}", root.family()),
        ),
        Some(_) => {}
    }
}

fn check_references(
    elements: &HashMap<&ElementId, &StrategyElement>,
    report: &mut ValidationReport,
) {
    for element in elements.values() {
        for referenced in element.references() {
            if !elements.contains_key(referenced) {
                report.error(
                    Some(&element.id),
                    format!("references unknown element '{}'", referenced),
                );
            }
        }
    }
}

fn check_parameters(
    elements: &HashMap<&ElementId, &StrategyElement>,
    report: &mut ValidationReport,
) {
    for element in elements.values() {
        for issue in element.parameter_issues() {
            report.error(Some(&element.id), issue);
        }
    }
}

/// Operand/child output-type compatibility.
fn check_operand_types(
    elements: &HashMap<&ElementId, &StrategyElement>,
    report: &mut ValidationReport,
) {
    let output_of = |id: &ElementId| elements.get(id).map(|e| e.output_type());

    for element in elements.values() {
        match &element.kind {
            ElementKind::Condition(spec) => {
                for operand in [Some(&spec.left), Some(&spec.right), spec.bound.as_ref()]
                    .into_iter()
                    .flatten()
                {
                    if let Operand::Element(id) = operand {
                        if let Some(output) = output_of(id) {
                            if output != OutputType::Numeric {
                                report.error(
                                    Some(&element.id),
                                    format!(
                                        "operand '{}' must yield a numeric output, found {:?}",
                                        id, output
                                    ),
                                );
                            }
                        }
                    }
                }
            }
            ElementKind::Trigger(TriggerKind::IndicatorCross { fast, slow, .. }) => {
                for id in [fast, slow] {
                    if let Some(output) = output_of(id) {
                        if output != OutputType::Numeric {
                            report.error(
                                Some(&element.id),
                                format!("cross input '{}' must yield a numeric output", id),
                            );
                        }
                    }
                }
            }
            ElementKind::Logic(spec) => {
                let mut boolean_children = 0usize;
                for child in &spec.children {
                    match output_of(child) {
                        Some(OutputType::Boolean) => boolean_children += 1,
                        Some(OutputType::Proposal) | None => {}
                        Some(OutputType::Numeric) => report.error(
                            Some(&element.id),
                            format!(
                                "logic child '{}' yields a bare numeric output; wrap it in a condition",
                                child
                            ),
                        ),
                    }
                }
                if boolean_children == 0 && !spec.children.is_empty() {
                    report.error(
                        Some(&element.id),
                        "logic gate has no boolean child to decide on",
                    );
                }
            }
            _ => {}
        }
    }
}

/// Iterative three-color DFS over the reference graph; returns one
/// participant of the first cycle found.
fn find_cycle(elements: &HashMap<&ElementId, &StrategyElement>) -> Option<ElementId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut colors: HashMap<&ElementId, Color> =
        elements.keys().map(|id| (*id, Color::White)).collect();

    for start in elements.keys() {
        if colors[*start] != Color::White {
            continue;
        }
        // Stack of (node, next-child-index).
        let mut stack: Vec<(&ElementId, usize)> = vec![(*start, 0)];
        colors.insert(*start, Color::Gray);

        while let Some((node, child_idx)) = stack.pop() {
            let refs = elements
                .get(node)
                .map(|e| e.references())
                .unwrap_or_default();

            if child_idx < refs.len() {
                stack.push((node, child_idx + 1));
                let child = refs[child_idx];
                match colors.get(child).copied() {
                    Some(Color::Gray) => return Some(child.clone()),
                    Some(Color::White) => {
                        colors.insert(child, Color::Gray);
                        stack.push((child, 0));
                    }
                    // Black or unknown reference: nothing to do here.
                    _ => {}
                }
            } else {
                colors.insert(node, Color::Black);
            }
        }
    }
    None
}

fn check_reachability(
    strategy: &Strategy,
    elements: &HashMap<&ElementId, &StrategyElement>,
    report: &mut ValidationReport,
) {
    let mut reachable: HashSet<&ElementId> = HashSet::new();
    let mut queue = vec![&strategy.root_element_id];
    while let Some(id) = queue.pop() {
        let Some(element) = elements.get(id) else {
            continue;
        };
        if !reachable.insert(&element.id) {
            continue;
        }
        queue.extend(element.references());
    }

    // Action elements fire only as children of a reachable logic gate.
    let mut firable_actions: HashSet<&ElementId> = HashSet::new();
    for element in elements.values() {
        if !reachable.contains(&element.id) {
            continue;
        }
        if let ElementKind::Logic(spec) = &element.kind {
            for child in &spec.children {
                if let Some(target) = elements.get(child) {
                    if target.family() == ElementFamily::Action {
                        firable_actions.insert(&target.id);
                    }
                }
            }
        }
    }

    for element in elements.values() {
        if !reachable.contains(&element.id) {
            report.warning(
                Some(&element.id),
                "element is not reachable from the root",
            );
        } else if element.family() == ElementFamily::Action
            && !firable_actions.contains(&element.id)
        {
            report.warning(
                Some(&element.id),
                "action has no logic path that can fire it",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::CandleInterval;
    use crate::strategy::element::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn logic(id: &str, op: LogicOp, children: &[&str]) -> StrategyElement {
        StrategyElement::new(
            id,
            id,
            ElementKind::Logic(LogicSpec {
                op,
                children: children.iter().map(|c| c.to_string()).collect(),
            }),
        )
    }

    fn rsi(id: &str) -> StrategyElement {
        StrategyElement::new(
            id,
            id,
            ElementKind::Indicator(IndicatorKind::Rsi {
                pair: "SOL/USDC".to_string(),
                period: 14,
                interval: CandleInterval::OneHour,
            }),
        )
    }

    fn below(id: &str, operand: &str, value: rust_decimal::Decimal) -> StrategyElement {
        StrategyElement::new(
            id,
            id,
            ElementKind::Condition(ConditionSpec {
                left: Operand::Element(operand.to_string()),
                op: CompareOp::LessThan,
                right: Operand::Const(value),
                bound: None,
            }),
        )
    }

    /// Builds a strategy without going through the validating mutation
    /// path, so tests can assemble deliberately broken graphs.
    fn raw_strategy(root: &str, elements: Vec<StrategyElement>) -> Strategy {
        Strategy::from_parts("raw", Uuid::new_v4(), root, elements)
    }

    #[test]
    fn test_valid_graph_passes() {
        let strategy = raw_strategy(
            "root",
            vec![
                logic("root", LogicOp::And, &["cond"]),
                below("cond", "rsi", dec!(30)),
                rsi("rsi"),
            ],
        );
        let report = validate(&strategy);
        assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_unknown_reference_is_error() {
        let strategy = raw_strategy(
            "root",
            vec![
                logic("root", LogicOp::And, &["cond"]),
                below("cond", "missing", dec!(30)),
            ],
        );
        let report = validate(&strategy);
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.message.contains("unknown")));
    }

    #[test]
    fn test_cycle_yields_exactly_one_cycle_error() {
        let strategy = raw_strategy(
            "a",
            vec![
                logic("a", LogicOp::And, &["b"]),
                logic("b", LogicOp::Or, &["a"]),
            ],
        );
        let report = validate(&strategy);
        let cycle_errors: Vec<_> = report
            .errors
            .iter()
            .filter(|e| e.message.contains("cycle"))
            .collect();
        assert_eq!(cycle_errors.len(), 1);
        assert!(cycle_errors[0].element_id.is_some());
    }

    #[test]
    fn test_root_must_be_logic() {
        let strategy = raw_strategy("rsi", vec![rsi("rsi")]);
        let report = validate(&strategy);
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("logic gate")));
    }

    #[test]
    fn test_boolean_operand_rejected_for_condition() {
        let strategy = raw_strategy(
            "root",
            vec![
                logic("root", LogicOp::And, &["outer"]),
                below("outer", "inner", dec!(1)),
                below("inner", "rsi", dec!(30)),
                rsi("rsi"),
            ],
        );
        let report = validate(&strategy);
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("numeric output")));
    }

    #[test]
    fn test_unreachable_and_dead_action_warnings() {
        let buy = StrategyElement::new(
            "buy",
            "buy",
            ElementKind::Action(ActionSpec {
                action: ActionKind::Buy,
                pair: "SOL/USDC".to_string(),
                size: dec!(0.5),
                limit_price: None,
                trigger_price: None,
                message: None,
            }),
        );
        let strategy = raw_strategy(
            "root",
            vec![
                logic("root", LogicOp::And, &["cond"]),
                below("cond", "rsi", dec!(30)),
                rsi("rsi"),
                rsi("orphan"),
                buy,
            ],
        );
        let report = validate(&strategy);
        assert!(report.is_valid());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.element_id.as_deref() == Some("orphan")));
        assert!(report
            .warnings
            .iter()
            .any(|w| w.element_id.as_deref() == Some("buy")));
    }
}
