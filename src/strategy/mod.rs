//! Strategy graph model.
//!
//! Contains the core data model for:
//! - Typed decision elements (triggers, indicators, conditions, logic, actions)
//! - The id-keyed element arena with a designated logic root
//! - Structural and semantic graph validation
//! - Forking and structural export/import

mod element;
mod graph;
mod validate;

pub use element::{
    ActionKind, ActionSpec, BollingerBand, CompareOp, ConditionSpec, CrossDirection,
    ElementFamily, ElementId, ElementKind, IndicatorKind, LogicOp, LogicSpec, Operand, OutputType,
    StrategyElement, ThresholdOp, TriggerKind,
};
pub use graph::{Strategy, StrategyExport};
pub use validate::{validate, ValidationIssue, ValidationReport};
