//! The strategy aggregate: an id-keyed element arena with a designated
//! logic root.
//!
//! Mutations re-validate referential integrity before commit. Add/update
//! reject structurally invalid results outright; delete commits and
//! surfaces the resulting report so the caller sees dangling-reference
//! fallout instead of silent auto-repair.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::element::{ElementId, ElementKind, StrategyElement};
use super::validate::{validate, ValidationReport};

/// A trading strategy as a rooted DAG of typed elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub owner: Uuid,
    pub name: String,
    elements: HashMap<ElementId, StrategyElement>,
    pub root_element_id: ElementId,
    pub version: u32,
    pub is_active: bool,
    pub is_public: bool,
}

impl Strategy {
    /// Create a strategy from its root logic element.
    pub fn new(name: impl Into<String>, owner: Uuid, root: StrategyElement) -> Self {
        let root_element_id = root.id.clone();
        let mut elements = HashMap::new();
        elements.insert(root.id.clone(), root);
        Self {
            id: Uuid::new_v4(),
            owner,
            name: name.into(),
            elements,
            root_element_id,
            version: 1,
            is_active: false,
            is_public: false,
        }
    }

    pub fn element(&self, id: &str) -> Option<&StrategyElement> {
        self.elements.get(id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &StrategyElement> {
        self.elements.values()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.elements.contains_key(id)
    }

    /// Validate the current graph.
    pub fn validate(&self) -> ValidationReport {
        validate(self)
    }

    /// Insert a new element; rejected (and not committed) if the result
    /// fails validation or the id already exists.
    pub fn add_element(&mut self, element: StrategyElement) -> Result<(), ValidationReport> {
        if self.elements.contains_key(&element.id) {
            return Err(ValidationReport::single_error(
                Some(element.id.clone()),
                format!("duplicate element id '{}'", element.id),
            ));
        }
        self.try_commit(|elements| {
            elements.insert(element.id.clone(), element.clone());
        })
    }

    /// Replace an existing element in place; rejected if unknown or if the
    /// updated graph fails validation.
    pub fn update_element(&mut self, element: StrategyElement) -> Result<(), ValidationReport> {
        if !self.elements.contains_key(&element.id) {
            return Err(ValidationReport::single_error(
                Some(element.id.clone()),
                format!("unknown element id '{}'", element.id),
            ));
        }
        self.try_commit(|elements| {
            elements.insert(element.id.clone(), element.clone());
        })
    }

    /// Remove an element and strip its id from all reference lists.
    ///
    /// The removal commits unconditionally; the returned report carries any
    /// referential errors the removal introduced (an operand left without a
    /// referent, a gate left without children). The strategy is not
    /// auto-repaired beyond the reference strip.
    pub fn remove_element(&mut self, id: &str) -> Result<ValidationReport, ValidationReport> {
        if !self.elements.contains_key(id) {
            return Err(ValidationReport::single_error(
                Some(id.to_string()),
                format!("unknown element id '{}'", id),
            ));
        }
        if id == self.root_element_id {
            return Err(ValidationReport::single_error(
                Some(id.to_string()),
                "the root element cannot be removed".to_string(),
            ));
        }

        self.elements.remove(id);
        for element in self.elements.values_mut() {
            strip_reference(element, id);
        }
        self.version += 1;
        Ok(validate(self))
    }

    /// Apply a mutation tentatively; commit (and bump version) only when
    /// the mutated graph validates.
    fn try_commit<F>(&mut self, mutate: F) -> Result<(), ValidationReport>
    where
        F: Fn(&mut HashMap<ElementId, StrategyElement>),
    {
        let mut candidate = self.elements.clone();
        mutate(&mut candidate);

        let trial = Strategy {
            elements: candidate,
            ..self.clone()
        };
        let report = validate(&trial);
        if !report.is_valid() {
            return Err(report);
        }

        mutate(&mut self.elements);
        self.version += 1;
        Ok(())
    }

    /// Clone into a new strategy with fresh ids but identical structure.
    pub fn fork(&self, new_owner: Uuid) -> Strategy {
        let id_map: HashMap<ElementId, ElementId> = self
            .elements
            .keys()
            .map(|old| (old.clone(), Uuid::new_v4().to_string()))
            .collect();

        let elements = self
            .elements
            .values()
            .map(|element| {
                let mut copy = element.clone();
                copy.id = id_map[&element.id].clone();
                copy.parent_id = element
                    .parent_id
                    .as_ref()
                    .and_then(|p| id_map.get(p).cloned());
                remap_references(&mut copy, &id_map);
                (copy.id.clone(), copy)
            })
            .collect();

        Strategy {
            id: Uuid::new_v4(),
            owner: new_owner,
            name: format!("{} (fork)", self.name),
            elements,
            root_element_id: id_map[&self.root_element_id].clone(),
            version: 1,
            is_active: false,
            is_public: false,
        }
    }

    /// Assemble a strategy without validating. Used by deserialization
    /// paths and by tests that need deliberately broken graphs; callers
    /// are expected to run `validate` before execution.
    pub fn from_parts(
        name: impl Into<String>,
        owner: Uuid,
        root_element_id: impl Into<ElementId>,
        elements: Vec<StrategyElement>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            name: name.into(),
            elements: elements.into_iter().map(|e| (e.id.clone(), e)).collect(),
            root_element_id: root_element_id.into(),
            version: 1,
            is_active: false,
            is_public: false,
        }
    }

    /// Portable structural export (element set + root + edges).
    pub fn export(&self) -> StrategyExport {
        StrategyExport {
            name: self.name.clone(),
            root_element_id: self.root_element_id.clone(),
            elements: self.elements.values().cloned().collect(),
        }
    }

    /// Rebuild a strategy from an export. Structure is preserved exactly;
    /// the strategy id is fresh and ownership is the importer's.
    pub fn import(export: StrategyExport, owner: Uuid) -> Result<Strategy, ValidationReport> {
        let elements: HashMap<ElementId, StrategyElement> = export
            .elements
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        let strategy = Strategy {
            id: Uuid::new_v4(),
            owner,
            name: export.name,
            elements,
            root_element_id: export.root_element_id,
            version: 1,
            is_active: false,
            is_public: false,
        };

        let report = validate(&strategy);
        if !report.is_valid() {
            return Err(report);
        }
        Ok(strategy)
    }
}

/// Serializable structural form of a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyExport {
    pub name: String,
    pub root_element_id: ElementId,
    pub elements: Vec<StrategyElement>,
}

fn strip_reference(element: &mut StrategyElement, removed: &str) {
    match &mut element.kind {
        ElementKind::Logic(spec) => spec.children.retain(|child| child != removed),
        ElementKind::Condition(spec) => {
            if let Some(super::element::Operand::Element(id)) = &spec.bound {
                if id == removed {
                    spec.bound = None;
                }
            }
            // Left/right operands stay; a dangling operand is exactly the
            // referential error the caller must see.
        }
        _ => {}
    }
    if element.parent_id.as_deref() == Some(removed) {
        element.parent_id = None;
    }
}

fn remap_references(element: &mut StrategyElement, id_map: &HashMap<ElementId, ElementId>) {
    use super::element::{Operand, TriggerKind};

    let remap = |id: &mut ElementId| {
        if let Some(new_id) = id_map.get(id) {
            *id = new_id.clone();
        }
    };

    match &mut element.kind {
        ElementKind::Logic(spec) => spec.children.iter_mut().for_each(remap),
        ElementKind::Condition(spec) => {
            for operand in [Some(&mut spec.left), Some(&mut spec.right), spec.bound.as_mut()]
                .into_iter()
                .flatten()
            {
                if let Operand::Element(id) = operand {
                    remap(id);
                }
            }
        }
        ElementKind::Trigger(TriggerKind::IndicatorCross { fast, slow, .. }) => {
            remap(fast);
            remap(slow);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::element::*;
    use rust_decimal_macros::dec;

    fn root_and() -> StrategyElement {
        StrategyElement::new(
            "root",
            "root",
            ElementKind::Logic(LogicSpec {
                op: LogicOp::And,
                children: vec!["cond".to_string()],
            }),
        )
    }

    fn price_condition() -> StrategyElement {
        StrategyElement::new(
            "cond",
            "price above 100",
            ElementKind::Condition(ConditionSpec {
                left: Operand::Element("sma".to_string()),
                op: CompareOp::GreaterThan,
                right: Operand::Const(dec!(100)),
                bound: None,
            }),
        )
    }

    fn sma() -> StrategyElement {
        StrategyElement::new(
            "sma",
            "sma",
            ElementKind::Indicator(IndicatorKind::Sma {
                pair: "SOL/USDC".to_string(),
                period: 5,
                interval: crate::market::CandleInterval::OneHour,
            }),
        )
    }

    fn valid_strategy() -> Strategy {
        let mut strategy = Strategy::new("test", Uuid::new_v4(), root_and());
        strategy.add_element(sma()).unwrap();
        strategy.add_element(price_condition()).unwrap();
        strategy
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let mut strategy = valid_strategy();
        let err = strategy.add_element(sma()).unwrap_err();
        assert!(err.errors[0].message.contains("duplicate"));
    }

    #[test]
    fn test_add_rejects_dangling_reference_without_commit() {
        let mut strategy = valid_strategy();
        let version = strategy.version;
        let dangling = StrategyElement::new(
            "bad",
            "bad",
            ElementKind::Condition(ConditionSpec {
                left: Operand::Element("missing".to_string()),
                op: CompareOp::LessThan,
                right: Operand::Const(dec!(1)),
                bound: None,
            }),
        );
        assert!(strategy.add_element(dangling).is_err());
        assert!(!strategy.contains("bad"));
        assert_eq!(strategy.version, version);
    }

    #[test]
    fn test_remove_surfaces_referential_fallout() {
        let mut strategy = valid_strategy();
        // Removing the indicator leaves the condition with a dangling operand.
        let report = strategy.remove_element("sma").unwrap();
        assert!(!report.is_valid());
        assert!(!strategy.contains("sma"));
        assert!(strategy.contains("cond"));
    }

    #[test]
    fn test_remove_root_is_rejected() {
        let mut strategy = valid_strategy();
        assert!(strategy.remove_element("root").is_err());
        assert!(strategy.contains("root"));
    }

    #[test]
    fn test_fork_preserves_structure_with_fresh_ids() {
        let strategy = valid_strategy();
        let fork = strategy.fork(Uuid::new_v4());

        assert_ne!(fork.id, strategy.id);
        assert_eq!(fork.element_count(), strategy.element_count());
        assert!(!fork.contains("root"));
        assert!(fork.validate().is_valid());

        // Root still resolves to a logic element referencing one condition.
        let root = fork.element(&fork.root_element_id).unwrap();
        match &root.kind {
            ElementKind::Logic(spec) => assert_eq!(spec.children.len(), 1),
            other => panic!("fork root is not logic: {:?}", other),
        }
    }

    #[test]
    fn test_export_import_round_trip_structure() {
        let strategy = valid_strategy();
        let imported = Strategy::import(strategy.export(), Uuid::new_v4()).unwrap();

        assert_eq!(imported.element_count(), strategy.element_count());
        assert_eq!(imported.root_element_id, strategy.root_element_id);
        assert!(imported.validate().is_valid());
    }
}
