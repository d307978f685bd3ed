//! Parameter records and their store.

use crate::error::CoreError;
use crate::store::EntityId;
use crate::units::Unit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named scalar. A parameter is either *free* (plain value, optionally
/// bounded) or *derived* (value recomputed from an expression over other
/// parameters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: EntityId,
    /// Case-sensitive, unique within a document.
    pub name: String,
    /// Current value, in base units (mm / radians).
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Defining expression for derived parameters, e.g. `"@width * 0.5"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default)]
    pub unit: Unit,
}

impl Parameter {
    pub fn fixed(name: &str, value: f64) -> Self {
        Self {
            id: EntityId::new(),
            name: name.to_string(),
            value,
            min: None,
            max: None,
            expression: None,
            unit: Unit::default(),
        }
    }

    pub fn bounded(name: &str, value: f64, min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Self::fixed(name, value)
        }
    }

    pub fn derived(name: &str, expression: &str) -> Self {
        Self {
            expression: Some(expression.to_string()),
            ..Self::fixed(name, 0.0)
        }
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Build a free parameter from a value given in `unit`. Stored
    /// values are always base units (mm, radians).
    pub fn in_unit(name: &str, value: f64, unit: Unit) -> Self {
        Self {
            value: unit.to_base(value),
            unit,
            ..Self::fixed(name, 0.0)
        }
    }

    /// Current value converted back into the parameter's own unit.
    pub fn display_value(&self) -> f64 {
        self.unit.from_base(self.value)
    }

    pub fn is_derived(&self) -> bool {
        self.expression.is_some()
    }

    /// Rejects (never clamps) a value outside `[min, max]`.
    pub fn check_bounds(&self, value: f64) -> Result<(), CoreError> {
        let below = self.min.is_some_and(|min| value < min);
        let above = self.max.is_some_and(|max| value > max);
        if below || above {
            return Err(CoreError::InvalidValue {
                context: format!("parameter '{}'", self.name),
                value,
            });
        }
        Ok(())
    }
}

/// Container for all parameters in a document, with a rebuildable
/// name index and user-defined ordering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterStore {
    params: HashMap<EntityId, Parameter>,
    #[serde(skip)]
    by_name: HashMap<String, EntityId>,
    order: Vec<EntityId>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, parameter: Parameter) -> Result<EntityId, CoreError> {
        if self.by_name.contains_key(&parameter.name) {
            return Err(CoreError::DuplicateParameter(parameter.name));
        }
        let id = parameter.id;
        self.by_name.insert(parameter.name.clone(), id);
        self.order.push(id);
        self.params.insert(id, parameter);
        Ok(id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Parameter> {
        self.params.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Parameter> {
        self.params.get_mut(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Parameter> {
        self.by_name.get(name).and_then(|id| self.params.get(id))
    }

    pub fn id_of(&self, name: &str) -> Option<EntityId> {
        self.by_name.get(name).copied()
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Parameter> {
        let removed = self.params.remove(&id)?;
        self.by_name.remove(&removed.name);
        self.order.retain(|&oid| oid != id);
        Some(removed)
    }

    /// All parameters in definition order.
    pub fn ordered(&self) -> Vec<&Parameter> {
        self.order
            .iter()
            .filter_map(|id| self.params.get(id))
            .collect()
    }

    pub fn ordered_ids(&self) -> &[EntityId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Rebuild the name index (call after deserialization).
    pub fn rebuild_index(&mut self) {
        self.by_name.clear();
        for (id, param) in &self.params {
            self.by_name.insert(param.name.clone(), *id);
        }
    }
}
