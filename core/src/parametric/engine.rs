//! Parameter dependency graph and geometry regeneration.
//!
//! Parameters form a DAG through their expressions; the topological
//! evaluation order is computed when the graph changes and cached, so
//! evaluation never pays for cycle detection. Cycles are rejected at
//! definition time with `CyclicParameterDependency`.

use crate::error::{ensure_finite, CoreError};
use crate::parametric::parser::{parse_expression, Expr};
use crate::parametric::types::{Parameter, ParameterStore};
use crate::store::{EntityId, Geometry, GeometryStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Which scalar of an entity a binding drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingTarget {
    PointX,
    PointY,
    Radius,
    StartAngle,
    EndAngle,
}

/// Derives one entity scalar from an expression over parameters.
/// Re-evaluated before every constraint solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryBinding {
    pub id: EntityId,
    pub entity: EntityId,
    pub target: BindingTarget,
    pub expression: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParametricEngine {
    pub params: ParameterStore,
    bindings: Vec<GeometryBinding>,
    /// Cached topological evaluation order over parameters.
    #[serde(skip)]
    sort_cache: Vec<EntityId>,
}

impl ParametricEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore an engine from snapshot parts, re-validating everything.
    pub fn from_parts(
        parameters: Vec<Parameter>,
        bindings: Vec<GeometryBinding>,
    ) -> Result<Self, CoreError> {
        let mut engine = Self::new();
        for parameter in parameters {
            engine.define_parameter(parameter)?;
        }
        for binding in bindings {
            let expr = parse_expression(&binding.expression)?;
            engine.check_references(&expr)?;
            engine.bindings.push(binding);
        }
        Ok(engine)
    }

    /// Rebuild caches after deserialization.
    pub fn rebuild(&mut self) -> Result<(), CoreError> {
        self.params.rebuild_index();
        self.recompute_sort()
    }

    pub fn bindings(&self) -> &[GeometryBinding] {
        &self.bindings
    }

    fn check_references(&self, expr: &Expr) -> Result<(), CoreError> {
        for name in expr.references() {
            if self.params.get_by_name(&name).is_none() {
                return Err(CoreError::UnknownParameter(name));
            }
        }
        Ok(())
    }

    /// Add a parameter. Derived parameters must reference only existing
    /// parameters; bounds are validated immediately for free parameters.
    pub fn define_parameter(&mut self, parameter: Parameter) -> Result<EntityId, CoreError> {
        if parameter.name.is_empty() {
            return Err(CoreError::Expression(
                "parameter name must not be empty".to_string(),
            ));
        }
        ensure_finite(parameter.value, &format!("parameter '{}'", parameter.name))?;
        if let (Some(min), Some(max)) = (parameter.min, parameter.max) {
            if min > max {
                return Err(CoreError::InvalidValue {
                    context: format!("bounds of parameter '{}'", parameter.name),
                    value: min,
                });
            }
        }
        if let Some(src) = &parameter.expression {
            let expr = parse_expression(src)?;
            self.check_references(&expr)?;
        } else {
            parameter.check_bounds(parameter.value)?;
        }

        let id = self.params.insert(parameter)?;
        if let Err(e) = self.recompute_sort() {
            self.params.remove(id);
            let _ = self.recompute_sort();
            return Err(e);
        }
        Ok(id)
    }

    /// Set the value of a free parameter. Out-of-bounds values are
    /// rejected, not clamped; the engine is left untouched.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), CoreError> {
        let id = self
            .params
            .id_of(name)
            .ok_or_else(|| CoreError::UnknownParameter(name.to_string()))?;
        let param = self
            .params
            .get_mut(id)
            .ok_or_else(|| CoreError::UnknownParameter(name.to_string()))?;
        if param.is_derived() {
            return Err(CoreError::DerivedParameter(name.to_string()));
        }
        ensure_finite(value, &format!("parameter '{}'", name))?;
        param.check_bounds(value)?;
        param.value = value;
        Ok(())
    }

    /// Replace a parameter's defining expression. This is where cycles
    /// can appear; on rejection the previous expression is restored.
    pub fn set_parameter_expression(
        &mut self,
        name: &str,
        expression: &str,
    ) -> Result<(), CoreError> {
        let id = self
            .params
            .id_of(name)
            .ok_or_else(|| CoreError::UnknownParameter(name.to_string()))?;
        let expr = parse_expression(expression)?;
        self.check_references(&expr)?;

        let previous = match self.params.get_mut(id) {
            Some(param) => param.expression.replace(expression.to_string()),
            None => return Err(CoreError::UnknownParameter(name.to_string())),
        };
        if let Err(e) = self.recompute_sort() {
            if let Some(param) = self.params.get_mut(id) {
                param.expression = previous;
            }
            let _ = self.recompute_sort();
            return Err(e);
        }
        Ok(())
    }

    /// Remove a parameter. Fails with `ParameterInUse` while any other
    /// parameter expression or geometry binding still references it.
    pub fn remove_parameter(&mut self, name: &str) -> Result<(), CoreError> {
        let id = self
            .params
            .id_of(name)
            .ok_or_else(|| CoreError::UnknownParameter(name.to_string()))?;
        let dependents = self.dependents_of(name);
        if !dependents.is_empty() {
            return Err(CoreError::ParameterInUse {
                name: name.to_string(),
                dependents,
            });
        }
        self.params.remove(id);
        self.recompute_sort()
    }

    fn dependents_of(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        for param in self.params.ordered() {
            if let Some(src) = &param.expression {
                let references = parse_expression(src)
                    .map(|e| e.references().contains(name))
                    .unwrap_or(false);
                if references {
                    out.push(param.name.clone());
                }
            }
        }
        for binding in &self.bindings {
            let references = parse_expression(&binding.expression)
                .map(|e| e.references().contains(name))
                .unwrap_or(false);
            if references {
                out.push(format!("binding {}", binding.id));
            }
        }
        out
    }

    /// Drive one scalar of an entity from an expression. A new binding
    /// for the same (entity, target) slot replaces the old one.
    pub fn bind(
        &mut self,
        store: &GeometryStore,
        entity: EntityId,
        target: BindingTarget,
        expression: &str,
    ) -> Result<EntityId, CoreError> {
        validate_target(store, entity, target)?;
        let expr = parse_expression(expression)?;
        self.check_references(&expr)?;

        self.bindings
            .retain(|b| !(b.entity == entity && b.target == target));
        let binding = GeometryBinding {
            id: EntityId::new(),
            entity,
            target,
            expression: expression.to_string(),
        };
        let id = binding.id;
        self.bindings.push(binding);
        Ok(id)
    }

    pub fn unbind(&mut self, binding: EntityId) -> Result<(), CoreError> {
        let before = self.bindings.len();
        self.bindings.retain(|b| b.id != binding);
        if self.bindings.len() == before {
            return Err(CoreError::UnknownEntity(binding));
        }
        Ok(())
    }

    /// Drop bindings for entities that no longer exist (cascade path).
    pub fn remove_bindings_for(&mut self, entities: &[EntityId]) {
        self.bindings.retain(|b| !entities.contains(&b.entity));
    }

    /// Re-evaluate derived parameters (topological order) and geometry
    /// bindings (insertion order), writing driven scalars into the store.
    /// Returns entities whose scalars actually changed. Runs before
    /// constraint solving; the solver treats the regenerated geometry as
    /// its starting point.
    pub fn regenerate(&mut self, store: &mut GeometryStore) -> Result<Vec<EntityId>, CoreError> {
        // a deserialized engine arrives with empty caches
        if self.sort_cache.len() != self.params.len() {
            self.rebuild()?;
        }
        for id in self.sort_cache.clone() {
            let (name, src) = match self.params.get(id) {
                Some(param) => match &param.expression {
                    Some(src) => (param.name.clone(), src.clone()),
                    None => continue,
                },
                None => continue,
            };
            let expr = parse_expression(&src)?;
            let value = {
                let params = &self.params;
                expr.evaluate(&|n| params.get_by_name(n).map(|p| p.value))?
            };
            ensure_finite(value, &format!("parameter '{}'", name))?;
            if let Some(param) = self.params.get(id) {
                param.check_bounds(value)?;
            }
            if let Some(param) = self.params.get_mut(id) {
                param.value = value;
            }
        }

        let mut touched = Vec::new();
        for binding in &self.bindings {
            let expr = parse_expression(&binding.expression)?;
            let value = {
                let params = &self.params;
                expr.evaluate(&|n| params.get_by_name(n).map(|p| p.value))?
            };
            ensure_finite(value, &format!("binding {}", binding.id))?;
            if apply_binding(store, binding, value)? && !touched.contains(&binding.entity) {
                touched.push(binding.entity);
            }
        }
        Ok(touched)
    }

    /// Recompute the cached topological order. DFS in definition order,
    /// so evaluation order is reproducible.
    fn recompute_sort(&mut self) -> Result<(), CoreError> {
        let ordered: Vec<EntityId> = self.params.ordered_ids().to_vec();
        let mut edges: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        for id in &ordered {
            let Some(param) = self.params.get(*id) else {
                continue;
            };
            let mut deps = Vec::new();
            if let Some(src) = &param.expression {
                let expr = parse_expression(src)?;
                for name in expr.references() {
                    if let Some(dep) = self.params.id_of(&name) {
                        deps.push(dep);
                    }
                }
            }
            edges.insert(*id, deps);
        }

        let mut sorted = Vec::new();
        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();
        let mut path = Vec::new();
        for id in &ordered {
            self.visit(*id, &edges, &mut visited, &mut in_stack, &mut path, &mut sorted)?;
        }
        self.sort_cache = sorted;
        Ok(())
    }

    fn visit(
        &self,
        id: EntityId,
        edges: &HashMap<EntityId, Vec<EntityId>>,
        visited: &mut HashSet<EntityId>,
        in_stack: &mut HashSet<EntityId>,
        path: &mut Vec<String>,
        sorted: &mut Vec<EntityId>,
    ) -> Result<(), CoreError> {
        let name = self
            .params
            .get(id)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        if in_stack.contains(&id) {
            let mut cycle = path.clone();
            cycle.push(name);
            return Err(CoreError::CyclicParameterDependency { path: cycle });
        }
        if visited.contains(&id) {
            return Ok(());
        }
        in_stack.insert(id);
        path.push(name);
        if let Some(deps) = edges.get(&id) {
            for dep in deps {
                self.visit(*dep, edges, visited, in_stack, path, sorted)?;
            }
        }
        in_stack.remove(&id);
        path.pop();
        visited.insert(id);
        sorted.push(id);
        Ok(())
    }
}

pub(crate) fn validate_target(
    store: &GeometryStore,
    entity: EntityId,
    target: BindingTarget,
) -> Result<(), CoreError> {
    match target {
        BindingTarget::PointX | BindingTarget::PointY => store.point_pos(entity).map(|_| ()),
        BindingTarget::Radius => store.radius(entity).map(|_| ()),
        BindingTarget::StartAngle | BindingTarget::EndAngle => {
            match store.get(entity).map(|e| &e.geometry) {
                Some(Geometry::Arc { .. }) => Ok(()),
                Some(_) => Err(CoreError::KindMismatch {
                    entity,
                    expected: "arc".to_string(),
                }),
                None => Err(CoreError::UnknownEntity(entity)),
            }
        }
    }
}

fn apply_binding(
    store: &mut GeometryStore,
    binding: &GeometryBinding,
    value: f64,
) -> Result<bool, CoreError> {
    match binding.target {
        BindingTarget::PointX => {
            let pos = store.point_pos(binding.entity)?;
            if pos[0] == value {
                return Ok(false);
            }
            store.set_point_pos(binding.entity, [value, pos[1]])?;
            Ok(true)
        }
        BindingTarget::PointY => {
            let pos = store.point_pos(binding.entity)?;
            if pos[1] == value {
                return Ok(false);
            }
            store.set_point_pos(binding.entity, [pos[0], value])?;
            Ok(true)
        }
        BindingTarget::Radius => {
            let radius = store.radius(binding.entity)?;
            if radius == value {
                return Ok(false);
            }
            store.set_radius(binding.entity, value)?;
            Ok(true)
        }
        BindingTarget::StartAngle | BindingTarget::EndAngle => {
            let (start, end) = match store.get(binding.entity).map(|e| &e.geometry) {
                Some(Geometry::Arc {
                    start_angle,
                    end_angle,
                    ..
                }) => (*start_angle, *end_angle),
                Some(_) => {
                    return Err(CoreError::KindMismatch {
                        entity: binding.entity,
                        expected: "arc".to_string(),
                    })
                }
                None => return Err(CoreError::UnknownEntity(binding.entity)),
            };
            let (new_start, new_end) = match binding.target {
                BindingTarget::StartAngle => (value, end),
                _ => (start, value),
            };
            if new_start == start && new_end == end {
                return Ok(false);
            }
            store.set_arc_angles(binding.entity, new_start, new_end)?;
            Ok(true)
        }
    }
}
