//! Edit transactions: the single public mutation path.
//!
//! `apply_edit` sequences validate -> mutate -> parametric regeneration ->
//! constraint solve -> precision snap as one atomic unit over a working
//! copy, and swaps the copy into the shared document only at the end
//! (copy-on-commit). Readers observe either the pre-edit or the fully
//! committed state, never an intermediate solver iterate. Writers are
//! serialized through a dedicated edit lock: exactly one transaction is
//! in flight per session.

use crate::constraint::{
    CancelToken, Constraint, ConstraintKind, ConstraintSet, ConstraintSolver, ConstraintViolation,
    SolveOutcome, SolverConfig,
};
use crate::error::{ensure_finite, CoreError};
use crate::parametric::{BindingTarget, GeometryBinding, Parameter, ParametricEngine};
use crate::precision::{quantize, PrecisionConfig, PrecisionLevel};
use crate::store::{Entity, EntityId, Geometry, GeometryStore};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, RwLock};
use tracing::info;

#[cfg(test)]
mod tests_session;

/// The committed document state: geometry, constraints, parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub store: GeometryStore,
    pub constraints: ConstraintSet,
    pub engine: ParametricEngine,
}

/// Interchange shape for the persistence boundary. The core performs no
/// file I/O; a persistence layer stores and restores this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub entities: Vec<Entity>,
    pub constraints: Vec<Constraint>,
    pub parameters: Vec<Parameter>,
    pub bindings: Vec<GeometryBinding>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EditCommand {
    AddPoint {
        pos: [f64; 2],
    },
    AddLine {
        a: EntityId,
        b: EntityId,
    },
    AddCircle {
        center: EntityId,
        radius: f64,
    },
    AddArc {
        center: EntityId,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    MovePoint {
        point: EntityId,
        to: [f64; 2],
    },
    SetRadius {
        entity: EntityId,
        radius: f64,
    },
    /// Removes the entity, everything referencing it, and their
    /// constraints and bindings, all in this transaction.
    RemoveEntity {
        entity: EntityId,
    },
    AddConstraint {
        kind: ConstraintKind,
        tolerance: Option<f64>,
    },
    SetConstraintActive {
        constraint: EntityId,
        active: bool,
    },
    RemoveConstraint {
        constraint: EntityId,
    },
    DefineParameter {
        parameter: Parameter,
    },
    SetParameter {
        name: String,
        value: f64,
    },
    SetParameterExpression {
        name: String,
        expression: String,
    },
    RemoveParameter {
        name: String,
    },
    BindGeometry {
        entity: EntityId,
        target: BindingTarget,
        expression: String,
    },
    Unbind {
        binding: EntityId,
    },
    /// Re-run regeneration and solving without any mutation of its own.
    Solve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditStatus {
    /// All constraints satisfied within tolerance.
    Resolved,
    /// Best-found state committed with constraints still violated.
    PartiallyResolved,
    /// Validation failed before any mutation; nothing committed.
    Rejected,
    /// Cancelled mid-solve; pre-edit state intact, nothing committed.
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditResult {
    pub status: EditStatus,
    /// Entities whose generation counter changed, in store order.
    pub moved: Vec<EntityId>,
    /// Document generation after this edit (last committed one for
    /// rejected or cancelled edits).
    pub generation: u64,
    /// Id created by an Add/Define command, when there is one.
    pub created: Option<EntityId>,
    /// Constraints above tolerance in the committed state.
    pub violations: Vec<ConstraintViolation>,
    /// Mutually unsatisfiable constraint ids, when a conflict was detected.
    pub conflicting: Vec<EntityId>,
    /// Why the edit was rejected, for `Rejected` only.
    pub rejection: Option<CoreError>,
}

/// One event per committed edit, consumed by the renderer to redraw
/// only affected primitives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub moved: Vec<EntityId>,
    pub generation: u64,
}

pub struct Session {
    committed: RwLock<Document>,
    /// Serializes writers; the relaxation loop needs a stable snapshot
    /// of entity coordinates for all iterations of one solve.
    edit_lock: Mutex<()>,
    settings: RwLock<PrecisionConfig>,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
    solver: ConstraintSolver,
    generation: AtomicU64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_solver(SolverConfig::default())
    }

    pub fn with_solver(config: SolverConfig) -> Self {
        Self {
            committed: RwLock::new(Document::default()),
            edit_lock: Mutex::new(()),
            settings: RwLock::new(PrecisionConfig::default()),
            subscribers: Mutex::new(Vec::new()),
            solver: ConstraintSolver::new(config),
            generation: AtomicU64::new(0),
        }
    }

    /// Current process-wide precision settings.
    pub fn precision(&self) -> PrecisionConfig {
        *self.settings.read().unwrap()
    }

    pub fn set_precision_level(&self, level: PrecisionLevel) {
        self.settings.write().unwrap().level = level;
    }

    pub fn set_grid_size(&self, grid_size: f64) -> Result<(), CoreError> {
        ensure_finite(grid_size, "grid size")?;
        if grid_size <= 0.0 {
            return Err(CoreError::InvalidValue {
                context: "grid size".to_string(),
                value: grid_size,
            });
        }
        self.settings.write().unwrap().grid_size = grid_size;
        Ok(())
    }

    /// Subscribe to change notifications. Disconnected receivers are
    /// pruned on the next send.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Read-only snapshot of the committed state. Never blocks on a
    /// pending edit beyond the final commit swap.
    pub fn query(&self) -> Snapshot {
        let doc = self.committed.read().unwrap();
        Snapshot {
            entities: doc.store.iter().cloned().collect(),
            constraints: doc.constraints.iter().cloned().collect(),
            parameters: doc.engine.params.ordered().into_iter().cloned().collect(),
            bindings: doc.engine.bindings().to_vec(),
        }
    }

    pub fn save(&self) -> Snapshot {
        self.query()
    }

    /// Replace the document from a snapshot, re-validating everything.
    pub fn load(&self, snapshot: Snapshot) -> Result<(), CoreError> {
        let _guard = self.edit_lock.lock().unwrap();

        let mut store = GeometryStore::new();
        for entity in snapshot.entities {
            store.restore(entity)?;
        }
        for entity in store.iter() {
            for referenced in entity.geometry.references() {
                if !store.contains(referenced) {
                    return Err(CoreError::UnknownEntity(referenced));
                }
            }
        }
        let mut constraints = ConstraintSet::new();
        for constraint in snapshot.constraints {
            constraint.kind.validate(&store)?;
            constraints.add(constraint);
        }
        let engine = ParametricEngine::from_parts(snapshot.parameters, snapshot.bindings)?;
        for binding in engine.bindings() {
            crate::parametric::engine::validate_target(&store, binding.entity, binding.target)?;
        }

        *self.committed.write().unwrap() = Document {
            store,
            constraints,
            engine,
        };
        Ok(())
    }

    pub fn apply_edit(&self, command: EditCommand) -> EditResult {
        self.apply_edit_cancellable(command, &CancelToken::new())
    }

    /// The single public edit transaction.
    pub fn apply_edit_cancellable(&self, command: EditCommand, cancel: &CancelToken) -> EditResult {
        let _guard = self.edit_lock.lock().unwrap();
        // Settings are read once and held fixed for the whole transaction,
        // even if changed concurrently.
        let config = *self.settings.read().unwrap();

        let baseline = self.committed.read().unwrap().clone();
        let mut work = baseline.clone();

        let created = match apply_command(&mut work, &command) {
            Ok(created) => created,
            Err(e) => return self.rejected(e),
        };

        // Parametric regeneration runs before solving; the solver treats
        // regenerated geometry as its starting point.
        if let Err(e) = work.engine.regenerate(&mut work.store) {
            return self.rejected(e);
        }

        let report = self.solver.solve(&mut work.store, &work.constraints, cancel);
        if report.outcome == SolveOutcome::Cancelled {
            return EditResult {
                status: EditStatus::Cancelled,
                moved: Vec::new(),
                generation: self.generation.load(Ordering::SeqCst),
                created: None,
                violations: Vec::new(),
                conflicting: Vec::new(),
                rejection: None,
            };
        }

        // Final snap: solving ran at Compute precision; committed
        // coordinates carry the transaction's level.
        if let Err(e) = snap_document(&mut work.store, config.level) {
            return self.rejected(e);
        }

        // Entities whose stored scalars changed, plus entities whose
        // derived shape changed because a referenced point moved: each
        // gets its generation bumped exactly once.
        let mut changed: Vec<EntityId> = Vec::new();
        for id in work.store.ids() {
            if work.store.changed_since(&baseline.store, id) {
                changed.push(id);
            }
        }
        for id in changed.clone() {
            for dependent in work.store.dependents_of(id) {
                if !changed.contains(&dependent) {
                    changed.push(dependent);
                }
            }
        }
        let moved: Vec<EntityId> = work
            .store
            .ids()
            .into_iter()
            .filter(|id| changed.contains(id))
            .collect();
        for id in &moved {
            work.store.bump_generation(*id);
        }

        let status = match report.outcome {
            SolveOutcome::Converged => EditStatus::Resolved,
            _ => EditStatus::PartiallyResolved,
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        *self.committed.write().unwrap() = work;

        self.notify(ChangeEvent {
            moved: moved.clone(),
            generation,
        });
        info!(?status, moved = moved.len(), generation, "edit committed");

        EditResult {
            status,
            moved,
            generation,
            created,
            violations: report.violations,
            conflicting: report.conflicting,
            rejection: None,
        }
    }

    fn rejected(&self, error: CoreError) -> EditResult {
        EditResult {
            status: EditStatus::Rejected,
            moved: Vec::new(),
            generation: self.generation.load(Ordering::SeqCst),
            created: None,
            violations: Vec::new(),
            conflicting: Vec::new(),
            rejection: Some(error),
        }
    }

    fn notify(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Apply the command's own mutation to the working copy. Any error here
/// means nothing was committed.
fn apply_command(work: &mut Document, command: &EditCommand) -> Result<Option<EntityId>, CoreError> {
    match command {
        EditCommand::AddPoint { pos } => work.store.add_point(*pos).map(Some),
        EditCommand::AddLine { a, b } => work.store.add_line(*a, *b).map(Some),
        EditCommand::AddCircle { center, radius } => {
            work.store.add_circle(*center, *radius).map(Some)
        }
        EditCommand::AddArc {
            center,
            radius,
            start_angle,
            end_angle,
        } => work
            .store
            .add_arc(*center, *radius, *start_angle, *end_angle)
            .map(Some),
        EditCommand::MovePoint { point, to } => {
            work.store.set_point_pos(*point, *to).map(|_| None)
        }
        EditCommand::SetRadius { entity, radius } => {
            work.store.set_radius(*entity, *radius).map(|_| None)
        }
        EditCommand::RemoveEntity { entity } => {
            let removed = work.store.remove_cascading(*entity);
            if removed.is_empty() {
                return Err(CoreError::UnknownEntity(*entity));
            }
            work.constraints.remove_referencing(&removed);
            work.engine.remove_bindings_for(&removed);
            Ok(None)
        }
        EditCommand::AddConstraint { kind, tolerance } => {
            kind.validate(&work.store)?;
            let mut constraint = Constraint::new(kind.clone());
            if let Some(tolerance) = tolerance {
                constraint = constraint.with_tolerance(*tolerance)?;
            }
            Ok(Some(work.constraints.add(constraint)))
        }
        EditCommand::SetConstraintActive { constraint, active } => {
            work.constraints.set_active(*constraint, *active).map(|_| None)
        }
        EditCommand::RemoveConstraint { constraint } => {
            if !work.constraints.remove(*constraint) {
                return Err(CoreError::UnknownEntity(*constraint));
            }
            Ok(None)
        }
        EditCommand::DefineParameter { parameter } => {
            work.engine.define_parameter(parameter.clone()).map(Some)
        }
        EditCommand::SetParameter { name, value } => {
            work.engine.set_parameter(name, *value).map(|_| None)
        }
        EditCommand::SetParameterExpression { name, expression } => work
            .engine
            .set_parameter_expression(name, expression)
            .map(|_| None),
        EditCommand::RemoveParameter { name } => {
            work.engine.remove_parameter(name).map(|_| None)
        }
        EditCommand::BindGeometry {
            entity,
            target,
            expression,
        } => {
            let store = &work.store;
            work.engine.bind(store, *entity, *target, expression).map(Some)
        }
        EditCommand::Unbind { binding } => work.engine.unbind(*binding).map(|_| None),
        EditCommand::Solve => Ok(None),
    }
}

/// Snap every stored scalar to the transaction's precision level.
/// A coarse level must not collapse a radius to zero, so radii keep
/// their raw value when quantization would.
fn snap_document(store: &mut GeometryStore, level: PrecisionLevel) -> Result<(), CoreError> {
    for entity in store.iter_mut() {
        match &mut entity.geometry {
            Geometry::Point { pos } => {
                pos[0] = quantize(pos[0], level)?;
                pos[1] = quantize(pos[1], level)?;
            }
            Geometry::Line { .. } => {}
            Geometry::Circle { radius, .. } => {
                let snapped = quantize(*radius, level)?;
                if snapped > 0.0 {
                    *radius = snapped;
                }
            }
            Geometry::Arc {
                radius,
                start_angle,
                end_angle,
                ..
            } => {
                let snapped = quantize(*radius, level)?;
                if snapped > 0.0 {
                    *radius = snapped;
                }
                *start_angle = quantize(*start_angle, level)?;
                *end_angle = quantize(*end_angle, level)?;
            }
        }
    }
    Ok(())
}
