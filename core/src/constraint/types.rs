//! Constraint records.
//!
//! Constraints reference entities by id only; resolution goes through the
//! store at solve time. Insertion order in `ConstraintSet` is part of the
//! observable contract: relaxation is not order-invariant, so the same
//! constraints added in the same order always produce the same layout.

use crate::error::{ensure_finite, CoreError};
use crate::store::{EntityId, Geometry, GeometryStore};
use crate::units::AngleUnit;
use serde::{Deserialize, Serialize};

/// Default tolerance for length-valued residuals.
pub const LENGTH_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Fixed distance between two points.
    Distance { points: [EntityId; 2], value: f64 },
    /// Fixed unsigned angle between two lines, radians in `[0, PI]`.
    Angle { lines: [EntityId; 2], value: f64 },
    Parallel { lines: [EntityId; 2] },
    Perpendicular { lines: [EntityId; 2] },
    /// Two points at the same location.
    Coincident { points: [EntityId; 2] },
    Horizontal { line: EntityId },
    Vertical { line: EntityId },
    /// Equal length (lines) or equal radius (circles/arcs).
    Equal { entities: [EntityId; 2] },
    /// Second point is the reflection of the first across the axis line.
    Symmetric { points: [EntityId; 2], axis: EntityId },
}

impl ConstraintKind {
    /// Angular kinds measure their residual in radians.
    pub fn is_angular(&self) -> bool {
        matches!(
            self,
            ConstraintKind::Angle { .. }
                | ConstraintKind::Parallel { .. }
                | ConstraintKind::Perpendicular { .. }
        )
    }

    /// Default tolerance: 1e-4 length units, 0.1 degrees for angles.
    pub fn default_tolerance(&self) -> f64 {
        if self.is_angular() {
            AngleUnit::Degrees.to_radians(0.1)
        } else {
            LENGTH_TOLERANCE
        }
    }

    /// Every entity this constraint references.
    pub fn referenced_entities(&self) -> Vec<EntityId> {
        match self {
            ConstraintKind::Distance { points, .. } | ConstraintKind::Coincident { points } => {
                points.to_vec()
            }
            ConstraintKind::Angle { lines, .. }
            | ConstraintKind::Parallel { lines }
            | ConstraintKind::Perpendicular { lines } => lines.to_vec(),
            ConstraintKind::Horizontal { line } | ConstraintKind::Vertical { line } => vec![*line],
            ConstraintKind::Equal { entities } => entities.to_vec(),
            ConstraintKind::Symmetric { points, axis } => {
                vec![points[0], points[1], *axis]
            }
        }
    }

    /// Shape-check against the store before the constraint is accepted.
    pub fn validate(&self, store: &GeometryStore) -> Result<(), CoreError> {
        let expect_line = |id: EntityId| store.line_points(id).map(|_| ());
        let expect_point = |id: EntityId| store.point_pos(id).map(|_| ());
        match self {
            ConstraintKind::Distance { points, value } => {
                ensure_finite(*value, "distance value")?;
                if *value < 0.0 {
                    return Err(CoreError::InvalidValue {
                        context: "distance value".to_string(),
                        value: *value,
                    });
                }
                expect_point(points[0])?;
                expect_point(points[1])
            }
            ConstraintKind::Angle { lines, value } => {
                ensure_finite(*value, "angle value")?;
                if !(0.0..=std::f64::consts::PI).contains(value) {
                    return Err(CoreError::InvalidValue {
                        context: "angle value".to_string(),
                        value: *value,
                    });
                }
                expect_line(lines[0])?;
                expect_line(lines[1])
            }
            ConstraintKind::Parallel { lines } | ConstraintKind::Perpendicular { lines } => {
                expect_line(lines[0])?;
                expect_line(lines[1])
            }
            ConstraintKind::Coincident { points } => {
                expect_point(points[0])?;
                expect_point(points[1])
            }
            ConstraintKind::Horizontal { line } | ConstraintKind::Vertical { line } => {
                expect_line(*line)
            }
            ConstraintKind::Equal { entities } => {
                let kinds = (
                    store.get(entities[0]).map(|e| &e.geometry),
                    store.get(entities[1]).map(|e| &e.geometry),
                );
                match kinds {
                    (Some(Geometry::Line { .. }), Some(Geometry::Line { .. })) => Ok(()),
                    (
                        Some(Geometry::Circle { .. }) | Some(Geometry::Arc { .. }),
                        Some(Geometry::Circle { .. }) | Some(Geometry::Arc { .. }),
                    ) => Ok(()),
                    (None, _) => Err(CoreError::UnknownEntity(entities[0])),
                    (_, None) => Err(CoreError::UnknownEntity(entities[1])),
                    _ => Err(CoreError::KindMismatch {
                        entity: entities[1],
                        expected: "matching kind for equal constraint".to_string(),
                    }),
                }
            }
            ConstraintKind::Symmetric { points, axis } => {
                expect_point(points[0])?;
                expect_point(points[1])?;
                expect_line(*axis)
            }
        }
    }

    /// Normalized duplicate-detection signature: same geometric meaning,
    /// same signature, regardless of operand order.
    pub(crate) fn signature(&self) -> String {
        let pair = |a: EntityId, b: EntityId| {
            if a <= b {
                (a, b)
            } else {
                (b, a)
            }
        };
        match self {
            ConstraintKind::Distance { points, value } => {
                let (a, b) = pair(points[0], points[1]);
                format!("DIST:{}:{}:{:.9}", a, b, value)
            }
            ConstraintKind::Angle { lines, value } => {
                let (a, b) = pair(lines[0], lines[1]);
                format!("ANGLE:{}:{}:{:.9}", a, b, value)
            }
            ConstraintKind::Parallel { lines } => {
                let (a, b) = pair(lines[0], lines[1]);
                format!("PAR:{}:{}", a, b)
            }
            ConstraintKind::Perpendicular { lines } => {
                let (a, b) = pair(lines[0], lines[1]);
                format!("PERP:{}:{}", a, b)
            }
            ConstraintKind::Coincident { points } => {
                let (a, b) = pair(points[0], points[1]);
                format!("COINC:{}:{}", a, b)
            }
            ConstraintKind::Horizontal { line } => format!("HORIZ:{}", line),
            ConstraintKind::Vertical { line } => format!("VERT:{}", line),
            ConstraintKind::Equal { entities } => {
                let (a, b) = pair(entities[0], entities[1]);
                format!("EQ:{}:{}", a, b)
            }
            ConstraintKind::Symmetric { points, axis } => {
                let (a, b) = pair(points[0], points[1]);
                format!("SYM:{}:{}:{}", a, b, axis)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: EntityId,
    pub kind: ConstraintKind,
    /// Maximum residual magnitude considered satisfied.
    pub tolerance: f64,
    /// Inactive constraints are kept but ignored by the solver.
    pub active: bool,
}

impl Constraint {
    pub fn new(kind: ConstraintKind) -> Self {
        let tolerance = kind.default_tolerance();
        Self {
            id: EntityId::new(),
            kind,
            tolerance,
            active: true,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Result<Self, CoreError> {
        ensure_finite(tolerance, "constraint tolerance")?;
        if tolerance <= 0.0 {
            return Err(CoreError::InvalidValue {
                context: "constraint tolerance".to_string(),
                value: tolerance,
            });
        }
        self.tolerance = tolerance;
        Ok(self)
    }
}

/// Ordered constraint storage. Insertion order is the solve order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, constraint: Constraint) -> EntityId {
        let id = constraint.id;
        self.constraints.push(constraint);
        id
    }

    pub fn get(&self, id: EntityId) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.id == id)
    }

    pub fn remove(&mut self, id: EntityId) -> bool {
        let before = self.constraints.len();
        self.constraints.retain(|c| c.id != id);
        self.constraints.len() != before
    }

    pub fn set_active(&mut self, id: EntityId, active: bool) -> Result<(), CoreError> {
        let constraint = self
            .constraints
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(CoreError::UnknownEntity(id))?;
        constraint.active = active;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    /// Active constraints in insertion order.
    pub fn active(&self) -> Vec<&Constraint> {
        self.constraints.iter().filter(|c| c.active).collect()
    }

    /// Drop every constraint referencing any of `entities`. Returns the
    /// removed constraint ids. Called in the same transaction as the
    /// entity deletion, so dangling references are never observable.
    pub fn remove_referencing(&mut self, entities: &[EntityId]) -> Vec<EntityId> {
        let doomed: Vec<EntityId> = self
            .constraints
            .iter()
            .filter(|c| {
                c.kind
                    .referenced_entities()
                    .iter()
                    .any(|id| entities.contains(id))
            })
            .map(|c| c.id)
            .collect();
        self.constraints.retain(|c| !doomed.contains(&c.id));
        doomed
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

/// A constraint whose residual exceeds its tolerance, and by how much.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub constraint: EntityId,
    pub residual: f64,
    pub tolerance: f64,
}
