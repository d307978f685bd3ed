//! Canonical storage for drawable primitives.
//!
//! The store owns every entity; the solver and the parametric engine hold
//! only `EntityId`s, never direct references, so iterative mutation cannot
//! alias. Lines are pure topology: they reference two `Point` entities and
//! carry no coordinates of their own.

use crate::error::{ensure_finite, CoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A unique identifier for any stored entity (geometry, constraints,
/// parameters, bindings). Wraps `Uuid` for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Generate a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Restore an id from a specific UUID (deserialization, tests).
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create a deterministic id from a string seed. Useful for tests and
    /// for callers that need reproducible documents.
    pub fn new_deterministic(seed: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()))
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point {
        pos: [f64; 2],
    },
    /// Endpoint references to two `Point` entities.
    Line {
        a: EntityId,
        b: EntityId,
    },
    Circle {
        center: EntityId,
        radius: f64,
    },
    Arc {
        center: EntityId,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
}

impl Geometry {
    /// Ids of entities this geometry references.
    pub fn references(&self) -> Vec<EntityId> {
        match self {
            Geometry::Point { .. } => vec![],
            Geometry::Line { a, b } => vec![*a, *b],
            Geometry::Circle { center, .. } => vec![*center],
            Geometry::Arc { center, .. } => vec![*center],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub geometry: Geometry,
    /// Incremented exactly once per committed transaction in which this
    /// entity's shape changed. Used for change detection by consumers.
    #[serde(default)]
    pub generation: u64,
}

/// Ordered entity storage with an id index.
///
/// A `Vec` keeps iteration in insertion order (stable for the solver and
/// for notifications); the index is rebuilt after deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeometryStore {
    entities: Vec<Entity>,
    #[serde(skip)]
    index: HashMap<EntityId, usize>,
}

impl GeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, entity: Entity) -> EntityId {
        let id = entity.id;
        self.index.insert(id, self.entities.len());
        self.entities.push(entity);
        id
    }

    /// Insert a pre-built entity (restoration path). Fails on id collision.
    pub fn restore(&mut self, entity: Entity) -> Result<EntityId, CoreError> {
        if self.index.contains_key(&entity.id) {
            return Err(CoreError::DuplicateEntity(entity.id));
        }
        Ok(self.insert(entity))
    }

    pub fn add_point(&mut self, pos: [f64; 2]) -> Result<EntityId, CoreError> {
        ensure_finite(pos[0], "point x")?;
        ensure_finite(pos[1], "point y")?;
        Ok(self.insert(Entity {
            id: EntityId::new(),
            geometry: Geometry::Point { pos },
            generation: 0,
        }))
    }

    pub fn add_line(&mut self, a: EntityId, b: EntityId) -> Result<EntityId, CoreError> {
        self.expect_point(a)?;
        self.expect_point(b)?;
        Ok(self.insert(Entity {
            id: EntityId::new(),
            geometry: Geometry::Line { a, b },
            generation: 0,
        }))
    }

    pub fn add_circle(&mut self, center: EntityId, radius: f64) -> Result<EntityId, CoreError> {
        self.expect_point(center)?;
        ensure_finite(radius, "circle radius")?;
        if radius <= 0.0 {
            return Err(CoreError::InvalidValue {
                context: "circle radius".to_string(),
                value: radius,
            });
        }
        Ok(self.insert(Entity {
            id: EntityId::new(),
            geometry: Geometry::Circle { center, radius },
            generation: 0,
        }))
    }

    pub fn add_arc(
        &mut self,
        center: EntityId,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    ) -> Result<EntityId, CoreError> {
        self.expect_point(center)?;
        ensure_finite(radius, "arc radius")?;
        if radius <= 0.0 {
            return Err(CoreError::InvalidValue {
                context: "arc radius".to_string(),
                value: radius,
            });
        }
        ensure_finite(start_angle, "arc start angle")?;
        ensure_finite(end_angle, "arc end angle")?;
        Ok(self.insert(Entity {
            id: EntityId::new(),
            geometry: Geometry::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            },
            generation: 0,
        }))
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.index.get(&id).map(|&i| &self.entities[i])
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    fn expect(&self, id: EntityId) -> Result<&Entity, CoreError> {
        self.get(id).ok_or(CoreError::UnknownEntity(id))
    }

    fn expect_point(&self, id: EntityId) -> Result<&Entity, CoreError> {
        let entity = self.expect(id)?;
        match entity.geometry {
            Geometry::Point { .. } => Ok(entity),
            _ => Err(CoreError::KindMismatch {
                entity: id,
                expected: "point".to_string(),
            }),
        }
    }

    pub fn point_pos(&self, id: EntityId) -> Result<[f64; 2], CoreError> {
        match self.expect_point(id)?.geometry {
            Geometry::Point { pos } => Ok(pos),
            _ => unreachable!(),
        }
    }

    pub fn set_point_pos(&mut self, id: EntityId, pos: [f64; 2]) -> Result<(), CoreError> {
        ensure_finite(pos[0], "point x")?;
        ensure_finite(pos[1], "point y")?;
        let idx = *self.index.get(&id).ok_or(CoreError::UnknownEntity(id))?;
        match &mut self.entities[idx].geometry {
            Geometry::Point { pos: p } => {
                *p = pos;
                Ok(())
            }
            _ => Err(CoreError::KindMismatch {
                entity: id,
                expected: "point".to_string(),
            }),
        }
    }

    /// Radius of a circle or arc.
    pub fn radius(&self, id: EntityId) -> Result<f64, CoreError> {
        match self.expect(id)?.geometry {
            Geometry::Circle { radius, .. } | Geometry::Arc { radius, .. } => Ok(radius),
            _ => Err(CoreError::KindMismatch {
                entity: id,
                expected: "circle or arc".to_string(),
            }),
        }
    }

    pub fn set_radius(&mut self, id: EntityId, radius: f64) -> Result<(), CoreError> {
        ensure_finite(radius, "radius")?;
        if radius <= 0.0 {
            return Err(CoreError::InvalidValue {
                context: "radius".to_string(),
                value: radius,
            });
        }
        let idx = *self.index.get(&id).ok_or(CoreError::UnknownEntity(id))?;
        match &mut self.entities[idx].geometry {
            Geometry::Circle { radius: r, .. } | Geometry::Arc { radius: r, .. } => {
                *r = radius;
                Ok(())
            }
            _ => Err(CoreError::KindMismatch {
                entity: id,
                expected: "circle or arc".to_string(),
            }),
        }
    }

    pub fn set_arc_angles(
        &mut self,
        id: EntityId,
        start_angle: f64,
        end_angle: f64,
    ) -> Result<(), CoreError> {
        ensure_finite(start_angle, "arc start angle")?;
        ensure_finite(end_angle, "arc end angle")?;
        let idx = *self.index.get(&id).ok_or(CoreError::UnknownEntity(id))?;
        match &mut self.entities[idx].geometry {
            Geometry::Arc {
                start_angle: s,
                end_angle: e,
                ..
            } => {
                *s = start_angle;
                *e = end_angle;
                Ok(())
            }
            _ => Err(CoreError::KindMismatch {
                entity: id,
                expected: "arc".to_string(),
            }),
        }
    }

    /// Endpoint point ids of a line.
    pub fn line_points(&self, id: EntityId) -> Result<(EntityId, EntityId), CoreError> {
        match self.expect(id)?.geometry {
            Geometry::Line { a, b } => Ok((a, b)),
            _ => Err(CoreError::KindMismatch {
                entity: id,
                expected: "line".to_string(),
            }),
        }
    }

    /// Resolved endpoint coordinates of a line.
    pub fn line_coords(&self, id: EntityId) -> Result<([f64; 2], [f64; 2]), CoreError> {
        let (a, b) = self.line_points(id)?;
        Ok((self.point_pos(a)?, self.point_pos(b)?))
    }

    /// Entities whose geometry directly references `id`.
    pub fn dependents_of(&self, id: EntityId) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|e| e.geometry.references().contains(&id))
            .map(|e| e.id)
            .collect()
    }

    /// Remove an entity and everything that transitively references it
    /// (a line cannot outlive its endpoints). Returns the removed ids in
    /// removal order; empty if `id` is unknown.
    pub fn remove_cascading(&mut self, id: EntityId) -> Vec<EntityId> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut doomed = vec![id];
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for dep in self.dependents_of(current) {
                if !doomed.contains(&dep) {
                    doomed.push(dep);
                    frontier.push(dep);
                }
            }
        }
        self.entities.retain(|e| !doomed.contains(&e.id));
        self.rebuild_index();
        doomed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.iter_mut()
    }

    /// Entity ids in insertion order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn bump_generation(&mut self, id: EntityId) {
        if let Some(&idx) = self.index.get(&id) {
            self.entities[idx].generation += 1;
        }
    }

    /// Rebuild the id index (call after deserialization).
    pub fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, entity) in self.entities.iter().enumerate() {
            self.index.insert(entity.id, i);
        }
    }

    /// True when this entity's stored scalars differ from its counterpart
    /// in `baseline` (or it does not exist there).
    pub fn changed_since(&self, baseline: &GeometryStore, id: EntityId) -> bool {
        match (self.get(id), baseline.get(id)) {
            (Some(now), Some(then)) => now.geometry != then.geometry,
            (Some(_), None) => true,
            _ => false,
        }
    }
}
