//! Snap point detection over the geometry store.
//!
//! Supports endpoint, midpoint, center, intersection, origin, and grid
//! snapping. Resolution goes through the store because lines carry only
//! endpoint references.

use super::snap_to_grid;
use crate::geometry::utils_2d::{distance, midpoint, segment_intersection};
use crate::store::{EntityId, Geometry, GeometryStore};
use serde::{Deserialize, Serialize};

/// Types of snap points available on the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapType {
    Endpoint,
    Midpoint,
    Center,
    Intersection,
    Origin,
    Grid,
}

impl SnapType {
    /// Priority for snap types (lower = higher priority). Decides which
    /// snap wins when several candidates sit within the radius.
    pub fn priority(&self) -> u8 {
        match self {
            SnapType::Endpoint => 1,
            SnapType::Center => 2,
            SnapType::Intersection => 3,
            SnapType::Midpoint => 4,
            SnapType::Origin => 5,
            SnapType::Grid => 10,
        }
    }
}

/// A detected snap candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapPoint {
    pub position: [f64; 2],
    pub snap_type: SnapType,
    /// Entity the snap belongs to, when there is a single one.
    pub entity: Option<EntityId>,
    /// Distance from the cursor, for sorting.
    pub distance: f64,
}

/// Configuration for snap detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapConfig {
    /// Maximum distance (in drawing units) for a snap to activate.
    pub snap_radius: f64,
    pub enable_endpoint: bool,
    pub enable_midpoint: bool,
    pub enable_center: bool,
    pub enable_intersection: bool,
    pub enable_origin: bool,
    pub enable_grid: bool,
    pub grid_spacing: f64,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            snap_radius: 0.5,
            enable_endpoint: true,
            enable_midpoint: true,
            enable_center: true,
            enable_intersection: true,
            enable_origin: true,
            enable_grid: false,
            grid_spacing: 1.0,
        }
    }
}

/// Find all snap points near the cursor.
pub fn find_snap_points(
    cursor: [f64; 2],
    store: &GeometryStore,
    config: &SnapConfig,
) -> Vec<SnapPoint> {
    let mut snaps = Vec::new();

    let mut push = |position: [f64; 2], snap_type: SnapType, entity: Option<EntityId>| {
        let d = distance(cursor, position);
        if d <= config.snap_radius {
            snaps.push(SnapPoint {
                position,
                snap_type,
                entity,
                distance: d,
            });
        }
    };

    for entity in store.iter() {
        match &entity.geometry {
            Geometry::Point { pos } => {
                if config.enable_endpoint {
                    push(*pos, SnapType::Endpoint, Some(entity.id));
                }
            }
            Geometry::Line { .. } => {
                // Endpoints already surface through their Point entities;
                // the line itself contributes its midpoint.
                if config.enable_midpoint {
                    if let Ok((start, end)) = store.line_coords(entity.id) {
                        push(midpoint(start, end), SnapType::Midpoint, Some(entity.id));
                    }
                }
            }
            Geometry::Circle { center, .. } => {
                if config.enable_center {
                    if let Ok(pos) = store.point_pos(*center) {
                        push(pos, SnapType::Center, Some(entity.id));
                    }
                }
            }
            Geometry::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                if let Ok(c) = store.point_pos(*center) {
                    if config.enable_center {
                        push(c, SnapType::Center, Some(entity.id));
                    }
                    if config.enable_endpoint {
                        let start_pt = [
                            c[0] + radius * start_angle.cos(),
                            c[1] + radius * start_angle.sin(),
                        ];
                        let end_pt = [
                            c[0] + radius * end_angle.cos(),
                            c[1] + radius * end_angle.sin(),
                        ];
                        push(start_pt, SnapType::Endpoint, Some(entity.id));
                        push(end_pt, SnapType::Endpoint, Some(entity.id));
                    }
                }
            }
        }
    }

    // Intersection snapping (line-line only)
    if config.enable_intersection {
        let lines: Vec<([f64; 2], [f64; 2])> = store
            .iter()
            .filter(|e| matches!(e.geometry, Geometry::Line { .. }))
            .filter_map(|e| store.line_coords(e.id).ok())
            .collect();

        for i in 0..lines.len() {
            for j in (i + 1)..lines.len() {
                let (s1, e1) = lines[i];
                let (s2, e2) = lines[j];
                if let Some(hit) = segment_intersection(s1, e1, s2, e2) {
                    push(hit, SnapType::Intersection, None);
                }
            }
        }
    }

    if config.enable_origin {
        push([0.0, 0.0], SnapType::Origin, None);
    }

    if config.enable_grid {
        if let Ok(grid_pt) = snap_to_grid(cursor, config.grid_spacing) {
            push(grid_pt, SnapType::Grid, None);
        }
    }

    snaps
}

/// Find the best snap point for the cursor position: highest priority
/// within the radius, closest wins among equals.
pub fn snap_cursor(
    cursor: [f64; 2],
    store: &GeometryStore,
    config: &SnapConfig,
) -> Option<SnapPoint> {
    let mut snaps = find_snap_points(cursor, store, config);
    if snaps.is_empty() {
        return None;
    }

    snaps.sort_by(|a, b| {
        a.snap_type
            .priority()
            .cmp(&b.snap_type.priority())
            .then_with(|| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    snaps.into_iter().next()
}
