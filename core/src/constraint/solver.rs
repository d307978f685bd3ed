//! Iterative relaxation solver (Gauss-Seidel style).
//!
//! Each iteration visits every active constraint in insertion order and
//! applies a damped corrective displacement to the referenced entities.
//! The best iterate seen (lowest max residual, pre-solve state included)
//! is retained, so the returned layout is never worse than the input.

use crate::constraint::types::{Constraint, ConstraintKind, ConstraintSet, ConstraintViolation};
use crate::geometry::utils_2d::{
    distance, midpoint, normalize_2d, reflect_across_line, rotate_about, signed_angle,
};
use crate::geometry::EPSILON;
use crate::store::{EntityId, Geometry, GeometryStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Solver tuning. These are constructor parameters, fixed per solver
/// instance rather than per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Hard cap on relaxation passes.
    pub max_iterations: usize,
    /// Fraction of the exact correction applied per constraint visit.
    /// At 0.5 a two-sided constraint lands exactly in one pass.
    pub damping: f64,
    /// Passes without improvement before a stuck solve is reported as a
    /// conflict instead of plain non-convergence.
    pub stall_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            damping: 0.5,
            stall_iterations: 3,
        }
    }
}

/// Cooperative cancellation, checked once per iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveOutcome {
    /// Every active constraint is within tolerance.
    Converged,
    /// The residual stopped improving with constraints still violated;
    /// the named constraints cannot be satisfied simultaneously.
    Conflicted,
    /// Iteration cap reached while still making progress.
    CapReached,
    Cancelled,
}

/// Loop state for one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SolveState {
    Iterating,
    Converged,
    Conflicted,
    CapReached,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveReport {
    pub outcome: SolveOutcome,
    /// Relaxation passes performed.
    pub iterations: usize,
    /// Maximum residual magnitude across active constraints at the
    /// returned state.
    pub max_residual: f64,
    /// Constraints above tolerance at the returned state.
    pub violations: Vec<ConstraintViolation>,
    /// Ids of mutually unsatisfiable constraints (`Conflicted` only).
    pub conflicting: Vec<EntityId>,
    /// Estimated degrees of freedom. Negative = over-constrained.
    pub dof: i32,
    /// Constraints that duplicate an earlier one geometrically.
    pub duplicates: Vec<EntityId>,
}

pub struct ConstraintSolver {
    config: SolverConfig,
}

impl Default for ConstraintSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

/// (max, sum) of tolerance-normalized residuals. The max decides
/// convergence; the sum breaks ties so progress inside independent
/// clusters is never thrown away while one cluster is stuck.
fn score(store: &GeometryStore, active: &[&Constraint]) -> (f64, f64) {
    let mut max = 0.0f64;
    let mut sum = 0.0f64;
    for c in active {
        let n = residual(store, &c.kind) / c.tolerance;
        max = max.max(n);
        sum += n;
    }
    (max, sum)
}

fn improved(new: (f64, f64), old: (f64, f64)) -> bool {
    const TINY: f64 = 1e-9;
    if new.0 < old.0 - TINY {
        return true;
    }
    new.0 < old.0 + TINY && new.1 < old.1 - TINY
}

impl ConstraintSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Relax `store` until every active constraint in `constraints` is
    /// within tolerance, the iteration cap is hit, progress stalls, or
    /// the token is cancelled. On every outcome except `Cancelled` the
    /// store holds the best iterate seen.
    pub fn solve(
        &self,
        store: &mut GeometryStore,
        constraints: &ConstraintSet,
        cancel: &CancelToken,
    ) -> SolveReport {
        let active = constraints.active();
        let dof = estimate_dof(store, &active);
        let duplicates = detect_duplicates(&active);

        if active.is_empty() {
            return SolveReport {
                outcome: SolveOutcome::Converged,
                iterations: 0,
                max_residual: 0.0,
                violations: Vec::new(),
                conflicting: Vec::new(),
                dof,
                duplicates,
            };
        }

        let mut best = store.clone();
        let mut best_score = score(store, &active);
        let mut state = if best_score.0 <= 1.0 {
            SolveState::Converged
        } else {
            SolveState::Iterating
        };
        let mut iterations = 0;
        let mut stall = 0usize;
        let mut unsettled: Vec<EntityId> = Vec::new();

        while state == SolveState::Iterating {
            if cancel.is_cancelled() {
                state = SolveState::Cancelled;
                break;
            }
            if iterations >= self.config.max_iterations {
                state = if stall >= self.config.stall_iterations {
                    SolveState::Conflicted
                } else {
                    SolveState::CapReached
                };
                break;
            }
            iterations += 1;

            // Residual seen when the constraint is visited, before its own
            // correction. In a conflict every participant keeps measuring a
            // violation here, which is what lets us name all of them.
            let mut violated_at_visit = Vec::new();
            for c in &active {
                if residual(store, &c.kind) > c.tolerance {
                    violated_at_visit.push(c.id);
                }
                apply_correction(store, &c.kind, self.config.damping);
            }
            unsettled = violated_at_visit;

            let s = score(store, &active);
            if improved(s, best_score) {
                best_score = s;
                best = store.clone();
                stall = 0;
            } else {
                stall += 1;
            }
            if best_score.0 <= 1.0 {
                state = SolveState::Converged;
            }
        }

        let outcome = match state {
            SolveState::Converged => SolveOutcome::Converged,
            SolveState::Conflicted => SolveOutcome::Conflicted,
            SolveState::CapReached => SolveOutcome::CapReached,
            SolveState::Cancelled => SolveOutcome::Cancelled,
            SolveState::Iterating => unreachable!("loop exits with a terminal state"),
        };

        if outcome != SolveOutcome::Cancelled {
            *store = best;
        }

        let mut max_residual = 0.0f64;
        let mut violations = Vec::new();
        for c in &active {
            let r = residual(store, &c.kind);
            max_residual = max_residual.max(r);
            if r > c.tolerance {
                violations.push(ConstraintViolation {
                    constraint: c.id,
                    residual: r,
                    tolerance: c.tolerance,
                });
            }
        }

        let conflicting = if outcome == SolveOutcome::Conflicted {
            unsettled
        } else {
            Vec::new()
        };

        debug!(
            ?outcome,
            iterations, max_residual, "constraint solve finished"
        );
        if outcome == SolveOutcome::Conflicted {
            warn!(count = conflicting.len(), "conflicting constraints detected");
        }

        SolveReport {
            outcome,
            iterations,
            max_residual,
            violations,
            conflicting,
            dof,
            duplicates,
        }
    }
}

/// Estimated degrees of freedom. Lines contribute nothing of their own:
/// their freedom lives in the endpoint points.
fn estimate_dof(store: &GeometryStore, active: &[&Constraint]) -> i32 {
    let mut total: i32 = 0;
    for entity in store.iter() {
        total += match entity.geometry {
            Geometry::Point { .. } => 2,
            Geometry::Line { .. } => 0,
            Geometry::Circle { .. } => 1,
            Geometry::Arc { .. } => 3,
        };
    }
    let mut removed: i32 = 0;
    for c in active {
        removed += match c.kind {
            ConstraintKind::Coincident { .. } | ConstraintKind::Symmetric { .. } => 2,
            _ => 1,
        };
    }
    total - removed
}

fn detect_duplicates(active: &[&Constraint]) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for c in active {
        if !seen.insert(c.kind.signature()) {
            duplicates.push(c.id);
        }
    }
    duplicates
}

/// Signed deviation magnitude of the current entity state from the
/// constraint's target condition. Unresolvable references measure zero;
/// the session's cascade invariant keeps them out of live documents.
pub fn residual(store: &GeometryStore, kind: &ConstraintKind) -> f64 {
    match kind {
        ConstraintKind::Coincident { points } => {
            match (store.point_pos(points[0]), store.point_pos(points[1])) {
                (Ok(a), Ok(b)) => distance(a, b),
                _ => 0.0,
            }
        }
        ConstraintKind::Distance { points, value } => {
            match (store.point_pos(points[0]), store.point_pos(points[1])) {
                (Ok(a), Ok(b)) => (distance(a, b) - value).abs(),
                _ => 0.0,
            }
        }
        ConstraintKind::Horizontal { line } => match store.line_coords(*line) {
            Ok((a, b)) => (a[1] - b[1]).abs(),
            _ => 0.0,
        },
        ConstraintKind::Vertical { line } => match store.line_coords(*line) {
            Ok((a, b)) => (a[0] - b[0]).abs(),
            _ => 0.0,
        },
        ConstraintKind::Parallel { lines } => match (line_dir(store, lines[0]), line_dir(store, lines[1]))
        {
            (Some(n1), Some(n2)) => {
                let cross = n1[0] * n2[1] - n1[1] * n2[0];
                cross.clamp(-1.0, 1.0).asin().abs()
            }
            _ => 0.0,
        },
        ConstraintKind::Perpendicular { lines } => {
            match (line_dir(store, lines[0]), line_dir(store, lines[1])) {
                (Some(n1), Some(n2)) => {
                    let dot = n1[0] * n2[0] + n1[1] * n2[1];
                    dot.clamp(-1.0, 1.0).asin().abs()
                }
                _ => 0.0,
            }
        }
        ConstraintKind::Angle { lines, value } => {
            match (line_dir(store, lines[0]), line_dir(store, lines[1])) {
                (Some(n1), Some(n2)) => {
                    let dot = n1[0] * n2[0] + n1[1] * n2[1];
                    (dot.clamp(-1.0, 1.0).acos() - value).abs()
                }
                _ => 0.0,
            }
        }
        ConstraintKind::Equal { entities } => {
            match (measure(store, entities[0]), measure(store, entities[1])) {
                (Some(m1), Some(m2)) => (m1 - m2).abs(),
                _ => 0.0,
            }
        }
        ConstraintKind::Symmetric { points, axis } => {
            let (p1, p2) = match (store.point_pos(points[0]), store.point_pos(points[1])) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return 0.0,
            };
            let (s, e) = match store.line_coords(*axis) {
                Ok(coords) => coords,
                _ => return 0.0,
            };
            match reflect_across_line(p1, s, e) {
                Some(target) => distance(p2, target),
                None => 0.0,
            }
        }
    }
}

/// Normalized direction of a line; `None` when degenerate.
fn line_dir(store: &GeometryStore, line: EntityId) -> Option<[f64; 2]> {
    let (a, b) = store.line_coords(line).ok()?;
    normalize_2d([b[0] - a[0], b[1] - a[1]])
}

/// Length of a line or radius of a circle/arc.
fn measure(store: &GeometryStore, id: EntityId) -> Option<f64> {
    match store.get(id).map(|e| &e.geometry)? {
        Geometry::Line { .. } => {
            let (a, b) = store.line_coords(id).ok()?;
            Some(distance(a, b))
        }
        Geometry::Circle { radius, .. } | Geometry::Arc { radius, .. } => Some(*radius),
        Geometry::Point { .. } => None,
    }
}

/// Write helper: corrections are built from finite inputs, so failed
/// writes only occur for unresolvable references and simply leave the
/// previous coordinates in place.
fn set_point(store: &mut GeometryStore, id: EntityId, pos: [f64; 2]) {
    let _ = store.set_point_pos(id, pos);
}

/// Rotate a line about its midpoint, preserving length.
fn rotate_line(store: &mut GeometryStore, line: EntityId, dtheta: f64) {
    let Ok((ia, ib)) = store.line_points(line) else {
        return;
    };
    let Ok((a, b)) = store.line_coords(line) else {
        return;
    };
    let mid = midpoint(a, b);
    set_point(store, ia, rotate_about(a, mid, dtheta));
    set_point(store, ib, rotate_about(b, mid, dtheta));
}

/// Scale a line to a new length about its midpoint.
fn set_line_length(store: &mut GeometryStore, line: EntityId, new_len: f64) {
    let Ok((ia, ib)) = store.line_points(line) else {
        return;
    };
    let Ok((a, b)) = store.line_coords(line) else {
        return;
    };
    let Some(dir) = normalize_2d([b[0] - a[0], b[1] - a[1]]) else {
        return;
    };
    let mid = midpoint(a, b);
    let half = new_len * 0.5;
    set_point(store, ia, [mid[0] - dir[0] * half, mid[1] - dir[1] * half]);
    set_point(store, ib, [mid[0] + dir[0] * half, mid[1] + dir[1] * half]);
}

/// Apply one damped corrective displacement for `kind`. The correction
/// is split symmetrically across both sides, so damping 0.5 closes a
/// two-sided constraint exactly.
pub fn apply_correction(store: &mut GeometryStore, kind: &ConstraintKind, damping: f64) {
    match kind {
        ConstraintKind::Coincident { points } => {
            let (p1, p2) = match (store.point_pos(points[0]), store.point_pos(points[1])) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return,
            };
            let delta = [p2[0] - p1[0], p2[1] - p1[1]];
            set_point(
                store,
                points[0],
                [p1[0] + damping * delta[0], p1[1] + damping * delta[1]],
            );
            set_point(
                store,
                points[1],
                [p2[0] - damping * delta[0], p2[1] - damping * delta[1]],
            );
        }
        ConstraintKind::Distance { points, value } => {
            let (p1, p2) = match (store.point_pos(points[0]), store.point_pos(points[1])) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return,
            };
            let current = distance(p1, p2);
            if current > EPSILON {
                // err > 0: too long, pull inward; err < 0: push outward
                let err = current - value;
                let dir = [(p2[0] - p1[0]) / current, (p2[1] - p1[1]) / current];
                let step = damping * err;
                set_point(
                    store,
                    points[0],
                    [p1[0] + step * dir[0], p1[1] + step * dir[1]],
                );
                set_point(
                    store,
                    points[1],
                    [p2[0] - step * dir[0], p2[1] - step * dir[1]],
                );
            } else if *value > EPSILON {
                // coincident points with a nonzero target: separate along x
                let mid = midpoint(p1, p2);
                let step = damping * value * 0.5;
                set_point(store, points[0], [mid[0] - step, mid[1]]);
                set_point(store, points[1], [mid[0] + step, mid[1]]);
            }
        }
        ConstraintKind::Horizontal { line } => {
            let Ok((ia, ib)) = store.line_points(*line) else {
                return;
            };
            let Ok((a, b)) = store.line_coords(*line) else {
                return;
            };
            let dy = b[1] - a[1];
            set_point(store, ia, [a[0], a[1] + damping * dy]);
            set_point(store, ib, [b[0], b[1] - damping * dy]);
        }
        ConstraintKind::Vertical { line } => {
            let Ok((ia, ib)) = store.line_points(*line) else {
                return;
            };
            let Ok((a, b)) = store.line_coords(*line) else {
                return;
            };
            let dx = b[0] - a[0];
            set_point(store, ia, [a[0] + damping * dx, a[1]]);
            set_point(store, ib, [b[0] - damping * dx, b[1]]);
        }
        ConstraintKind::Parallel { lines } => {
            let (n1, n2) = match (line_dir(store, lines[0]), line_dir(store, lines[1])) {
                (Some(a), Some(b)) => (a, b),
                _ => return,
            };
            // fold anti-parallel onto parallel before measuring the error
            let dot = n1[0] * n2[0] + n1[1] * n2[1];
            let n2_aligned = if dot >= 0.0 { n2 } else { [-n2[0], -n2[1]] };
            let err = signed_angle(n1, n2_aligned);
            if err.abs() < EPSILON {
                return;
            }
            rotate_line(store, lines[0], damping * err);
            rotate_line(store, lines[1], -damping * err);
        }
        ConstraintKind::Perpendicular { lines } => {
            let (n1, n2) = match (line_dir(store, lines[0]), line_dir(store, lines[1])) {
                (Some(a), Some(b)) => (a, b),
                _ => return,
            };
            let theta = signed_angle(n1, n2);
            let target = if theta >= 0.0 {
                std::f64::consts::FRAC_PI_2
            } else {
                -std::f64::consts::FRAC_PI_2
            };
            let err = theta - target;
            if err.abs() < EPSILON {
                return;
            }
            rotate_line(store, lines[0], damping * err);
            rotate_line(store, lines[1], -damping * err);
        }
        ConstraintKind::Angle { lines, value } => {
            let (n1, n2) = match (line_dir(store, lines[0]), line_dir(store, lines[1])) {
                (Some(a), Some(b)) => (a, b),
                _ => return,
            };
            let theta = signed_angle(n1, n2);
            let target = if theta >= 0.0 { *value } else { -*value };
            let err = theta - target;
            if err.abs() < EPSILON {
                return;
            }
            rotate_line(store, lines[0], damping * err);
            rotate_line(store, lines[1], -damping * err);
        }
        ConstraintKind::Equal { entities } => {
            let (m1, m2) = match (measure(store, entities[0]), measure(store, entities[1])) {
                (Some(a), Some(b)) => (a, b),
                _ => return,
            };
            let err = m1 - m2;
            if err.abs() < EPSILON {
                return;
            }
            apply_measure(store, entities[0], m1 - damping * err);
            apply_measure(store, entities[1], m2 + damping * err);
        }
        ConstraintKind::Symmetric { points, axis } => {
            let (p1, p2) = match (store.point_pos(points[0]), store.point_pos(points[1])) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return,
            };
            let Ok((s, e)) = store.line_coords(*axis) else {
                return;
            };
            let (Some(target1), Some(target2)) = (
                reflect_across_line(p2, s, e),
                reflect_across_line(p1, s, e),
            ) else {
                return;
            };
            set_point(
                store,
                points[0],
                [
                    p1[0] + damping * (target1[0] - p1[0]),
                    p1[1] + damping * (target1[1] - p1[1]),
                ],
            );
            set_point(
                store,
                points[1],
                [
                    p2[0] + damping * (target2[0] - p2[0]),
                    p2[1] + damping * (target2[1] - p2[1]),
                ],
            );
        }
    }
}

/// Set the length of a line or the radius of a circle/arc.
fn apply_measure(store: &mut GeometryStore, id: EntityId, value: f64) {
    if value <= EPSILON {
        return;
    }
    let is_line = matches!(
        store.get(id).map(|e| &e.geometry),
        Some(Geometry::Line { .. })
    );
    if is_line {
        set_line_length(store, id, value);
    } else {
        let _ = store.set_radius(id, value);
    }
}
