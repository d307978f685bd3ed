//! Pure 2D geometry helpers shared by the solver, the snap engine, and
//! the parametric regeneration path. Coordinates travel as `[f64; 2]`;
//! nalgebra types are used internally where the vector algebra pays off.

use super::{Point2, Vector2, EPSILON};

/// Compute squared distance between two 2D points.
#[inline]
pub fn distance_squared(p1: [f64; 2], p2: [f64; 2]) -> f64 {
    let dx = p2[0] - p1[0];
    let dy = p2[1] - p1[1];
    dx * dx + dy * dy
}

/// Compute distance between two 2D points.
#[inline]
pub fn distance(p1: [f64; 2], p2: [f64; 2]) -> f64 {
    distance_squared(p1, p2).sqrt()
}

/// Linear interpolation between two 2D points.
#[inline]
pub fn lerp(p1: [f64; 2], p2: [f64; 2], t: f64) -> [f64; 2] {
    [p1[0] + t * (p2[0] - p1[0]), p1[1] + t * (p2[1] - p1[1])]
}

/// Midpoint between two 2D points.
#[inline]
pub fn midpoint(p1: [f64; 2], p2: [f64; 2]) -> [f64; 2] {
    lerp(p1, p2, 0.5)
}

/// 2D cross product (z-component of the 3D cross product).
#[inline]
pub fn cross_2d(v1: [f64; 2], v2: [f64; 2]) -> f64 {
    v1[0] * v2[1] - v1[1] * v2[0]
}

/// 2D dot product.
#[inline]
pub fn dot_2d(v1: [f64; 2], v2: [f64; 2]) -> f64 {
    v1[0] * v2[0] + v1[1] * v2[1]
}

/// Normalize a 2D vector. Returns `None` for a near-zero vector.
#[inline]
pub fn normalize_2d(v: [f64; 2]) -> Option<[f64; 2]> {
    let len = (v[0] * v[0] + v[1] * v[1]).sqrt();
    if len < EPSILON {
        None
    } else {
        Some([v[0] / len, v[1] / len])
    }
}

/// Rotate `p` about `pivot` by `angle` radians (counter-clockwise).
#[inline]
pub fn rotate_about(p: [f64; 2], pivot: [f64; 2], angle: f64) -> [f64; 2] {
    let (s, c) = angle.sin_cos();
    let dx = p[0] - pivot[0];
    let dy = p[1] - pivot[1];
    [pivot[0] + dx * c - dy * s, pivot[1] + dx * s + dy * c]
}

/// Signed angle from `v1` to `v2` in `(-PI, PI]`.
#[inline]
pub fn signed_angle(v1: [f64; 2], v2: [f64; 2]) -> f64 {
    cross_2d(v1, v2).atan2(dot_2d(v1, v2))
}

/// Project `p` onto the infinite line through `a` and `b`.
/// Returns `None` when the axis is degenerate.
pub fn project_onto_line(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> Option<[f64; 2]> {
    let dir = Vector2::new(b[0] - a[0], b[1] - a[1]);
    let len_sq = dir.norm_squared();
    if len_sq < EPSILON * EPSILON {
        return None;
    }
    let v = Vector2::new(p[0] - a[0], p[1] - a[1]);
    let t = v.dot(&dir) / len_sq;
    let proj = Point2::new(a[0], a[1]) + dir * t;
    Some([proj.x, proj.y])
}

/// Reflect `p` across the infinite line through `a` and `b`.
/// Returns `None` when the axis is degenerate.
pub fn reflect_across_line(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> Option<[f64; 2]> {
    let proj = project_onto_line(p, a, b)?;
    Some([2.0 * proj[0] - p[0], 2.0 * proj[1] - p[1]])
}

/// Intersection of segments `p1->p2` and `p3->p4`, if it exists within
/// both segments.
pub fn segment_intersection(
    p1: [f64; 2],
    p2: [f64; 2],
    p3: [f64; 2],
    p4: [f64; 2],
) -> Option<[f64; 2]> {
    let d1 = [p2[0] - p1[0], p2[1] - p1[1]];
    let d2 = [p4[0] - p3[0], p4[1] - p3[1]];
    let denom = cross_2d(d1, d2);
    if denom.abs() < EPSILON {
        return None; // parallel or degenerate
    }
    let w = [p3[0] - p1[0], p3[1] - p1[1]];
    let t = cross_2d(w, d2) / denom;
    let u = cross_2d(w, d1) / denom;
    if !(0.0..=1.0).contains(&t) || !(0.0..=1.0).contains(&u) {
        return None;
    }
    Some([p1[0] + t * d1[0], p1[1] + t * d1[1]])
}
