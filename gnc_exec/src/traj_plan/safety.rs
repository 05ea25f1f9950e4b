//! Obstacles, safety boxes and segment/box intersection tests.
//!
//! These are pure geometric utilities, also used by the docking controller for its own segment
//! checks.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::Serialize;

use super::Params;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Direction components smaller than this are treated as parallel to a slab.
const PARALLEL_EPSILON: f64 = 1e-12;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An obstacle as seen by the planner, rebuilt from the world for every query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Obstacle {
    pub position_m: Vector3<f64>,

    /// World axis aligned half extents
    pub half_extents_m: Vector3<f64>,

    /// True for the active docking target, which gets a larger clearance
    pub is_target: bool,
}

/// An obstacle's bounding box inflated by a clearance margin.
///
/// `min_m <= max_m` holds componentwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SafetyBox {
    pub min_m: Vector3<f64>,
    pub max_m: Vector3<f64>,
    pub is_target: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Obstacle {
    /// A sphere-like body approximated by its bounding cube.
    pub fn from_sphere(position_m: Vector3<f64>, radius_m: f64, is_target: bool) -> Self {
        Self {
            position_m,
            half_extents_m: Vector3::repeat(radius_m.abs()),
            is_target,
        }
    }
}

impl SafetyBox {
    /// Build a box from two corners in any order.
    pub fn from_corners(a: Vector3<f64>, b: Vector3<f64>, is_target: bool) -> Self {
        Self {
            min_m: a.inf(&b),
            max_m: a.sup(&b),
            is_target,
        }
    }

    pub fn centre_m(&self) -> Vector3<f64> {
        (self.min_m + self.max_m) * 0.5
    }

    pub fn half_extents_m(&self) -> Vector3<f64> {
        (self.max_m - self.min_m) * 0.5
    }

    /// Radius of the sphere enclosing the box.
    pub fn bounding_radius_m(&self) -> f64 {
        self.half_extents_m().norm()
    }

    /// True if the point is strictly inside the box.
    pub fn contains(&self, point_m: &Vector3<f64>) -> bool {
        (0..3).all(|i| point_m[i] > self.min_m[i] && point_m[i] < self.max_m[i])
    }

    /// The box grown by `margin_m` on every side.
    pub fn inflated(&self, margin_m: f64) -> Self {
        Self {
            min_m: self.min_m - Vector3::repeat(margin_m),
            max_m: self.max_m + Vector3::repeat(margin_m),
            is_target: self.is_target,
        }
    }

    /// True if the two boxes overlap.
    pub fn overlaps(&self, other: &SafetyBox) -> bool {
        (0..3).all(|i| self.min_m[i] <= other.max_m[i] && other.min_m[i] <= self.max_m[i])
    }

    /// True if the segment `a -> b` passes through the box.
    pub fn intersects_segment(&self, a: &Vector3<f64>, b: &Vector3<f64>, epsilon_m: f64) -> bool {
        segment_entry_t(a, b, &self.min_m, &self.max_m, epsilon_m).is_some()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Inflate an obstacle into a safety box.
///
/// The clearance is raised to the target clearance for the docking target, and is never lower
/// than the minimum clearance.
pub fn calculate_safety_box(obstacle: &Obstacle, clearance_m: f64, params: &Params) -> SafetyBox {
    let mut clearance_m = clearance_m.max(params.min_clearance_m);
    if obstacle.is_target {
        clearance_m = clearance_m.max(params.target_clearance_m);
    }

    let half = obstacle.half_extents_m.abs() + Vector3::repeat(clearance_m);

    SafetyBox {
        min_m: obstacle.position_m - half,
        max_m: obstacle.position_m + half,
        is_target: obstacle.is_target,
    }
}

/// Slab test of the segment `a -> b` against the box `[min, max]` grown by `epsilon_m`.
///
/// Returns the segment parameter in `[0, 1]` at which the segment enters the box (zero if `a` is
/// already inside), or `None` if it misses.
pub fn segment_entry_t(
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    min_m: &Vector3<f64>,
    max_m: &Vector3<f64>,
    epsilon_m: f64,
) -> Option<f64> {
    let d = b - a;
    let mut t_min = 0.0f64;
    let mut t_max = 1.0f64;

    for i in 0..3 {
        let lo = min_m[i] - epsilon_m;
        let hi = max_m[i] + epsilon_m;

        if d[i].abs() < PARALLEL_EPSILON {
            if a[i] < lo || a[i] > hi {
                return None;
            }
        } else {
            let inv = 1.0 / d[i];
            let mut t0 = (lo - a[i]) * inv;
            let mut t1 = (hi - a[i]) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
    }

    Some(t_min)
}

/// True if the segment `a -> b` intersects any of the boxes.
pub fn does_line_intersect_any_safety_box(
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    boxes: &[SafetyBox],
    epsilon_m: f64,
) -> bool {
    boxes.iter().any(|sb| sb.intersects_segment(a, b, epsilon_m))
}

/// True if every segment of the polyline is clear of the boxes.
pub fn is_polyline_clear(points_m: &[Vector3<f64>], boxes: &[SafetyBox], epsilon_m: f64) -> bool {
    points_m
        .windows(2)
        .all(|w| !does_line_intersect_any_safety_box(&w[0], &w[1], boxes, epsilon_m))
}

/// Push a goal which lies inside a box out through the nearest face.
///
/// Boxes can overlap so moving out of one may land in another, the correction is repeated up to
/// `max_passes` times. Returns the corrected goal and whether it moved.
pub fn correct_goal(
    goal_m: &Vector3<f64>,
    boxes: &[SafetyBox],
    margin_m: f64,
    max_passes: usize,
) -> (Vector3<f64>, bool) {
    let mut goal = *goal_m;
    let mut moved = false;

    for _ in 0..max_passes {
        let mut changed = false;

        for sb in boxes {
            if !sb.contains(&goal) {
                continue;
            }

            // Distance to each of the six faces, pick the nearest
            let mut best = (0usize, false, std::f64::INFINITY);
            for i in 0..3 {
                let to_min = goal[i] - sb.min_m[i];
                let to_max = sb.max_m[i] - goal[i];
                if to_min < best.2 {
                    best = (i, false, to_min);
                }
                if to_max < best.2 {
                    best = (i, true, to_max);
                }
            }

            let (axis, to_max_face, _) = best;
            goal[axis] = if to_max_face {
                sb.max_m[axis] + margin_m
            } else {
                sb.min_m[axis] - margin_m
            };
            changed = true;
        }

        if !changed {
            break;
        }
        moved = true;
    }

    (goal, moved)
}
