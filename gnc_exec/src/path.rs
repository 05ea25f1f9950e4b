//! # Path
//!
//! This module defines the waypoint path shared by the planner, the path follower and the
//! autopilot.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Points closer than this are considered duplicates.
pub const DUPLICATE_EPSILON_M: f64 = 1e-6;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An ordered sequence of world frame waypoints.
///
/// A path always has at least two points, the first and last being the start and goal it was
/// created for, and never has two consecutive equal points. The one exception is a path whose
/// start and goal coincide, which is kept as two equal points.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Path {
    points_m: Vec<Vector3<f64>>,

    /// Expected time to traverse the path, only used for display and timing metadata
    pub total_time_hint_s: Option<f64>,
}

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PathError {
    #[error("A path needs at least 2 points, found {0}")]
    TooFewPoints(usize),

    #[error("Path point {0} is not finite")]
    NonFinitePoint(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Path {
    /// Create a new path from the given points, removing consecutive duplicates.
    pub fn new(points_m: Vec<Vector3<f64>>) -> Result<Self, PathError> {
        if points_m.len() < 2 {
            return Err(PathError::TooFewPoints(points_m.len()));
        }

        if let Some(i) = points_m.iter().position(|p| !p.iter().all(|c| c.is_finite())) {
            return Err(PathError::NonFinitePoint(i));
        }

        let first = points_m[0];
        let last = points_m[points_m.len() - 1];

        let mut deduped = dedup_consecutive(&points_m);

        // Deduplication can merge the endpoints together, the start and goal must survive
        if deduped.len() < 2 {
            deduped = vec![first, last];
        }

        Ok(Self {
            points_m: deduped,
            total_time_hint_s: None,
        })
    }

    /// A straight path between two points.
    pub fn direct(from: Vector3<f64>, to: Vector3<f64>) -> Self {
        Self {
            points_m: vec![from, to],
            total_time_hint_s: None,
        }
    }

    /// Attach a traversal time hint.
    pub fn with_time_hint(mut self, total_time_s: f64) -> Self {
        self.total_time_hint_s = Some(total_time_s);
        self
    }

    pub fn points_m(&self) -> &[Vector3<f64>] {
        &self.points_m
    }

    pub fn into_points(self) -> Vec<Vector3<f64>> {
        self.points_m
    }

    pub fn num_points(&self) -> usize {
        self.points_m.len()
    }

    pub fn start(&self) -> Vector3<f64> {
        self.points_m[0]
    }

    pub fn end(&self) -> Vector3<f64> {
        self.points_m[self.points_m.len() - 1]
    }

    /// Iterate over the segments of the path as `(start, end)` pairs.
    pub fn segments(&self) -> impl Iterator<Item = (&Vector3<f64>, &Vector3<f64>)> {
        self.points_m.windows(2).map(|w| (&w[0], &w[1]))
    }

    /// Total length of the path.
    pub fn length_m(&self) -> f64 {
        polyline_length(&self.points_m)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Remove consecutive duplicate points, always keeping the last point of a run so that the final
/// point of the input is the final point of the output.
pub fn dedup_consecutive(points_m: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    let mut out: Vec<Vector3<f64>> = Vec::with_capacity(points_m.len());

    for p in points_m {
        let is_dup = out
            .last()
            .map_or(false, |prev| (prev - p).norm() <= DUPLICATE_EPSILON_M);

        if !is_dup {
            out.push(*p);
        } else if out.len() > 1 {
            // Keep the first point exactly, otherwise move to the later point of the run
            let n = out.len();
            out[n - 1] = *p;
        }
    }

    out
}

/// Total length of a polyline.
pub fn polyline_length(points_m: &[Vector3<f64>]) -> f64 {
    points_m.windows(2).map(|w| (w[1] - w[0]).norm()).sum()
}

/// Densify a polyline with a centripetal Catmull-Rom spline passing through every point.
///
/// Each span is evaluated at `subdivisions` points (at least 1). The ends are extended by
/// reflecting the neighbouring point so the first and last spans are well defined. The output
/// is written into `out`, which is cleared first so callers can reuse the allocation.
pub fn catmull_rom_centripetal(
    points_m: &[Vector3<f64>],
    subdivisions: usize,
    out: &mut Vec<Vector3<f64>>,
) {
    out.clear();

    let n = points_m.len();
    if n < 3 {
        out.extend_from_slice(points_m);
        return;
    }

    let subdivisions = subdivisions.max(1);

    for i in 0..(n - 1) {
        let p1 = points_m[i];
        let p2 = points_m[i + 1];
        let p0 = if i == 0 { p1 * 2.0 - p2 } else { points_m[i - 1] };
        let p3 = if i + 2 < n {
            points_m[i + 2]
        } else {
            p2 * 2.0 - p1
        };

        // Centripetal knot spacing, floored so coincident points don't divide by zero
        let knot = |a: &Vector3<f64>, b: &Vector3<f64>| (b - a).norm().sqrt().max(1e-6);
        let t0 = 0.0;
        let t1 = t0 + knot(&p0, &p1);
        let t2 = t1 + knot(&p1, &p2);
        let t3 = t2 + knot(&p2, &p3);

        for k in 0..subdivisions {
            let t = t1 + (t2 - t1) * (k as f64) / (subdivisions as f64);

            let a1 = p0 * ((t1 - t) / (t1 - t0)) + p1 * ((t - t0) / (t1 - t0));
            let a2 = p1 * ((t2 - t) / (t2 - t1)) + p2 * ((t - t1) / (t2 - t1));
            let a3 = p2 * ((t3 - t) / (t3 - t2)) + p3 * ((t - t2) / (t3 - t2));

            let b1 = a1 * ((t2 - t) / (t2 - t0)) + a2 * ((t - t0) / (t2 - t0));
            let b2 = a2 * ((t3 - t) / (t3 - t1)) + a3 * ((t - t1) / (t3 - t1));

            out.push(b1 * ((t2 - t) / (t2 - t1)) + b2 * ((t - t1) / (t2 - t1)));
        }
    }

    out.push(points_m[n - 1]);
}

/// Resample a polyline at a fixed arc length spacing.
///
/// The spacing is widened if needed so that no more than `max_samples` points are produced. The
/// first and last input points are always kept exactly. Output goes into `out` which is cleared
/// first.
pub fn resample_polyline(
    points_m: &[Vector3<f64>],
    spacing_m: f64,
    max_samples: usize,
    out: &mut Vec<Vector3<f64>>,
) {
    out.clear();

    let total_m = polyline_length(points_m);
    if points_m.len() < 2 || total_m <= DUPLICATE_EPSILON_M {
        out.extend_from_slice(points_m);
        return;
    }

    let max_samples = max_samples.max(2);
    let spacing_m = spacing_m
        .max(total_m / (max_samples - 1) as f64)
        .max(DUPLICATE_EPSILON_M);

    out.push(points_m[0]);

    // Arc length at the start of the current input segment, and of the next sample
    let mut seg_start_s = 0.0;
    let mut next_s = spacing_m;

    for w in points_m.windows(2) {
        let seg = w[1] - w[0];
        let seg_len = seg.norm();

        while seg_len > 0.0 && next_s <= seg_start_s + seg_len && out.len() < max_samples - 1 {
            let t = (next_s - seg_start_s) / seg_len;
            out.push(w[0] + seg * t);
            next_s += spacing_m;
        }

        seg_start_s += seg_len;
    }

    // Always finish exactly on the last point, dropping a sample that landed on top of it
    let last = points_m[points_m.len() - 1];
    if out.len() > 1 && (out[out.len() - 1] - last).norm() < 0.5 * spacing_m {
        out.pop();
    }
    out.push(last);
}
