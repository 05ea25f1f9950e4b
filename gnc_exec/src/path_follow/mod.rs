//! # Path follower module
//!
//! Pure pursuit tracking of a waypoint path. The path is resampled (along a centripetal spline,
//! or linearly when curvature is not allowed) into an arc length table. Each update projects the
//! craft onto the table, picks a carrot point ahead of the projection and commands a velocity
//! toward it with a braking limited speed profile.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace};
use nalgebra::Vector3;
use serde::Serialize;
use thiserror::Error;

// Internal
pub use params::Params;
use crate::path::{catmull_rom_centripetal, dedup_consecutive, resample_polyline};
use util::maths::{clamp, try_unit};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Pure pursuit path follower.
///
/// Resampling reuses per-instance scratch buffers, so a follower must not be shared between
/// craft or used from several threads at once.
#[derive(Debug, Clone)]
pub struct PathFollower {
    params: Params,

    /// Resampled path points
    samples_m: Vec<Vector3<f64>>,

    /// Unit tangent at each sample
    tangents: Vec<Vector3<f64>>,

    /// Cumulative arc length at each sample
    cum_s_m: Vec<f64>,

    /// Sample index of the last projection
    last_idx: usize,

    /// Scratch for the deduplicated and densified path
    scratch_m: Vec<Vector3<f64>>,
}

/// Output of one follower update.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FollowOutput {
    /// Point on the path being steered toward
    pub carrot_m: Vector3<f64>,

    /// Commanded world frame velocity
    pub velocity_ref_ms: Vector3<f64>,

    /// True once the remaining distance is within the end clearance
    pub done: bool,

    /// Arc length of the craft's projection onto the path
    pub s_m: f64,

    /// Distance left before the stopping point
    pub remaining_m: f64,

    pub lookahead_m: f64,

    /// Commanded speed
    pub speed_ms: f64,

    /// Sample index of the projection
    pub index: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum PathFollowError {
    #[error("No path has been set")]
    NoPath,

    #[error("Path needs at least 2 distinct points, found {0}")]
    TooFewPoints(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PathFollower {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            samples_m: Vec::new(),
            tangents: Vec::new(),
            cum_s_m: Vec::new(),
            last_idx: 0,
            scratch_m: Vec::new(),
        }
    }

    /// Set the path to follow.
    ///
    /// Consecutive duplicate waypoints are removed. If `allow_curvature` is true the path is
    /// smoothed with a centripetal spline through the waypoints, otherwise it is resampled
    /// linearly so that it never leaves the original segments (as needed for avoidance paths).
    pub fn set_waypoints(
        &mut self,
        waypoints_m: &[Vector3<f64>],
        allow_curvature: bool,
    ) -> Result<(), PathFollowError> {
        let deduped = dedup_consecutive(waypoints_m);

        // A zero length path (start and goal coincide) is valid and immediately done
        let deduped = match deduped.len() {
            0 => return Err(PathFollowError::TooFewPoints(0)),
            1 if waypoints_m.len() >= 2 => vec![deduped[0], deduped[0]],
            1 => return Err(PathFollowError::TooFewPoints(1)),
            _ => deduped,
        };

        // Densify along the spline if curvature is allowed and there's a corner to smooth
        if allow_curvature && deduped.len() > 2 {
            catmull_rom_centripetal(&deduped, self.params.spline_subdivisions, &mut self.scratch_m);
        } else {
            self.scratch_m.clear();
            self.scratch_m.extend_from_slice(&deduped);
        }

        resample_polyline(
            &self.scratch_m,
            self.params.sample_spacing_m,
            self.params.max_samples,
            &mut self.samples_m,
        );

        self.build_table();
        self.last_idx = 0;

        debug!(
            "Path follower loaded {} waypoints as {} samples, {:.2} m",
            deduped.len(),
            self.samples_m.len(),
            self.total_m()
        );

        Ok(())
    }

    /// Forget the current path.
    pub fn clear(&mut self) {
        self.samples_m.clear();
        self.tangents.clear();
        self.cum_s_m.clear();
        self.last_idx = 0;
    }

    pub fn has_path(&self) -> bool {
        !self.samples_m.is_empty()
    }

    /// Total arc length of the resampled path.
    pub fn total_m(&self) -> f64 {
        self.cum_s_m.last().copied().unwrap_or(0.0)
    }

    /// The resampled path points.
    pub fn samples_m(&self) -> &[Vector3<f64>] {
        &self.samples_m
    }

    /// Run one tracking step for a craft at `position_m` moving at `velocity_ms`.
    pub fn update(
        &mut self,
        position_m: &Vector3<f64>,
        velocity_ms: &Vector3<f64>,
    ) -> Result<FollowOutput, PathFollowError> {
        if !self.has_path() {
            return Err(PathFollowError::NoPath);
        }

        let p = &self.params;
        let (index, s_m) = self.project(position_m);
        self.last_idx = index;

        let total_m = self.total_m();
        let stop_s_m = (total_m - p.end_clearance_m).max(0.0);
        let remaining_m = (total_m - p.end_clearance_m - s_m).max(0.0);

        let lookahead_m = (p.lookahead_min_m + p.lookahead_gain_s * velocity_ms.norm())
            .max(p.lookahead_min_m)
            .min(p.lookahead_max_m);

        let carrot_s_m = stop_s_m.min(s_m + remaining_m.min(lookahead_m));
        let carrot_m = self.point_at(carrot_s_m);

        // Always able to stop at the end of the path
        let speed_ms = p
            .lookahead_max_m
            .min((2.0 * p.max_braking_accel_ms2 * remaining_m).sqrt());

        let done = remaining_m <= p.end_clearance_m;

        let direction = try_unit(&(carrot_m - position_m)).unwrap_or_else(|| self.tangent_at(s_m));
        let velocity_ref_ms = if done {
            Vector3::zeros()
        } else {
            direction * speed_ms
        };

        trace!(
            "s = {:.2}/{:.2} m, remaining {:.2} m, lookahead {:.2} m, speed {:.3} m/s",
            s_m,
            total_m,
            remaining_m,
            lookahead_m,
            speed_ms
        );

        Ok(FollowOutput {
            carrot_m,
            velocity_ref_ms,
            done,
            s_m,
            remaining_m,
            lookahead_m,
            speed_ms,
            index,
        })
    }

    /// Minimum distance from the point to any segment of the path, `None` if there's no path.
    pub fn distance_to_path(&self, position_m: &Vector3<f64>) -> Option<f64> {
        if !self.has_path() {
            return None;
        }

        Some(
            (0..self.num_segments())
                .map(|i| self.project_onto_segment(i, position_m).1)
                .fold((self.samples_m[0] - position_m).norm(), f64::min),
        )
    }

    // ---- PRIVATE ----

    fn num_segments(&self) -> usize {
        self.samples_m.len().saturating_sub(1)
    }

    fn build_table(&mut self) {
        let n = self.samples_m.len();

        self.cum_s_m.clear();
        self.tangents.clear();

        let mut s = 0.0;
        for i in 0..n {
            if i > 0 {
                s += (self.samples_m[i] - self.samples_m[i - 1]).norm();
            }
            self.cum_s_m.push(s);

            // Forward difference, backward on the last sample
            let t = if i + 1 < n {
                self.samples_m[i + 1] - self.samples_m[i]
            } else if i > 0 {
                self.samples_m[i] - self.samples_m[i - 1]
            } else {
                Vector3::zeros()
            };
            self.tangents.push(try_unit(&t).unwrap_or_else(Vector3::x));
        }
    }

    /// Project onto segment `i`, returning `(t, distance)` with `t` in `[0, 1]`.
    fn project_onto_segment(&self, i: usize, position_m: &Vector3<f64>) -> (f64, f64) {
        let a = self.samples_m[i];
        let ab = self.samples_m[i + 1] - a;
        let len_sq = ab.norm_squared();

        let t = if len_sq > 0.0 {
            clamp((position_m - a).dot(&ab) / len_sq, 0.0, 1.0)
        } else {
            0.0
        };

        (t, (a + ab * t - position_m).norm())
    }

    /// Find the closest point on the path, returning its segment index and arc length.
    fn project(&self, position_m: &Vector3<f64>) -> (usize, f64) {
        let num_segs = self.num_segments();
        if num_segs == 0 {
            return (0, 0.0);
        }

        let lo = self.last_idx.saturating_sub(self.params.search_window);
        let hi = (self.last_idx + self.params.search_window).min(num_segs - 1);

        let (mut best_i, mut best_t, best_d) = self.best_in_range(lo, hi, position_m);

        // The path may have been edited or the craft knocked off it, look everywhere
        if best_d > self.params.reacquire_distance_m && (lo > 0 || hi < num_segs - 1) {
            let (i, t, d) = self.best_in_range(0, num_segs - 1, position_m);
            trace!("Local projection {:.2} m away, full search found {:.2} m", best_d, d);
            best_i = i;
            best_t = t;
        }

        let seg_len = self.cum_s_m[best_i + 1] - self.cum_s_m[best_i];
        (best_i, self.cum_s_m[best_i] + best_t * seg_len)
    }

    fn best_in_range(&self, lo: usize, hi: usize, position_m: &Vector3<f64>) -> (usize, f64, f64) {
        let mut best = (lo, 0.0, std::f64::INFINITY);
        for i in lo..=hi {
            let (t, d) = self.project_onto_segment(i, position_m);
            if d < best.2 {
                best = (i, t, d);
            }
        }
        best
    }

    /// Segment index containing arc length `s_m`.
    fn segment_at(&self, s_m: f64) -> usize {
        let num_segs = self.num_segments();
        if num_segs == 0 {
            return 0;
        }
        // First sample strictly beyond s, minus one
        let upper = self.cum_s_m.partition_point(|&c| c <= s_m);
        upper.saturating_sub(1).min(num_segs - 1)
    }

    fn point_at(&self, s_m: f64) -> Vector3<f64> {
        if self.num_segments() == 0 {
            return self.samples_m[0];
        }

        let i = self.segment_at(s_m);
        let seg_len = self.cum_s_m[i + 1] - self.cum_s_m[i];
        let t = if seg_len > 0.0 {
            clamp((s_m - self.cum_s_m[i]) / seg_len, 0.0, 1.0)
        } else {
            0.0
        };

        self.samples_m[i] + (self.samples_m[i + 1] - self.samples_m[i]) * t
    }

    fn tangent_at(&self, s_m: f64) -> Vector3<f64> {
        self.tangents[self.segment_at(s_m)]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn straight() -> Vec<Vector3<f64>> {
        vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(20.0, 0.0, 0.0)]
    }

    #[test]
    fn test_no_path() {
        let mut pf = PathFollower::new(Params::default());
        assert_eq!(
            pf.update(&Vector3::zeros(), &Vector3::zeros()).unwrap_err(),
            PathFollowError::NoPath
        );
        assert!(pf.distance_to_path(&Vector3::zeros()).is_none());
        assert_eq!(
            pf.set_waypoints(&[Vector3::zeros()], false).unwrap_err(),
            PathFollowError::TooFewPoints(1)
        );
    }

    #[test]
    fn test_carrot_and_speed_on_straight_path() {
        let params = Params::default();
        let mut pf = PathFollower::new(params.clone());
        pf.set_waypoints(&straight(), false).unwrap();
        assert!((pf.total_m() - 20.0).abs() < 1e-9);

        let out = pf
            .update(&Vector3::new(5.0, 1.0, 0.0), &Vector3::new(2.0, 0.0, 0.0))
            .unwrap();

        let lookahead = params.lookahead_min_m + params.lookahead_gain_s * 2.0;
        assert!((out.s_m - 5.0).abs() < 1e-9);
        assert!((out.lookahead_m - lookahead).abs() < 1e-9);
        assert!((out.carrot_m - Vector3::new(5.0 + lookahead, 0.0, 0.0)).norm() < 1e-9);

        let remaining = 20.0 - params.end_clearance_m - 5.0;
        assert!((out.remaining_m - remaining).abs() < 1e-9);
        let speed = params
            .lookahead_max_m
            .min((2.0 * params.max_braking_accel_ms2 * remaining).sqrt());
        assert!((out.velocity_ref_ms.norm() - speed).abs() < 1e-9);
        assert!(!out.done);

        // Steering toward the carrot pulls the craft back onto the path
        assert!(out.velocity_ref_ms.y < 0.0);
    }

    #[test]
    fn test_carrot_stops_short_of_end() {
        let params = Params::default();
        let mut pf = PathFollower::new(params.clone());
        pf.set_waypoints(&straight(), false).unwrap();

        let out = pf.update(&Vector3::new(19.0, 0.0, 0.0), &Vector3::zeros()).unwrap();
        assert!((out.carrot_m.x - (20.0 - params.end_clearance_m)).abs() < 1e-9);

        let out = pf.update(&Vector3::new(19.85, 0.0, 0.0), &Vector3::zeros()).unwrap();
        assert!(out.done);
        assert_eq!(out.velocity_ref_ms, Vector3::zeros());
    }

    #[test]
    fn test_linear_resampling_stays_on_segments() {
        let mut pf = PathFollower::new(Params::default());
        let corner = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(10.0, 10.0, 0.0),
        ];
        pf.set_waypoints(&corner, false).unwrap();
        for p in pf.samples_m() {
            assert!(p.y.abs() < 1e-9 || (p.x - 10.0).abs() < 1e-9);
        }

        // The spline cuts the corner instead, but still passes through the waypoints
        pf.set_waypoints(&corner, true).unwrap();
        assert!(pf.samples_m().iter().any(|p| p.y.abs() > 1e-3 && (p.x - 10.0).abs() > 1e-3));
        assert_eq!(pf.samples_m()[0], corner[0]);
        assert_eq!(*pf.samples_m().last().unwrap(), corner[2]);
    }

    #[test]
    fn test_reacquire_after_jump() {
        let params = Params::default();
        let mut pf = PathFollower::new(params);
        let long = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(100.0, 0.0, 0.0)];
        pf.set_waypoints(&long, false).unwrap();

        pf.update(&Vector3::new(1.0, 0.0, 0.0), &Vector3::zeros()).unwrap();
        let out = pf.update(&Vector3::new(80.0, 0.5, 0.0), &Vector3::zeros()).unwrap();
        assert!((out.s_m - 80.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_to_path() {
        let mut pf = PathFollower::new(Params::default());
        pf.set_waypoints(&straight(), false).unwrap();
        let d = pf.distance_to_path(&Vector3::new(10.0, 3.0, 4.0)).unwrap();
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_length_path_is_done() {
        let mut pf = PathFollower::new(Params::default());
        let p = Vector3::new(1.0, 1.0, 1.0);
        pf.set_waypoints(&[p, p], true).unwrap();
        assert!(pf.update(&p, &Vector3::zeros()).unwrap().done);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Integrating the commanded velocity always reaches the end of the path.
        #[test]
        fn test_follower_terminates(
            pts in prop::collection::vec(prop::array::uniform3(-30.0..30.0f64), 2..6),
            start in prop::array::uniform3(-5.0..5.0f64),
            curved in any::<bool>(),
        ) {
            let params = Params::default();
            let pts: Vec<Vector3<f64>> = pts.into_iter().map(Vector3::from).collect();
            let mut pf = PathFollower::new(params.clone());
            pf.set_waypoints(&pts, curved).unwrap();

            let dt = 0.1;
            let min_speed = (2.0 * params.max_braking_accel_ms2 * params.end_clearance_m).sqrt();
            let offset = Vector3::from(start);
            let max_steps = (((pf.total_m() + offset.norm()) / (min_speed * dt)) as usize + 10) * 4;

            let mut pos = pts[0] + offset;
            let mut vel = Vector3::zeros();
            let mut done = false;
            for _ in 0..max_steps {
                let out = pf.update(&pos, &vel).unwrap();
                if out.done {
                    done = true;
                    break;
                }
                vel = out.velocity_ref_ms;
                pos += vel * dt;
            }
            prop_assert!(done);
        }
    }
}
