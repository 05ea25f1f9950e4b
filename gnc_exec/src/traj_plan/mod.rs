//! # Trajectory planner module
//!
//! Plans collision free waypoint paths between two points among box-shaped obstacles. Planning
//! degrades through a chain of strategies, each more expensive than the last:
//!
//! 1. the straight line, if it is clear,
//! 2. a single waypoint skirt around the first obstacle hit,
//! 3. a sparse roadmap over anchor points around nearby obstacles,
//! 4. voxel grid A* (in two legs through an approach point when a docking target is present),
//!    with detours and a wider regrid when the grid search fails.
//!
//! Any produced path is then shortcut, corner rounded and optionally spline refitted, and any
//! segment still colliding is repaired with a fine local grid. If nothing yields a clear path the
//! straight line is returned anyway, so callers always get a path.
//!
//! Every search is bounded by explicit caps so planning always completes within a tick.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod bvh;
pub mod grid;
mod params;
pub mod roadmap;
pub mod safety;
pub mod smooth;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, trace, warn};
use nalgebra::Vector3;
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;

// Internal
use crate::path::Path;
use bvh::Bvh;
use grid::VoxelGrid;
pub use params::Params;
pub use safety::{
    calculate_safety_box, correct_goal, does_line_intersect_any_safety_box, Obstacle, SafetyBox,
};
use util::maths::{any_perpendicular, try_unit};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Session relative path planner reports are saved to.
const REPORT_PATH: &str = "traj_plan/report.json";

/// Reports of fallback plans are kept rather than overwritten.
const FALLBACK_REPORT_PATH: &str = "traj_plan/fallback.json";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The trajectory planner.
#[derive(Debug, Clone)]
pub struct TrajPlanner {
    params: Params,
}

/// Record of how a path was planned.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub start_m: Vector3<f64>,
    pub goal_m: Vector3<f64>,

    /// The goal after being pushed out of any box containing it
    pub corrected_goal_m: Vector3<f64>,
    pub goal_corrected: bool,

    pub num_boxes: usize,

    /// Boxes ignored because they contain the start
    pub num_excluded_boxes: usize,

    /// Strategies tried, in order, and whether each produced the final path
    pub attempts: Vec<(PlanStrategy, bool)>,

    pub strategy: PlanStrategy,

    pub prm_nodes: usize,
    pub prm_edges: usize,
    pub grid_expansions: usize,

    /// Voxel size of the last grid built
    pub grid_voxel_m: Option<f64>,
    pub refined: bool,
    pub repaired_segments: usize,

    pub num_points: usize,
    pub length_m: f64,
    pub elapsed_s: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The strategy which produced a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PlanStrategy {
    Direct,
    Skirt,
    Roadmap,
    Grid,
    GridDetour,
    Regrid,

    /// No strategy found a clear path, the straight line was returned
    Fallback,
}

#[derive(Debug, Error, PartialEq)]
pub enum TrajPlanError {
    #[error("Planning inputs are not finite (start {0:?}, goal {1:?})")]
    NonFiniteInput(Vector3<f64>, Vector3<f64>),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrajPlanner {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Calculate a path from `start_m` to `goal_m` avoiding the obstacles.
    ///
    /// The returned path always has at least two points, starts at `start_m` and ends at the
    /// (possibly corrected) goal. When no clear path can be found the straight line is returned.
    pub fn calculate_avoidance_waypoints(
        &self,
        start_m: &Vector3<f64>,
        goal_m: &Vector3<f64>,
        obstacles: &[Obstacle],
        clearance_m: f64,
    ) -> Path {
        match self.plan(start_m, goal_m, obstacles, clearance_m) {
            Ok((path, _)) => path,
            Err(e) => {
                warn!("{}, using the direct path", e);
                Path::direct(*start_m, *goal_m)
            }
        }
    }

    /// Plan a path, also returning the report of how it was made.
    pub fn plan(
        &self,
        start_m: &Vector3<f64>,
        goal_m: &Vector3<f64>,
        obstacles: &[Obstacle],
        clearance_m: f64,
    ) -> Result<(Path, PlanReport), TrajPlanError> {
        let all_finite = |v: &Vector3<f64>| v.iter().all(|c| c.is_finite());
        if !all_finite(start_m) || !all_finite(goal_m) {
            return Err(TrajPlanError::NonFiniteInput(*start_m, *goal_m));
        }

        let t0 = Instant::now();
        let p = &self.params;

        // The craft must be allowed to leave a box it's already in
        let all_boxes: Vec<SafetyBox> = obstacles
            .iter()
            .map(|o| calculate_safety_box(o, clearance_m, p))
            .collect();
        let num_boxes = all_boxes.len();
        let boxes: Vec<SafetyBox> = all_boxes.into_iter().filter(|b| !b.contains(start_m)).collect();

        let (goal, goal_corrected) = correct_goal(
            goal_m,
            &boxes,
            p.goal_correction_margin_m,
            p.goal_correction_passes,
        );

        let mut report = PlanReport {
            start_m: *start_m,
            goal_m: *goal_m,
            corrected_goal_m: goal,
            goal_corrected,
            num_boxes,
            num_excluded_boxes: num_boxes - boxes.len(),
            attempts: Vec::new(),
            strategy: PlanStrategy::Fallback,
            prm_nodes: 0,
            prm_edges: 0,
            grid_expansions: 0,
            grid_voxel_m: None,
            refined: false,
            repaired_segments: 0,
            num_points: 0,
            length_m: 0.0,
            elapsed_s: 0.0,
        };

        let bvh = Bvh::new(&boxes, p.epsilon_m);

        let points = self.run_chain(start_m, &goal, &boxes, &bvh, &mut report);

        let path = Path::new(points).unwrap_or_else(|_| Path::direct(*start_m, goal));

        report.num_points = path.num_points();
        report.length_m = path.length_m();
        report.elapsed_s = t0.elapsed().as_secs_f64();

        match report.strategy {
            PlanStrategy::Direct | PlanStrategy::Skirt => debug!(
                "Planned {:?} path, {} points, {:.1} m",
                report.strategy, report.num_points, report.length_m
            ),
            PlanStrategy::Fallback => warn!(
                "No clear path from {:?} to {:?} among {} boxes, using the direct path",
                start_m.as_slice(),
                goal.as_slice(),
                boxes.len()
            ),
            _ => info!(
                "Planned {:?} path, {} points, {:.1} m in {:.3} s",
                report.strategy, report.num_points, report.length_m, report.elapsed_s
            ),
        }

        if p.save_reports {
            util::session::save(REPORT_PATH, report.clone());
        }
        if report.strategy == PlanStrategy::Fallback {
            util::session::save_with_timestamp(FALLBACK_REPORT_PATH, report.clone());
        }

        Ok((path, report))
    }

    // ---- STRATEGY CHAIN ----

    fn run_chain(
        &self,
        start_m: &Vector3<f64>,
        goal_m: &Vector3<f64>,
        boxes: &[SafetyBox],
        bvh: &Bvh,
        report: &mut PlanReport,
    ) -> Vec<Vector3<f64>> {
        let p = &self.params;

        // Fast path
        if bvh.is_clear(start_m, goal_m) {
            report.attempts.push((PlanStrategy::Direct, true));
            report.strategy = PlanStrategy::Direct;
            return vec![*start_m, *goal_m];
        }
        report.attempts.push((PlanStrategy::Direct, false));

        // Skirt
        if let Some(pts) = roadmap::skirt(start_m, goal_m, bvh, p) {
            if let Some(pts) = self.finish(pts, false, boxes, bvh, report) {
                return self.accept(PlanStrategy::Skirt, pts, report);
            }
        }
        report.attempts.push((PlanStrategy::Skirt, false));

        // Sparse roadmap
        let prm = roadmap::roadmap(start_m, goal_m, bvh, p);
        report.prm_nodes = prm.num_nodes;
        report.prm_edges = prm.num_edges;
        if let Some(pts) = prm.points_m {
            if let Some(pts) = self.finish(pts, false, boxes, bvh, report) {
                return self.accept(PlanStrategy::Roadmap, pts, report);
            }
        }
        report.attempts.push((PlanStrategy::Roadmap, false));

        // Voxel grid
        if let Some((pts, strategy)) = self.plan_grid(start_m, goal_m, boxes, report) {
            if let Some(pts) = self.finish(pts, true, boxes, bvh, report) {
                return self.accept(strategy, pts, report);
            }
            report.attempts.push((strategy, false));
        } else {
            report.attempts.push((PlanStrategy::Grid, false));
        }

        report.attempts.push((PlanStrategy::Fallback, true));
        report.strategy = PlanStrategy::Fallback;
        vec![*start_m, *goal_m]
    }

    fn accept(
        &self,
        strategy: PlanStrategy,
        pts: Vec<Vector3<f64>>,
        report: &mut PlanReport,
    ) -> Vec<Vector3<f64>> {
        report.attempts.push((strategy, true));
        report.strategy = strategy;
        pts
    }

    /// Post-process, repair and validate a candidate path, `None` if it still collides.
    fn finish(
        &self,
        pts: Vec<Vector3<f64>>,
        use_grid: bool,
        boxes: &[SafetyBox],
        bvh: &Bvh,
        report: &mut PlanReport,
    ) -> Option<Vec<Vector3<f64>>> {
        let p = &self.params;

        let shortcut_grid = if use_grid {
            let (min_m, max_m) = bounds_of(&pts, p.grid_padding_m);
            Some(VoxelGrid::new(min_m, max_m, p.grid_voxel_m, p.grid_max_cells, boxes))
        } else {
            None
        };

        // Smoothing only ever keeps clear changes, so a clear path stays clear. Colliding
        // segments of grid paths (usually the hops to the exact endpoints) are repaired first.
        let pts = if bvh.is_polyline_clear(&pts) {
            pts
        } else {
            self.repair(&pts, boxes, bvh, report)
        };
        let pts = smooth::post_process(pts, bvh, shortcut_grid.as_ref(), p);
        let pts = if bvh.is_polyline_clear(&pts) {
            pts
        } else {
            self.repair(&pts, boxes, bvh, report)
        };

        if bvh.is_polyline_clear(&pts) {
            Some(pts)
        } else {
            trace!("Candidate path still collides after repair");
            None
        }
    }

    /// Replan colliding segments locally on a fine grid, up to the per-call cap.
    fn repair(
        &self,
        pts: &[Vector3<f64>],
        boxes: &[SafetyBox],
        bvh: &Bvh,
        report: &mut PlanReport,
    ) -> Vec<Vector3<f64>> {
        let p = &self.params;
        let mut out = vec![pts[0]];
        let mut attempts = 0;

        for w in pts.windows(2) {
            if attempts < p.repair_max_segments && bvh.segment_hits_any(&w[0], &w[1]) {
                attempts += 1;

                let (min_m, max_m) = bounds_of(w, p.repair_padding_m);
                let grid = VoxelGrid::new(min_m, max_m, p.repair_voxel_m, p.grid_max_cells, boxes);
                let search = grid.astar(
                    &w[0],
                    &w[1],
                    grid.voxel_m() * p.accept_voxel_factor_target,
                    p.grid_max_expansions,
                );
                report.grid_expansions += search.expansions;

                if let Some(local) = search.points_m {
                    trace!("Repaired segment with {} points", local.len());
                    out.extend_from_slice(&local[1..]);
                    report.repaired_segments += 1;
                    continue;
                }
            }
            out.push(w[1]);
        }

        out
    }

    // ---- GRID PLANNING ----

    /// Grid planning, in two legs through an approach point if a docking target is present.
    fn plan_grid(
        &self,
        start_m: &Vector3<f64>,
        goal_m: &Vector3<f64>,
        boxes: &[SafetyBox],
        report: &mut PlanReport,
    ) -> Option<(Vec<Vector3<f64>>, PlanStrategy)> {
        let target = match boxes.iter().find(|b| b.is_target) {
            Some(t) => t,
            None => return self.grid_leg(start_m, goal_m, boxes, false, report),
        };

        let approach = self.approach_point(target, start_m, goal_m, boxes);
        trace!("Two leg grid plan through approach point {:?}", approach.as_slice());

        let (mut first, s1) = self.grid_leg(start_m, &approach, boxes, false, report)?;
        let (second, s2) = self.grid_leg(&approach, goal_m, boxes, true, report)?;

        first.extend_from_slice(&second[1..]);
        Some((first, s1.max(s2)))
    }

    /// A point offset from the target along the line from the target to the goal, just outside
    /// its safety box.
    fn approach_point(
        &self,
        target: &SafetyBox,
        start_m: &Vector3<f64>,
        goal_m: &Vector3<f64>,
        boxes: &[SafetyBox],
    ) -> Vector3<f64> {
        let centre = target.centre_m();
        let dir = try_unit(&(goal_m - centre))
            .or_else(|| try_unit(&(start_m - centre)))
            .unwrap_or_else(Vector3::x);

        let approach = centre + dir * (target.bounding_radius_m() + self.params.approach_offset_m);

        correct_goal(
            &approach,
            boxes,
            self.params.goal_correction_margin_m,
            self.params.goal_correction_passes,
        )
        .0
    }

    /// Plan one leg on a grid, trying detours and then a wider regrid if the direct search fails.
    fn grid_leg(
        &self,
        a: &Vector3<f64>,
        b: &Vector3<f64>,
        boxes: &[SafetyBox],
        precise: bool,
        report: &mut PlanReport,
    ) -> Option<(Vec<Vector3<f64>>, PlanStrategy)> {
        let p = &self.params;

        if let Some(pts) = self.grid_search(a, b, p.grid_padding_m, boxes, precise, report) {
            return Some((pts, PlanStrategy::Grid));
        }

        // Detours through lateral and vertical offsets from the leg midpoint
        let dir = try_unit(&(b - a)).unwrap_or_else(Vector3::x);
        let lateral = any_perpendicular(&dir);
        let vertical = dir.cross(&lateral);
        let mid = (a + b) * 0.5;

        for scale in &p.detour_scales {
            for offset in &[lateral, -lateral, vertical, -vertical] {
                let via = mid + offset * (scale * p.detour_step_m);
                if boxes.iter().any(|sb| sb.contains(&via)) {
                    continue;
                }

                let first = self.grid_search(a, &via, p.grid_padding_m, boxes, false, report);
                let second = match first {
                    Some(_) => self.grid_search(&via, b, p.grid_padding_m, boxes, precise, report),
                    None => None,
                };

                if let (Some(mut first), Some(second)) = (first, second) {
                    debug!("Grid leg found via detour at scale {}", scale);
                    first.extend_from_slice(&second[1..]);
                    return Some((first, PlanStrategy::GridDetour));
                }
            }
        }

        // Last resort, a much larger grid
        let padding_m = p.grid_padding_m * p.regrid_factor + 0.5 * (b - a).norm();
        self.grid_search(a, b, padding_m, boxes, precise, report)
            .map(|pts| (pts, PlanStrategy::Regrid))
    }

    /// One grid A* search with the approach to the goal refined if the grid is coarse.
    fn grid_search(
        &self,
        a: &Vector3<f64>,
        b: &Vector3<f64>,
        padding_m: f64,
        boxes: &[SafetyBox],
        precise: bool,
        report: &mut PlanReport,
    ) -> Option<Vec<Vector3<f64>>> {
        let p = &self.params;

        let (min_m, max_m) = bounds_of(&[*a, *b], padding_m);
        let grid = VoxelGrid::new(min_m, max_m, p.grid_voxel_m, p.grid_max_cells, boxes);
        report.grid_voxel_m = Some(grid.voxel_m());

        let factor = if precise {
            p.accept_voxel_factor_target
        } else {
            p.accept_voxel_factor
        };

        let search = grid.astar(a, b, grid.voxel_m() * factor, p.grid_max_expansions);
        report.grid_expansions += search.expansions;
        let mut pts = search.points_m?;

        if grid.voxel_m() > p.coarse_voxel_m {
            if let Some(refined) = self.refine_tail(&pts, boxes, precise, report) {
                pts = refined;
                report.refined = true;
            }
        }

        Some(pts)
    }

    /// Replan the part of a coarse path near its goal on a fine grid centred on the goal.
    fn refine_tail(
        &self,
        pts: &[Vector3<f64>],
        boxes: &[SafetyBox],
        precise: bool,
        report: &mut PlanReport,
    ) -> Option<Vec<Vector3<f64>>> {
        let p = &self.params;
        let goal = pts[pts.len() - 1];

        // First point inside the refinement region, never the goal itself
        let entry = pts[..pts.len() - 1]
            .iter()
            .position(|q| (q - goal).norm() <= p.refine_radius_m)?;

        let min_m = goal - Vector3::repeat(p.refine_radius_m);
        let max_m = goal + Vector3::repeat(p.refine_radius_m);
        let grid = VoxelGrid::new(min_m, max_m, p.refine_voxel_m, p.grid_max_cells, boxes);

        let factor = if precise {
            p.accept_voxel_factor_target
        } else {
            p.accept_voxel_factor
        };
        let search = grid.astar(&pts[entry], &goal, grid.voxel_m() * factor, p.grid_max_expansions);
        report.grid_expansions += search.expansions;

        let tail = search.points_m?;
        let mut stitched = pts[..entry].to_vec();
        stitched.extend_from_slice(&tail);
        Some(stitched)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Axis aligned bounds of the points, grown by `padding_m`.
fn bounds_of(points_m: &[Vector3<f64>], padding_m: f64) -> (Vector3<f64>, Vector3<f64>) {
    let mut min_m = Vector3::repeat(std::f64::INFINITY);
    let mut max_m = Vector3::repeat(std::f64::NEG_INFINITY);
    for q in points_m {
        min_m = min_m.inf(q);
        max_m = max_m.sup(q);
    }
    (
        min_m - Vector3::repeat(padding_m),
        max_m + Vector3::repeat(padding_m),
    )
}
