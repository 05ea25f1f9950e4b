//! Trajectory planner parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the trajectory planner
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {
    // ---- SAFETY BOXES ----
    /// Clearance used when the caller asks for less
    pub min_clearance_m: f64,

    /// Clearance around the active docking target
    pub target_clearance_m: f64,

    /// Growth applied to boxes in the slab test so tangential hits are not missed
    pub epsilon_m: f64,

    /// Number of passes pushing the goal out of boxes
    pub goal_correction_passes: usize,

    /// Distance beyond the box face the goal is pushed to
    pub goal_correction_margin_m: f64,

    // ---- SKIRT ----
    /// Extra distance beyond the obstacle's bounding radius for the skirt waypoint
    pub skirt_margin_m: f64,

    // ---- ROADMAP ----
    pub prm_max_nodes: usize,
    pub prm_k_neighbours: usize,

    /// Number of ring anchors around each box
    pub prm_ring_points: usize,

    /// Boxes further than this (plus their radius) from the straight line get no anchors
    pub prm_near_distance_m: f64,

    /// Distance anchors sit outside the boxes
    pub prm_margin_m: f64,

    // ---- GRID ----
    /// Preferred voxel size
    pub grid_voxel_m: f64,

    /// Cell budget, the voxel size grows to respect it
    pub grid_max_cells: usize,

    /// Space added around a leg's endpoints to form the grid bounds
    pub grid_padding_m: f64,

    pub grid_max_expansions: usize,

    /// Goal acceptance radius as a multiple of the voxel size
    pub accept_voxel_factor: f64,

    /// Goal acceptance radius as a multiple of the voxel size for target approach legs
    pub accept_voxel_factor_target: f64,

    /// Distance of the approach point beyond the target's safety box
    pub approach_offset_m: f64,

    /// Offset scales (multiples of `detour_step_m`) tried for detour waypoints
    pub detour_scales: Vec<f64>,
    pub detour_step_m: f64,

    /// Growth of the grid padding for the last resort regrid
    pub regrid_factor: f64,

    /// Grids with voxels larger than this get a refined approach to the goal
    pub coarse_voxel_m: f64,

    /// Half size of the refinement grid around the goal
    pub refine_radius_m: f64,
    pub refine_voxel_m: f64,

    // ---- POST PROCESSING ----
    pub shortcut_max_iters: usize,

    /// Number of trim distances tried on each side of a corner
    pub corner_trim_steps: usize,

    pub spline_refit: bool,
    pub spline_subdivisions: usize,
    pub spline_spacing_m: f64,
    pub spline_max_points: usize,

    /// Maximum length ratio of a refitted spline to the path it replaces
    pub spline_max_growth: f64,

    // ---- REPAIR ----
    /// Maximum number of segments repaired per planning call
    pub repair_max_segments: usize,
    pub repair_voxel_m: f64,
    pub repair_padding_m: f64,

    /// Save a report of each plan into the session
    pub save_reports: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            min_clearance_m: 0.5,
            target_clearance_m: 3.0,
            epsilon_m: 1e-6,
            goal_correction_passes: 3,
            goal_correction_margin_m: 0.1,
            skirt_margin_m: 1.0,
            prm_max_nodes: 200,
            prm_k_neighbours: 8,
            prm_ring_points: 8,
            prm_near_distance_m: 20.0,
            prm_margin_m: 0.5,
            grid_voxel_m: 0.5,
            grid_max_cells: 200_000,
            grid_padding_m: 8.0,
            grid_max_expansions: 150_000,
            accept_voxel_factor: 1.5,
            accept_voxel_factor_target: 0.75,
            approach_offset_m: 2.0,
            detour_scales: vec![1.0, 2.0, 4.0],
            detour_step_m: 4.0,
            regrid_factor: 4.0,
            coarse_voxel_m: 1.0,
            refine_radius_m: 6.0,
            refine_voxel_m: 0.25,
            shortcut_max_iters: 8,
            corner_trim_steps: 5,
            spline_refit: true,
            spline_subdivisions: 8,
            spline_spacing_m: 1.0,
            spline_max_points: 400,
            spline_max_growth: 1.35,
            repair_max_segments: 3,
            repair_voxel_m: 0.25,
            repair_padding_m: 3.0,
            save_reports: true,
        }
    }
}
