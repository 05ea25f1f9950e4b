//! Path follower parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the pure pursuit path follower
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {
    /// Arc length spacing between resampled path points
    pub sample_spacing_m: f64,

    /// Maximum number of resampled points, the spacing is widened for long paths
    pub max_samples: usize,

    /// Number of spline evaluations per waypoint span before resampling
    pub spline_subdivisions: usize,

    /// Lookahead distance at zero speed
    pub lookahead_min_m: f64,

    /// Upper limit on the lookahead distance, also the speed command ceiling
    pub lookahead_max_m: f64,

    /// Lookahead growth with speed
    pub lookahead_gain_s: f64,

    /// Deceleration the craft can always achieve on its weakest axis
    pub max_braking_accel_ms2: f64,

    /// Distance short of the path end at which the path counts as complete
    pub end_clearance_m: f64,

    /// Number of samples either side of the last index searched when projecting onto the path
    pub search_window: usize,

    /// If the best local projection is further than this from the craft a full search is run
    pub reacquire_distance_m: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            sample_spacing_m: 0.25,
            max_samples: 4000,
            spline_subdivisions: 12,
            lookahead_min_m: 1.5,
            lookahead_max_m: 8.0,
            lookahead_gain_s: 1.0,
            max_braking_accel_ms2: 0.4,
            end_clearance_m: 0.1,
            search_window: 24,
            reacquire_distance_m: 3.0,
        }
    }
}
