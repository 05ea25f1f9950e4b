//! Docking controller parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the docking controller
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {
    /// The standoff point sits this many combined port depths out from the target port face.
    pub standoff_factor: f64,

    /// Distance from the standoff point within which approach may end.
    ///
    /// Units: meters
    pub approach_position_tol_m: f64,

    /// Port axis misalignment within which approach may end.
    ///
    /// Units: radians
    pub approach_angle_tol_rad: f64,

    /// Relative speed below which the craft is considered stable.
    ///
    /// Units: meters/second
    pub approach_speed_tol_ms: f64,

    /// Relative rotation rate below which the craft is considered stable.
    ///
    /// Units: radians/second
    pub approach_rate_tol_rads: f64,

    /// Total attitude error within which alignment is complete.
    ///
    /// Units: radians
    pub align_angle_tol_rad: f64,

    /// Relative rotation rate below which alignment is complete.
    ///
    /// Units: radians/second
    pub align_rate_tol_rads: f64,

    /// Attitude error above which the dock phase falls back to align.
    ///
    /// Units: radians
    pub dock_abort_angle_rad: f64,

    /// The dock phase speed limit is the face separation times this gain, bounded by the min
    /// and max speeds below.
    ///
    /// Units: 1/second
    pub dock_speed_gain_hz: f64,

    /// Units: meters/second
    pub dock_min_speed_ms: f64,

    /// Units: meters/second
    pub dock_max_speed_ms: f64,

    /// Time in the dock phase after which a failing gate is reported.
    ///
    /// Units: seconds
    pub dock_warn_after_s: f64,

    /// Minimum wall clock interval between two visualisation refreshes.
    ///
    /// Units: seconds
    pub viz_interval_s: f64,

    /// Physical docking gate thresholds
    pub gate: GateParams,
}

/// Thresholds of the physical docking gate
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GateParams {
    /// Units: radians
    pub max_misalignment_rad: f64,

    /// Maximum face separation as a fraction of the longer port's length
    pub separation_factor: f64,

    /// Maximum lateral offset as a fraction of the smaller port's radius
    pub lateral_factor: f64,

    /// Units: meters/second
    pub max_closing_speed_ms: f64,

    /// Maximum sum of both craft's rotation rates.
    ///
    /// Units: radians/second
    pub max_angular_speed_rads: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            standoff_factor: 3.0,
            approach_position_tol_m: 0.5,
            approach_angle_tol_rad: 0.15,
            approach_speed_tol_ms: 0.1,
            approach_rate_tol_rads: 0.05,
            align_angle_tol_rad: 0.03,
            align_rate_tol_rads: 0.01,
            dock_abort_angle_rad: 0.3,
            dock_speed_gain_hz: 0.1,
            dock_min_speed_ms: 0.03,
            dock_max_speed_ms: 0.5,
            dock_warn_after_s: 120.0,
            viz_interval_s: 0.5,
            gate: GateParams::default(),
        }
    }
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            max_misalignment_rad: 0.1,
            separation_factor: 0.6,
            lateral_factor: 0.5,
            max_closing_speed_ms: 0.05,
            max_angular_speed_rads: 0.05,
        }
    }
}
