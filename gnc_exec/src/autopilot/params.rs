//! Autopilot parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the autopilot modes
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {
    /// Maximum linear acceleration any translational mode may command.
    ///
    /// Units: meters/second^2
    pub max_accel_ms2: f64,

    /// Maximum speed commanded when following a path.
    ///
    /// Units: meters/second
    pub max_speed_ms: f64,

    /// Maximum angular acceleration any attitude mode may command.
    ///
    /// Units: radians/second^2
    pub max_ang_accel_rads2: f64,

    /// Maximum body rate the orientation loop may request.
    ///
    /// Units: radians/second
    pub max_ang_rate_rads: f64,

    /// How far ahead the position is extrapolated under the last commanded acceleration before
    /// being handed to the path follower.
    ///
    /// Units: seconds
    pub preview_horizon_s: f64,

    /// Minimum interval between two path replans.
    ///
    /// Units: seconds
    pub replan_interval_s: f64,

    /// Distance from the current path above which a replan is requested.
    ///
    /// Units: meters
    pub replan_deviation_m: f64,

    /// Distance the target may move before the path is considered stale.
    ///
    /// Units: meters
    pub replan_goal_tolerance_m: f64,

    /// Distance any obstacle may move before the path is considered stale.
    ///
    /// Units: meters
    pub obstacle_change_tolerance_m: f64,

    /// Margin added to the craft's own bounding radius to get the planning clearance.
    ///
    /// Units: meters
    pub avoidance_margin_m: f64,

    /// Once the follower reports done the target is captured with the position loop, whose
    /// output is limited to this speed.
    ///
    /// Units: meters/second
    pub terminal_speed_ms: f64,

    /// Body rate below which `CancelAndAlign` moves from cancelling to aligning.
    ///
    /// Units: radians/second
    pub align_rate_threshold_rads: f64,

    /// Body axis `PointToPosition` aims at its target.
    pub pointing_axis_b: [f64; 3],

    /// Thruster layout and allocation settings
    pub alloc: AllocParams,
}

/// Thruster allocation parameters
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AllocParams {
    /// Singular value tolerance of the pseudo-inverse
    pub pinv_epsilon: f64,

    /// Throttles more negative than this are removed from the active set and the system solved
    /// again.
    pub negative_tolerance: f64,

    pub thrusters: Vec<ThrusterConfig>,
}

/// A single thruster
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ThrusterConfig {
    /// Mounting point relative to the centre of mass in the body frame.
    ///
    /// Units: meters
    pub position_m_b: [f64; 3],

    /// Direction of the force the thruster applies to the body, need not be normalised.
    pub direction_b: [f64; 3],

    /// Thrust at full throttle.
    ///
    /// Units: newtons
    pub max_thrust_n: f64,

    /// Thrusters sharing a group are always commanded the same throttle.
    #[serde(default)]
    pub group: Option<String>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            max_accel_ms2: 0.5,
            max_speed_ms: 1.5,
            max_ang_accel_rads2: 0.5,
            max_ang_rate_rads: 0.3,
            preview_horizon_s: 0.3,
            replan_interval_s: 0.5,
            replan_deviation_m: 1.0,
            replan_goal_tolerance_m: 0.5,
            obstacle_change_tolerance_m: 0.5,
            avoidance_margin_m: 0.5,
            terminal_speed_ms: 0.2,
            align_rate_threshold_rads: 0.05,
            pointing_axis_b: [1.0, 0.0, 0.0],
            alloc: AllocParams::default(),
        }
    }
}

impl Default for AllocParams {
    fn default() -> Self {
        Self {
            pinv_epsilon: 1e-9,
            negative_tolerance: 1e-9,
            thrusters: default_thrusters(1.0, 200.0),
        }
    }
}

/// Twelve thruster layout giving full six degree of freedom authority with non-negative thrust.
///
/// Each body axis has two thrusters per direction, mounted either side of the centre of mass on
/// the next axis, so differential firing gives torque about the third axis.
pub fn default_thrusters(lever_m: f64, max_thrust_n: f64) -> Vec<ThrusterConfig> {
    let mut thrusters = Vec::with_capacity(12);

    for axis in 0..3 {
        let offset_axis = (axis + 1) % 3;

        for dir_sign in &[1.0, -1.0] {
            for pos_sign in &[1.0, -1.0] {
                let mut position_m_b = [0.0; 3];
                position_m_b[offset_axis] = pos_sign * lever_m;
                let mut direction_b = [0.0; 3];
                direction_b[axis] = *dir_sign;

                thrusters.push(ThrusterConfig {
                    position_m_b,
                    direction_b,
                    max_thrust_n,
                    group: None,
                });
            }
        }
    }

    thrusters
}
