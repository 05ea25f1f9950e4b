//! # Telemetry module
//!
//! Read-only snapshots of the GNC stack's state, produced by pure getters in the library and
//! consumed by operator displays, logs and archives.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::tc::{
    autopilot::AutopilotMode,
    docking::{CraftId, PortId},
};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Phases of a docking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DockingPhase {
    /// No docking session exists.
    Idle,

    /// Flying to the standoff point in front of the target port.
    Approach,

    /// Holding the standoff point while refining attitude.
    Align,

    /// Closing on the target port.
    Dock,

    /// Physically mated with the target.
    Docked,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The result of one evaluation of the physical docking gate, including each measured quantity
/// so an operator can see which condition is holding up completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    /// Both ports are unoccupied.
    pub ports_free: bool,

    /// Angle between our port axis and the reversed target port axis.
    pub misalignment_rad: f64,

    /// Face-to-face separation measured along the docking axis.
    pub separation_m: f64,

    /// Component of the face separation perpendicular to the docking axis.
    pub lateral_offset_m: f64,

    /// Closing speed along the docking axis, positive when approaching.
    pub closing_speed_ms: f64,

    /// Sum of both craft's angular speeds.
    pub angular_speed_rads: f64,

    /// True when all conditions are met.
    pub pass: bool,
}

/// Docking controller telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockingTm {
    pub phase: DockingPhase,

    pub target: Option<CraftId>,
    pub our_port: Option<PortId>,
    pub target_port: Option<PortId>,

    /// Distance between the two port faces
    pub range_m: f64,
    pub closing_speed_ms: f64,

    /// Port axis alignment error
    pub alignment_error_rad: f64,
    pub roll_error_rad: f64,
    pub pitch_error_rad: f64,
    pub yaw_error_rad: f64,

    pub lateral_offset_m: f64,

    /// Index of the waypoint currently being tracked in the cached trajectory
    pub waypoint_index: usize,
    pub num_waypoints: usize,

    /// Distance at which the current phase target counts as reached
    pub waypoint_threshold_m: f64,

    /// Last gate evaluation, if any was made this session
    pub gate: Option<GateReport>,

    /// The craft we are docked to, if any
    pub docked_to: Option<CraftId>,
}

/// Autopilot telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutopilotTm {
    pub active_modes: Vec<AutopilotMode>,

    /// Summed body-frame force demand
    pub force_n: [f64; 3],

    /// Summed body-frame torque demand
    pub torque_nm: [f64; 3],

    /// Allocated thruster throttles
    pub throttles: Vec<f64>,

    /// True if the allocation had to be scaled down to respect thruster limits
    pub saturated: bool,

    /// Norm of the wrench the thrusters could not produce
    pub residual_norm: f64,

    /// True while the go-to-position path follower reports completion
    pub path_done: bool,
}

/// Full GNC telemetry for one craft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GncTm {
    pub sim_time_s: f64,
    pub position_m: [f64; 3],
    pub orientation_wxyz: [f64; 4],
    pub lin_vel_ms: [f64; 3],
    pub ang_vel_rads: [f64; 3],
    pub autopilot: AutopilotTm,
    pub docking: DockingTm,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for DockingTm {
    fn default() -> Self {
        Self {
            phase: DockingPhase::Idle,
            target: None,
            our_port: None,
            target_port: None,
            range_m: 0.0,
            closing_speed_ms: 0.0,
            alignment_error_rad: 0.0,
            roll_error_rad: 0.0,
            pitch_error_rad: 0.0,
            yaw_error_rad: 0.0,
            lateral_offset_m: 0.0,
            waypoint_index: 0,
            num_waypoints: 0,
            waypoint_threshold_m: 0.0,
            gate: None,
            docked_to: None,
        }
    }
}

impl std::fmt::Display for DockingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DockingPhase::Idle => "idle",
            DockingPhase::Approach => "approach",
            DockingPhase::Align => "align",
            DockingPhase::Dock => "dock",
            DockingPhase::Docked => "docked",
        };
        write!(f, "{}", s)
    }
}
