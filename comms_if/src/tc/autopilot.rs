//! Autopilot telecommand definitions

use serde::{Deserialize, Serialize};

/// The closed set of autopilot modes. Each mode can be toggled independently, subject to the
/// exclusivity rules applied by the autopilot itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AutopilotMode {
    /// Null the angular velocity (relative to the reference object if one is set).
    CancelRotation,

    /// Null the linear velocity (relative to the reference object if one is set).
    CancelLinearMotion,

    /// Hold the target orientation.
    OrientationMatch,

    /// Null the rotation first, then hold the target orientation.
    CancelAndAlign,

    /// Aim the craft's pointing axis at the target position.
    PointToPosition,

    /// Fly a planned path to the target position.
    GoToPosition,
}

/// Identifies one of the autopilot's PID loops for tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PidLoop {
    /// Angular rate loop used by `CancelRotation`.
    AngularMomentum,

    /// Linear velocity loop used by `CancelLinearMotion`.
    LinearMomentum,

    /// Attitude loop used by the orientation modes.
    Orientation,

    /// Velocity tracking loop used by `GoToPosition`.
    Velocity,
}

impl AutopilotMode {
    /// All modes in evaluation order.
    pub const ALL: [AutopilotMode; 6] = [
        AutopilotMode::CancelRotation,
        AutopilotMode::CancelLinearMotion,
        AutopilotMode::OrientationMatch,
        AutopilotMode::CancelAndAlign,
        AutopilotMode::PointToPosition,
        AutopilotMode::GoToPosition,
    ];

    /// True if the mode produces an attitude command.
    pub fn is_attitude(&self) -> bool {
        matches!(
            self,
            AutopilotMode::OrientationMatch
                | AutopilotMode::CancelAndAlign
                | AutopilotMode::PointToPosition
        )
    }

    /// True if the mode produces a translational command.
    pub fn is_translational(&self) -> bool {
        matches!(
            self,
            AutopilotMode::CancelLinearMotion | AutopilotMode::GoToPosition
        )
    }
}
