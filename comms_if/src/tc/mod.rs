//! # Telecommand module
//!
//! Telecommands are instructions sent to the GNC stack by an operator, a script or a higher level
//! mission manager. They are serialised as internally tagged JSON, for example
//!
//! ```json
//! {"type": "StartDocking", "target": "station", "our_port": "fwd", "target_port": "aft"}
//! ```

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod autopilot;
pub mod docking;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Internal
use autopilot::{AutopilotMode, PidLoop};
use docking::{CraftId, PortId};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A telecommand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Tc {
    /// Begin a docking session between one of our ports and a port on the target craft.
    StartDocking {
        target: CraftId,
        our_port: PortId,
        target_port: PortId,
    },

    /// Abandon the current docking session, returning to idle.
    CancelDocking,

    /// Release a docked connection.
    Undock,

    /// Engage or disengage an autopilot mode.
    SetMode { mode: AutopilotMode, enabled: bool },

    /// Set the world-frame position target used by position seeking modes.
    SetTargetPosition { position_m: [f64; 3] },

    /// Set the world-frame attitude target, as a `[w, x, y, z]` quaternion which need not be
    /// normalised.
    SetTargetOrientation { quat_wxyz: [f64; 4] },

    /// Set (or clear with `null`) the body whose motion the autopilot matches.
    SetReferenceObject { craft: Option<CraftId> },

    /// Directly command the thrusters, one throttle in `[0, 1]` per thruster.
    SetThrust { throttles: Vec<f64> },

    /// Live-tune one of the autopilot's control loops.
    SetPidGains {
        pid: PidLoop,
        k_p: f64,
        k_i: f64,
        k_d: f64,
    },

    /// Reset a control loop and assign its preset gains.
    CalibratePid { pid: PidLoop },
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum TcParseError {
    #[error("TC contains invalid JSON or an unknown TC type: {0}")]
    InvalidJson(serde_json::Error),

    #[error("TC has an invalid payload: {0}")]
    InvalidPayload(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Tc {
    /// Parse a new TC from a JSON packet
    pub fn from_json(json_str: &str) -> Result<Self, TcParseError> {
        let tc: Tc = serde_json::from_str(json_str).map_err(TcParseError::InvalidJson)?;

        tc.validate()?;

        Ok(tc)
    }

    /// Serialise the TC into a JSON packet
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Checks on the payload which serde cannot express.
    fn validate(&self) -> Result<(), TcParseError> {
        match self {
            Tc::SetTargetOrientation { quat_wxyz } => {
                let norm_sq: f64 = quat_wxyz.iter().map(|c| c * c).sum();
                if !norm_sq.is_finite() || norm_sq < 1e-12 {
                    return Err(TcParseError::InvalidPayload(
                        "orientation quaternion has zero length".into(),
                    ));
                }
            }
            Tc::SetTargetPosition { position_m } => {
                if position_m.iter().any(|c| !c.is_finite()) {
                    return Err(TcParseError::InvalidPayload(
                        "target position is not finite".into(),
                    ));
                }
            }
            Tc::SetThrust { throttles } => {
                if throttles.iter().any(|t| !(0.0..=1.0).contains(t)) {
                    return Err(TcParseError::InvalidPayload(
                        "throttles must be in [0, 1]".into(),
                    ));
                }
            }
            _ => (),
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_tcs() {
        let tc = Tc::from_json(
            r#"{"type": "StartDocking", "target": "station", "our_port": "fwd", "target_port": "aft"}"#,
        )
        .unwrap();
        assert_eq!(
            tc,
            Tc::StartDocking {
                target: CraftId::from("station"),
                our_port: PortId::from("fwd"),
                target_port: PortId::from("aft"),
            }
        );

        let tc = Tc::from_json(r#"{"type": "SetMode", "mode": "GoToPosition", "enabled": true}"#)
            .unwrap();
        assert_eq!(
            tc,
            Tc::SetMode {
                mode: AutopilotMode::GoToPosition,
                enabled: true
            }
        );

        assert_eq!(Tc::from_json(r#"{"type": "Undock"}"#).unwrap(), Tc::Undock);
    }

    #[test]
    fn test_reject_bad_tcs() {
        assert!(matches!(
            Tc::from_json(r#"{"type": "MakeCoffee"}"#),
            Err(TcParseError::InvalidJson(_))
        ));
        assert!(matches!(
            Tc::from_json(r#"{"type": "SetTargetOrientation", "quat_wxyz": [0, 0, 0, 0]}"#),
            Err(TcParseError::InvalidPayload(_))
        ));
        assert!(matches!(
            Tc::from_json(r#"{"type": "SetThrust", "throttles": [0.5, 1.5]}"#),
            Err(TcParseError::InvalidPayload(_))
        ));
    }
}
