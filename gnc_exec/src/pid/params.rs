//! PID controller parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Gains and limits for a single PID loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain
    pub k_p: f64,

    /// Integral gain
    pub k_i: f64,

    /// Derivative gain
    pub k_d: f64,

    /// Maximum magnitude of the integral accumulator (before `k_i` is applied)
    pub integral_limit: f64,

    /// Derivative filter coefficient in `[0, 1)`. Zero disables filtering.
    pub deriv_filter_alpha: f64,
}

/// Preset gains for each control domain, used by auto calibration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Position control, output is a velocity-like demand
    pub position: PidGains,

    /// Linear momentum control, output is an acceleration demand from a velocity error
    pub linear_momentum: PidGains,

    /// Angular momentum control, output is an angular acceleration demand from a rate or
    /// attitude error
    pub angular_momentum: PidGains,

    /// Velocity tracking control for path following
    pub velocity: PidGains,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            position: PidGains {
                k_p: 0.4,
                k_i: 0.0,
                k_d: 0.6,
                integral_limit: 5.0,
                deriv_filter_alpha: 0.6,
            },
            linear_momentum: PidGains {
                k_p: 1.2,
                k_i: 0.05,
                k_d: 0.0,
                integral_limit: 2.0,
                deriv_filter_alpha: 0.5,
            },
            angular_momentum: PidGains {
                k_p: 2.0,
                k_i: 0.02,
                k_d: 0.4,
                integral_limit: 1.0,
                deriv_filter_alpha: 0.7,
            },
            velocity: PidGains {
                k_p: 1.5,
                k_i: 0.02,
                k_d: 0.05,
                integral_limit: 1.0,
                deriv_filter_alpha: 0.8,
            },
        }
    }
}
