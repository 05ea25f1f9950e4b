//! # PID controller module
//!
//! Vector valued PID loops with integral anti-windup and a first order filter on the derivative
//! term. Every autopilot mode owns its own controllers; accumulators are never shared.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::trace;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

// Internal
pub use params::{Params, PidGains};
use util::maths::clamp_norm;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The control domains with distinct preset gains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PidPreset {
    Position,
    LinearMomentum,
    AngularMomentum,
    Velocity,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A vector PID controller.
///
/// The controller keeps per-instance accumulators and is not meant to be shared between loops or
/// threads.
#[derive(Debug, Clone, Serialize)]
pub struct PidController {
    gains: PidGains,

    /// The integral accumulation, clamped to `gains.integral_limit`
    integral: Vector3<f64>,

    /// Error passed into the previous update
    last_error: Vector3<f64>,

    /// Low pass filtered derivative of the error
    filtered_deriv: Vector3<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    /// Get the gains for the given preset.
    pub fn preset(&self, preset: PidPreset) -> PidGains {
        match preset {
            PidPreset::Position => self.position,
            PidPreset::LinearMomentum => self.linear_momentum,
            PidPreset::AngularMomentum => self.angular_momentum,
            PidPreset::Velocity => self.velocity,
        }
    }
}

impl PidController {
    /// Create a new controller with the given gains and empty accumulators.
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: Vector3::zeros(),
            last_error: Vector3::zeros(),
            filtered_deriv: Vector3::zeros(),
        }
    }

    /// Create a new controller using one of the presets.
    pub fn from_preset(preset: PidPreset, params: &Params) -> Self {
        Self::new(params.preset(preset))
    }

    /// Get the output of the controller for the given error.
    ///
    /// `dt_s` must be positive. A non-positive step gives the proportional term only and leaves
    /// the accumulators untouched.
    pub fn update(&mut self, error: &Vector3<f64>, dt_s: f64) -> Vector3<f64> {
        let p_term = error * self.gains.k_p;

        if !(dt_s > 0.0) {
            trace!("PID update with non-positive dt ({}), P term only", dt_s);
            return p_term;
        }

        // Integrate with anti-windup, rescaling rather than clipping each axis so the direction
        // of the accumulated error is kept
        self.integral = clamp_norm(&(self.integral + error * dt_s), self.gains.integral_limit);

        // Filtered derivative
        let raw_deriv = (error - self.last_error) / dt_s;
        let alpha = self.gains.deriv_filter_alpha;
        self.filtered_deriv = self.filtered_deriv * alpha + raw_deriv * (1.0 - alpha);

        self.last_error = *error;

        p_term + self.integral * self.gains.k_i + self.filtered_deriv * self.gains.k_d
    }

    /// Clear all accumulators.
    pub fn reset(&mut self) {
        self.integral = Vector3::zeros();
        self.last_error = Vector3::zeros();
        self.filtered_deriv = Vector3::zeros();
    }

    /// Change the loop gains, keeping accumulators so live tuning doesn't bump the output.
    pub fn set_gains(&mut self, k_p: f64, k_i: f64, k_d: f64) {
        self.gains.k_p = k_p;
        self.gains.k_i = k_i;
        self.gains.k_d = k_d;
    }

    /// Reset the accumulators and assign the preset gains for the given domain.
    ///
    /// This is a preset selection, no identification of the plant is performed.
    pub fn auto_calibrate(&mut self, preset: PidPreset, params: &Params) {
        self.reset();
        self.gains = params.preset(preset);
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    pub fn integral(&self) -> &Vector3<f64> {
        &self.integral
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn gains(k_p: f64, k_i: f64, k_d: f64) -> PidGains {
        PidGains {
            k_p,
            k_i,
            k_d,
            integral_limit: 1.0,
            deriv_filter_alpha: 0.5,
        }
    }

    #[test]
    fn test_proportional_only() {
        let mut pid = PidController::new(gains(1.0, 0.0, 0.0));
        let out = pid.update(&Vector3::new(1.0, 0.0, 0.0), 0.1);
        assert_eq!(out, Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_integral_clamped_by_norm() {
        let mut pid = PidController::new(gains(0.0, 1.0, 0.0));
        let err = Vector3::new(3.0, 4.0, 0.0);
        let mut out = Vector3::zeros();
        for _ in 0..100 {
            out = pid.update(&err, 0.1);
        }

        // Magnitude limited, direction preserved
        assert!((pid.integral().norm() - 1.0).abs() < 1e-9);
        assert!((out - Vector3::new(0.6, 0.8, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn test_derivative_filtered() {
        let mut pid = PidController::new(gains(0.0, 0.0, 1.0));

        // Step from zero to one in 0.1 s, raw derivative 10, filtered by half
        let out = pid.update(&Vector3::new(1.0, 0.0, 0.0), 0.1);
        assert!((out.x - 5.0).abs() < 1e-12);

        // No further change, filtered derivative decays
        let out = pid.update(&Vector3::new(1.0, 0.0, 0.0), 0.1);
        assert!((out.x - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_non_positive_dt() {
        let mut pid = PidController::new(gains(2.0, 1.0, 1.0));
        let out = pid.update(&Vector3::new(1.0, 1.0, 1.0), 0.0);
        assert_eq!(out, Vector3::new(2.0, 2.0, 2.0));
        assert_eq!(*pid.integral(), Vector3::zeros());
    }

    #[test]
    fn test_auto_calibrate() {
        let params = Params::default();
        let mut pid = PidController::new(gains(9.0, 9.0, 9.0));
        pid.update(&Vector3::new(1.0, 2.0, 3.0), 0.1);

        pid.auto_calibrate(PidPreset::AngularMomentum, &params);
        assert_eq!(*pid.gains(), params.angular_momentum);
        assert_eq!(*pid.integral(), Vector3::zeros());

        // Presets are distinct
        assert_ne!(params.position, params.linear_momentum);
        assert_ne!(params.linear_momentum, params.angular_momentum);
    }

    proptest! {
        #[test]
        fn test_zero_error_after_reset_gives_zero(
            k in prop::array::uniform3(0.0..10.0f64),
            history in prop::collection::vec(prop::array::uniform3(-10.0..10.0f64), 0..20),
            dt in 0.001..1.0f64,
            n in 1usize..20,
        ) {
            let mut pid = PidController::new(gains(k[0], k[1], k[2]));
            for e in history {
                pid.update(&Vector3::from(e), dt);
            }
            pid.reset();

            for _ in 0..n {
                prop_assert_eq!(pid.update(&Vector3::zeros(), dt), Vector3::zeros());
            }
        }
    }
}
