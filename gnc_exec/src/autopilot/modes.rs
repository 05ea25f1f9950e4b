//! Autopilot mode set and the attitude control loops shared by the attitude modes

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::info;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::Serialize;
use std::collections::BTreeSet;

// Internal
use super::Params;
use crate::pid::{self, PidController, PidPreset};
use crate::world::RigidBodyState;
use comms_if::tc::autopilot::AutopilotMode;
use util::maths::{any_perpendicular, attitude_error_body, clamp_norm, try_unit};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The set of engaged autopilot modes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModeSet {
    enabled: BTreeSet<AutopilotMode>,
}

/// Result of a mode toggle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModeChange {
    /// True if the requested state differed from the current one
    pub changed: bool,

    /// Modes switched off because they conflict with the newly engaged one
    pub disengaged: Vec<AutopilotMode>,
}

/// Cascaded attitude control, orientation error to a body rate demand, then rate error to a
/// torque.
#[derive(Debug, Clone)]
pub struct AttitudeLoop {
    pub(crate) orientation_pid: PidController,
    pub(crate) rate_pid: PidController,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ModeSet {
    pub fn is_enabled(&self, mode: AutopilotMode) -> bool {
        self.enabled.contains(&mode)
    }

    /// Engage or disengage a mode.
    ///
    /// Requesting the current state is a no-op. Engaging a mode disengages any mode it conflicts
    /// with.
    pub fn set(&mut self, mode: AutopilotMode, enabled: bool) -> ModeChange {
        if self.is_enabled(mode) == enabled {
            return ModeChange::default();
        }

        let mut change = ModeChange {
            changed: true,
            disengaged: Vec::new(),
        };

        if enabled {
            change.disengaged = self
                .enabled
                .iter()
                .copied()
                .filter(|m| conflicts(*m, mode))
                .collect();
            for m in &change.disengaged {
                self.enabled.remove(m);
                info!("Autopilot mode {:?} disengaged by {:?}", m, mode);
            }
            self.enabled.insert(mode);
            info!("Autopilot mode {:?} engaged", mode);
        } else {
            self.enabled.remove(&mode);
            info!("Autopilot mode {:?} disengaged", mode);
        }

        change
    }

    /// Disengage everything, returning the modes that were engaged.
    pub fn clear(&mut self) -> Vec<AutopilotMode> {
        let active = self.active();
        self.enabled.clear();
        active
    }

    /// Engaged modes in evaluation order.
    pub fn active(&self) -> Vec<AutopilotMode> {
        self.enabled.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}

impl AttitudeLoop {
    pub fn new(pid_params: &pid::Params) -> Self {
        Self {
            orientation_pid: PidController::from_preset(PidPreset::Position, pid_params),
            rate_pid: PidController::from_preset(PidPreset::AngularMomentum, pid_params),
        }
    }

    pub fn reset(&mut self) {
        self.orientation_pid.reset();
        self.rate_pid.reset();
    }

    /// Torque driving the body towards `target` while matching the reference rotation rate.
    pub fn track(
        &mut self,
        state: &RigidBodyState,
        target: &UnitQuaternion<f64>,
        ref_rate_rads_w: &Vector3<f64>,
        dt_s: f64,
        params: &Params,
    ) -> Vector3<f64> {
        let angle_error_b = attitude_error_body(&state.attitude, target);
        let rate_dem_b = clamp_norm(
            &self.orientation_pid.update(&angle_error_b, dt_s),
            params.max_ang_rate_rads,
        );
        let rate_error_b =
            rate_dem_b + state.attitude.inverse() * ref_rate_rads_w - state.ang_vel_rads_b();

        rate_torque(&mut self.rate_pid, &rate_error_b, state, dt_s, params)
    }

    /// Torque nulling the rotation relative to the reference rate, the orientation loop idles.
    pub fn damp(
        &mut self,
        state: &RigidBodyState,
        ref_rate_rads_w: &Vector3<f64>,
        dt_s: f64,
        params: &Params,
    ) -> Vector3<f64> {
        self.orientation_pid.reset();
        let rate_error_b = state.attitude.inverse() * (ref_rate_rads_w - state.ang_vel_rads);
        rate_torque(&mut self.rate_pid, &rate_error_b, state, dt_s, params)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// True if the two modes may not be engaged together.
///
/// The attitude modes all command the orientation and exclude each other, as do the two modes
/// commanding the linear velocity. `CancelRotation` runs with anything.
pub fn conflicts(a: AutopilotMode, b: AutopilotMode) -> bool {
    a != b && ((a.is_attitude() && b.is_attitude()) || (a.is_translational() && b.is_translational()))
}

/// Convert a rate error into a torque through the rate loop, scaling the commanded angular
/// acceleration by the body's inertia.
pub fn rate_torque(
    rate_pid: &mut PidController,
    rate_error_b: &Vector3<f64>,
    state: &RigidBodyState,
    dt_s: f64,
    params: &Params,
) -> Vector3<f64> {
    let alpha_b = clamp_norm(&rate_pid.update(rate_error_b, dt_s), params.max_ang_accel_rads2);
    state.inertia_kgm2.component_mul(&alpha_b)
}

/// The orientation which aims `axis_b` at `target_m`, reached from the current attitude by the
/// shortest rotation. `None` if the target coincides with the body or the axis is degenerate.
pub fn pointing_orientation(
    state: &RigidBodyState,
    target_m: &Vector3<f64>,
    axis_b: &Vector3<f64>,
) -> Option<UnitQuaternion<f64>> {
    let to_target = try_unit(&(target_m - state.position_m))?;
    let axis_w = state.attitude * try_unit(axis_b)?;

    let delta = UnitQuaternion::rotation_between(&axis_w, &to_target).unwrap_or_else(|| {
        UnitQuaternion::from_axis_angle(
            &Unit::new_normalize(any_perpendicular(&axis_w)),
            std::f64::consts::PI,
        )
    });

    Some(delta * state.attitude)
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::tc::autopilot::AutopilotMode::*;

    #[test]
    fn test_set_is_idempotent() {
        let mut modes = ModeSet::default();
        assert!(modes.set(CancelRotation, true).changed);
        assert_eq!(modes.set(CancelRotation, true), ModeChange::default());
        assert!(modes.is_enabled(CancelRotation));

        assert!(modes.set(CancelRotation, false).changed);
        assert!(!modes.set(CancelRotation, false).changed);
        assert!(modes.is_empty());
    }

    #[test]
    fn test_exclusivity() {
        let mut modes = ModeSet::default();
        modes.set(CancelRotation, true);
        modes.set(OrientationMatch, true);
        modes.set(CancelLinearMotion, true);

        let change = modes.set(PointToPosition, true);
        assert_eq!(change.disengaged, vec![OrientationMatch]);

        let change = modes.set(GoToPosition, true);
        assert_eq!(change.disengaged, vec![CancelLinearMotion]);

        assert_eq!(modes.active(), vec![CancelRotation, PointToPosition, GoToPosition]);
    }

    #[test]
    fn test_pointing_orientation() {
        let state = RigidBodyState::at_rest(
            Vector3::zeros(),
            UnitQuaternion::identity(),
            100.0,
            Vector3::repeat(10.0),
        );

        // Aim x at a point along +y: a quarter turn about z
        let q = pointing_orientation(&state, &Vector3::new(0.0, 5.0, 0.0), &Vector3::x()).unwrap();
        assert!(((q * Vector3::x()) - Vector3::y()).norm() < 1e-9);

        // Directly behind
        let q = pointing_orientation(&state, &Vector3::new(-5.0, 0.0, 0.0), &Vector3::x()).unwrap();
        assert!(((q * Vector3::x()) + Vector3::x()).norm() < 1e-9);

        assert!(pointing_orientation(&state, &Vector3::zeros(), &Vector3::x()).is_none());
    }

    #[test]
    fn test_damp_opposes_rotation() {
        let mut state = RigidBodyState::at_rest(
            Vector3::zeros(),
            UnitQuaternion::identity(),
            100.0,
            Vector3::new(10.0, 20.0, 30.0),
        );
        state.ang_vel_rads = Vector3::new(0.0, 0.0, 0.1);

        let mut att = AttitudeLoop::new(&pid::Params::default());
        let torque = att.damp(&state, &Vector3::zeros(), 0.1, &Params::default());
        assert!(torque.z < 0.0);
        assert!(torque.x.abs() < 1e-12 && torque.y.abs() < 1e-12);
    }
}
