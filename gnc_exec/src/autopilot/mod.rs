//! # Autopilot module
//!
//! The autopilot turns high level intents into a body frame force and torque. It holds a set of
//! independently toggleable modes:
//!
//! - `CancelRotation` - null the angular velocity (relative to the reference object, if set)
//! - `CancelLinearMotion` - null the linear velocity (relative to the reference object, if set)
//! - `OrientationMatch` - hold the target orientation
//! - `CancelAndAlign` - null the rotation, then hold the target orientation
//! - `PointToPosition` - aim the pointing axis at the target position
//! - `GoToPosition` - plan a path to the target position and follow it
//!
//! Every engaged mode contributes a wrench each step and the contributions are summed. Modes
//! driving the same quantity exclude each other, see [`modes::conflicts`]. The summed wrench is
//! mapped onto the thrusters by [`ThrustAlloc`].

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod alloc;
pub mod goto;
pub mod modes;
mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use thiserror::Error;

// Internal
pub use alloc::{AllocError, AllocOutput, AllocReport, ThrustAlloc, Wrench};
use goto::{NavInput, Navigator};
pub use modes::{ModeChange, ModeSet};
use modes::{pointing_orientation, rate_torque, AttitudeLoop};
pub use params::{default_thrusters, AllocParams, Params, ThrusterConfig};

use crate::path::Path;
use crate::path_follow::{self, FollowOutput, PathFollower};
use crate::pid::{self, PidController, PidPreset};
use crate::traj_plan::{self, Obstacle, TrajPlanner};
use crate::world::{CraftId, RigidBodyState};
use comms_if::tc::autopilot::{AutopilotMode, PidLoop};
use util::maths::clamp_norm;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The autopilot.
#[derive(Debug, Clone)]
pub struct Autopilot {
    params: Params,
    pid_params: pid::Params,

    modes: ModeSet,

    target_position_m: Option<Vector3<f64>>,
    target_orientation: Option<UnitQuaternion<f64>>,
    reference_object: Option<CraftId>,

    /// Rate loop of `CancelRotation`
    rotation_pid: PidController,

    /// Velocity loop of `CancelLinearMotion`
    linear_pid: PidController,

    /// Shared by the mutually exclusive attitude modes
    attitude: AttitudeLoop,

    /// Used by `GoToPosition`
    nav: Navigator,

    last_output: AutopilotOutput,
}

/// Everything the autopilot reads in one step.
pub struct StepInput<'a> {
    /// Simulation time, used for rate limiting replans
    pub time_s: f64,
    pub dt_s: f64,

    pub state: &'a RigidBodyState,

    /// State of the reference object, if one is set and the world knows it
    pub reference: Option<&'a RigidBodyState>,

    /// Half extents of our own main body, which set the planning clearance
    pub own_half_extents_m: Vector3<f64>,

    pub obstacles: &'a [Obstacle],
}

/// Output of one autopilot step.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutopilotOutput {
    /// Sum of the contributions of all engaged modes
    pub wrench: Wrench,

    /// True if `GoToPosition` is engaged and has reached the end of its path
    pub path_done: bool,

    /// True if `GoToPosition` planned a new path this step
    pub replanned: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum AutopilotError {
    #[error("Target position {0:?} is not finite")]
    NonFiniteTarget([f64; 3]),

    #[error("Target orientation {0:?} can't be normalised")]
    InvalidOrientation([f64; 4]),

    #[error("Invalid autopilot parameters: {0}")]
    InvalidParams(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Autopilot {
    /// Create a new autopilot with no modes engaged.
    pub fn new(
        params: Params,
        pid_params: pid::Params,
        plan_params: traj_plan::Params,
        follow_params: path_follow::Params,
    ) -> Result<Self, AutopilotError> {
        if !(params.max_speed_ms > 0.0 && params.max_accel_ms2 > 0.0) {
            return Err(AutopilotError::InvalidParams(
                "max_speed_ms and max_accel_ms2 must be positive".into(),
            ));
        }
        if Vector3::from(params.pointing_axis_b).norm() == 0.0 {
            return Err(AutopilotError::InvalidParams(
                "pointing_axis_b must not be zero".into(),
            ));
        }
        if follow_params.max_braking_accel_ms2 > params.max_accel_ms2 {
            return Err(AutopilotError::InvalidParams(format!(
                "the follower's braking acceleration ({}) exceeds max_accel_ms2 ({})",
                follow_params.max_braking_accel_ms2, params.max_accel_ms2
            )));
        }

        Ok(Self {
            rotation_pid: PidController::from_preset(PidPreset::AngularMomentum, &pid_params),
            linear_pid: PidController::from_preset(PidPreset::LinearMomentum, &pid_params),
            attitude: AttitudeLoop::new(&pid_params),
            nav: Navigator::new(
                TrajPlanner::new(plan_params),
                PathFollower::new(follow_params),
                &pid_params,
            ),
            params,
            pid_params,
            modes: ModeSet::default(),
            target_position_m: None,
            target_orientation: None,
            reference_object: None,
            last_output: AutopilotOutput::default(),
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    // ---- COMMANDS ----

    /// Engage or disengage a mode, returning true if anything changed.
    ///
    /// Engaging resets the mode's loops so it starts clean. Requesting the current state does
    /// nothing at all.
    pub fn set_mode(&mut self, mode: AutopilotMode, enabled: bool) -> bool {
        let change = self.modes.set(mode, enabled);
        if !change.changed {
            return false;
        }

        for m in &change.disengaged {
            self.reset_mode(*m);
        }
        self.reset_mode(mode);

        true
    }

    pub fn is_enabled(&self, mode: AutopilotMode) -> bool {
        self.modes.is_enabled(mode)
    }

    pub fn active_modes(&self) -> Vec<AutopilotMode> {
        self.modes.active()
    }

    /// Disengage every mode.
    pub fn disengage_all(&mut self) {
        for m in self.modes.clear() {
            self.reset_mode(m);
            debug!("Autopilot mode {:?} disengaged", m);
        }
    }

    pub fn set_target_position(&mut self, position_m: Vector3<f64>) -> Result<(), AutopilotError> {
        if !position_m.iter().all(|c| c.is_finite()) {
            return Err(AutopilotError::NonFiniteTarget([
                position_m.x,
                position_m.y,
                position_m.z,
            ]));
        }
        self.target_position_m = Some(position_m);
        Ok(())
    }

    /// Set the orientation target from a quaternion which need not be normalised.
    pub fn set_target_orientation(&mut self, quat: Quaternion<f64>) -> Result<(), AutopilotError> {
        let norm = quat.norm();
        if !(norm > f64::EPSILON && norm.is_finite()) {
            return Err(AutopilotError::InvalidOrientation([quat.w, quat.i, quat.j, quat.k]));
        }
        self.target_orientation = Some(UnitQuaternion::from_quaternion(quat));
        Ok(())
    }

    pub fn target_position(&self) -> Option<Vector3<f64>> {
        self.target_position_m
    }

    pub fn target_orientation(&self) -> Option<UnitQuaternion<f64>> {
        self.target_orientation
    }

    /// Set or clear the body whose motion the velocity modes match.
    pub fn set_reference_object(&mut self, craft: Option<CraftId>) {
        if self.reference_object != craft {
            debug!("Autopilot reference object set to {:?}", craft);
            self.reference_object = craft;
        }
    }

    pub fn reference_object(&self) -> Option<&CraftId> {
        self.reference_object.as_ref()
    }

    /// Limit the speed `GoToPosition` commands, `None` returns to the configured maximum.
    pub fn set_speed_limit(&mut self, limit_ms: Option<f64>) {
        self.nav.set_speed_limit(limit_ms);
    }

    /// Live-tune the gains of one loop, keeping its accumulators.
    pub fn set_pid_gains(&mut self, pid_loop: PidLoop, k_p: f64, k_i: f64, k_d: f64) {
        for pid in self.loops_mut(pid_loop) {
            pid.set_gains(k_p, k_i, k_d);
        }
        debug!("{:?} gains set to ({}, {}, {})", pid_loop, k_p, k_i, k_d);
    }

    /// Reset one loop and assign its preset gains.
    pub fn calibrate_pid(&mut self, pid_loop: PidLoop) {
        let preset = match pid_loop {
            PidLoop::AngularMomentum => PidPreset::AngularMomentum,
            PidLoop::LinearMomentum => PidPreset::LinearMomentum,
            PidLoop::Orientation => PidPreset::Position,
            PidLoop::Velocity => PidPreset::Velocity,
        };
        let pid_params = self.pid_params.clone();
        for pid in self.loops_mut(pid_loop) {
            pid.auto_calibrate(preset, &pid_params);
        }
        debug!("{:?} calibrated to the {:?} preset", pid_loop, preset);
    }

    // ---- STATUS ----

    /// The path `GoToPosition` is currently following.
    pub fn path(&self) -> Option<&Path> {
        self.nav.path()
    }

    pub fn follow_status(&self) -> Option<&FollowOutput> {
        self.nav.last_follow()
    }

    pub fn follower(&self) -> &PathFollower {
        self.nav.follower()
    }

    pub fn last_output(&self) -> &AutopilotOutput {
        &self.last_output
    }

    // ---- PROCESSING ----

    /// Compute the summed wrench of all engaged modes.
    pub fn step(&mut self, input: &StepInput) -> AutopilotOutput {
        let mut output = AutopilotOutput::default();

        for mode in self.modes.active() {
            let contribution = self.contribution(mode, input, &mut output);
            trace!("{:?} contributes {:?}", mode, contribution);
            output.wrench += contribution;
        }

        self.last_output = output;
        output
    }

    /// The wrench contributed by a single mode.
    fn contribution(
        &mut self,
        mode: AutopilotMode,
        input: &StepInput,
        output: &mut AutopilotOutput,
    ) -> Wrench {
        let state = input.state;
        let ref_vel_ms = input.reference.map_or_else(Vector3::zeros, |r| r.lin_vel_ms);
        let ref_rate_rads = input.reference.map_or_else(Vector3::zeros, |r| r.ang_vel_rads);

        match mode {
            AutopilotMode::CancelRotation => {
                let rate_error_b = state.attitude.inverse() * (ref_rate_rads - state.ang_vel_rads);
                Wrench::torque(rate_torque(
                    &mut self.rotation_pid,
                    &rate_error_b,
                    state,
                    input.dt_s,
                    &self.params,
                ))
            }
            AutopilotMode::CancelLinearMotion => {
                let vel_error_b = state.attitude.inverse() * (ref_vel_ms - state.lin_vel_ms);
                let accel_b = clamp_norm(
                    &self.linear_pid.update(&vel_error_b, input.dt_s),
                    self.params.max_accel_ms2,
                );
                Wrench::force(accel_b * state.mass_kg)
            }
            AutopilotMode::OrientationMatch => match self.target_orientation {
                Some(target) => Wrench::torque(self.attitude.track(
                    state,
                    &target,
                    &ref_rate_rads,
                    input.dt_s,
                    &self.params,
                )),
                None => {
                    trace!("OrientationMatch has no target");
                    Wrench::default()
                }
            },
            AutopilotMode::CancelAndAlign => {
                let rel_rate = (state.ang_vel_rads - ref_rate_rads).norm();
                match self.target_orientation {
                    Some(target) if rel_rate <= self.params.align_rate_threshold_rads => {
                        Wrench::torque(self.attitude.track(
                            state,
                            &target,
                            &ref_rate_rads,
                            input.dt_s,
                            &self.params,
                        ))
                    }
                    _ => Wrench::torque(self.attitude.damp(
                        state,
                        &ref_rate_rads,
                        input.dt_s,
                        &self.params,
                    )),
                }
            }
            AutopilotMode::PointToPosition => {
                let axis_b = Vector3::from(self.params.pointing_axis_b);
                let target = self
                    .target_position_m
                    .and_then(|p| pointing_orientation(state, &p, &axis_b));
                match target {
                    Some(target) => Wrench::torque(self.attitude.track(
                        state,
                        &target,
                        &ref_rate_rads,
                        input.dt_s,
                        &self.params,
                    )),
                    None => {
                        trace!("PointToPosition has no usable target");
                        Wrench::default()
                    }
                }
            }
            AutopilotMode::GoToPosition => {
                let goal_m = match self.target_position_m {
                    Some(g) => g,
                    None => {
                        trace!("GoToPosition has no target");
                        return Wrench::default();
                    }
                };

                let nav_out = self.nav.step(
                    &NavInput {
                        time_s: input.time_s,
                        dt_s: input.dt_s,
                        state,
                        ref_vel_ms,
                        goal_m,
                        obstacles: input.obstacles,
                        clearance_m: input.own_half_extents_m.norm()
                            + self.params.avoidance_margin_m,
                    },
                    &self.params,
                );
                output.path_done = nav_out.done;
                output.replanned = nav_out.replanned;
                Wrench::force(nav_out.force_n_b)
            }
        }
    }

    fn reset_mode(&mut self, mode: AutopilotMode) {
        match mode {
            AutopilotMode::CancelRotation => self.rotation_pid.reset(),
            AutopilotMode::CancelLinearMotion => self.linear_pid.reset(),
            AutopilotMode::OrientationMatch
            | AutopilotMode::CancelAndAlign
            | AutopilotMode::PointToPosition => self.attitude.reset(),
            AutopilotMode::GoToPosition => self.nav.reset(),
        }
    }

    fn loops_mut(&mut self, pid_loop: PidLoop) -> Vec<&mut PidController> {
        match pid_loop {
            PidLoop::AngularMomentum => vec![&mut self.rotation_pid, &mut self.attitude.rate_pid],
            PidLoop::LinearMomentum => vec![&mut self.linear_pid],
            PidLoop::Orientation => vec![&mut self.attitude.orientation_pid],
            PidLoop::Velocity => vec![&mut self.nav.velocity_pid],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::tc::autopilot::AutopilotMode::*;

    fn autopilot() -> Autopilot {
        Autopilot::new(
            Params::default(),
            pid::Params::default(),
            traj_plan::Params {
                save_reports: false,
                ..traj_plan::Params::default()
            },
            path_follow::Params::default(),
        )
        .unwrap()
    }

    fn state() -> RigidBodyState {
        RigidBodyState::at_rest(
            Vector3::zeros(),
            UnitQuaternion::identity(),
            500.0,
            Vector3::new(300.0, 300.0, 300.0),
        )
    }

    fn input<'a>(state: &'a RigidBodyState) -> StepInput<'a> {
        StepInput {
            time_s: 0.0,
            dt_s: 0.1,
            state,
            reference: None,
            own_half_extents_m: Vector3::repeat(1.0),
            obstacles: &[],
        }
    }

    #[test]
    fn test_no_modes_no_output() {
        let mut ap = autopilot();
        let s = state();
        assert_eq!(ap.step(&input(&s)).wrench, Wrench::default());
    }

    #[test]
    fn test_set_mode_twice_is_noop() {
        let mut ap = autopilot();
        assert!(ap.set_mode(CancelRotation, true));
        assert!(!ap.set_mode(CancelRotation, true));
        assert_eq!(ap.active_modes(), vec![CancelRotation]);
    }

    #[test]
    fn test_contributions_are_summed() {
        let mut ap = autopilot();
        let mut s = state();
        s.ang_vel_rads = Vector3::new(0.0, 0.0, 0.2);
        s.lin_vel_ms = Vector3::new(0.3, 0.0, 0.0);

        ap.set_mode(CancelRotation, true);
        ap.set_mode(CancelLinearMotion, true);
        let out = ap.step(&input(&s));

        assert!(out.wrench.torque_nm_b.z < 0.0);
        assert!(out.wrench.force_n_b.x < 0.0);
    }

    #[test]
    fn test_reference_object_velocity_is_matched() {
        let mut ap = autopilot();
        let mut s = state();
        s.lin_vel_ms = Vector3::new(0.3, 0.0, 0.0);
        let mut reference = state();
        reference.lin_vel_ms = Vector3::new(0.3, 0.0, 0.0);

        ap.set_reference_object(Some(CraftId::from("station")));
        ap.set_mode(CancelLinearMotion, true);
        let mut inp = input(&s);
        inp.reference = Some(&reference);

        assert!(ap.step(&inp).wrench.force_n_b.norm() < 1e-9);
    }

    #[test]
    fn test_orientation_match_turns_toward_target() {
        let mut ap = autopilot();
        let s = state();
        ap.set_target_orientation(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5).into_inner(),
        )
        .unwrap();
        ap.set_mode(OrientationMatch, true);

        let out = ap.step(&input(&s));
        assert!(out.wrench.torque_nm_b.z > 0.0);
        assert!(out.wrench.force_n_b.norm() < 1e-12);
    }

    #[test]
    fn test_go_to_position() {
        let mut ap = autopilot();
        let s = state();
        ap.set_target_position(Vector3::new(0.0, 20.0, 0.0)).unwrap();
        ap.set_mode(GoToPosition, true);

        let out = ap.step(&input(&s));
        assert!(out.replanned);
        assert!(!out.path_done);
        assert!(out.wrench.force_n_b.y > 0.0);
        assert_eq!(ap.path().map(|p| p.num_points()), Some(2));

        // Capped at the maximum acceleration
        assert!(out.wrench.force_n_b.norm() <= 500.0 * ap.params().max_accel_ms2 + 1e-9);
    }

    #[test]
    fn test_invalid_targets() {
        let mut ap = autopilot();
        assert!(ap
            .set_target_position(Vector3::new(std::f64::NAN, 0.0, 0.0))
            .is_err());
        assert_eq!(
            ap.set_target_orientation(Quaternion::new(0.0, 0.0, 0.0, 0.0)),
            Err(AutopilotError::InvalidOrientation([0.0; 4]))
        );
        assert_eq!(ap.target_orientation(), None);
    }

    #[test]
    fn test_pid_tuning() {
        let mut ap = autopilot();
        ap.set_pid_gains(PidLoop::Velocity, 9.0, 0.0, 0.0);
        assert_eq!(ap.nav.velocity_pid.gains().k_p, 9.0);

        ap.calibrate_pid(PidLoop::Velocity);
        assert_eq!(*ap.nav.velocity_pid.gains(), pid::Params::default().velocity);
    }
}
