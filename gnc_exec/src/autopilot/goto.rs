//! Navigation for the `GoToPosition` mode
//!
//! Owns the planner, the path follower and the translational loops. A path to the target is
//! planned on the first step and then replanned at most once per `replan_interval_s`, and only if
//! the craft has left the path, the target has moved or the obstacles have changed.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, warn};
use nalgebra::Vector3;

// Internal
use super::Params;
use crate::path::Path;
use crate::path_follow::{FollowOutput, PathFollower};
use crate::pid::{self, PidController, PidPreset};
use crate::traj_plan::{Obstacle, TrajPlanner};
use crate::world::RigidBodyState;
use util::maths::clamp_norm;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Navigator {
    planner: TrajPlanner,
    follower: PathFollower,

    pub(crate) velocity_pid: PidController,

    /// Captures the target once the follower is done
    pub(crate) position_pid: PidController,

    path: Option<Path>,
    planned_goal_m: Option<Vector3<f64>>,
    last_plan_s: Option<f64>,

    /// Obstacles the current path was planned against
    obstacle_snapshot: Vec<Obstacle>,

    last_accel_ms2: Vector3<f64>,
    last_follow: Option<FollowOutput>,
    capturing: bool,

    /// External speed limit, tighter than `max_speed_ms` when set
    speed_limit_ms: Option<f64>,
}

/// Inputs to one navigation step.
pub struct NavInput<'a> {
    pub time_s: f64,
    pub dt_s: f64,
    pub state: &'a RigidBodyState,

    /// Linear velocity of the reference body, zero if there is none
    pub ref_vel_ms: Vector3<f64>,
    pub goal_m: Vector3<f64>,
    pub obstacles: &'a [Obstacle],
    pub clearance_m: f64,
}

/// Output of one navigation step.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavOutput {
    pub force_n_b: Vector3<f64>,
    pub done: bool,
    pub replanned: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Navigator {
    pub fn new(planner: TrajPlanner, follower: PathFollower, pid_params: &pid::Params) -> Self {
        Self {
            planner,
            follower,
            velocity_pid: PidController::from_preset(PidPreset::Velocity, pid_params),
            position_pid: PidController::from_preset(PidPreset::Position, pid_params),
            path: None,
            planned_goal_m: None,
            last_plan_s: None,
            obstacle_snapshot: Vec::new(),
            last_accel_ms2: Vector3::zeros(),
            last_follow: None,
            capturing: false,
            speed_limit_ms: None,
        }
    }

    /// Drop the path and clear the loops, the next step plans afresh.
    pub fn reset(&mut self) {
        self.follower.clear();
        self.path = None;
        self.planned_goal_m = None;
        self.last_plan_s = None;
        self.obstacle_snapshot.clear();
        self.last_accel_ms2 = Vector3::zeros();
        self.last_follow = None;
        self.capturing = false;
        self.velocity_pid.reset();
        self.position_pid.reset();
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    pub fn last_follow(&self) -> Option<&FollowOutput> {
        self.last_follow.as_ref()
    }

    pub fn follower(&self) -> &PathFollower {
        &self.follower
    }

    pub fn set_speed_limit(&mut self, limit_ms: Option<f64>) {
        self.speed_limit_ms = limit_ms.filter(|l| l.is_finite() && *l >= 0.0);
    }

    pub fn speed_limit(&self) -> Option<f64> {
        self.speed_limit_ms
    }

    /// Run one step, returning the body frame force to apply.
    pub fn step(&mut self, input: &NavInput, params: &Params) -> NavOutput {
        let state = input.state;
        let mut output = NavOutput::default();

        if self.should_replan(input, params) {
            self.replan(input);
            output.replanned = true;
        }

        let rel_vel = state.lin_vel_ms - input.ref_vel_ms;

        // Hand the follower where we'll be shortly to take out some of the loop's lag. The path
        // is held in the world frame, so the position is extrapolated with the world velocity.
        let h = params.preview_horizon_s;
        let predicted =
            state.position_m + state.lin_vel_ms * h + self.last_accel_ms2 * (0.5 * h * h);

        let follow = match self.follower.update(&predicted, &rel_vel) {
            Ok(f) => f,
            Err(e) => {
                debug!("No path to follow ({}), holding", e);
                self.last_follow = None;
                return output;
            }
        };

        let limit_ms = self
            .speed_limit_ms
            .map_or(params.max_speed_ms, |l| l.min(params.max_speed_ms));

        let vel_dem = if follow.done {
            if !self.capturing {
                self.position_pid.reset();
                self.capturing = true;
            }
            clamp_norm(
                &self.position_pid.update(&(input.goal_m - state.position_m), input.dt_s),
                params.terminal_speed_ms.min(limit_ms),
            )
        } else {
            self.capturing = false;
            clamp_norm(&follow.velocity_ref_ms, limit_ms)
        };

        let accel = clamp_norm(
            &self.velocity_pid.update(&(vel_dem - rel_vel), input.dt_s),
            params.max_accel_ms2,
        );
        self.last_accel_ms2 = accel;

        output.force_n_b = state.attitude.inverse() * (accel * state.mass_kg);
        output.done = follow.done;
        self.last_follow = Some(follow);

        output
    }

    fn should_replan(&self, input: &NavInput, params: &Params) -> bool {
        let (last_plan_s, planned_goal_m) = match (self.last_plan_s, self.planned_goal_m) {
            (Some(t), Some(g)) if self.follower.has_path() => (t, g),
            _ => return true,
        };

        if input.time_s - last_plan_s < params.replan_interval_s {
            return false;
        }

        if (input.goal_m - planned_goal_m).norm() > params.replan_goal_tolerance_m {
            debug!("Replanning, target moved");
            return true;
        }

        let off_path = self
            .follower
            .distance_to_path(&input.state.position_m)
            .map_or(true, |d| d > params.replan_deviation_m);
        if off_path {
            debug!("Replanning, craft has left the path");
            return true;
        }

        if obstacles_changed(
            &self.obstacle_snapshot,
            input.obstacles,
            params.obstacle_change_tolerance_m,
        ) {
            debug!("Replanning, obstacles changed");
            return true;
        }

        false
    }

    fn replan(&mut self, input: &NavInput) {
        let start = input.state.position_m;

        let path = if input.obstacles.is_empty() {
            Path::direct(start, input.goal_m)
        } else {
            self.planner.calculate_avoidance_waypoints(
                &start,
                &input.goal_m,
                input.obstacles,
                input.clearance_m,
            )
        };

        self.last_plan_s = Some(input.time_s);
        self.planned_goal_m = Some(input.goal_m);
        self.obstacle_snapshot = input.obstacles.to_vec();

        // Avoidance paths must stay on their segments, so never smooth them here
        match self.follower.set_waypoints(path.points_m(), false) {
            Ok(()) => self.path = Some(path),
            Err(e) => {
                warn!("Could not load the planned path into the follower: {}", e);
                self.path = None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// True if the obstacle set differs from the snapshot by more than `tolerance_m`.
pub fn obstacles_changed(snapshot: &[Obstacle], current: &[Obstacle], tolerance_m: f64) -> bool {
    snapshot.len() != current.len()
        || snapshot.iter().zip(current.iter()).any(|(a, b)| {
            a.is_target != b.is_target
                || (a.position_m - b.position_m).norm() > tolerance_m
                || (a.half_extents_m - b.half_extents_m).norm() > tolerance_m
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{path_follow, traj_plan};
    use nalgebra::UnitQuaternion;

    fn navigator() -> Navigator {
        Navigator::new(
            TrajPlanner::new(traj_plan::Params {
                save_reports: false,
                ..traj_plan::Params::default()
            }),
            PathFollower::new(path_follow::Params::default()),
            &pid::Params::default(),
        )
    }

    fn state_at(position_m: Vector3<f64>) -> RigidBodyState {
        RigidBodyState::at_rest(position_m, UnitQuaternion::identity(), 100.0, Vector3::repeat(10.0))
    }

    #[test]
    fn test_obstacles_changed() {
        let a = vec![Obstacle::from_sphere(Vector3::zeros(), 1.0, false)];
        let mut b = a.clone();
        assert!(!obstacles_changed(&a, &b, 0.5));

        b[0].position_m.x = 0.4;
        assert!(!obstacles_changed(&a, &b, 0.5));
        b[0].position_m.x = 0.6;
        assert!(obstacles_changed(&a, &b, 0.5));

        assert!(obstacles_changed(&a, &[], 0.5));
    }

    #[test]
    fn test_replan_rate_limited() {
        let mut nav = navigator();
        let params = Params::default();
        let state = state_at(Vector3::zeros());

        let mut input = NavInput {
            time_s: 0.0,
            dt_s: 0.1,
            state: &state,
            ref_vel_ms: Vector3::zeros(),
            goal_m: Vector3::new(10.0, 0.0, 0.0),
            obstacles: &[],
            clearance_m: 1.0,
        };

        let out = nav.step(&input, &params);
        assert!(out.replanned);
        assert!(out.force_n_b.x > 0.0);

        // Target moves but the interval hasn't passed
        input.time_s = 0.1;
        input.goal_m = Vector3::new(10.0, 5.0, 0.0);
        assert!(!nav.step(&input, &params).replanned);

        input.time_s = 0.6;
        assert!(nav.step(&input, &params).replanned);
        assert_eq!(nav.path().map(|p| p.end()), Some(Vector3::new(10.0, 5.0, 0.0)));

        // Nothing changed
        input.time_s = 1.2;
        assert!(!nav.step(&input, &params).replanned);
    }

    #[test]
    fn test_preview_uses_world_velocity() {
        let mut nav = navigator();
        let params = Params::default();

        // At rest in the world while the reference body moves away, so the relative velocity is
        // along the path but the craft itself isn't moving along it
        let state = state_at(Vector3::zeros());
        let input = NavInput {
            time_s: 0.0,
            dt_s: 0.1,
            state: &state,
            ref_vel_ms: Vector3::new(-2.0, 0.0, 0.0),
            goal_m: Vector3::new(10.0, 0.0, 0.0),
            obstacles: &[],
            clearance_m: 1.0,
        };
        nav.step(&input, &params);

        let follow = nav.last_follow().unwrap();
        assert!(follow.s_m.abs() < 1e-9);

        // The relative velocity still sets the lookahead
        let fp = path_follow::Params::default();
        assert!((follow.lookahead_m - (fp.lookahead_min_m + fp.lookahead_gain_s * 2.0)).abs() < 1e-9);

        // Moving in the world does move the preview point
        let mut moving = state_at(Vector3::zeros());
        moving.lin_vel_ms = Vector3::new(1.0, 0.0, 0.0);
        let mut nav = navigator();
        nav.step(
            &NavInput {
                state: &moving,
                ref_vel_ms: Vector3::zeros(),
                ..input
            },
            &params,
        );
        let s_m = nav.last_follow().unwrap().s_m;
        assert!((s_m - params.preview_horizon_s).abs() < 1e-9);
    }

    #[test]
    fn test_speed_limit() {
        let mut nav = navigator();
        nav.set_speed_limit(Some(-1.0));
        assert_eq!(nav.speed_limit(), None);
        nav.set_speed_limit(Some(0.05));
        assert_eq!(nav.speed_limit(), Some(0.05));

        // Already at the limit, no further acceleration along the path
        let mut state = state_at(Vector3::zeros());
        state.lin_vel_ms = Vector3::new(0.05, 0.0, 0.0);
        let input = NavInput {
            time_s: 0.0,
            dt_s: 0.1,
            state: &state,
            ref_vel_ms: Vector3::zeros(),
            goal_m: Vector3::new(10.0, 0.0, 0.0),
            obstacles: &[],
            clearance_m: 1.0,
        };
        let out = nav.step(&input, &Params::default());
        assert!(out.force_n_b.x.abs() < 1e-6);
    }
}
