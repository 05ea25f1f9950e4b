//! # Docking controller module
//!
//! Sequences a docking manoeuvre against a port on another, possibly moving, craft. The session
//! runs through the phases
//!
//! - `Approach` - fly to a standoff point out along the target port axis while turning to face
//!   the target port,
//! - `Align` - hold the standoff point until the attitude is settled,
//! - `Dock` - close in on the point where the two port faces meet, recomputed every tick since
//!   the target may move,
//!
//! and ends in `Docked`. Reaching `Dock` is not enough to mate: the physical gate in [`gate`] is
//! evaluated every tick and only when it passes are the craft joined.
//!
//! The controller drives the autopilot's targets and modes, the autopilot does the flying.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod gate;
mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

// Internal
pub use params::{GateParams, Params};

use crate::autopilot::Autopilot;
use crate::path::Path;
use crate::traj_plan::Obstacle;
use crate::world::{
    craft_obstacles, CraftId, DockingPort, PortFrame, PortId, RigidBodyState, World, WorldError,
};
use comms_if::tc::autopilot::AutopilotMode;
use comms_if::tm::{DockingPhase, DockingTm};
use util::maths::{attitude_error_body, clamp};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The docking controller.
pub struct DockingController {
    params: Params,

    /// Our own craft
    own: CraftId,

    /// Every craft except our own, these are avoided while flying
    avoidance_crafts: Vec<CraftId>,

    /// Every craft except both participants, for visualisation
    incidental_crafts: Vec<CraftId>,

    session: Option<DockingSession>,
    docked: Option<DockedLink>,

    tm: DockingTm,

    last_viz: Option<Instant>,
    last_gate_warn_s: Option<f64>,
}

/// An in progress docking session.
#[derive(Debug, Clone)]
struct DockingSession {
    target: CraftId,
    our_port: PortId,
    target_port: PortId,
    phase: DockingPhase,
    phase_entered_s: f64,

    /// Last path flown, for visualisation only
    trajectory: Option<Path>,
}

/// A completed dock.
#[derive(Debug, Clone)]
struct DockedLink {
    target: CraftId,
    our_port: PortId,
}

/// Everything about both participants needed for one tick.
struct Resolved {
    own_state: RigidBodyState,
    target_state: RigidBodyState,
    own_port: DockingPort,
    target_port: DockingPort,
    target_frame: PortFrame,
}

/// Visualisation data, refreshed at a fixed wall clock interval.
#[derive(Debug, Clone, Serialize)]
pub struct DockingViz {
    pub phase: DockingPhase,
    pub trajectory: Option<Path>,

    /// Craft not taking part in the docking
    pub incidental_obstacles: Vec<Obstacle>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum DockingError {
    #[error("Own craft {0} is not known to the world")]
    OwnCraftNotFound(CraftId),

    #[error("Target craft {0} is not known to the world")]
    UnknownTarget(CraftId),

    #[error("Cannot dock with ourselves")]
    TargetIsSelf,

    #[error("Craft {0} has no port named {1}")]
    UnknownPort(CraftId, PortId),

    #[error("Port {1} on {0} is already occupied")]
    PortOccupied(CraftId, PortId),

    #[error("Port {1} on {0} has degenerate geometry")]
    DegeneratePort(CraftId, PortId),

    #[error("A docking session with {0} is already in progress")]
    SessionActive(CraftId),

    #[error("Already docked with {0}")]
    AlreadyDocked(CraftId),

    #[error("No docking session is in progress")]
    NoSession,

    #[error("Not docked")]
    NotDocked,

    #[error("World error: {0}")]
    World(#[from] WorldError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DockingController {
    /// Create a controller for the given craft.
    ///
    /// The craft must already exist in the world.
    pub fn new<W: World + ?Sized>(
        params: Params,
        own: CraftId,
        world: &W,
    ) -> Result<Self, DockingError> {
        if world.body_state(&own).is_none() {
            return Err(DockingError::OwnCraftNotFound(own));
        }

        let mut controller = Self {
            params,
            own,
            avoidance_crafts: Vec::new(),
            incidental_crafts: Vec::new(),
            session: None,
            docked: None,
            tm: DockingTm::default(),
            last_viz: None,
            last_gate_warn_s: None,
        };
        controller.notify_world_changed(&world.crafts());

        Ok(controller)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn phase(&self) -> DockingPhase {
        match (&self.session, &self.docked) {
            (Some(s), _) => s.phase,
            (None, Some(_)) => DockingPhase::Docked,
            (None, None) => DockingPhase::Idle,
        }
    }

    pub fn telemetry(&self) -> &DockingTm {
        &self.tm
    }

    /// Rebuild the cached craft lists after the set of craft in the world has changed.
    pub fn notify_world_changed(&mut self, crafts: &[CraftId]) {
        let target = self.partner().cloned();

        self.avoidance_crafts = crafts.iter().filter(|c| **c != self.own).cloned().collect();
        self.incidental_crafts = self
            .avoidance_crafts
            .iter()
            .filter(|c| Some(*c) != target.as_ref())
            .cloned()
            .collect();

        debug!(
            "Docking craft lists rebuilt: {} to avoid, {} incidental",
            self.avoidance_crafts.len(),
            self.incidental_crafts.len()
        );
    }

    pub fn avoidance_crafts(&self) -> &[CraftId] {
        &self.avoidance_crafts
    }

    pub fn incidental_crafts(&self) -> &[CraftId] {
        &self.incidental_crafts
    }

    /// Obstacles the autopilot should avoid right now.
    ///
    /// The target stays an obstacle until the dock phase, a craft we're docked to is never one.
    pub fn avoidance_obstacles<W: World + ?Sized>(&self, world: &W) -> Vec<Obstacle> {
        let partner = self.partner();
        let exclude = match (&self.session, &self.docked) {
            (Some(s), _) if s.phase == DockingPhase::Dock => partner,
            (None, Some(d)) => Some(&d.target),
            _ => None,
        };

        let crafts: Vec<CraftId> = self
            .avoidance_crafts
            .iter()
            .filter(|c| Some(*c) != exclude)
            .cloned()
            .collect();

        let mut obstacles = craft_obstacles(world, &crafts, partner);
        obstacles.extend(world.static_obstacles());
        obstacles
    }

    // ---- COMMANDS ----

    /// Start docking our port `our_port` with `target_port` on `target`.
    ///
    /// Rejected commands are logged and leave the controller unchanged.
    pub fn start_docking<W: World + ?Sized>(
        &mut self,
        world: &W,
        target: CraftId,
        our_port: PortId,
        target_port: PortId,
        time_s: f64,
    ) -> Result<(), DockingError> {
        if let Err(e) = self.validate_start(world, &target, &our_port, &target_port) {
            warn!("Docking start rejected: {}", e);
            return Err(e);
        }

        info!(
            "Docking started: our port {} to port {} on {}",
            our_port, target_port, target
        );

        self.session = Some(DockingSession {
            target,
            our_port,
            target_port,
            phase: DockingPhase::Approach,
            phase_entered_s: time_s,
            trajectory: None,
        });
        self.last_gate_warn_s = None;
        self.notify_world_changed(&world.crafts());

        Ok(())
    }

    /// Abandon the docking session, the docking modes are disengaged.
    pub fn cancel(&mut self, autopilot: &mut Autopilot) -> Result<(), DockingError> {
        let session = match self.session.take() {
            Some(s) => s,
            None => {
                let e = match self.docked {
                    Some(ref d) => DockingError::AlreadyDocked(d.target.clone()),
                    None => DockingError::NoSession,
                };
                warn!("Docking cancel rejected: {}", e);
                return Err(e);
            }
        };

        autopilot.set_mode(AutopilotMode::GoToPosition, false);
        autopilot.set_mode(AutopilotMode::OrientationMatch, false);
        autopilot.set_speed_limit(None);
        autopilot.set_reference_object(None);

        self.tm = DockingTm::default();
        self.incidental_crafts = self.avoidance_crafts.clone();

        info!(
            "Docking with {} cancelled in the {} phase",
            session.target, session.phase
        );
        Ok(())
    }

    /// Release a completed dock, leaving only `CancelRotation` engaged.
    pub fn undock<W: World + ?Sized>(
        &mut self,
        world: &mut W,
        autopilot: &mut Autopilot,
    ) -> Result<(), DockingError> {
        let link = match self.docked.take() {
            Some(l) => l,
            None => {
                warn!("Undock rejected: not docked");
                return Err(DockingError::NotDocked);
            }
        };

        if let Err(e) = world.unmate(&self.own, &link.our_port) {
            warn!("Undock from {} failed: {}", link.target, e);
            self.docked = Some(link);
            return Err(e.into());
        }

        autopilot.disengage_all();
        autopilot.set_speed_limit(None);
        autopilot.set_reference_object(None);
        autopilot.set_mode(AutopilotMode::CancelRotation, true);

        self.tm = DockingTm::default();
        self.incidental_crafts = self.avoidance_crafts.clone();

        info!("Undocked from {}", link.target);
        Ok(())
    }

    // ---- PROCESSING ----

    /// Run one docking tick, setting the autopilot's targets for this tick.
    ///
    /// Must be called before the autopilot is stepped. Returns the phase after the tick.
    pub fn step<W: World + ?Sized>(
        &mut self,
        world: &mut W,
        autopilot: &mut Autopilot,
        time_s: f64,
    ) -> DockingPhase {
        let mut session = match self.session.take() {
            Some(s) => s,
            None => return self.phase(),
        };

        let r = match resolve(&*world, &self.own, &session) {
            Some(r) => r,
            None => {
                debug!("Docking geometry unavailable, skipping this tick");
                self.session = Some(session);
                return self.phase();
            }
        };

        // The gate is evaluated every tick for telemetry, but only authorises a mate once
        // guidance has reached the dock phase
        let report = gate::should_physically_dock(
            &r.own_state,
            &r.own_port,
            &r.target_state,
            &r.target_port,
            &self.params.gate,
        );
        self.tm.gate = report;

        if session.phase == DockingPhase::Dock && report.map_or(false, |g| g.pass) {
            match world.mate(&self.own, &session.our_port, &session.target, &session.target_port) {
                Ok(()) => {
                    self.complete(session, autopilot);
                    return self.phase();
                }
                Err(e) => warn!("Docking gate passed but mating failed: {}", e),
            }
        }

        if let Err(phase) = self.guide(&mut session, &r, autopilot, time_s) {
            debug!("Docking guidance unavailable in the {} phase, skipping", phase);
        }

        session.trajectory = autopilot.path().cloned();
        self.session = Some(session);
        self.phase()
    }

    /// Refresh the visualisation if the refresh interval has passed since the last one.
    pub fn visualisation<W: World + ?Sized>(
        &mut self,
        world: &W,
        now: Instant,
    ) -> Option<DockingViz> {
        let interval = Duration::from_secs_f64(self.params.viz_interval_s.max(0.0));
        if let Some(last) = self.last_viz {
            if now.saturating_duration_since(last) < interval {
                return None;
            }
        }
        self.last_viz = Some(now);

        Some(DockingViz {
            phase: self.phase(),
            trajectory: self.session.as_ref().and_then(|s| s.trajectory.clone()),
            incidental_obstacles: craft_obstacles(world, &self.incidental_crafts, None),
        })
    }

    // ---- PRIVATE ----

    /// The craft we're docking or docked with.
    fn partner(&self) -> Option<&CraftId> {
        match (&self.session, &self.docked) {
            (Some(s), _) => Some(&s.target),
            (None, Some(d)) => Some(&d.target),
            (None, None) => None,
        }
    }

    fn validate_start<W: World + ?Sized>(
        &self,
        world: &W,
        target: &CraftId,
        our_port: &PortId,
        target_port: &PortId,
    ) -> Result<(), DockingError> {
        if let Some(ref d) = self.docked {
            return Err(DockingError::AlreadyDocked(d.target.clone()));
        }
        if let Some(ref s) = self.session {
            return Err(DockingError::SessionActive(s.target.clone()));
        }
        if *target == self.own {
            return Err(DockingError::TargetIsSelf);
        }
        if world.body_state(target).is_none() {
            return Err(DockingError::UnknownTarget(target.clone()));
        }

        for (craft, port_id) in &[(&self.own, our_port), (target, target_port)] {
            let port = world
                .port(craft, port_id)
                .ok_or_else(|| DockingError::UnknownPort((*craft).clone(), (*port_id).clone()))?;
            if port.is_occupied() {
                return Err(DockingError::PortOccupied((*craft).clone(), (*port_id).clone()));
            }
            if port.face_m_b().is_none() {
                return Err(DockingError::DegeneratePort((*craft).clone(), (*port_id).clone()));
            }
        }

        Ok(())
    }

    /// Set the autopilot targets for the current phase and handle phase transitions.
    ///
    /// Returns the phase as an error if the geometry can't be computed this tick.
    fn guide(
        &mut self,
        session: &mut DockingSession,
        r: &Resolved,
        autopilot: &mut Autopilot,
        time_s: f64,
    ) -> Result<(), DockingPhase> {
        let p = self.params.clone();
        let phase = session.phase;

        let own_frame = r.own_port.world_frame(&r.own_state).ok_or(phase)?;
        let q_des = gate::mating_orientation(&r.own_port, &r.target_frame).ok_or(phase)?;

        let combined_depth_m = r.own_port.face_m_b().ok_or(phase)?.norm()
            + r.target_port.face_m_b().ok_or(phase)?.norm();
        let standoff_gap_m = p.standoff_factor * combined_depth_m;

        let standoff_m =
            gate::com_for_face_gap(&r.own_port, &q_des, &r.target_frame, standoff_gap_m)
                .ok_or(phase)?;
        let mating_m =
            gate::com_for_face_gap(&r.own_port, &q_des, &r.target_frame, 0.0).ok_or(phase)?;

        let geom = gate::port_geometry(&r.own_state, &own_frame, &r.target_state, &r.target_frame);
        let q_err = q_des.inverse() * r.own_state.attitude;
        let attitude_error_rad = attitude_error_body(&r.own_state.attitude, &q_des).norm();
        let rel_speed_ms = (r.own_state.lin_vel_ms - r.target_state.lin_vel_ms).norm();
        let rel_rate_rads = (r.own_state.ang_vel_rads - r.target_state.ang_vel_rads).norm();

        // Telemetry
        let (roll, pitch, yaw) = q_err.euler_angles();
        self.tm.phase = phase;
        self.tm.target = Some(session.target.clone());
        self.tm.our_port = Some(session.our_port.clone());
        self.tm.target_port = Some(session.target_port.clone());
        self.tm.range_m = geom.range_m;
        self.tm.closing_speed_ms = geom.closing_speed_ms;
        self.tm.alignment_error_rad = geom.misalignment_rad;
        self.tm.roll_error_rad = roll;
        self.tm.pitch_error_rad = pitch;
        self.tm.yaw_error_rad = yaw;
        self.tm.lateral_offset_m = geom.lateral_offset_m;
        if let Some(f) = autopilot.follow_status() {
            self.tm.waypoint_index = f.index;
            self.tm.waypoint_threshold_m = f.lookahead_m;
        }
        self.tm.num_waypoints = autopilot.follower().samples_m().len();
        self.tm.docked_to = None;

        // Phase logic
        let mut goal_m = standoff_m;
        let mut speed_limit = None;

        match phase {
            DockingPhase::Approach => {
                let settled = (r.own_state.position_m - standoff_m).norm() <= p.approach_position_tol_m
                    && geom.misalignment_rad <= p.approach_angle_tol_rad
                    && rel_speed_ms <= p.approach_speed_tol_ms
                    && rel_rate_rads <= p.approach_rate_tol_rads;
                if settled {
                    self.enter(session, DockingPhase::Align, time_s);
                }
            }
            DockingPhase::Align => {
                let aligned = attitude_error_rad <= p.align_angle_tol_rad
                    && rel_rate_rads <= p.align_rate_tol_rads
                    && rel_speed_ms <= p.approach_speed_tol_ms;
                if aligned {
                    self.enter(session, DockingPhase::Dock, time_s);
                }
            }
            DockingPhase::Dock => {
                if attitude_error_rad > p.dock_abort_angle_rad {
                    warn!(
                        "Attitude error {:.3} rad too large to dock, realigning",
                        attitude_error_rad
                    );
                    self.enter(session, DockingPhase::Align, time_s);
                } else {
                    goal_m = mating_m;
                    speed_limit = Some(clamp(
                        geom.along_m.max(0.0) * p.dock_speed_gain_hz,
                        p.dock_min_speed_ms,
                        p.dock_max_speed_ms,
                    ));
                    self.warn_if_stuck(session, time_s);
                }
            }
            DockingPhase::Idle | DockingPhase::Docked => (),
        }

        autopilot.set_reference_object(Some(session.target.clone()));
        autopilot.set_speed_limit(speed_limit);
        if let Err(e) = autopilot.set_target_position(goal_m) {
            debug!("Docking goal rejected: {}", e);
            return Err(phase);
        }
        if let Err(e) = autopilot.set_target_orientation(q_des.into_inner()) {
            debug!("Docking orientation rejected: {}", e);
            return Err(phase);
        }
        autopilot.set_mode(AutopilotMode::GoToPosition, true);
        autopilot.set_mode(AutopilotMode::OrientationMatch, true);

        Ok(())
    }

    fn enter(&mut self, session: &mut DockingSession, phase: DockingPhase, time_s: f64) {
        info!(
            "Docking phase {} -> {} after {:.1} s",
            session.phase,
            phase,
            time_s - session.phase_entered_s
        );
        session.phase = phase;
        session.phase_entered_s = time_s;
        self.tm.phase = phase;
        self.last_gate_warn_s = None;
    }

    /// Warn periodically while the dock phase is held without the gate passing.
    fn warn_if_stuck(&mut self, session: &DockingSession, time_s: f64) {
        let held_s = time_s - session.phase_entered_s;
        let due = self
            .last_gate_warn_s
            .map_or(true, |t| time_s - t >= self.params.dock_warn_after_s);

        if held_s >= self.params.dock_warn_after_s && due {
            warn!(
                "Dock phase held for {:.0} s without passing the gate: {:?}",
                held_s, self.tm.gate
            );
            self.last_gate_warn_s = Some(time_s);
        }
    }

    fn complete(&mut self, session: DockingSession, autopilot: &mut Autopilot) {
        autopilot.disengage_all();
        autopilot.set_speed_limit(None);
        autopilot.set_reference_object(None);

        info!(
            "Docked port {} with port {} on {}",
            session.our_port, session.target_port, session.target
        );

        self.tm.phase = DockingPhase::Docked;
        self.tm.docked_to = Some(session.target.clone());
        self.docked = Some(DockedLink {
            target: session.target,
            our_port: session.our_port,
        });
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Look up both craft and ports for this tick, `None` if anything is missing or degenerate.
fn resolve<W: World + ?Sized>(
    world: &W,
    own: &CraftId,
    session: &DockingSession,
) -> Option<Resolved> {
    let target_state = world.body_state(&session.target)?;
    let target_port = world.port(&session.target, &session.target_port)?;
    let target_frame = target_port.world_frame(&target_state)?;

    Some(Resolved {
        own_state: world.body_state(own)?,
        own_port: world.port(own, &session.our_port)?,
        target_state,
        target_port,
        target_frame,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::autopilot::{self, AllocParams, StepInput, ThrustAlloc};
    use crate::sim::{SimCraft, SimWorld};
    use crate::{path_follow, pid, traj_plan};
    use nalgebra::{UnitQuaternion, Vector3};
    use util::module::State;

    const DT: f64 = 0.05;

    fn craft(x: f64, port_dir: f64, port_id: &str) -> SimCraft {
        SimCraft::new(
            RigidBodyState::at_rest(
                Vector3::new(x, 0.0, 0.0),
                UnitQuaternion::identity(),
                500.0,
                Vector3::repeat(300.0),
            ),
            Vector3::repeat(1.0),
        )
        .with_port(
            port_id.into(),
            DockingPort {
                position_m_b: Vector3::new(port_dir, 0.0, 0.0),
                direction_b: Vector3::new(port_dir, 0.0, 0.0),
                up_b: Vector3::z(),
                length_m: 0.5,
                radius_m: 0.4,
                occupied_by: None,
            },
        )
    }

    /// Two craft facing each other head on, 40 m apart.
    fn head_on() -> SimWorld {
        let mut world = SimWorld::new();
        world.add_craft("chaser".into(), craft(0.0, 1.0, "fwd"));
        world.add_craft("station".into(), craft(40.0, -1.0, "aft"));
        world
    }

    fn autopilot() -> Autopilot {
        Autopilot::new(
            autopilot::Params::default(),
            pid::Params::default(),
            traj_plan::Params {
                save_reports: false,
                ..traj_plan::Params::default()
            },
            path_follow::Params::default(),
        )
        .unwrap()
    }

    fn controller(world: &SimWorld) -> DockingController {
        DockingController::new(Params::default(), "chaser".into(), world).unwrap()
    }

    fn start(dc: &mut DockingController, world: &SimWorld) -> Result<(), DockingError> {
        dc.start_docking(world, "station".into(), "fwd".into(), "aft".into(), 0.0)
    }

    /// Run the docking tick loop until docked or out of time, returning the phase of every tick.
    fn run(
        world: &mut SimWorld,
        ap: &mut Autopilot,
        dc: &mut DockingController,
        duration_s: f64,
    ) -> Vec<DockingPhase> {
        let own: CraftId = "chaser".into();
        let mut alloc = ThrustAlloc::new(AllocParams::default()).unwrap();
        let mut phases = Vec::new();

        let mut t = 0.0;
        while t < duration_s {
            let phase = dc.step(world, ap, t);
            phases.push(phase);
            if phase == DockingPhase::Docked {
                break;
            }

            let state = world.body_state(&own).unwrap();
            let reference = ap.reference_object().and_then(|r| world.body_state(r));
            let obstacles = dc.avoidance_obstacles(&*world);
            let out = ap.step(&StepInput {
                time_s: t,
                dt_s: DT,
                state: &state,
                reference: reference.as_ref(),
                own_half_extents_m: world.half_extents(&own).unwrap(),
                obstacles: &obstacles,
            });

            let (alloc_out, _) = alloc.proc(&out.wrench).unwrap();
            world.apply_body_wrench(
                &own,
                alloc_out.achieved.force_n_b,
                alloc_out.achieved.torque_nm_b,
            );
            world.integrate(DT);
            t += DT;
        }

        phases
    }

    #[test]
    fn test_own_craft_must_exist() {
        let world = head_on();
        assert!(matches!(
            DockingController::new(Params::default(), "ghost".into(), &world),
            Err(DockingError::OwnCraftNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_starts_are_rejected() {
        let mut world = head_on();
        let mut dc = controller(&world);

        assert_eq!(
            dc.start_docking(&world, "ghost".into(), "fwd".into(), "aft".into(), 0.0),
            Err(DockingError::UnknownTarget("ghost".into()))
        );
        assert_eq!(
            dc.start_docking(&world, "chaser".into(), "fwd".into(), "aft".into(), 0.0),
            Err(DockingError::TargetIsSelf)
        );
        assert_eq!(
            dc.start_docking(&world, "station".into(), "fwd".into(), "side".into(), 0.0),
            Err(DockingError::UnknownPort("station".into(), "side".into()))
        );

        // Occupy the station's port with a third craft
        world.add_craft("tug".into(), craft(45.0, -1.0, "fwd"));
        world
            .mate(&"tug".into(), &"fwd".into(), &"station".into(), &"aft".into())
            .unwrap();
        assert_eq!(
            start(&mut dc, &world),
            Err(DockingError::PortOccupied("station".into(), "aft".into()))
        );

        assert_eq!(dc.phase(), DockingPhase::Idle);
        assert_eq!(*dc.telemetry(), DockingTm::default());
    }

    fn ids(names: &[&str]) -> Vec<CraftId> {
        names.iter().map(|n| CraftId::from(*n)).collect()
    }

    #[test]
    fn test_craft_lists() {
        let mut world = head_on();
        world.add_craft("tug".into(), craft(-20.0, 1.0, "fwd"));
        let mut dc = controller(&world);

        assert_eq!(dc.avoidance_crafts().to_vec(), ids(&["station", "tug"]));
        assert_eq!(dc.incidental_crafts().to_vec(), ids(&["station", "tug"]));

        start(&mut dc, &world).unwrap();
        assert_eq!(dc.avoidance_crafts().to_vec(), ids(&["station", "tug"]));
        assert_eq!(dc.incidental_crafts().to_vec(), ids(&["tug"]));

        world.remove_craft(&"tug".into());
        dc.notify_world_changed(&world.crafts());
        assert_eq!(dc.avoidance_crafts().to_vec(), ids(&["station"]));
        assert!(dc.incidental_crafts().is_empty());

        // The target is avoided until the dock phase
        let obstacles = dc.avoidance_obstacles(&world);
        assert_eq!(obstacles.len(), 1);
        assert!(obstacles[0].is_target);
    }

    #[test]
    fn test_approach_commands_standoff() {
        let mut world = head_on();
        let mut ap = autopilot();
        let mut dc = controller(&world);

        start(&mut dc, &world).unwrap();
        assert_eq!(dc.step(&mut world, &mut ap, 0.0), DockingPhase::Approach);

        // Faces meet at x = 38.5, standoff is 3 times the combined 1.5 m port depths out from
        // the target face, and our face sits 1.5 m ahead of our centre of mass.
        let goal = ap.target_position().unwrap();
        assert!((goal - Vector3::new(28.0, 0.0, 0.0)).norm() < 1e-9);
        assert!(ap.target_orientation().unwrap().angle() < 1e-9);

        assert!(ap.is_enabled(AutopilotMode::GoToPosition));
        assert!(ap.is_enabled(AutopilotMode::OrientationMatch));
        assert_eq!(ap.reference_object(), Some(&"station".into()));

        let tm = dc.telemetry();
        assert_eq!(tm.phase, DockingPhase::Approach);
        assert!((tm.range_m - 37.0).abs() < 1e-9);
        assert!(tm.alignment_error_rad < 1e-9);
        assert!(!tm.gate.unwrap().pass);
    }

    #[test]
    fn test_gate_pass_outside_dock_phase_does_not_mate() {
        // Faces start 0.2 m apart at rest, which already satisfies the gate
        let mut world = SimWorld::new();
        world.add_craft("chaser".into(), craft(0.0, 1.0, "fwd"));
        world.add_craft("station".into(), craft(3.2, -1.0, "aft"));
        let mut ap = autopilot();
        let mut dc = controller(&world);

        start(&mut dc, &world).unwrap();
        assert_eq!(dc.phase(), DockingPhase::Approach);

        let phase = dc.step(&mut world, &mut ap, 0.0);
        assert_eq!(phase, DockingPhase::Approach);
        assert!(dc.telemetry().gate.map_or(false, |g| g.pass));
        assert!(!world
            .port(&"chaser".into(), &"fwd".into())
            .unwrap()
            .is_occupied());
        assert!(!world
            .port(&"station".into(), &"aft".into())
            .unwrap()
            .is_occupied());
    }

    #[test]
    fn test_cancel() {
        let mut world = head_on();
        let mut ap = autopilot();
        let mut dc = controller(&world);

        assert_eq!(dc.cancel(&mut ap), Err(DockingError::NoSession));

        start(&mut dc, &world).unwrap();
        assert_eq!(
            start(&mut dc, &world),
            Err(DockingError::SessionActive("station".into()))
        );
        dc.step(&mut world, &mut ap, 0.0);

        dc.cancel(&mut ap).unwrap();
        assert_eq!(dc.phase(), DockingPhase::Idle);
        assert!(ap.active_modes().is_empty());
        assert_eq!(ap.reference_object(), None);

        // Nothing is commanded after cancelling
        ap.set_target_position(Vector3::zeros()).unwrap();
        assert_eq!(dc.step(&mut world, &mut ap, 0.1), DockingPhase::Idle);
        assert_eq!(ap.target_position(), Some(Vector3::zeros()));
    }

    #[test]
    fn test_visualisation_is_throttled() {
        let mut world = head_on();
        world.add_craft("tug".into(), craft(-20.0, 1.0, "fwd"));
        let mut dc = controller(&world);
        start(&mut dc, &world).unwrap();

        let now = Instant::now();
        let viz = dc.visualisation(&world, now).unwrap();
        assert_eq!(viz.phase, DockingPhase::Approach);
        assert_eq!(viz.incidental_obstacles.len(), 1);

        assert!(dc.visualisation(&world, now + Duration::from_millis(100)).is_none());
        assert!(dc.visualisation(&world, now + Duration::from_millis(600)).is_some());
    }

    #[test]
    fn test_head_on_docking() {
        let mut world = head_on();
        let mut ap = autopilot();
        let mut dc = controller(&world);
        start(&mut dc, &world).unwrap();

        let phases = run(&mut world, &mut ap, &mut dc, 400.0);

        assert_eq!(phases.first(), Some(&DockingPhase::Approach));
        assert!(phases.contains(&DockingPhase::Align));
        assert!(phases.contains(&DockingPhase::Dock));
        assert_eq!(dc.phase(), DockingPhase::Docked);

        let gate = dc.telemetry().gate.unwrap();
        assert!(gate.pass);
        assert!(gate.separation_m <= 0.6 * 0.5);
        assert!(gate.closing_speed_ms.abs() <= 0.05);

        assert!(world.port(&"chaser".into(), &"fwd".into()).unwrap().is_occupied());
        assert!(world.port(&"station".into(), &"aft".into()).unwrap().is_occupied());
        assert!(ap.active_modes().is_empty());
        assert_eq!(dc.telemetry().docked_to, Some("station".into()));

        // Docked craft are never obstacles
        assert!(dc.avoidance_obstacles(&world).is_empty());

        // Starting again while docked is rejected
        assert_eq!(
            start(&mut dc, &world),
            Err(DockingError::AlreadyDocked("station".into()))
        );
        assert_eq!(
            dc.cancel(&mut ap),
            Err(DockingError::AlreadyDocked("station".into()))
        );

        dc.undock(&mut world, &mut ap).unwrap();
        assert_eq!(dc.phase(), DockingPhase::Idle);
        assert_eq!(ap.active_modes(), vec![AutopilotMode::CancelRotation]);
        assert!(!world.port(&"station".into(), &"aft".into()).unwrap().is_occupied());

        assert_eq!(dc.undock(&mut world, &mut ap), Err(DockingError::NotDocked));
    }
}
