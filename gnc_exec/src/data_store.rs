//! # Data Store
//!
//! Everything the executable carries from one cycle to the next.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use nalgebra::Vector3;
use serde::Serialize;
use thiserror::Error;

use comms_if::tm::{AutopilotTm, GncTm};
use util::archive::{ArchiveError, Archived, Archiver};

use crate::{
    autopilot::{self, AllocError, AllocOutput, AllocReport, Autopilot, AutopilotError, ThrustAlloc},
    docking::{self, DockingController, DockingError},
    params::GncExecParams,
    path_follow, pid,
    sim::SimWorld,
    traj_plan::{self, Obstacle},
    world::{CraftId, World},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of every module, loaded together.
#[derive(Debug, Clone, Default)]
pub struct ModuleParams {
    pub pid: pid::Params,
    pub path_follow: path_follow::Params,
    pub traj_plan: traj_plan::Params,
    pub autopilot: autopilot::Params,
    pub docking: docking::Params,
}

/// Global data store for the executable.
pub struct DataStore {
    // Cycle management
    /// Number of cycles already executed
    pub num_cycles: u64,

    /// True if this cycle falls on a 1Hz boundary
    pub is_1_hz_cycle: bool,

    /// Simulation elapsed time
    pub sim_time_s: f64,

    // World
    pub own: CraftId,
    pub world: SimWorld,

    // GNC
    pub docking: DockingController,
    pub autopilot: Autopilot,
    pub autopilot_output: autopilot::AutopilotOutput,
    pub alloc: ThrustAlloc,
    pub alloc_output: AllocOutput,
    pub alloc_report: AllocReport,

    archiver: Option<Archiver>,
}

/// One flat row of the telemetry archive.
#[derive(Debug, Serialize)]
struct TmRecord {
    sim_time_s: f64,
    phase: String,
    pos_x_m: f64,
    pos_y_m: f64,
    pos_z_m: f64,
    vel_x_ms: f64,
    vel_y_ms: f64,
    vel_z_ms: f64,
    range_m: f64,
    closing_speed_ms: f64,
    alignment_error_rad: f64,
    lateral_offset_m: f64,
    force_n: f64,
    torque_nm: f64,
    saturated: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DataStoreError {
    #[error("Own craft {0} is not in the world setup")]
    OwnCraftMissing(CraftId),

    #[error("Could not create the autopilot: {0}")]
    Autopilot(#[from] AutopilotError),

    #[error("Could not create the thruster allocation: {0}")]
    Alloc(#[from] AllocError),

    #[error("Could not create the docking controller: {0}")]
    Docking(#[from] DockingError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DataStore {
    /// Build the world and every module.
    pub fn new(exec: &GncExecParams, params: ModuleParams) -> Result<Self, DataStoreError> {
        let mut world = SimWorld::from_configs(&exec.crafts);
        for o in &exec.static_obstacles {
            world.add_static_obstacle(Obstacle {
                position_m: Vector3::from(o.position_m),
                half_extents_m: Vector3::from(o.half_extents_m),
                is_target: false,
            });
        }

        let own = CraftId(exec.own_craft.clone());
        if world.body_state(&own).is_none() {
            return Err(DataStoreError::OwnCraftMissing(own));
        }

        let alloc = ThrustAlloc::new(params.autopilot.alloc.clone())?;
        let autopilot = Autopilot::new(
            params.autopilot,
            params.pid,
            params.traj_plan,
            params.path_follow,
        )?;
        let docking = DockingController::new(params.docking, own.clone(), &world)?;

        info!(
            "World built with {} craft, flying {} with {} thrusters",
            world.crafts().len(),
            own,
            alloc.num_thrusters()
        );

        Ok(Self {
            num_cycles: 0,
            is_1_hz_cycle: false,
            sim_time_s: 0.0,
            own,
            world,
            docking,
            autopilot,
            autopilot_output: Default::default(),
            alloc,
            alloc_output: AllocOutput::default(),
            alloc_report: AllocReport::default(),
            archiver: None,
        })
    }

    /// Archive telemetry into the given archiver every cycle.
    pub fn set_archiver(&mut self, archiver: Archiver) {
        self.archiver = Some(archiver);
    }

    /// Perform actions required at the start of a cycle.
    pub fn cycle_start(&mut self, cycle_period_s: f64) {
        let cycles_per_s = (1.0 / cycle_period_s).round().max(1.0) as u64;
        self.is_1_hz_cycle = self.num_cycles % cycles_per_s == 0;
        self.sim_time_s = self.num_cycles as f64 * cycle_period_s;
    }

    /// Snapshot of the GNC state, `None` if our craft has left the world.
    pub fn telemetry(&self) -> Option<GncTm> {
        let state = self.world.body_state(&self.own)?;
        let q = state.attitude.quaternion();
        let wrench = &self.autopilot_output.wrench;

        Some(GncTm {
            sim_time_s: self.sim_time_s,
            position_m: state.position_m.into(),
            orientation_wxyz: [q.w, q.i, q.j, q.k],
            lin_vel_ms: state.lin_vel_ms.into(),
            ang_vel_rads: state.ang_vel_rads.into(),
            autopilot: AutopilotTm {
                active_modes: self.autopilot.active_modes(),
                force_n: wrench.force_n_b.into(),
                torque_nm: wrench.torque_nm_b.into(),
                throttles: self.alloc_output.throttles.clone(),
                saturated: self.alloc_report.saturated,
                residual_norm: self.alloc_report.residual_norm,
                path_done: self.autopilot_output.path_done,
            },
            docking: self.docking.telemetry().clone(),
        })
    }
}

impl Archived for DataStore {
    fn write(&mut self) -> Result<(), ArchiveError> {
        if self.archiver.is_none() {
            return Ok(());
        }

        let tm = match self.telemetry() {
            Some(t) => t,
            None => return Ok(()),
        };

        let record = TmRecord {
            sim_time_s: tm.sim_time_s,
            phase: tm.docking.phase.to_string(),
            pos_x_m: tm.position_m[0],
            pos_y_m: tm.position_m[1],
            pos_z_m: tm.position_m[2],
            vel_x_ms: tm.lin_vel_ms[0],
            vel_y_ms: tm.lin_vel_ms[1],
            vel_z_ms: tm.lin_vel_ms[2],
            range_m: tm.docking.range_m,
            closing_speed_ms: tm.docking.closing_speed_ms,
            alignment_error_rad: tm.docking.alignment_error_rad,
            lateral_offset_m: tm.docking.lateral_offset_m,
            force_n: Vector3::from(tm.autopilot.force_n).norm(),
            torque_nm: Vector3::from(tm.autopilot.torque_nm).norm(),
            saturated: tm.autopilot.saturated,
        };

        match self.archiver {
            Some(ref mut a) => a.serialise(record),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::tm::DockingPhase;

    fn module_params() -> ModuleParams {
        let mut p = ModuleParams::default();
        p.traj_plan.save_reports = false;
        p
    }

    #[test]
    fn test_new_from_defaults() {
        let ds = DataStore::new(&GncExecParams::default(), module_params()).unwrap();
        assert_eq!(ds.own, CraftId::from("chaser"));
        assert_eq!(ds.alloc.num_thrusters(), 12);

        let tm = ds.telemetry().unwrap();
        assert_eq!(tm.docking.phase, DockingPhase::Idle);
        assert_eq!(tm.orientation_wxyz, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_own_craft_must_be_configured() {
        let exec = GncExecParams {
            own_craft: "ghost".into(),
            ..GncExecParams::default()
        };
        assert!(matches!(
            DataStore::new(&exec, module_params()),
            Err(DataStoreError::OwnCraftMissing(_))
        ));
    }

    #[test]
    fn test_cycle_start() {
        let mut ds = DataStore::new(&GncExecParams::default(), module_params()).unwrap();

        ds.cycle_start(0.05);
        assert!(ds.is_1_hz_cycle);

        ds.num_cycles = 7;
        ds.cycle_start(0.05);
        assert!(!ds.is_1_hz_cycle);
        assert!((ds.sim_time_s - 0.35).abs() < 1e-12);

        ds.num_cycles = 20;
        ds.cycle_start(0.05);
        assert!(ds.is_1_hz_cycle);
    }
}
