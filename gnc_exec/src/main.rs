//! Main GNC executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the session, logger, parameters and modules
//!     - Main loop, one simulation step per cycle:
//!         - Telecommand processing from the script
//!         - Docking controller processing, which sets the autopilot's targets
//!         - Autopilot processing
//!         - Thruster allocation
//!         - Physics integration
//!         - Telemetry and archiving
//!
//! The order within a cycle matters: the docking controller must set the autopilot's targets
//! before the autopilot computes its wrench, which must be allocated before the world integrates.

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

use comms_if::tm::DockingPhase;
use gnc_lib::{
    autopilot::{AllocOutput, StepInput},
    data_store::{DataStore, ModuleParams},
    params::GncExecParams,
    world::World,
};

mod tc_processor;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, info, warn};
use nalgebra::Vector3;
use std::env;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

// Internal
use util::{
    archive::{Archived, Archiver},
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    script_interpreter::{PendingTcs, ScriptInterpreter},
    session::Session,
};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("gnc_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("GNC Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let exec_params: GncExecParams =
        util::params::load("gnc_exec.toml").wrap_err("Could not load exec params")?;

    let module_params = ModuleParams {
        pid: util::params::load("pid.toml").wrap_err("Could not load PID params")?,
        path_follow: util::params::load("path_follow.toml")
            .wrap_err("Could not load path follower params")?,
        traj_plan: util::params::load("traj_plan.toml")
            .wrap_err("Could not load trajectory planner params")?,
        autopilot: util::params::load("autopilot.toml")
            .wrap_err("Could not load autopilot params")?,
        docking: util::params::load("docking.toml").wrap_err("Could not load docking params")?,
    };

    info!("Parameters loaded");

    let cycle_period_s = exec_params.cycle_period_s;
    if !(cycle_period_s > 0.0) {
        return Err(eyre!(
            "The cycle period must be positive, found {}",
            cycle_period_s
        ));
    }

    // ---- INITIALISE TC SOURCE ----

    let args: Vec<String> = env::args().collect();

    debug!("CLI arguments: {:?}", args);

    let script_path = match (args.len(), &exec_params.default_script) {
        (2, _) => PathBuf::from(&args[1]),
        (1, Some(s)) => host::get_gnc_sw_root()
            .wrap_err("GNC_SW_ROOT is not set")?
            .join(s),
        (1, None) => {
            return Err(eyre!(
                "No script given on the command line and no default_script set"
            ))
        }
        (n, _) => {
            return Err(eyre!(
                "Expected either zero or one argument, found {}",
                n - 1
            ))
        }
    };

    info!("Loading script from {:?}", script_path);

    let mut script = ScriptInterpreter::new(&script_path).wrap_err("Failed to load script")?;

    info!(
        "Loaded script lasts {:.02} s and contains {} TCs\n",
        script.get_duration(),
        script.get_num_tcs()
    );

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let mut ds =
        DataStore::new(&exec_params, module_params).wrap_err("Failed to initialise the modules")?;

    ds.set_archiver(
        Archiver::from_path(&session, "gnc_tm.csv")
            .wrap_err("Failed to create the telemetry archive")?,
    );

    info!("Module initialisation complete\n");

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut script_ended = false;

    loop {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        ds.cycle_start(cycle_period_s);

        // ---- TELECOMMAND PROCESSING ----

        if !script_ended {
            match script.get_pending_tcs(ds.sim_time_s) {
                PendingTcs::None => (),
                PendingTcs::Some(tc_vec) => {
                    for tc in tc_vec.iter() {
                        tc_processor::exec(&mut ds, tc);
                    }
                }
                PendingTcs::EndOfScript => {
                    info!("End of TC script reached");
                    script_ended = true;
                }
            }
        }

        // ---- DOCKING ----

        let phase = ds
            .docking
            .step(&mut ds.world, &mut ds.autopilot, ds.sim_time_s);

        if let Some(viz) = ds.docking.visualisation(&ds.world, cycle_start_instant) {
            session.save("docking/viz.json", viz);
        }

        // ---- AUTOPILOT ----

        let state = ds
            .world
            .body_state(&ds.own)
            .ok_or_else(|| eyre!("Own craft {} has left the world", ds.own))?;
        let reference = ds
            .autopilot
            .reference_object()
            .and_then(|r| ds.world.body_state(r));
        let obstacles = ds.docking.avoidance_obstacles(&ds.world);

        ds.autopilot_output = ds.autopilot.step(&StepInput {
            time_s: ds.sim_time_s,
            dt_s: cycle_period_s,
            state: &state,
            reference: reference.as_ref(),
            own_half_extents_m: ds
                .world
                .half_extents(&ds.own)
                .unwrap_or_else(Vector3::zeros),
            obstacles: &obstacles,
        });

        // ---- THRUSTER ALLOCATION ----

        match ds.alloc.proc(&ds.autopilot_output.wrench) {
            Ok((o, r)) => {
                ds.alloc_output = o;
                ds.alloc_report = r;
            }
            Err(e) => {
                // Allocation errors are numerical, coast for this cycle
                warn!("Error during thruster allocation: {}", e);
                ds.alloc_output = AllocOutput::default();
            }
        }

        // ---- PHYSICS ----

        let achieved = ds.alloc_output.achieved;
        ds.world
            .apply_body_wrench(&ds.own, achieved.force_n_b, achieved.torque_nm_b);
        ds.world.integrate(cycle_period_s);

        // ---- TELEMETRY ----

        if ds.is_1_hz_cycle {
            if let Some(tm) = ds.telemetry() {
                info!(
                    "t = {:.1} s, phase {}, range {:.2} m, closing {:.3} m/s, modes {:?}",
                    tm.sim_time_s,
                    tm.docking.phase,
                    tm.docking.range_m,
                    tm.docking.closing_speed_ms,
                    tm.autopilot.active_modes
                );
                debug!("Gate: {:?}", tm.docking.gate);
            }
        }

        if let Err(e) = ds.write() {
            warn!("Could not write the telemetry archive: {}", e);
        }

        // ---- EXIT CONDITIONS ----

        let docking_in_progress = matches!(
            phase,
            DockingPhase::Approach | DockingPhase::Align | DockingPhase::Dock
        );

        if script_ended && !docking_in_progress {
            info!("Script complete and no docking in progress ({}), stopping", phase);
            break;
        }

        if ds.sim_time_s >= exec_params.max_duration_s {
            warn!(
                "Maximum duration of {:.0} s reached in the {} phase, stopping",
                exec_params.max_duration_s, phase
            );
            break;
        }

        // ---- CYCLE MANAGEMENT ----

        if exec_params.realtime {
            let cycle_dur = Instant::now() - cycle_start_instant;

            match Duration::from_secs_f64(cycle_period_s).checked_sub(cycle_dur) {
                Some(d) => thread::sleep(d),
                None => warn!(
                    "Cycle overran by {:.06} s",
                    cycle_dur.as_secs_f64() - cycle_period_s
                ),
            }
        }

        ds.num_cycles += 1;
    }

    // ---- SHUTDOWN ----

    if let Some(tm) = ds.telemetry() {
        session.save("final_tm.json", tm);
    }

    info!("End of execution");

    session.exit();

    Ok(())
}
