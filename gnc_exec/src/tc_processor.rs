//! # Telecommand processor module
//!
//! The telecommand processor handles TCs coming from any source. Rejected TCs are logged and
//! leave the data store unchanged.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, warn};
use nalgebra::{Quaternion, Vector3};

// Internal
use comms_if::tc::Tc;
use gnc_lib::data_store::DataStore;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Execute a telecommand.
///
/// Mutates the datastore to send commands to different modules.
pub(crate) fn exec(ds: &mut DataStore, tc: &Tc) {
    debug!("Executing {:?}", tc);

    match tc {
        Tc::StartDocking {
            target,
            our_port,
            target_port,
        } => {
            ds.docking
                .start_docking(
                    &ds.world,
                    target.clone(),
                    our_port.clone(),
                    target_port.clone(),
                    ds.sim_time_s,
                )
                .ok();
        }
        Tc::CancelDocking => {
            ds.docking.cancel(&mut ds.autopilot).ok();
        }
        Tc::Undock => {
            ds.docking.undock(&mut ds.world, &mut ds.autopilot).ok();
        }
        Tc::SetMode { mode, enabled } => {
            // Flying a mode takes the thrusters back from the operator
            if *enabled {
                ds.alloc.clear_manual();
            }
            ds.autopilot.set_mode(*mode, *enabled);
        }
        Tc::SetTargetPosition { position_m } => {
            if let Err(e) = ds.autopilot.set_target_position(Vector3::from(*position_m)) {
                warn!("Target position rejected: {}", e);
            }
        }
        Tc::SetTargetOrientation { quat_wxyz } => {
            let [w, x, y, z] = *quat_wxyz;
            if let Err(e) = ds.autopilot.set_target_orientation(Quaternion::new(w, x, y, z)) {
                warn!("Target orientation rejected: {}", e);
            }
        }
        Tc::SetReferenceObject { craft } => {
            ds.autopilot.set_reference_object(craft.clone());
        }
        Tc::SetThrust { throttles } => match ds.alloc.set_thrust(throttles) {
            // Manual thrust has no PID involvement at all
            Ok(()) => ds.autopilot.disengage_all(),
            Err(e) => warn!("Manual thrust rejected: {}", e),
        },
        Tc::SetPidGains { pid, k_p, k_i, k_d } => {
            ds.autopilot.set_pid_gains(*pid, *k_p, *k_i, *k_d);
        }
        Tc::CalibratePid { pid } => {
            ds.autopilot.calibrate_pid(*pid);
        }
    }
}
