//! Port geometry and the physical docking gate
//!
//! The gate is deliberately independent of the guidance phase: it only looks at where the two
//! ports are and how they move relative to each other. Guidance reaching the dock phase is
//! necessary for docking, but only the gate authorises the mate.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

// Internal
use super::GateParams;
use crate::world::{DockingPort, PortFrame, RigidBodyState};
use comms_if::tm::GateReport;
use util::maths::clamp;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Relative geometry of our port against the target port.
#[derive(Debug, Clone, Copy)]
pub struct PortGeometry {
    /// Angle between our port axis and the reversed target port axis
    pub misalignment_rad: f64,

    /// Face to face distance
    pub range_m: f64,

    /// Face separation along our port axis, negative once the faces have passed each other
    pub along_m: f64,

    /// Face separation perpendicular to our port axis
    pub lateral_offset_m: f64,

    /// Rate at which the faces approach each other along our port axis
    pub closing_speed_ms: f64,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Relative geometry of the two port frames.
pub fn port_geometry(
    own_state: &RigidBodyState,
    own: &PortFrame,
    target_state: &RigidBodyState,
    target: &PortFrame,
) -> PortGeometry {
    let d = target.face_m - own.face_m;
    let along_m = d.dot(&own.axis);

    let rel_vel = own_state.point_velocity_ms(&own.face_m) - target_state.point_velocity_ms(&target.face_m);

    PortGeometry {
        misalignment_rad: clamp(own.axis.dot(&-target.axis), -1.0, 1.0).acos(),
        range_m: d.norm(),
        along_m,
        lateral_offset_m: (d - own.axis * along_m).norm(),
        closing_speed_ms: rel_vel.dot(&own.axis),
    }
}

/// Evaluate the physical docking gate.
///
/// Passes only if both ports are free, the axes are aligned, the faces are close and centred,
/// and the craft are neither closing fast nor rotating. `None` if either port has degenerate
/// geometry.
pub fn should_physically_dock(
    own_state: &RigidBodyState,
    own_port: &DockingPort,
    target_state: &RigidBodyState,
    target_port: &DockingPort,
    params: &GateParams,
) -> Option<GateReport> {
    let own = own_port.world_frame(own_state)?;
    let target = target_port.world_frame(target_state)?;
    let geom = port_geometry(own_state, &own, target_state, &target);

    let ports_free = !own_port.is_occupied() && !target_port.is_occupied();
    let angular_speed_rads = own_state.ang_vel_rads.norm() + target_state.ang_vel_rads.norm();

    let max_separation_m = params.separation_factor * own_port.length_m.max(target_port.length_m);
    let max_lateral_m = params.lateral_factor * own_port.radius_m.min(target_port.radius_m);

    let pass = ports_free
        && geom.misalignment_rad <= params.max_misalignment_rad
        && geom.along_m.abs() <= max_separation_m
        && geom.lateral_offset_m <= max_lateral_m
        && geom.closing_speed_ms.abs() <= params.max_closing_speed_ms
        && angular_speed_rads <= params.max_angular_speed_rads;

    Some(GateReport {
        ports_free,
        misalignment_rad: geom.misalignment_rad,
        separation_m: geom.along_m.abs(),
        lateral_offset_m: geom.lateral_offset_m,
        closing_speed_ms: geom.closing_speed_ms,
        angular_speed_rads,
        pass,
    })
}

/// The world attitude which points our port axis against the target port axis, with our port's
/// roll reference matching the target's.
pub fn mating_orientation(own_port: &DockingPort, target: &PortFrame) -> Option<UnitQuaternion<f64>> {
    let axis_b = own_port.axis_b()?;
    let up_b = own_port.up_orthogonal_b()?;

    let axis_w = -target.axis;
    let up_w = target.up;

    let body = Matrix3::from_columns(&[axis_b, up_b, axis_b.cross(&up_b)]);
    let world = Matrix3::from_columns(&[axis_w, up_w, axis_w.cross(&up_w)]);

    Some(UnitQuaternion::from_rotation_matrix(
        &Rotation3::from_matrix_unchecked(world * body.transpose()),
    ))
}

/// Where our centre of mass must be for our port face to sit `gap_m` out from the target face,
/// with the craft at `attitude`.
pub fn com_for_face_gap(
    own_port: &DockingPort,
    attitude: &UnitQuaternion<f64>,
    target: &PortFrame,
    gap_m: f64,
) -> Option<Vector3<f64>> {
    Some(target.face_m + target.axis * gap_m - attitude * own_port.face_m_b()?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::{CraftId, PortId};

    fn port(x: f64) -> DockingPort {
        DockingPort {
            position_m_b: Vector3::new(x, 0.0, 0.0),
            direction_b: Vector3::new(x.signum(), 0.0, 0.0),
            up_b: Vector3::z(),
            length_m: 0.5,
            radius_m: 0.4,
            occupied_by: None,
        }
    }

    fn body(x: f64) -> RigidBodyState {
        RigidBodyState::at_rest(
            Vector3::new(x, 0.0, 0.0),
            UnitQuaternion::identity(),
            500.0,
            Vector3::repeat(300.0),
        )
    }

    #[test]
    fn test_gate_passes_when_mated() {
        // Faces at 1.5 and 1.7, 0.2 apart
        let report = should_physically_dock(
            &body(0.0),
            &port(1.0),
            &body(3.2),
            &port(-1.0),
            &GateParams::default(),
        )
        .unwrap();

        assert!(report.pass, "{:?}", report);
        assert!((report.separation_m - 0.2).abs() < 1e-9);
        assert!(report.misalignment_rad < 1e-6);
    }

    #[test]
    fn test_gate_thresholds() {
        let params = GateParams::default();

        // Too far
        let r = should_physically_dock(&body(0.0), &port(1.0), &body(4.0), &port(-1.0), &params);
        assert!(!r.unwrap().pass);

        // Closing too fast
        let mut moving = body(0.0);
        moving.lin_vel_ms = Vector3::new(0.1, 0.0, 0.0);
        let r = should_physically_dock(&moving, &port(1.0), &body(3.2), &port(-1.0), &params)
            .unwrap();
        assert!((r.closing_speed_ms - 0.1).abs() < 1e-9);
        assert!(!r.pass);

        // Offset sideways
        let mut offset = body(3.2);
        offset.position_m.y = 0.5;
        let r = should_physically_dock(&body(0.0), &port(1.0), &offset, &port(-1.0), &params);
        assert!(!r.unwrap().pass);
    }

    #[test]
    fn test_gate_fails_if_port_occupied() {
        let mut occupied = port(-1.0);
        occupied.occupied_by = Some((CraftId::from("other"), PortId::from("fwd")));

        let r = should_physically_dock(
            &body(0.0),
            &port(1.0),
            &body(3.2),
            &occupied,
            &GateParams::default(),
        )
        .unwrap();
        assert!(!r.ports_free);
        assert!(!r.pass);
    }

    #[test]
    fn test_mating_orientation() {
        // Target port faces +y, so our +x port must face -y
        let target = PortFrame {
            face_m: Vector3::zeros(),
            axis: Vector3::y(),
            up: Vector3::z(),
        };
        let q = mating_orientation(&port(1.0), &target).unwrap();
        assert!(((q * Vector3::x()) + Vector3::y()).norm() < 1e-9);
        assert!(((q * Vector3::z()) - Vector3::z()).norm() < 1e-9);

        // Faces just touching
        let com = com_for_face_gap(&port(1.0), &q, &target, 0.0).unwrap();
        assert!((com - Vector3::new(0.0, 1.5, 0.0)).norm() < 1e-9);
    }
}
