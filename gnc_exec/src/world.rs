//! # World collaborator contracts
//!
//! The GNC library never integrates physics or owns the scene. Everything it knows about craft,
//! ports and obstacles comes through the [`World`] trait, and everything it does to the world
//! (forces, mating) goes back through it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{UnitQuaternion, Vector3};
use serde::Serialize;
use thiserror::Error;

use util::maths::{any_perpendicular, try_unit};

pub use comms_if::tc::docking::{CraftId, PortId};

use crate::traj_plan::Obstacle;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Query and action capability over the simulated (or real) world.
///
/// Implementations are injected into the controllers that need them, the library holds no global
/// registry.
pub trait World {
    /// All craft currently known to the world.
    fn crafts(&self) -> Vec<CraftId>;

    /// Current state of the given craft, `None` if the craft is unknown.
    fn body_state(&self, craft: &CraftId) -> Option<RigidBodyState>;

    /// Main body half extents of the craft, used to size safety boxes.
    fn half_extents(&self, craft: &CraftId) -> Option<Vector3<f64>>;

    /// Docking port on the given craft.
    fn port(&self, craft: &CraftId, port: &PortId) -> Option<DockingPort>;

    /// Obstacles which are not craft (rocks, debris, structures).
    fn static_obstacles(&self) -> Vec<Obstacle>;

    /// Apply a force and torque, both in the body frame, for the next integration step.
    fn apply_body_wrench(&mut self, craft: &CraftId, force_n_b: Vector3<f64>, torque_nm_b: Vector3<f64>);

    /// Rigidly join two craft at the given ports, marking both ports occupied and zeroing their
    /// relative velocity.
    fn mate(
        &mut self,
        craft_a: &CraftId,
        port_a: &PortId,
        craft_b: &CraftId,
        port_b: &PortId,
    ) -> Result<(), WorldError>;

    /// Remove the rigid joint at the given port, clearing both sides' occupancy.
    fn unmate(&mut self, craft: &CraftId, port: &PortId) -> Result<(), WorldError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Rigid body state of a craft, owned by the physics collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct RigidBodyState {
    /// World frame position of the centre of mass
    pub position_m: Vector3<f64>,

    /// Body to world rotation
    pub attitude: UnitQuaternion<f64>,

    /// World frame linear velocity
    pub lin_vel_ms: Vector3<f64>,

    /// World frame angular velocity
    pub ang_vel_rads: Vector3<f64>,

    pub mass_kg: f64,

    /// Principal moments of inertia, body frame
    pub inertia_kgm2: Vector3<f64>,
}

/// A docking port on a craft.
#[derive(Debug, Clone, Serialize)]
pub struct DockingPort {
    /// Position of the port base in the craft's body frame
    pub position_m_b: Vector3<f64>,

    /// Outward axis of the port in the body frame. Not guaranteed to be normalised (or even
    /// non-zero) by every world, use [`DockingPort::axis_b`].
    pub direction_b: Vector3<f64>,

    /// Roll reference of the port in the body frame
    pub up_b: Vector3<f64>,

    /// Distance from the port base to its mating face along the axis
    pub length_m: f64,

    /// Radius of the mating ring
    pub radius_m: f64,

    /// The craft and port this port is mated to
    pub occupied_by: Option<(CraftId, PortId)>,
}

/// A port resolved into the world frame.
#[derive(Debug, Clone, Copy)]
pub struct PortFrame {
    /// Centre of the mating face
    pub face_m: Vector3<f64>,

    /// Unit outward axis
    pub axis: Vector3<f64>,

    /// Unit roll reference, perpendicular to `axis`
    pub up: Vector3<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum WorldError {
    #[error("Craft {0} is not known to the world")]
    UnknownCraft(CraftId),

    #[error("Craft {0} has no port named {1}")]
    UnknownPort(CraftId, PortId),

    #[error("Port {1} on {0} is already occupied")]
    PortOccupied(CraftId, PortId),

    #[error("Port {1} on {0} is not mated")]
    PortNotMated(CraftId, PortId),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RigidBodyState {
    /// A body at rest at the given position.
    pub fn at_rest(position_m: Vector3<f64>, attitude: UnitQuaternion<f64>, mass_kg: f64, inertia_kgm2: Vector3<f64>) -> Self {
        Self {
            position_m,
            attitude,
            lin_vel_ms: Vector3::zeros(),
            ang_vel_rads: Vector3::zeros(),
            mass_kg,
            inertia_kgm2,
        }
    }

    /// Angular velocity expressed in the body frame.
    pub fn ang_vel_rads_b(&self) -> Vector3<f64> {
        self.attitude.inverse_transform_vector(&self.ang_vel_rads)
    }

    /// Linear velocity expressed in the body frame.
    pub fn lin_vel_ms_b(&self) -> Vector3<f64> {
        self.attitude.inverse_transform_vector(&self.lin_vel_ms)
    }

    /// World frame velocity of a point fixed to the body at `point_m` (world frame).
    pub fn point_velocity_ms(&self, point_m: &Vector3<f64>) -> Vector3<f64> {
        self.lin_vel_ms + self.ang_vel_rads.cross(&(point_m - self.position_m))
    }
}

impl DockingPort {
    /// Unit outward axis in the body frame, `None` if the port's direction is degenerate.
    pub fn axis_b(&self) -> Option<Vector3<f64>> {
        try_unit(&self.direction_b)
    }

    /// Roll reference orthogonalised against the axis.
    pub fn up_orthogonal_b(&self) -> Option<Vector3<f64>> {
        let axis = self.axis_b()?;
        let projected = self.up_b - axis * self.up_b.dot(&axis);
        Some(try_unit(&projected).unwrap_or_else(|| any_perpendicular(&axis)))
    }

    /// Position of the mating face centre in the body frame.
    pub fn face_m_b(&self) -> Option<Vector3<f64>> {
        Some(self.position_m_b + self.axis_b()? * self.length_m)
    }

    /// Resolve the port into the world frame using the owning craft's state.
    pub fn world_frame(&self, state: &RigidBodyState) -> Option<PortFrame> {
        let q = &state.attitude;
        Some(PortFrame {
            face_m: state.position_m + q.transform_vector(&self.face_m_b()?),
            axis: q.transform_vector(&self.axis_b()?),
            up: q.transform_vector(&self.up_orthogonal_b()?),
        })
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied_by.is_some()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build a fresh obstacle for each listed craft from its current state.
///
/// Craft the world no longer knows are skipped.
pub fn craft_obstacles<W: World + ?Sized>(world: &W, crafts: &[CraftId], target: Option<&CraftId>) -> Vec<Obstacle> {
    crafts
        .iter()
        .filter_map(|id| {
            let state = world.body_state(id)?;
            let half_extents_m = world.half_extents(id)?;
            Some(Obstacle {
                position_m: state.position_m,
                half_extents_m: rotated_half_extents(&state.attitude, &half_extents_m),
                is_target: Some(id) == target,
            })
        })
        .collect()
}

/// Half extents of the world-axis-aligned box enclosing a rotated box.
pub fn rotated_half_extents(attitude: &UnitQuaternion<f64>, half_extents_m: &Vector3<f64>) -> Vector3<f64> {
    let r = attitude.to_rotation_matrix();
    r.matrix().abs() * half_extents_m
}

#[cfg(test)]
mod test {
    use super::*;

    fn port() -> DockingPort {
        DockingPort {
            position_m_b: Vector3::new(1.0, 0.0, 0.0),
            direction_b: Vector3::new(2.0, 0.0, 0.0),
            up_b: Vector3::new(0.3, 0.0, 1.0),
            length_m: 0.5,
            radius_m: 0.4,
            occupied_by: None,
        }
    }

    #[test]
    fn test_port_world_frame() {
        let state = RigidBodyState::at_rest(
            Vector3::new(10.0, 0.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2),
            100.0,
            Vector3::repeat(10.0),
        );

        let frame = port().world_frame(&state).unwrap();
        assert!((frame.face_m - Vector3::new(10.0, 1.5, 0.0)).norm() < 1e-9);
        assert!((frame.axis - Vector3::y()).norm() < 1e-9);
        assert!((frame.up - Vector3::z()).norm() < 1e-9);
    }

    #[test]
    fn test_degenerate_port_has_no_frame() {
        let mut p = port();
        p.direction_b = Vector3::zeros();
        let state = RigidBodyState::at_rest(Vector3::zeros(), UnitQuaternion::identity(), 1.0, Vector3::repeat(1.0));
        assert!(p.world_frame(&state).is_none());
    }

    #[test]
    fn test_rotated_half_extents() {
        let q = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);
        let he = rotated_half_extents(&q, &Vector3::new(2.0, 1.0, 0.5));
        assert!((he - Vector3::new(1.0, 2.0, 0.5)).norm() < 1e-9);
    }
}
