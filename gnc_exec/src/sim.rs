//! # Reference simulation world
//!
//! A minimal [`World`] used by the executive and by scenario tests. It is not a physics engine:
//! each step applies the accumulated body frame wrenches with a semi-implicit Euler step
//! (including the gyroscopic term), and mated craft are integrated as a single rigid body.
//!
//! Joints are not stored separately, a pair of craft is welded exactly when one of them has a
//! port whose `occupied_by` names the other.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace};
use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::traj_plan::Obstacle;
use crate::world::{CraftId, DockingPort, PortId, RigidBodyState, World, WorldError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A craft in the simulation.
#[derive(Debug, Clone)]
pub struct SimCraft {
    pub state: RigidBodyState,
    pub half_extents_m: Vector3<f64>,
    pub ports: BTreeMap<PortId, DockingPort>,

    force_n_b: Vector3<f64>,
    torque_nm_b: Vector3<f64>,
}

/// The simulated world.
#[derive(Debug, Clone, Default)]
pub struct SimWorld {
    crafts: BTreeMap<CraftId, SimCraft>,
    static_obstacles: Vec<Obstacle>,
    time_s: f64,
}

/// Craft setup as read from the parameter file.
#[derive(Debug, Clone, Deserialize)]
pub struct CraftConfig {
    pub id: String,
    pub position_m: [f64; 3],

    /// Attitude as a `[w, x, y, z]` quaternion, normalised on load
    #[serde(default = "identity_wxyz")]
    pub attitude_wxyz: [f64; 4],

    #[serde(default)]
    pub lin_vel_ms: [f64; 3],

    #[serde(default)]
    pub ang_vel_rads: [f64; 3],

    pub mass_kg: f64,
    pub inertia_kgm2: [f64; 3],
    pub half_extents_m: [f64; 3],

    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    pub id: String,
    pub position_m_b: [f64; 3],
    pub direction_b: [f64; 3],
    pub up_b: [f64; 3],
    pub length_m: f64,
    pub radius_m: f64,
}

/// Mass properties and momentum of a group of welded craft.
struct GroupState {
    mass_kg: f64,
    com_m: Vector3<f64>,
    lin_vel_ms: Vector3<f64>,
    ang_vel_rads: Vector3<f64>,
    inertia_kgm2: Matrix3<f64>,
    force_n: Vector3<f64>,
    torque_nm: Vector3<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimCraft {
    pub fn new(state: RigidBodyState, half_extents_m: Vector3<f64>) -> Self {
        Self {
            state,
            half_extents_m,
            ports: BTreeMap::new(),
            force_n_b: Vector3::zeros(),
            torque_nm_b: Vector3::zeros(),
        }
    }

    pub fn with_port(mut self, id: PortId, port: DockingPort) -> Self {
        self.ports.insert(id, port);
        self
    }

    /// Build a craft from its configuration, returning its ID alongside it.
    pub fn from_config(config: &CraftConfig) -> (CraftId, Self) {
        let [w, x, y, z] = config.attitude_wxyz;
        let attitude = UnitQuaternion::try_new(nalgebra::Quaternion::new(w, x, y, z), f64::EPSILON)
            .unwrap_or_else(UnitQuaternion::identity);

        let mut state = RigidBodyState::at_rest(
            Vector3::from(config.position_m),
            attitude,
            config.mass_kg,
            Vector3::from(config.inertia_kgm2),
        );
        state.lin_vel_ms = Vector3::from(config.lin_vel_ms);
        state.ang_vel_rads = Vector3::from(config.ang_vel_rads);

        let mut craft = Self::new(state, Vector3::from(config.half_extents_m));
        for p in &config.ports {
            craft.ports.insert(
                PortId(p.id.clone()),
                DockingPort {
                    position_m_b: Vector3::from(p.position_m_b),
                    direction_b: Vector3::from(p.direction_b),
                    up_b: Vector3::from(p.up_b),
                    length_m: p.length_m,
                    radius_m: p.radius_m,
                    occupied_by: None,
                },
            );
        }

        (CraftId(config.id.clone()), craft)
    }
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[CraftConfig]) -> Self {
        let mut world = Self::new();
        for c in configs {
            let (id, craft) = SimCraft::from_config(c);
            world.add_craft(id, craft);
        }
        world
    }

    /// Add a craft, replacing any craft with the same ID.
    pub fn add_craft(&mut self, id: CraftId, craft: SimCraft) {
        if self.crafts.insert(id.clone(), craft).is_some() {
            debug!("Replaced craft {} in the simulation", id);
        }
    }

    /// Remove a craft, releasing any ports mated to it.
    pub fn remove_craft(&mut self, id: &CraftId) -> Option<SimCraft> {
        let craft = self.crafts.remove(id)?;
        for other in self.crafts.values_mut() {
            for port in other.ports.values_mut() {
                if port.occupied_by.as_ref().map_or(false, |(c, _)| c == id) {
                    port.occupied_by = None;
                }
            }
        }
        Some(craft)
    }

    pub fn add_static_obstacle(&mut self, obstacle: Obstacle) {
        self.static_obstacles.push(obstacle);
    }

    pub fn craft(&self, id: &CraftId) -> Option<&SimCraft> {
        self.crafts.get(id)
    }

    pub fn time_s(&self) -> f64 {
        self.time_s
    }

    /// Directly set a craft's velocities, for initial conditions and tests.
    pub fn set_velocity(
        &mut self,
        id: &CraftId,
        lin_vel_ms: Vector3<f64>,
        ang_vel_rads: Vector3<f64>,
    ) -> Result<(), WorldError> {
        let craft = self
            .crafts
            .get_mut(id)
            .ok_or_else(|| WorldError::UnknownCraft(id.clone()))?;
        craft.state.lin_vel_ms = lin_vel_ms;
        craft.state.ang_vel_rads = ang_vel_rads;
        Ok(())
    }

    /// Advance the world by `dt_s`, consuming all applied wrenches.
    pub fn integrate(&mut self, dt_s: f64) {
        if !(dt_s > 0.0) {
            trace!("Ignoring integration step of {} s", dt_s);
            return;
        }

        for group in self.groups() {
            self.step_group(&group, dt_s);
        }

        for craft in self.crafts.values_mut() {
            craft.force_n_b = Vector3::zeros();
            craft.torque_nm_b = Vector3::zeros();
        }

        self.time_s += dt_s;
    }

    /// Sets of craft welded together by mated ports.
    fn groups(&self) -> Vec<Vec<CraftId>> {
        let mut seen = BTreeSet::new();
        let mut groups = Vec::new();

        for id in self.crafts.keys() {
            if seen.contains(id) {
                continue;
            }

            let mut group = Vec::new();
            let mut stack = vec![id.clone()];
            seen.insert(id.clone());

            while let Some(current) = stack.pop() {
                for other in self.neighbours(&current) {
                    if seen.insert(other.clone()) {
                        stack.push(other);
                    }
                }
                group.push(current);
            }

            groups.push(group);
        }

        groups
    }

    /// Craft mated to `id`, in either direction.
    fn neighbours(&self, id: &CraftId) -> Vec<CraftId> {
        let mut out: Vec<CraftId> = self
            .crafts
            .get(id)
            .map(|c| {
                c.ports
                    .values()
                    .filter_map(|p| p.occupied_by.as_ref().map(|(c, _)| c.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (other_id, other) in &self.crafts {
            if other
                .ports
                .values()
                .any(|p| p.occupied_by.as_ref().map_or(false, |(c, _)| c == id))
            {
                out.push(other_id.clone());
            }
        }

        out.retain(|c| c != id && self.crafts.contains_key(c));
        out
    }

    /// Combine the momentum and applied wrenches of a group about its centre of mass.
    fn group_state(&self, ids: &[CraftId]) -> Option<GroupState> {
        let bodies: Vec<&SimCraft> = ids.iter().filter_map(|id| self.crafts.get(id)).collect();

        let mass_kg: f64 = bodies.iter().map(|b| b.state.mass_kg).sum();
        if !(mass_kg > 0.0) {
            return None;
        }

        let com_m = bodies
            .iter()
            .fold(Vector3::zeros(), |acc, b| acc + b.state.position_m * b.state.mass_kg)
            / mass_kg;

        let mut momentum = Vector3::zeros();
        let mut ang_momentum = Vector3::zeros();
        let mut inertia_kgm2 = Matrix3::zeros();
        let mut force_n = Vector3::zeros();
        let mut torque_nm = Vector3::zeros();

        for b in bodies {
            let s = &b.state;
            let r = s.position_m - com_m;
            let rot = s.attitude.to_rotation_matrix().into_inner();

            let i_body = rot * Matrix3::from_diagonal(&s.inertia_kgm2) * rot.transpose();
            let i_offset = (Matrix3::identity() * r.norm_squared() - r * r.transpose()) * s.mass_kg;
            inertia_kgm2 += i_body + i_offset;

            momentum += s.lin_vel_ms * s.mass_kg;
            ang_momentum += i_body * s.ang_vel_rads + r.cross(&(s.lin_vel_ms * s.mass_kg));

            let f = s.attitude * b.force_n_b;
            force_n += f;
            torque_nm += s.attitude * b.torque_nm_b + r.cross(&f);
        }

        let inertia_inv = inertia_kgm2.try_inverse()?;

        Some(GroupState {
            mass_kg,
            com_m,
            lin_vel_ms: momentum / mass_kg,
            ang_vel_rads: inertia_inv * ang_momentum,
            inertia_kgm2,
            force_n,
            torque_nm,
        })
    }

    /// Step a welded group as one rigid body. A zero `dt_s` only makes the members' velocities
    /// consistent with the group's momentum.
    fn step_group(&mut self, ids: &[CraftId], dt_s: f64) {
        let g = match self.group_state(ids) {
            Some(g) => g,
            None => {
                debug!("Craft group {:?} has degenerate mass properties, not stepped", ids);
                return;
            }
        };

        let ang_accel = match g.inertia_kgm2.try_inverse() {
            Some(inv) => {
                inv * (g.torque_nm - g.ang_vel_rads.cross(&(g.inertia_kgm2 * g.ang_vel_rads)))
            }
            None => Vector3::zeros(),
        };

        let lin_vel_ms = g.lin_vel_ms + g.force_n / g.mass_kg * dt_s;
        let ang_vel_rads = g.ang_vel_rads + ang_accel * dt_s;
        let com_m = g.com_m + lin_vel_ms * dt_s;
        let dq = UnitQuaternion::from_scaled_axis(ang_vel_rads * dt_s);

        for id in ids {
            if let Some(craft) = self.crafts.get_mut(id) {
                let s = &mut craft.state;
                let r = dq * (s.position_m - g.com_m);

                s.position_m = com_m + r;
                s.attitude = dq * s.attitude;
                s.attitude.renormalize();
                s.lin_vel_ms = lin_vel_ms + ang_vel_rads.cross(&r);
                s.ang_vel_rads = ang_vel_rads;
            }
        }
    }

    fn port_mut(&mut self, craft: &CraftId, port: &PortId) -> Result<&mut DockingPort, WorldError> {
        self.crafts
            .get_mut(craft)
            .ok_or_else(|| WorldError::UnknownCraft(craft.clone()))?
            .ports
            .get_mut(port)
            .ok_or_else(|| WorldError::UnknownPort(craft.clone(), port.clone()))
    }
}

impl World for SimWorld {
    fn crafts(&self) -> Vec<CraftId> {
        self.crafts.keys().cloned().collect()
    }

    fn body_state(&self, craft: &CraftId) -> Option<RigidBodyState> {
        self.crafts.get(craft).map(|c| c.state.clone())
    }

    fn half_extents(&self, craft: &CraftId) -> Option<Vector3<f64>> {
        self.crafts.get(craft).map(|c| c.half_extents_m)
    }

    fn port(&self, craft: &CraftId, port: &PortId) -> Option<DockingPort> {
        self.crafts.get(craft)?.ports.get(port).cloned()
    }

    fn static_obstacles(&self) -> Vec<Obstacle> {
        self.static_obstacles.clone()
    }

    fn apply_body_wrench(&mut self, craft: &CraftId, force_n_b: Vector3<f64>, torque_nm_b: Vector3<f64>) {
        match self.crafts.get_mut(craft) {
            Some(c) => {
                c.force_n_b += force_n_b;
                c.torque_nm_b += torque_nm_b;
            }
            None => trace!("Wrench applied to unknown craft {} ignored", craft),
        }
    }

    fn mate(
        &mut self,
        craft_a: &CraftId,
        port_a: &PortId,
        craft_b: &CraftId,
        port_b: &PortId,
    ) -> Result<(), WorldError> {
        for (c, p) in &[(craft_a, port_a), (craft_b, port_b)] {
            if self.port_mut(c, p)?.is_occupied() {
                return Err(WorldError::PortOccupied((*c).clone(), (*p).clone()));
            }
        }

        self.port_mut(craft_a, port_a)?.occupied_by = Some((craft_b.clone(), port_b.clone()));
        self.port_mut(craft_b, port_b)?.occupied_by = Some((craft_a.clone(), port_a.clone()));

        // Weld the velocities without moving anything
        for group in self.groups() {
            if group.contains(craft_a) {
                self.step_group(&group, 0.0);
            }
        }

        debug!("Mated {}:{} with {}:{}", craft_a, port_a, craft_b, port_b);
        Ok(())
    }

    fn unmate(&mut self, craft: &CraftId, port: &PortId) -> Result<(), WorldError> {
        let (other, other_port) = self
            .port_mut(craft, port)?
            .occupied_by
            .take()
            .ok_or_else(|| WorldError::PortNotMated(craft.clone(), port.clone()))?;

        if let Ok(p) = self.port_mut(&other, &other_port) {
            p.occupied_by = None;
        }

        debug!("Unmated {}:{} from {}:{}", craft, port, other, other_port);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn identity_wxyz() -> [f64; 4] {
    [1.0, 0.0, 0.0, 0.0]
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn body(x: f64) -> SimCraft {
        SimCraft::new(
            RigidBodyState::at_rest(
                Vector3::new(x, 0.0, 0.0),
                UnitQuaternion::identity(),
                2.0,
                Vector3::new(1.0, 2.0, 3.0),
            ),
            Vector3::repeat(0.5),
        )
    }

    fn port(dir: f64) -> DockingPort {
        DockingPort {
            position_m_b: Vector3::new(0.5 * dir, 0.0, 0.0),
            direction_b: Vector3::new(dir, 0.0, 0.0),
            up_b: Vector3::z(),
            length_m: 0.5,
            radius_m: 0.3,
            occupied_by: None,
        }
    }

    fn pair() -> SimWorld {
        let mut world = SimWorld::new();
        world.add_craft("a".into(), body(0.0).with_port("fwd".into(), port(1.0)));
        world.add_craft("b".into(), body(2.0).with_port("aft".into(), port(-1.0)));
        world
    }

    #[test]
    fn test_constant_force() {
        let mut world = pair();
        let a: CraftId = "a".into();

        for _ in 0..100 {
            world.apply_body_wrench(&a, Vector3::new(4.0, 0.0, 0.0), Vector3::zeros());
            world.integrate(0.01);
        }

        let s = world.body_state(&a).unwrap();
        assert!((s.lin_vel_ms.x - 2.0).abs() < 1e-9);
        assert!((s.position_m.x - 1.0).abs() < 0.02);
        assert!((world.time_s() - 1.0).abs() < 1e-9);

        // Wrenches only last one step
        world.integrate(0.01);
        assert!((world.body_state(&a).unwrap().lin_vel_ms.x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_force_is_body_frame() {
        let mut world = SimWorld::new();
        let mut craft = body(0.0);
        craft.state.attitude = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        world.add_craft("a".into(), craft);

        world.apply_body_wrench(&"a".into(), Vector3::new(2.0, 0.0, 0.0), Vector3::zeros());
        world.integrate(1.0);

        let v = world.body_state(&"a".into()).unwrap().lin_vel_ms;
        assert!((v - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn test_torque_free_spin_is_steady() {
        let mut world = pair();
        let a: CraftId = "a".into();
        world.set_velocity(&a, Vector3::zeros(), Vector3::new(0.0, 0.0, 0.5)).unwrap();

        for _ in 0..200 {
            world.integrate(0.01);
        }

        let s = world.body_state(&a).unwrap();
        assert!((s.ang_vel_rads - Vector3::new(0.0, 0.0, 0.5)).norm() < 1e-9);
        assert!((s.attitude.angle() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mate_conserves_momentum() {
        let mut world = pair();
        let (a, b): (CraftId, CraftId) = ("a".into(), "b".into());
        world.set_velocity(&a, Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()).unwrap();

        world.mate(&a, &"fwd".into(), &b, &"aft".into()).unwrap();

        for id in &[&a, &b] {
            let s = world.body_state(id).unwrap();
            assert!((s.lin_vel_ms - Vector3::new(0.5, 0.0, 0.0)).norm() < 1e-9);
            assert!(s.ang_vel_rads.norm() < 1e-9);
        }
        assert!(world.port(&a, &"fwd".into()).unwrap().is_occupied());
        assert!(world.port(&b, &"aft".into()).unwrap().is_occupied());

        assert_eq!(
            world.mate(&a, &"fwd".into(), &b, &"aft".into()),
            Err(WorldError::PortOccupied(a.clone(), "fwd".into()))
        );
    }

    #[test]
    fn test_mated_craft_move_rigidly() {
        let mut world = pair();
        let (a, b): (CraftId, CraftId) = ("a".into(), "b".into());
        world.mate(&a, &"fwd".into(), &b, &"aft".into()).unwrap();

        // Push one end sideways, the pair must both translate and rotate
        for _ in 0..100 {
            world.apply_body_wrench(&a, Vector3::new(0.0, 1.0, 0.0), Vector3::zeros());
            world.integrate(0.01);
        }

        let sa = world.body_state(&a).unwrap();
        let sb = world.body_state(&b).unwrap();
        assert!(((sa.position_m - sb.position_m).norm() - 2.0).abs() < 1e-9);
        assert!((sa.ang_vel_rads - sb.ang_vel_rads).norm() < 1e-12);
        assert!(sa.ang_vel_rads.z < 0.0);
        assert!(sa.attitude.angle_to(&sb.attitude) < 1e-9);
    }

    #[test]
    fn test_unmate() {
        let mut world = pair();
        let (a, b): (CraftId, CraftId) = ("a".into(), "b".into());
        world.mate(&a, &"fwd".into(), &b, &"aft".into()).unwrap();

        world.unmate(&b, &"aft".into()).unwrap();
        assert!(!world.port(&a, &"fwd".into()).unwrap().is_occupied());
        assert!(!world.port(&b, &"aft".into()).unwrap().is_occupied());

        assert_eq!(
            world.unmate(&a, &"fwd".into()),
            Err(WorldError::PortNotMated(a.clone(), "fwd".into()))
        );
        assert_eq!(
            world.unmate(&a, &"nope".into()),
            Err(WorldError::UnknownPort(a, "nope".into()))
        );
    }

    #[test]
    fn test_from_config() {
        let config: CraftConfig = serde_json::from_str(
            r#"{
                "id": "chaser",
                "position_m": [1.0, 2.0, 3.0],
                "mass_kg": 10.0,
                "inertia_kgm2": [1.0, 1.0, 1.0],
                "half_extents_m": [0.5, 0.5, 0.5],
                "ports": [{
                    "id": "fwd",
                    "position_m_b": [0.5, 0.0, 0.0],
                    "direction_b": [1.0, 0.0, 0.0],
                    "up_b": [0.0, 0.0, 1.0],
                    "length_m": 0.2,
                    "radius_m": 0.3
                }]
            }"#,
        )
        .unwrap();

        let world = SimWorld::from_configs(&[config]);
        let id: CraftId = "chaser".into();
        assert_eq!(world.crafts(), vec![id.clone()]);
        assert_eq!(world.body_state(&id).unwrap().attitude, UnitQuaternion::identity());
        assert!(world.port(&id, &"fwd".into()).is_some());
    }
}
