//! # Thruster allocation
//!
//! Maps a desired body frame force and torque onto per-thruster throttles in `[0, 1]`.
//!
//! The configuration matrix has one column per thruster holding the wrench that thruster applies
//! at full throttle. The throttles are found with the least-squares pseudo-inverse of that matrix.
//! Thrusters can only push, so any thruster solved to a negative throttle is removed from the
//! active set and the reduced system solved again. Throttles within a group are then averaged and
//! the whole command scaled down uniformly if any thruster would exceed full throttle, which keeps
//! the direction of the realised wrench.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace};
use nalgebra::{DMatrix, DVector, Vector3};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};
use thiserror::Error;

// Internal
use super::params::{AllocParams, ThrusterConfig};
use util::{maths::try_unit, module::State};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A force and torque pair, both in the body frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Wrench {
    /// Units: newtons
    pub force_n_b: Vector3<f64>,

    /// Units: newton meters
    pub torque_nm_b: Vector3<f64>,
}

/// Thruster allocator state.
#[derive(Debug, Clone)]
pub struct ThrustAlloc {
    thrusters: Vec<ThrusterConfig>,

    /// 6 x N matrix, column `i` is the wrench of thruster `i` at full throttle
    config: DMatrix<f64>,

    /// Indices of the thrusters in each declared group
    groups: Vec<Vec<usize>>,

    pinv_epsilon: f64,
    negative_tolerance: f64,

    /// Operator commanded throttles, used instead of the solve while set
    manual: Option<Vec<f64>>,
}

/// Output of one allocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AllocOutput {
    pub throttles: Vec<f64>,

    /// The wrench the throttles actually produce
    pub achieved: Wrench,
}

/// Status report for one allocation.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AllocReport {
    /// True if the throttles were scaled down to fit full throttle
    pub saturated: bool,

    /// Norm of the difference between the desired and achieved wrench
    pub residual_norm: f64,

    /// Thrusters left in the active set after removing negative solutions
    pub num_active: usize,

    /// Number of least-squares solves performed
    pub num_solves: usize,

    pub manual: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum AllocError {
    #[error("No thrusters are configured")]
    NoThrusters,

    #[error("Thruster {0} has a zero or non-finite direction")]
    InvalidDirection(usize),

    #[error("Thruster {0} has a non-positive or non-finite maximum thrust")]
    InvalidMaxThrust(usize),

    #[error("Expected {expected} throttles but got {got}")]
    WrongLength { expected: usize, got: usize },

    #[error("Throttle {0} is not a finite value")]
    NonFiniteThrottle(usize),

    #[error("Could not compute the pseudo-inverse of the configuration matrix: {0}")]
    PseudoInverse(&'static str),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Wrench {
    pub fn new(force_n_b: Vector3<f64>, torque_nm_b: Vector3<f64>) -> Self {
        Self {
            force_n_b,
            torque_nm_b,
        }
    }

    pub fn force(force_n_b: Vector3<f64>) -> Self {
        Self::new(force_n_b, Vector3::zeros())
    }

    pub fn torque(torque_nm_b: Vector3<f64>) -> Self {
        Self::new(Vector3::zeros(), torque_nm_b)
    }

    fn to_dvector(&self) -> DVector<f64> {
        DVector::from_iterator(6, self.force_n_b.iter().chain(self.torque_nm_b.iter()).copied())
    }

    fn from_dvector(v: &DVector<f64>) -> Self {
        Self::new(
            Vector3::new(v[0], v[1], v[2]),
            Vector3::new(v[3], v[4], v[5]),
        )
    }
}

impl Add for Wrench {
    type Output = Wrench;

    fn add(self, rhs: Wrench) -> Wrench {
        Wrench::new(self.force_n_b + rhs.force_n_b, self.torque_nm_b + rhs.torque_nm_b)
    }
}

impl AddAssign for Wrench {
    fn add_assign(&mut self, rhs: Wrench) {
        *self = *self + rhs;
    }
}

impl Default for ThrustAlloc {
    fn default() -> Self {
        Self {
            thrusters: Vec::new(),
            config: DMatrix::zeros(6, 0),
            groups: Vec::new(),
            pinv_epsilon: 0.0,
            negative_tolerance: 0.0,
            manual: None,
        }
    }
}

impl ThrustAlloc {
    /// Create an initialised allocator.
    pub fn new(params: AllocParams) -> Result<Self, AllocError> {
        let mut alloc = Self::default();
        alloc.init(params)?;
        Ok(alloc)
    }

    pub fn num_thrusters(&self) -> usize {
        self.thrusters.len()
    }

    pub fn is_manual(&self) -> bool {
        self.manual.is_some()
    }

    /// Command the thrusters directly, bypassing the solve.
    ///
    /// Group averaging and saturation scaling still apply. The command holds until
    /// [`ThrustAlloc::clear_manual`] is called.
    pub fn set_thrust(&mut self, throttles: &[f64]) -> Result<(), AllocError> {
        if throttles.len() != self.thrusters.len() {
            return Err(AllocError::WrongLength {
                expected: self.thrusters.len(),
                got: throttles.len(),
            });
        }
        if let Some(i) = throttles.iter().position(|t| !t.is_finite()) {
            return Err(AllocError::NonFiniteThrottle(i));
        }

        let mut u: Vec<f64> = throttles.iter().map(|t| t.max(0.0)).collect();
        self.average_groups(&mut u);
        scale_to_limit(&mut u);

        debug!("Manual thrust set: {:?}", u);
        self.manual = Some(u);
        Ok(())
    }

    pub fn clear_manual(&mut self) {
        if self.manual.take().is_some() {
            debug!("Manual thrust cleared");
        }
    }

    /// The wrench produced by the given throttles.
    pub fn achieved(&self, throttles: &[f64]) -> Wrench {
        let u = DVector::from_column_slice(throttles);
        Wrench::from_dvector(&(&self.config * u))
    }

    /// Solve the active-set least-squares problem, returning throttles (possibly above one) and
    /// the number of active thrusters and solves.
    fn solve(&self, desired: &Wrench) -> Result<(Vec<f64>, usize, usize), AllocError> {
        let w = desired.to_dvector();
        let mut u = vec![0.0; self.thrusters.len()];
        let mut active: Vec<usize> = (0..self.thrusters.len()).collect();
        let mut num_solves = 0;

        while !active.is_empty() {
            num_solves += 1;

            let b = self.config.select_columns(active.iter());
            let pinv = b
                .pseudo_inverse(self.pinv_epsilon)
                .map_err(AllocError::PseudoInverse)?;
            let u_active = pinv * &w;

            let mut keep = Vec::with_capacity(active.len());
            for (k, &i) in active.iter().enumerate() {
                if u_active[k] < -self.negative_tolerance {
                    u[i] = 0.0;
                } else {
                    u[i] = u_active[k].max(0.0);
                    keep.push(i);
                }
            }

            if keep.len() == active.len() {
                break;
            }

            trace!("Removing {} thrusters from the active set", active.len() - keep.len());
            active = keep;
        }

        Ok((u, active.len(), num_solves))
    }

    fn average_groups(&self, u: &mut [f64]) {
        for group in &self.groups {
            let mean = group.iter().map(|&i| u[i]).sum::<f64>() / group.len() as f64;
            for &i in group {
                u[i] = mean;
            }
        }
    }
}

impl State for ThrustAlloc {
    type InitData = AllocParams;
    type InitError = AllocError;

    type InputData = Wrench;
    type OutputData = AllocOutput;
    type StatusReport = AllocReport;
    type ProcError = AllocError;

    /// Validate the layout and build the configuration matrix.
    fn init(&mut self, init_data: Self::InitData) -> Result<(), Self::InitError> {
        if init_data.thrusters.is_empty() {
            return Err(AllocError::NoThrusters);
        }

        let n = init_data.thrusters.len();
        let mut config = DMatrix::zeros(6, n);
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

        for (i, t) in init_data.thrusters.iter().enumerate() {
            let dir = Vector3::from(t.direction_b);
            let dir = match dir.iter().all(|d| d.is_finite()) {
                true => try_unit(&dir).ok_or(AllocError::InvalidDirection(i))?,
                false => return Err(AllocError::InvalidDirection(i)),
            };
            if !(t.max_thrust_n > 0.0 && t.max_thrust_n.is_finite()) {
                return Err(AllocError::InvalidMaxThrust(i));
            }

            let force = dir * t.max_thrust_n;
            let torque = Vector3::from(t.position_m_b).cross(&force);
            for r in 0..3 {
                config[(r, i)] = force[r];
                config[(r + 3, i)] = torque[r];
            }

            if let Some(ref g) = t.group {
                groups.entry(g.as_str()).or_default().push(i);
            }
        }

        self.groups = groups.into_iter().map(|(_, v)| v).collect();
        self.config = config;
        self.thrusters = init_data.thrusters;
        self.pinv_epsilon = init_data.pinv_epsilon;
        self.negative_tolerance = init_data.negative_tolerance;
        self.manual = None;

        debug!(
            "Thruster allocation initialised with {} thrusters in {} groups",
            n,
            self.groups.len()
        );

        Ok(())
    }

    /// Allocate the desired wrench, or pass through the manual command if one is set.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let mut report = AllocReport::default();

        let throttles = match self.manual {
            Some(ref m) => {
                report.manual = true;
                report.num_active = m.iter().filter(|&&t| t > 0.0).count();
                m.clone()
            }
            None => {
                let (mut u, num_active, num_solves) = self.solve(input_data)?;
                self.average_groups(&mut u);
                report.saturated = scale_to_limit(&mut u);
                report.num_active = num_active;
                report.num_solves = num_solves;
                u
            }
        };

        let achieved = self.achieved(&throttles);
        if !report.manual {
            report.residual_norm =
                (input_data.to_dvector() - achieved.to_dvector()).norm();
        }

        trace!(
            "Allocation residual {:.4}, saturated {}",
            report.residual_norm,
            report.saturated
        );

        Ok((
            AllocOutput {
                throttles,
                achieved,
            },
            report,
        ))
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Scale all throttles down uniformly so none exceeds one, returning true if scaling was needed.
fn scale_to_limit(u: &mut [f64]) -> bool {
    let max = u.iter().cloned().fold(0.0, f64::max);
    if max > 1.0 {
        for t in u.iter_mut() {
            *t /= max;
        }
        true
    } else {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::autopilot::params::default_thrusters;

    fn alloc() -> ThrustAlloc {
        ThrustAlloc::new(AllocParams::default()).unwrap()
    }

    fn assert_wrench_close(a: &Wrench, b: &Wrench, tol: f64) {
        assert!((a.force_n_b - b.force_n_b).norm() < tol, "{:?} vs {:?}", a, b);
        assert!((a.torque_nm_b - b.torque_nm_b).norm() < tol, "{:?} vs {:?}", a, b);
    }

    #[test]
    fn test_pure_force() {
        let mut a = alloc();
        let desired = Wrench::force(Vector3::new(100.0, 0.0, 0.0));
        let (out, report) = a.proc(&desired).unwrap();

        assert!(out.throttles.iter().all(|&t| t >= 0.0 && t <= 1.0));
        assert_wrench_close(&out.achieved, &desired, 1e-6);
        assert!(!report.saturated);
        assert!(report.residual_norm < 1e-6);

        // Only the two +x thrusters fire, equally
        assert!((out.throttles[0] - 0.25).abs() < 1e-9);
        assert!((out.throttles[1] - 0.25).abs() < 1e-9);
        assert!(out.throttles[2..].iter().all(|&t| t.abs() < 1e-9));
    }

    #[test]
    fn test_combined_wrench() {
        let mut a = alloc();
        let desired = Wrench::new(Vector3::new(-20.0, 50.0, 10.0), Vector3::new(5.0, -30.0, 12.0));
        let (out, report) = a.proc(&desired).unwrap();

        assert!(out.throttles.iter().all(|&t| t >= 0.0));
        assert_wrench_close(&out.achieved, &desired, 1e-6);
        assert!(report.num_solves >= 2);
    }

    #[test]
    fn test_saturation_keeps_direction() {
        let mut a = alloc();
        let desired = Wrench::force(Vector3::new(1000.0, 0.0, 0.0));
        let (out, report) = a.proc(&desired).unwrap();

        assert!(report.saturated);
        let max = out.throttles.iter().cloned().fold(0.0, f64::max);
        assert!((max - 1.0).abs() < 1e-12);
        assert_wrench_close(&out.achieved, &Wrench::force(Vector3::new(400.0, 0.0, 0.0)), 1e-6);
    }

    #[test]
    fn test_groups_fire_identically() {
        let mut thrusters = default_thrusters(1.0, 200.0);
        thrusters[0].group = Some("px".into());
        thrusters[1].group = Some("px".into());

        let mut a = ThrustAlloc::new(AllocParams {
            thrusters,
            ..AllocParams::default()
        })
        .unwrap();

        let desired = Wrench::new(Vector3::new(80.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 15.0));
        let (out, _) = a.proc(&desired).unwrap();
        assert!((out.throttles[0] - out.throttles[1]).abs() < 1e-12);
    }

    #[test]
    fn test_manual() {
        let mut a = alloc();
        assert_eq!(
            a.set_thrust(&[0.5; 3]),
            Err(AllocError::WrongLength { expected: 12, got: 3 })
        );

        let mut cmd = vec![0.0; 12];
        cmd[0] = 0.5;
        cmd[1] = 0.5;
        a.set_thrust(&cmd).unwrap();
        assert!(a.is_manual());

        // The desired wrench is ignored while manual
        let (out, report) = a.proc(&Wrench::torque(Vector3::new(0.0, 0.0, 50.0))).unwrap();
        assert!(report.manual);
        assert_eq!(out.throttles, cmd);
        assert_wrench_close(&out.achieved, &Wrench::force(Vector3::new(200.0, 0.0, 0.0)), 1e-9);

        a.clear_manual();
        let (_, report) = a.proc(&Wrench::default()).unwrap();
        assert!(!report.manual);
    }

    #[test]
    fn test_invalid_layout() {
        let mut thrusters = default_thrusters(1.0, 200.0);
        thrusters[3].direction_b = [0.0; 3];
        let err = ThrustAlloc::new(AllocParams {
            thrusters,
            ..AllocParams::default()
        });
        assert_eq!(err.err(), Some(AllocError::InvalidDirection(3)));

        let err = ThrustAlloc::new(AllocParams {
            thrusters: Vec::new(),
            ..AllocParams::default()
        });
        assert_eq!(err.err(), Some(AllocError::NoThrusters));
    }
}
