//! # GNC library.
//!
//! Guidance, navigation and control for a free-flying 6-DOF craft: planning collision free paths,
//! following them, holding attitudes and docking with other craft. This library allows the
//! executable and any other crate in the workspace to access items defined inside the GNC crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Autopilot module - combines independently toggled control modes into a force and torque, and
/// allocates them to the thrusters
pub mod autopilot;

/// Data store - everything the executable carries between cycles
pub mod data_store;

/// Docking controller - sequences a docking manoeuvre and gates the physical mate
pub mod docking;

/// Executable parameters
pub mod params;

/// Path module - a validated sequence of waypoints
pub mod path;

/// Path follower - pure pursuit along a path with a braking speed profile
pub mod path_follow;

/// PID controller - three axis PID with integral clamping and a filtered derivative
pub mod pid;

/// Reference simulation world used by the executable and scenario tests
pub mod sim;

/// Trajectory planner - obstacle avoiding paths through a chain of increasingly expensive methods
pub mod traj_plan;

/// World contracts - how the library sees craft, ports and obstacles
pub mod world;
