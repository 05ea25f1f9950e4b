//! # Communications interface crate.
//!
//! Provides the command surface and telemetry definitions shared by the GNC library, the
//! executive and any operator tooling.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Telecommands, the side-effecting command surface of the GNC stack
pub mod tc;

/// Telemetry, read-only snapshots of the GNC stack's state
pub mod tm;
