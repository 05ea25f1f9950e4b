//! # GNC Executable Parameters
//!
//! This module provides parameters for the GNC executable, including the demo world it flies in.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::sim::{CraftConfig, PortConfig};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GncExecParams {
    /// Simulation step, also the target wall clock period of one cycle when running in real time
    pub cycle_period_s: f64,

    /// If true each cycle sleeps out the remainder of its period
    pub realtime: bool,

    /// Simulation time after which the executable stops regardless of the script
    pub max_duration_s: f64,

    /// Script run when none is given on the command line, relative to the GNC_SW_ROOT
    pub default_script: Option<String>,

    /// The craft flown by this executable
    pub own_craft: String,

    pub crafts: Vec<CraftConfig>,

    pub static_obstacles: Vec<StaticObstacleConfig>,
}

/// A fixed box in the world.
#[derive(Deserialize, Debug, Clone)]
pub struct StaticObstacleConfig {
    pub position_m: [f64; 3],
    pub half_extents_m: [f64; 3],
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for GncExecParams {
    /// A chaser 40 m from a station, ports facing each other.
    fn default() -> Self {
        let port = |id: &str, dir: f64| PortConfig {
            id: id.into(),
            position_m_b: [dir, 0.0, 0.0],
            direction_b: [dir, 0.0, 0.0],
            up_b: [0.0, 0.0, 1.0],
            length_m: 0.5,
            radius_m: 0.4,
        };
        let craft = |id: &str, x: f64, port: PortConfig| CraftConfig {
            id: id.into(),
            position_m: [x, 0.0, 0.0],
            attitude_wxyz: [1.0, 0.0, 0.0, 0.0],
            lin_vel_ms: [0.0; 3],
            ang_vel_rads: [0.0; 3],
            mass_kg: 500.0,
            inertia_kgm2: [300.0; 3],
            half_extents_m: [1.0; 3],
            ports: vec![port],
        };

        Self {
            cycle_period_s: 0.05,
            realtime: false,
            max_duration_s: 600.0,
            default_script: None,
            own_craft: "chaser".into(),
            crafts: vec![
                craft("chaser", 0.0, port("fwd", 1.0)),
                craft("station", 40.0, port("aft", -1.0)),
            ],
            static_obstacles: Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let params: GncExecParams = util::params::from_str(
            r#"
            cycle_period_s = 0.1

            [[static_obstacles]]
            position_m = [20.0, 5.0, 0.0]
            half_extents_m = [2.0, 2.0, 2.0]
            "#,
        )
        .unwrap();

        assert_eq!(params.cycle_period_s, 0.1);
        assert_eq!(params.own_craft, "chaser");
        assert_eq!(params.crafts.len(), 2);
        assert_eq!(params.static_obstacles.len(), 1);
    }
}
