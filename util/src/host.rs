//! Host platform utility functions

use std::path::PathBuf;

/// Name of the environment variable pointing at the root of the software checkout.
pub const SW_ROOT_ENV_VAR: &str = "GNC_SW_ROOT";

/// Get the root directory of the software, i.e. the directory holding `params/`, `scripts/` and
/// `sessions/`.
pub fn get_gnc_sw_root() -> Result<PathBuf, std::env::VarError> {
    std::env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}
