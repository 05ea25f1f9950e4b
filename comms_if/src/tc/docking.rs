//! Identifiers used by docking telecommands

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a craft known to the world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CraftId(pub String);

/// Identifies a docking port on a craft.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(pub String);

impl From<&str> for CraftId {
    fn from(s: &str) -> Self {
        CraftId(s.to_string())
    }
}

impl From<&str> for PortId {
    fn from(s: &str) -> Self {
        PortId(s.to_string())
    }
}

impl fmt::Display for CraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
