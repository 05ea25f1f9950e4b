//! # Script interpreter
//!
//! Scripts are plain text files of timed telecommands, one per line, in the form
//!
//! ```text
//! 1.5: {"type": "SetMode", "mode": "CancelRotation", "enabled": true};
//! ```
//!
//! The time is in simulation seconds and the payload is the JSON form of a `Tc`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use regex::RegexBuilder;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use thiserror::Error;

// Internal
use comms_if::tc::{Tc, TcParseError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const LINE_PATTERN: &str = r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A command which is scripted to occur at a specific time.
struct Command {
    exec_time_s: f64,
    tc: Tc,
}

/// A script interpreter.
///
/// After loading a script use `.get_pending_tcs` each cycle to acquire the telecommands that are
/// due.
pub struct ScriptInterpreter {
    cmds: VecDeque<Command>,
    duration_s: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error("Script contains an invalid timestamp: {0}. Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid TC at {0} s: {1}")]
    InvalidTc(f64, TcParseError),

    #[error("Script TCs are not in time order (at {0} s)")]
    OutOfOrder(f64),
}

#[derive(Debug)]
pub enum PendingTcs {
    None,
    Some(Vec<Tc>),
    EndOfScript,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScriptInterpreter {
    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let script = fs::read_to_string(script_path).map_err(ScriptError::ScriptLoadError)?;

        Self::from_str(&script)
    }

    /// Create a new interpreter from the script text itself.
    pub fn from_str(script: &str) -> Result<Self, ScriptError> {
        // The pattern is a constant so building it cannot fail at runtime in practice, but
        // report it as an empty script rather than panicking.
        let re = RegexBuilder::new(LINE_PATTERN)
            .multi_line(true)
            .build()
            .map_err(|_| ScriptError::ScriptEmpty)?;

        let mut cmds: VecDeque<Command> = VecDeque::new();
        let mut last_time_s = 0.0;

        for cap in re.captures_iter(script) {
            let (time_str, payload) = match (cap.get(1), cap.get(3)) {
                (Some(t), Some(p)) => (t.as_str(), p.as_str()),
                _ => continue,
            };

            let exec_time_s: f64 = time_str
                .parse()
                .map_err(|e| ScriptError::InvalidTimestamp(format!("{}", e)))?;

            if exec_time_s < last_time_s {
                return Err(ScriptError::OutOfOrder(exec_time_s));
            }
            last_time_s = exec_time_s;

            let tc = Tc::from_json(payload).map_err(|e| ScriptError::InvalidTc(exec_time_s, e))?;

            cmds.push_back(Command { exec_time_s, tc });
        }

        if cmds.is_empty() {
            return Err(ScriptError::ScriptEmpty);
        }

        Ok(ScriptInterpreter {
            cmds,
            duration_s: last_time_s,
        })
    }

    /// Return the TCs whose execution time is at or before `current_time_s`.
    pub fn get_pending_tcs(&mut self, current_time_s: f64) -> PendingTcs {
        if self.cmds.is_empty() {
            return PendingTcs::EndOfScript;
        }

        let mut tc_vec: Vec<Tc> = vec![];

        while let Some(cmd) = self.cmds.front() {
            if cmd.exec_time_s > current_time_s {
                break;
            }
            if let Some(cmd) = self.cmds.pop_front() {
                tc_vec.push(cmd.tc);
            }
        }

        if tc_vec.is_empty() {
            PendingTcs::None
        } else {
            PendingTcs::Some(tc_vec)
        }
    }

    /// Get the number of TCs remaining in the script
    pub fn get_num_tcs(&self) -> usize {
        self.cmds.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        self.duration_s
    }
}
