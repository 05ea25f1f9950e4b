//! Logger setup for the GNC executables

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use log::{self, info};
use std::fmt;
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Targets which produce per-tick traces and are capped at `Debug` even when the requested level
/// is `Trace`.
const CHATTY_TARGETS: [&str; 2] = ["gnc_lib::traj_plan", "gnc_lib::path_follow"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level less than `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
/// 
/// # Notes
/// 
/// - `min_level` must be greater than `log::Level::Info`.
/// - Records are written to stdout with coloured level tags and to the session's log file as
///   plain text, both prefixed with the number of seconds elapsed since the session epoch.
/// 
/// # Safety
/// 
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(
    min_level: self::LevelFilter, 
    session: &session::Session
) -> Result<(), LoggerInitError> {

    if min_level < log::Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level))
    }

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    let stdout = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{:10.6} {}] {}",
                session::get_elapsed_seconds(),
                level_to_str(record.level()),
                with_target(message, record)
            ))
        })
        .chain(std::io::stdout());

    // No escape codes in the file
    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{:10.6} {}] {}",
                session::get_elapsed_seconds(),
                record.level(),
                with_target(message, record)
            ))
        })
        .chain(log_file);

    let mut dispatch = fern::Dispatch::new().level(min_level);
    for target in CHATTY_TARGETS.iter() {
        dispatch = dispatch.level_for(*target, min_level.min(LevelFilter::Debug));
    }

    dispatch
        .chain(stdout)
        .chain(file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;
    
    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Targets are only interesting when debugging, so they're shown below `Info`.
fn with_target(message: &fmt::Arguments, record: &log::Record) -> String {
    if record.level() > log::Level::Info {
        format!("{}: {}", record.target(), message)
    }
    else {
        message.to_string()
    }
}

/// Get the string representation of a log level
fn level_to_str(level: log::Level) -> ColoredString {
    match level {
        log::Level::Trace => "TRC".dimmed().italic(),
        log::Level::Debug => "DBG".dimmed(),
        log::Level::Info  => "INF".normal(),
        log::Level::Warn  => "WRN".yellow(),
        log::Level::Error => "ERR".red().bold()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_target_shown_below_info() {
        assert_eq!(
            with_target(
                &format_args!("planned"),
                &log::Record::builder()
                    .level(log::Level::Debug)
                    .target("gnc_lib::traj_plan")
                    .build()
            ),
            "gnc_lib::traj_plan: planned"
        );
        assert_eq!(
            with_target(
                &format_args!("docked"),
                &log::Record::builder()
                    .level(log::Level::Info)
                    .target("gnc_lib::docking")
                    .build()
            ),
            "docked"
        );
    }
}
