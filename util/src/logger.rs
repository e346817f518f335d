//! Logging backend for the MPC executables
//!
//! Records from the `log` facade go to stdout with coloured level tags and
//! to the session log file as plain text. Each line carries the seconds
//! elapsed since the session epoch, so log lines can be matched against the
//! archived status reports of the same cycle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::Colorize;
use log::{self, info, Level, Record};
use std::fmt;
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Third party crates whose records are capped at a given level.
///
/// The optimiser is chatty at debug level, one solve per cycle would bury the
/// controller's own records.
const CAPPED_TARGETS: [(&str, LevelFilter); 1] = [("optimization_engine", LevelFilter::Warn)];

/// Crate prefixes removed from targets, so `mpc_lib::mpc_ctrl::solver` is
/// printed as `mpc_ctrl::solver`.
const TARGET_PREFIXES: [&str; 2] = ["mpc_lib::", "mpc_exec::"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// `min_level` must be `Info` or more verbose, warnings and errors alone
/// don't give enough context to reconstruct a control run. Crates listed in
/// `CAPPED_TARGETS` never log above their cap.
///
/// Must only be called once per process.
pub fn logger_init(min_level: LevelFilter, session: &session::Session) -> Result<(), LoggerInitError> {
    if min_level < Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level));
    }

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    let stdout = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("{}", Line::new(message, record, true))))
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("{}", Line::new(message, record, false))))
        .chain(log_file);

    let mut dispatch = fern::Dispatch::new().level(min_level);
    for &(target, cap) in CAPPED_TARGETS.iter() {
        dispatch = dispatch.level_for(target, cap.min(min_level));
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
// PRIVATE ITEMS
// ---------------------------------------------------------------------------

/// One formatted log line.
struct Line<'a> {
    elapsed_s: f64,
    level: Level,
    target: &'a str,
    message: &'a dyn fmt::Display,
    colour: bool,
}

impl<'a> Line<'a> {
    fn new(message: &'a dyn fmt::Display, record: &'a Record, colour: bool) -> Self {
        Self {
            elapsed_s: session::get_elapsed_seconds(),
            level: record.level(),
            target: short_target(record.target()),
            message,
            colour,
        }
    }
}

impl<'a> fmt::Display for Line<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tag = level_tag(self.level);

        if self.colour {
            write!(f, "[{:10.6} {}] ", self.elapsed_s, colour_tag(self.level, tag))?;
        } else {
            write!(f, "[{:10.6} {}] ", self.elapsed_s, tag)?;
        }

        // Targets are only useful when digging into debug output
        if self.level > Level::Info {
            write!(f, "{}: ", self.target)?;
        }

        write!(f, "{}", self.message)
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRC",
        Level::Debug => "DBG",
        Level::Info => "INF",
        Level::Warn => "WRN",
        Level::Error => "ERR",
    }
}

fn colour_tag(level: Level, tag: &str) -> colored::ColoredString {
    match level {
        Level::Trace => tag.dimmed().italic(),
        Level::Debug => tag.dimmed(),
        Level::Info => tag.normal(),
        Level::Warn => tag.yellow(),
        Level::Error => tag.red().bold(),
    }
}

/// The target with any workspace crate prefix removed.
fn short_target(target: &str) -> &str {
    TARGET_PREFIXES
        .iter()
        .find_map(|p| target.strip_prefix(p))
        .unwrap_or(target)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_short_target() {
        assert_eq!(short_target("mpc_lib::mpc_ctrl::solver"), "mpc_ctrl::solver");
        assert_eq!(short_target("mpc_exec"), "mpc_exec");
        assert_eq!(short_target("optimization_engine::alm"), "optimization_engine::alm");
    }

    #[test]
    fn test_plain_line() {
        let line = Line {
            elapsed_s: 1.5,
            level: Level::Warn,
            target: "mpc_ctrl::state",
            message: &"solve failed",
            colour: false,
        };

        assert_eq!(line.to_string(), "[  1.500000 WRN] solve failed");
    }

    #[test]
    fn test_debug_line_has_target() {
        let line = Line {
            elapsed_s: 0.25,
            level: Level::Debug,
            target: "mpc_ctrl::solver",
            message: &"cache built",
            colour: false,
        };

        assert_eq!(line.to_string(), "[  0.250000 DBG] mpc_ctrl::solver: cache built");
    }

    #[test]
    fn test_capped_targets_are_quieter() {
        for &(_, cap) in CAPPED_TARGETS.iter() {
            assert!(cap < LevelFilter::Info);
        }
    }
}
