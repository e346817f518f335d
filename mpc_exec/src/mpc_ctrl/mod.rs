//! # MPC control module
//!
//! MPC control computes, once per control cycle, the steering and
//! acceleration command that keeps the vehicle on a reference path. It does
//! this by posing a short horizon nonlinear program over a kinematic
//! bicycle model and handing it to a solver.
//!
//! The program is made of:
//!
//! - a flat decision vector holding the predicted states and actuations over
//!   the horizon (see `horizon`),
//! - a cost which penalises tracking error, actuation effort and actuation
//!   changes, discounted along the horizon (see `cost`),
//! - equality constraints which force consecutive predicted states to obey
//!   the model, including a one step actuator latency (see `dynamics`),
//! - bounds which limit the actuators and pin the first predicted state to
//!   the measurement (see `bounds`).
//!
//! `Mpc` assembles these and extracts the command from the solver's answer,
//! and `MpcCtrl` wraps it as a cyclic module which degrades gracefully when
//! the solver fails.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod bounds;
pub mod cost;
pub mod driver;
pub mod dynamics;
pub mod horizon;
pub mod inputs;
pub mod params;
pub mod solver;
pub mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use bounds::Bounds;
pub use cost::CostEvaluator;
pub use driver::*;
pub use dynamics::ConstraintEvaluator;
pub use horizon::*;
pub use inputs::*;
pub use params::*;
pub use solver::*;
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during MpcCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum MpcCtrlError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Invalid parameters: {0}")]
    InvalidParams(ParamsError),

    #[error("Could not initialise the archives: {0}")]
    ArchiveError(util::archive::ArchiveError),

    /// The state vector did not have exactly six elements.
    #[error("Expected a state of 6 elements, found {0}")]
    InvalidState(usize),

    /// The path polynomial did not have exactly four coefficients.
    #[error("Expected 4 path coefficients, found {0}")]
    InvalidCoeffs(usize),

    /// The solver did not report success. The contained summary describes
    /// the attempt, no actuation values are extracted from a failed solve.
    #[error("The solver failed with status {:?} after {} iterations", .0.status, .0.num_iterations)]
    SolverFailed(SolveSummary),

    #[error("MpcCtrl has not been initialised")]
    NotInitialised,
}

/// Errors raised when validating the parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamsError {
    #[error("The horizon must contain at least 2 steps, found {0}")]
    HorizonTooShort(usize),

    #[error("Expected `{0}` to be greater than zero, found {1}")]
    NonPositive(&'static str, f64),

    #[error("Expected `{0}` to be finite, found {1}")]
    NotFinite(&'static str, f64),

    #[error("Expected the decay to be in (0, 1], found {0}")]
    InvalidDecay(f64),

    #[error("Expected the `{0}` weight to be finite and non-negative, found {1}")]
    InvalidWeight(&'static str, f64),

    #[error("The fallback acceleration {0} is outside the acceleration limits")]
    FallbackOutsideLimits(f64),

    #[error("Invalid solver setting `{0}`: {1}")]
    InvalidSolverConfig(&'static str, f64),
}

impl From<ParamsError> for MpcCtrlError {
    fn from(e: ParamsError) -> Self {
        MpcCtrlError::InvalidParams(e)
    }
}
