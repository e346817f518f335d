//! MPC control parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use super::{horizon::MIN_HORIZON_LEN, solver::SolverConfig, ParamsError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for MPC control.
///
/// Loaded once at start up and never modified afterwards.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Params {
    // ---- HORIZON ----

    /// Number of predicted states in the horizon (N).
    pub horizon_len: usize,

    /// Time between two predicted states.
    ///
    /// Units: seconds
    pub time_step_s: f64,

    // ---- VEHICLE MODEL ----

    /// Distance from the front axle to the centre of gravity.
    ///
    /// Obtained by matching the turning radius of the model to the radius
    /// driven by the vehicle at a constant steering angle and speed.
    ///
    /// Units: meters
    pub lf_m: f64,

    /// Reference speed the cost drives the vehicle towards.
    ///
    /// Units: distance units per second, matching the input state
    pub ref_speed_ms: f64,

    // ---- COST ----

    /// Per-step discount applied to every cost term, step `i` is weighted by
    /// `decay^i`.
    pub decay: f64,

    /// Cost term weights
    pub weights: CostWeights,

    // ---- BOUNDS ----

    /// Steering actuation limit, applied symmetrically.
    ///
    /// Units: radians
    pub steer_limit_rad: f64,

    /// Acceleration actuation limit, applied symmetrically.
    ///
    /// Units: meters/second^2
    pub accel_limit_mss: f64,

    /// Bound applied to the predicted state variables, large enough to leave
    /// them effectively unconstrained.
    pub state_bound: f64,

    // ---- SOLVER ----

    /// Solver configuration
    pub solver: SolverConfig,

    // ---- FALLBACK ----

    /// Behaviour when the solver fails
    pub fallback: FallbackParams,
}

/// Weights of the individual cost terms.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    /// Cross track error
    pub cte: f64,

    /// Heading error
    pub epsi: f64,

    /// Deviation from the reference speed
    pub speed: f64,

    /// Steering magnitude
    pub steer: f64,

    /// Acceleration magnitude
    pub accel: f64,

    /// Steering multiplied by speed, penalises sharp turns at high speed
    pub steer_speed: f64,

    /// Change in steering between consecutive actuations
    pub steer_rate: f64,

    /// Change in acceleration between consecutive actuations
    pub accel_rate: f64,
}

/// Parameters of the degraded result policy.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct FallbackParams {
    /// Number of consecutive failed cycles during which the previous command
    /// is held. Once exceeded the safe command is output instead.
    pub max_held_cycles: u32,

    /// Acceleration of the safe command, steering is always zero.
    ///
    /// Units: meters/second^2
    pub fallback_accel_mss: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            horizon_len: 8,
            time_step_s: 0.1,
            lf_m: 2.67,
            ref_speed_ms: 130.0,
            decay: 0.9,
            weights: CostWeights::default(),
            steer_limit_rad: 0.436332,
            accel_limit_mss: 2.0,
            state_bound: 1.0e10,
            solver: SolverConfig::default(),
            fallback: FallbackParams::default(),
        }
    }
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cte: 1000.0,
            epsi: 1000.0,
            speed: 1.0,
            steer: 300.0,
            accel: 70.0,
            steer_speed: 300.0,
            steer_rate: 200.0,
            accel_rate: 5.0,
        }
    }
}

impl Default for FallbackParams {
    fn default() -> Self {
        Self {
            max_held_cycles: 3,
            fallback_accel_mss: 0.0,
        }
    }
}

impl CostWeights {
    /// All weights set to zero.
    pub fn zero() -> Self {
        Self {
            cte: 0.0,
            epsi: 0.0,
            speed: 0.0,
            steer: 0.0,
            accel: 0.0,
            steer_speed: 0.0,
            steer_rate: 0.0,
            accel_rate: 0.0,
        }
    }

    fn named(&self) -> [(&'static str, f64); 8] {
        [
            ("cte", self.cte),
            ("epsi", self.epsi),
            ("speed", self.speed),
            ("steer", self.steer),
            ("accel", self.accel),
            ("steer_speed", self.steer_speed),
            ("steer_rate", self.steer_rate),
            ("accel_rate", self.accel_rate),
        ]
    }
}

impl Params {
    /// Check that the parameters describe a well-posed problem.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.horizon_len < MIN_HORIZON_LEN {
            return Err(ParamsError::HorizonTooShort(self.horizon_len));
        }

        // Written so that NaN fails the check
        if !(self.time_step_s > 0.0) {
            return Err(ParamsError::NonPositive("time_step_s", self.time_step_s));
        }
        if !(self.lf_m > 0.0) {
            return Err(ParamsError::NonPositive("lf_m", self.lf_m));
        }
        if !(self.steer_limit_rad > 0.0) {
            return Err(ParamsError::NonPositive("steer_limit_rad", self.steer_limit_rad));
        }
        if !(self.accel_limit_mss > 0.0) {
            return Err(ParamsError::NonPositive("accel_limit_mss", self.accel_limit_mss));
        }
        if !(self.state_bound > 0.0) {
            return Err(ParamsError::NonPositive("state_bound", self.state_bound));
        }
        if !self.ref_speed_ms.is_finite() {
            return Err(ParamsError::NotFinite("ref_speed_ms", self.ref_speed_ms));
        }

        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return Err(ParamsError::InvalidDecay(self.decay));
        }

        for (name, w) in self.weights.named().iter() {
            if !(*w >= 0.0) || !w.is_finite() {
                return Err(ParamsError::InvalidWeight(*name, *w));
            }
        }

        if !self.fallback.fallback_accel_mss.is_finite()
            || self.fallback.fallback_accel_mss.abs() > self.accel_limit_mss
        {
            return Err(ParamsError::FallbackOutsideLimits(
                self.fallback.fallback_accel_mss,
            ));
        }

        self.solver.validate()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
