//! Closed loop kinematic simulation
//!
//! The simulated vehicle follows the same kinematic bicycle model that MPC
//! control predicts with, without the actuator latency: the command applied
//! in a step takes effect immediately.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use crate::mpc_ctrl::{PathCoeffs, VehicleState, NUM_PATH_COEFFS};
use util::maths::{poly_slope_asc, poly_val_asc, wrap_to_pi};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of the simulation run.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SimParams {
    /// Number of control cycles to run
    pub num_cycles: usize,

    /// Simulation step, equal to the control period.
    ///
    /// Units: seconds
    pub time_step_s: f64,

    /// Distance from the front axle to the centre of gravity of the
    /// simulated vehicle.
    ///
    /// Units: meters
    pub lf_m: f64,

    /// Initial position (x, y).
    ///
    /// Units: meters
    pub initial_pos_m: [f64; 2],

    /// Initial heading.
    ///
    /// Units: radians
    pub initial_heading_rad: f64,

    /// Initial speed.
    ///
    /// Units: meters/second
    pub initial_speed_ms: f64,

    /// Reference path coefficients, ascending power order
    pub path_coeffs: [f64; NUM_PATH_COEFFS],

    /// Cross track error beyond which the run is considered diverged.
    ///
    /// Units: meters
    pub max_abs_cte_m: f64,
}

/// Pose and speed of the simulated vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SimVehicle {
    pub x: f64,
    pub y: f64,
    pub psi: f64,
    pub v: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimVehicle {
    pub fn new(params: &SimParams) -> Self {
        Self {
            x: params.initial_pos_m[0],
            y: params.initial_pos_m[1],
            psi: params.initial_heading_rad,
            v: params.initial_speed_ms,
        }
    }

    /// Advance the vehicle by `dt` under the given command.
    pub fn step(&mut self, steer_rad: f64, accel_mss: f64, dt: f64, lf_m: f64) {
        let v0 = self.v;
        let psi0 = self.psi;

        self.x += v0 * psi0.cos() * dt;
        self.y += v0 * psi0.sin() * dt;
        self.psi = wrap_to_pi(psi0 - v0 / lf_m * steer_rad * dt);
        self.v = v0 + accel_mss * dt;
    }

    /// Full tracking state of the vehicle against the path.
    pub fn tracking_state(&self, coeffs: &PathCoeffs) -> VehicleState {
        let c = coeffs.as_slice();

        VehicleState {
            x: self.x,
            y: self.y,
            psi: self.psi,
            v: self.v,
            cte: poly_val_asc(self.x, c) - self.y,
            epsi: wrap_to_pi(self.psi - poly_slope_asc(self.x, c).atan()),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
