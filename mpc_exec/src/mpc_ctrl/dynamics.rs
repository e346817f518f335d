//! # Dynamics constraint evaluator
//!
//! Produces the residuals of the kinematic model between every pair of
//! consecutive predicted states. A decision vector is dynamically feasible
//! exactly when every residual from step 1 onwards is zero.
//!
//! The model, for a transition from step `t - 1` (suffix 0) to `t` (suffix 1):
//!
//! ```text
//! x1    = x0 + v0 * cos(psi0) * dt
//! y1    = y0 + v0 * sin(psi0) * dt
//! psi1  = psi0 - v0 / Lf * delta * dt
//! v1    = v0 + a * dt
//! cte1  = (f(x0) - y0) + v0 * sin(epsi0) * dt
//! epsi1 = (psi0 - atan(f'(x0))) - v0 / Lf * delta * dt
//! ```
//!
//! where `f` is the reference path polynomial and `(delta, a)` is the
//! actuation selected by `Layout::latency_actuation_index`. Steering is
//! subtracted, a positive steering angle turns the vehicle clockwise.
//!
//! The step 0 residuals are the raw step 0 states, which the bounds pin to
//! the measurement.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use num_dual::DualNum;

// Internal
use super::{Layout, Params, PathCoeffs};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Evaluates the dynamics residuals of a decision vector.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintEvaluator<'a> {
    layout: &'a Layout,
    coeffs: PathCoeffs,
    dt: f64,
    lf: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<'a> ConstraintEvaluator<'a> {
    pub fn new(layout: &'a Layout, params: &Params, coeffs: PathCoeffs) -> Self {
        Self {
            layout,
            coeffs,
            dt: params.time_step_s,
            lf: params.lf_m,
        }
    }

    /// Write the residuals of `vars` into `residuals`.
    pub fn eval<D>(&self, vars: &[D], residuals: &mut [D])
    where
        D: DualNum<f64> + Copy,
    {
        let l = self.layout;
        let dt = self.dt;

        assert_eq!(vars.len(), l.n_vars(), "Decision vector does not match the layout");
        assert_eq!(residuals.len(), l.n_constraints(), "Residual vector does not match the layout");

        // Initial state, pinned by the constraint bounds
        for &start in l.state_offsets().iter() {
            residuals[start] = vars[start];
        }

        for t in 1..l.n() {
            // State at t
            let x1 = vars[l.x(t)];
            let y1 = vars[l.y(t)];
            let psi1 = vars[l.psi(t)];
            let v1 = vars[l.v(t)];
            let cte1 = vars[l.cte(t)];
            let epsi1 = vars[l.epsi(t)];

            // State at t - 1
            let x0 = vars[l.x(t - 1)];
            let y0 = vars[l.y(t - 1)];
            let psi0 = vars[l.psi(t - 1)];
            let v0 = vars[l.v(t - 1)];
            let epsi0 = vars[l.epsi(t - 1)];

            let k = Layout::latency_actuation_index(t);
            let delta = vars[l.delta(k)];
            let a = vars[l.a(k)];

            let f0 = self.coeffs.eval(x0);
            let psides0 = self.coeffs.heading(x0);

            // Heading change due to steering
            let yaw_step = v0 * delta * (dt / self.lf);

            residuals[l.x(t)] = x1 - (x0 + v0 * psi0.cos() * dt);
            residuals[l.y(t)] = y1 - (y0 + v0 * psi0.sin() * dt);
            residuals[l.psi(t)] = psi1 - (psi0 - yaw_step);
            residuals[l.v(t)] = v1 - (v0 + a * dt);
            residuals[l.cte(t)] = cte1 - ((f0 - y0) + v0 * epsi0.sin() * dt);
            residuals[l.epsi(t)] = epsi1 - ((psi0 - psides0) - yaw_step);
        }
    }

    /// Roll the model forward from the step 0 states already in `vars`,
    /// under the actuations already in `vars`, overwriting the predicted
    /// states of steps 1 to N - 1.
    ///
    /// The result has exactly zero residuals from step 1 onwards, which lets
    /// the solver search over the actuations alone.
    pub fn rollout<D>(&self, vars: &mut [D])
    where
        D: DualNum<f64> + Copy,
    {
        let l = self.layout;
        let dt = self.dt;

        assert_eq!(vars.len(), l.n_vars(), "Decision vector does not match the layout");

        for t in 1..l.n() {
            let x0 = vars[l.x(t - 1)];
            let y0 = vars[l.y(t - 1)];
            let psi0 = vars[l.psi(t - 1)];
            let v0 = vars[l.v(t - 1)];
            let epsi0 = vars[l.epsi(t - 1)];

            let k = Layout::latency_actuation_index(t);
            let yaw_step = v0 * vars[l.delta(k)] * (dt / self.lf);

            let f0 = self.coeffs.eval(x0);
            let psides0 = self.coeffs.heading(x0);

            vars[l.x(t)] = x0 + v0 * psi0.cos() * dt;
            vars[l.y(t)] = y0 + v0 * psi0.sin() * dt;
            vars[l.psi(t)] = psi0 - yaw_step;
            vars[l.v(t)] = v0 + vars[l.a(k)] * dt;
            vars[l.cte(t)] = (f0 - y0) + v0 * epsi0.sin() * dt;
            vars[l.epsi(t)] = (psi0 - psides0) - yaw_step;
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
