//! # Bounds generator
//!
//! Builds the variable bounds, constraint bounds and initial guess for a
//! single solve.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use super::{Layout, Params, VehicleState};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Lower and upper bounds on the decision vector and on the constraint
/// residuals.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub vars_lower: Vec<f64>,
    pub vars_upper: Vec<f64>,
    pub cons_lower: Vec<f64>,
    pub cons_upper: Vec<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Bounds {
    /// Generate the bounds for the given layout and measured state.
    ///
    /// States are effectively unbounded, actuators are limited symmetrically
    /// and all residuals are forced to zero except those at step 0, which are
    /// forced to the measured state.
    pub fn generate(layout: &Layout, params: &Params, state: &VehicleState) -> Self {
        let mut vars_lower = vec![0.0; layout.n_vars()];
        let mut vars_upper = vec![0.0; layout.n_vars()];

        for i in 0..layout.delta_start() {
            vars_lower[i] = -params.state_bound;
            vars_upper[i] = params.state_bound;
        }
        for i in 0..layout.num_actuations() {
            vars_lower[layout.delta(i)] = -params.steer_limit_rad;
            vars_upper[layout.delta(i)] = params.steer_limit_rad;
            vars_lower[layout.a(i)] = -params.accel_limit_mss;
            vars_upper[layout.a(i)] = params.accel_limit_mss;
        }

        let mut cons_lower = vec![0.0; layout.n_constraints()];
        let mut cons_upper = vec![0.0; layout.n_constraints()];

        for (&start, &value) in layout.state_offsets().iter().zip(state.as_array().iter()) {
            cons_lower[start] = value;
            cons_upper[start] = value;
        }

        Self {
            vars_lower,
            vars_upper,
            cons_lower,
            cons_upper,
        }
    }

    /// Initial decision vector: zero everywhere except the step 0 states,
    /// which hold the measured state.
    pub fn initial_guess(layout: &Layout, state: &VehicleState) -> Vec<f64> {
        let mut vars = vec![0.0; layout.n_vars()];

        for (&start, &value) in layout.state_offsets().iter().zip(state.as_array().iter()) {
            vars[start] = value;
        }

        vars
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn state() -> VehicleState {
        VehicleState::from_slice(&[1.5, -2.0, 0.3, 12.0, 0.25, -0.1]).unwrap()
    }

    #[test]
    fn test_lengths() {
        let params = Params::default();

        for n in 2..20 {
            let layout = Layout::new(n).unwrap();
            let b = Bounds::generate(&layout, &params, &state());

            assert_eq!(b.vars_lower.len(), 6 * n + 2 * (n - 1));
            assert_eq!(b.vars_upper.len(), 6 * n + 2 * (n - 1));
            assert_eq!(b.cons_lower.len(), 6 * n);
            assert_eq!(b.cons_upper.len(), 6 * n);
            assert_eq!(Bounds::initial_guess(&layout, &state()).len(), 6 * n + 2 * (n - 1));
        }
    }

    #[test]
    fn test_pinning() {
        let params = Params::default();
        let layout = Layout::new(params.horizon_len).unwrap();
        let s = state();
        let b = Bounds::generate(&layout, &params, &s);

        let expected = s.as_array();
        for (k, &start) in layout.state_offsets().iter().enumerate() {
            assert_eq!(b.cons_lower[start], expected[k]);
            assert_eq!(b.cons_upper[start], expected[k]);

            // Every later step is forced to a zero residual
            for t in 1..layout.n() {
                assert_eq!(b.cons_lower[start + t], 0.0);
                assert_eq!(b.cons_upper[start + t], 0.0);
            }
        }
    }

    #[test]
    fn test_limits() {
        let params = Params::default();
        let layout = Layout::new(params.horizon_len).unwrap();
        let b = Bounds::generate(&layout, &params, &state());

        for i in 0..layout.delta_start() {
            assert_eq!(b.vars_lower[i], -1.0e10);
            assert_eq!(b.vars_upper[i], 1.0e10);
        }
        for i in 0..layout.num_actuations() {
            assert_eq!(b.vars_lower[layout.delta(i)], -0.436332);
            assert_eq!(b.vars_upper[layout.delta(i)], 0.436332);
            assert_eq!(b.vars_lower[layout.a(i)], -2.0);
            assert_eq!(b.vars_upper[layout.a(i)], 2.0);
        }
    }

    #[test]
    fn test_initial_guess() {
        let layout = Layout::new(5).unwrap();
        let s = state();
        let guess = Bounds::initial_guess(&layout, &s);

        let pinned: Vec<usize> = layout.state_offsets().to_vec();
        for (i, &g) in guess.iter().enumerate() {
            if let Some(k) = pinned.iter().position(|&p| p == i) {
                assert_eq!(g, s.as_array()[k]);
            } else {
                assert_eq!(g, 0.0);
            }
        }
    }
}
