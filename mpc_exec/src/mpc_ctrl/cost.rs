//! # Cost evaluator
//!
//! The cost is a discounted sum over the horizon of three groups of terms:
//!
//! - tracking: cross track error, heading error and speed error at every
//!   predicted state,
//! - effort: steering, acceleration and steering times speed at every
//!   actuation,
//! - smoothness: change in steering and acceleration between consecutive
//!   actuations.
//!
//! Every term at step `i` is multiplied by `decay^i`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use num_dual::DualNum;

// Internal
use super::{CostWeights, Layout, Params};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Evaluates the scalar cost of a decision vector.
#[derive(Debug, Clone, Copy)]
pub struct CostEvaluator<'a> {
    layout: &'a Layout,
    weights: CostWeights,
    ref_speed: f64,
    decay: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<'a> CostEvaluator<'a> {
    pub fn new(layout: &'a Layout, params: &Params) -> Self {
        Self {
            layout,
            weights: params.weights,
            ref_speed: params.ref_speed_ms,
            decay: params.decay,
        }
    }

    /// Discount applied to terms at step `i`.
    pub fn discount(&self, i: usize) -> f64 {
        self.decay.powi(i as i32)
    }

    /// Total cost of the decision vector `vars`.
    pub fn eval<D>(&self, vars: &[D]) -> D
    where
        D: DualNum<f64> + Copy,
    {
        let l = self.layout;
        let w = &self.weights;

        assert_eq!(vars.len(), l.n_vars(), "Decision vector does not match the layout");

        let mut cost = D::from(0.0);

        // Tracking
        for i in 0..l.n() {
            let k = self.discount(i);
            let speed_err = vars[l.v(i)] - self.ref_speed;

            cost = cost + sq(vars[l.cte(i)]) * (w.cte * k);
            cost = cost + sq(vars[l.epsi(i)]) * (w.epsi * k);
            cost = cost + sq(speed_err) * (w.speed * k);
        }

        // Effort
        for i in 0..l.num_actuations() {
            let k = self.discount(i);
            let delta = vars[l.delta(i)];

            cost = cost + sq(delta) * (w.steer * k);
            cost = cost + sq(vars[l.a(i)]) * (w.accel * k);
            cost = cost + sq(delta * vars[l.v(i)]) * (w.steer_speed * k);
        }

        // Smoothness
        for i in 0..l.num_actuations() - 1 {
            let k = self.discount(i);

            cost = cost + sq(vars[l.delta(i + 1)] - vars[l.delta(i)]) * (w.steer_rate * k);
            cost = cost + sq(vars[l.a(i + 1)] - vars[l.a(i)]) * (w.accel_rate * k);
        }

        cost
    }
}

#[inline]
fn sq<D: DualNum<f64> + Copy>(x: D) -> D {
    x * x
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use num_dual::Dual64;

    fn setup(weights: CostWeights, ref_speed: f64) -> (Layout, Params) {
        let mut params = Params::default();
        params.weights = weights;
        params.ref_speed_ms = ref_speed;
        (Layout::new(params.horizon_len).unwrap(), params)
    }

    #[test]
    fn test_zero_vector_costs_speed_error_only() {
        let (layout, params) = setup(CostWeights::default(), 130.0);
        let eval = CostEvaluator::new(&layout, &params);

        let vars = vec![0.0; layout.n_vars()];
        let expected: f64 = (0..layout.n()).map(|i| 130f64.powi(2) * 0.9f64.powi(i as i32)).sum();

        assert!((eval.eval(&vars) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_decay_is_monotonic() {
        // Only the cross track weight is active, so the cost of a unit cte at
        // step i is exactly its discounted weight.
        let mut weights = CostWeights::zero();
        weights.cte = 1.0;
        let (layout, params) = setup(weights, 0.0);
        let eval = CostEvaluator::new(&layout, &params);

        let mut prev = std::f64::INFINITY;
        for i in 0..layout.n() {
            let mut vars = vec![0.0; layout.n_vars()];
            vars[layout.cte(i)] = 1.0;

            let c = eval.eval(&vars);
            assert!(c < prev, "Step {} cost {} not below step {} cost {}", i, c, i as i64 - 1, prev);
            assert!((c - 0.9f64.powi(i as i32)).abs() < 1e-12);
            prev = c;
        }
    }

    #[test]
    fn test_term_ranges() {
        // With only the smoothness weight active, the last actuation pair is
        // the final term counted.
        let mut weights = CostWeights::zero();
        weights.steer_rate = 1.0;
        let (layout, params) = setup(weights, 0.0);
        let eval = CostEvaluator::new(&layout, &params);

        let last = layout.num_actuations() - 1;
        let mut vars = vec![0.0; layout.n_vars()];
        vars[layout.delta(last)] = 1.0;

        // Only the pair (last - 1, last) sees the step
        let expected = 0.9f64.powi(last as i32 - 1);
        assert!((eval.eval(&vars) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_steer_speed_coupling() {
        let mut weights = CostWeights::zero();
        weights.steer_speed = 2.0;
        let (layout, params) = setup(weights, 0.0);
        let eval = CostEvaluator::new(&layout, &params);

        let mut vars = vec![0.0; layout.n_vars()];
        vars[layout.delta(1)] = 0.1;
        vars[layout.v(1)] = 20.0;

        // Steering without speed costs nothing
        let mut still = vars.clone();
        still[layout.v(1)] = 0.0;

        assert!((eval.eval(&vars) - 2.0 * 4.0 * 0.9).abs() < 1e-9);
        assert_eq!(eval.eval(&still), 0.0);
    }

    #[test]
    fn test_dual_gradient_matches_finite_difference() {
        let (layout, params) = setup(CostWeights::default(), 130.0);
        let eval = CostEvaluator::new(&layout, &params);

        let vars: Vec<f64> = (0..layout.n_vars()).map(|i| 0.01 * (i as f64).sin()).collect();
        let h = 1e-6;

        for j in [layout.cte(2), layout.v(0), layout.delta(3), layout.a(6)].iter().copied() {
            let mut duals: Vec<Dual64> = vars.iter().map(|&x| Dual64::new(x, 0.0)).collect();
            duals[j].eps = 1.0;
            let analytic = eval.eval(&duals).eps;

            let mut plus = vars.clone();
            plus[j] += h;
            let mut minus = vars.clone();
            minus[j] -= h;
            let numeric = (eval.eval(&plus) - eval.eval(&minus)) / (2.0 * h);

            assert!(
                (analytic - numeric).abs() < 1e-3 * (1.0 + numeric.abs()),
                "Gradient mismatch at {}: {} vs {}",
                j,
                analytic,
                numeric
            );
        }
    }
}
