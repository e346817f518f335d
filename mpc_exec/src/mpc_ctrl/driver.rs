//! # Optimisation driver
//!
//! Assembles the nonlinear program for one control cycle, runs the solver
//! and extracts the command and predicted trajectory from its answer.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace};
use num_dual::DualNum;
use serde::Serialize;

// Internal
use super::{
    Bounds, ConstraintEvaluator, CostEvaluator, Formulation, Layout, MpcCtrlError, NlpProblem,
    NlpSolver, Params, ParamsError, PathCoeffs, SolveSummary, VehicleState,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The cost and dynamics constraints of one cycle, as seen by the solver.
#[derive(Debug, Clone, Copy)]
pub struct FgEval<'a> {
    layout: &'a Layout,
    cost: CostEvaluator<'a>,
    constraints: ConstraintEvaluator<'a>,
}

/// Result of a successful solve.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MpcOutput {
    /// Steering command, the first actuation of the horizon
    ///
    /// Units: radians
    pub steer_rad: f64,

    /// Acceleration command, the first actuation of the horizon
    ///
    /// Units: meters/second^2
    pub accel_mss: f64,

    /// Predicted positions (x, y) for steps 1 to N - 1
    pub trajectory: Vec<(f64, f64)>,
}

/// Model predictive controller, generic over the solver backend.
pub struct Mpc<S: NlpSolver> {
    params: Params,
    layout: Layout,
    solver: S,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<'a> FgEval<'a> {
    pub fn new(layout: &'a Layout, params: &Params, coeffs: PathCoeffs) -> Self {
        Self {
            layout,
            cost: CostEvaluator::new(layout, params),
            constraints: ConstraintEvaluator::new(layout, params, coeffs),
        }
    }
}

impl<'a> NlpProblem for FgEval<'a> {
    fn num_vars(&self) -> usize {
        self.layout.n_vars()
    }

    fn num_constraints(&self) -> usize {
        self.layout.n_constraints()
    }

    fn cost<D: DualNum<f64> + Copy>(&self, vars: &[D]) -> D {
        self.cost.eval(vars)
    }

    fn constraints<D: DualNum<f64> + Copy>(&self, vars: &[D], residuals: &mut [D]) {
        self.constraints.eval(vars, residuals)
    }

    /// The actuations, the predicted states follow from them and the step 0
    /// states.
    fn free_vars(&self) -> Option<Vec<usize>> {
        Some((self.layout.delta_start()..self.layout.n_vars()).collect())
    }

    fn complete<D: DualNum<f64> + Copy>(&self, vars: &mut [D]) {
        self.constraints.rollout(vars)
    }
}

impl MpcOutput {
    /// Extract the output from a solved decision vector.
    pub fn from_solution(layout: &Layout, x: &[f64]) -> Self {
        Self {
            steer_rad: x[layout.delta(0)],
            accel_mss: x[layout.a(0)],
            trajectory: (1..layout.n())
                .map(|t| (x[layout.x(t)], x[layout.y(t)]))
                .collect(),
        }
    }

    /// Flatten to `[steer, accel, x1, y1, x2, y2, ...]`.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(2 + 2 * self.trajectory.len());
        v.push(self.steer_rad);
        v.push(self.accel_mss);

        for &(x, y) in self.trajectory.iter() {
            v.push(x);
            v.push(y);
        }

        v
    }
}

impl<S: NlpSolver> Mpc<S> {
    /// Create a new controller, validating the parameters.
    pub fn new(params: Params, solver: S) -> Result<Self, ParamsError> {
        params.validate()?;
        let layout = Layout::new(params.horizon_len)?;

        Ok(Self {
            params,
            layout,
            solver,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Solve one cycle from the measured `state` along the path `coeffs`.
    ///
    /// Any solver status other than success is returned as
    /// `MpcCtrlError::SolverFailed`, no values are taken from a failed solve.
    pub fn solve(
        &mut self,
        state: &VehicleState,
        coeffs: &PathCoeffs,
    ) -> Result<(MpcOutput, SolveSummary), MpcCtrlError> {
        let formulation = formulate(&self.layout, &self.params, state, *coeffs);

        let solution = self.solver.solve(&formulation, &self.params.solver);

        debug!(
            "MPC solve: {:?} in {:.4} s, cost {:.3}, {} iterations",
            solution.summary.status,
            solution.summary.solve_time_s,
            solution.summary.cost,
            solution.summary.num_iterations
        );

        if !solution.summary.status.is_success() {
            return Err(MpcCtrlError::SolverFailed(solution.summary));
        }

        assert_eq!(
            solution.x.len(),
            self.layout.n_vars(),
            "Solver returned a decision vector of the wrong length"
        );

        let output = MpcOutput::from_solution(&self.layout, &solution.x);
        trace!("MPC output: {:?}", output);

        Ok((output, solution.summary))
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Assemble the program for one cycle.
pub fn formulate<'a>(
    layout: &'a Layout,
    params: &Params,
    state: &VehicleState,
    coeffs: PathCoeffs,
) -> Formulation<FgEval<'a>> {
    let bounds = Bounds::generate(layout, params, state);

    Formulation {
        problem: FgEval::new(layout, params, coeffs),
        vars_init: Bounds::initial_guess(layout, state),
        vars_lower: bounds.vars_lower,
        vars_upper: bounds.vars_upper,
        cons_lower: bounds.cons_lower,
        cons_upper: bounds.cons_upper,
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::mpc_ctrl::{
        solver::{cost_gradient, max_violation, Reduced},
        Solution, SolveStatus, SolverConfig,
    };

    /// Returns the initial guess, or a fixed vector, with the given status.
    struct MockSolver {
        status: SolveStatus,
        answer: Option<Vec<f64>>,
        calls: usize,
    }

    impl MockSolver {
        fn new(status: SolveStatus) -> Self {
            Self {
                status,
                answer: None,
                calls: 0,
            }
        }
    }

    impl NlpSolver for MockSolver {
        fn solve<P: NlpProblem>(&mut self, formulation: &Formulation<P>, _: &SolverConfig) -> Solution {
            self.calls += 1;

            assert_eq!(formulation.vars_init.len(), formulation.problem.num_vars());
            assert_eq!(formulation.cons_lower.len(), formulation.problem.num_constraints());

            Solution {
                summary: SolveSummary {
                    status: self.status,
                    cost: 0.0,
                    num_iterations: 1,
                    num_outer_iterations: 1,
                    solve_time_s: 0.0,
                },
                x: self
                    .answer
                    .clone()
                    .unwrap_or_else(|| formulation.vars_init.clone()),
            }
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = Params::default();
        params.horizon_len = 1;

        assert!(matches!(
            Mpc::new(params, MockSolver::new(SolveStatus::Success)),
            Err(ParamsError::HorizonTooShort(1))
        ));
    }

    #[test]
    fn test_output_extraction() {
        let params = Params::default();
        let mut mpc = Mpc::new(params, MockSolver::new(SolveStatus::Success)).unwrap();
        let l = *mpc.layout();

        let mut answer = vec![0.0; l.n_vars()];
        answer[l.delta(0)] = 0.1;
        answer[l.a(0)] = -0.5;
        answer[l.delta(1)] = 0.3;
        for t in 0..l.n() {
            answer[l.x(t)] = t as f64;
            answer[l.y(t)] = -(t as f64);
        }
        mpc.solver.answer = Some(answer);

        let (out, summary) = mpc.solve(&VehicleState::default(), &PathCoeffs::flat()).unwrap();

        assert_eq!(summary.status, SolveStatus::Success);
        assert_eq!(out.steer_rad, 0.1);
        assert_eq!(out.accel_mss, -0.5);
        assert_eq!(out.trajectory.len(), l.n() - 1);
        assert_eq!(out.trajectory[0], (1.0, -1.0));

        let v = out.to_vec();
        assert_eq!(v.len(), 2 + 2 * (l.n() - 1));
        assert_eq!(&v[..6], &[0.1, -0.5, 1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn test_failure_returns_no_values() {
        for &status in [
            SolveStatus::MaxIterations,
            SolveStatus::OutOfTime,
            SolveStatus::EvaluationError,
        ]
        .iter()
        {
            let mut mpc = Mpc::new(Params::default(), MockSolver::new(status)).unwrap();

            match mpc.solve(&VehicleState::default(), &PathCoeffs::flat()) {
                Err(MpcCtrlError::SolverFailed(s)) => assert_eq!(s.status, status),
                other => panic!("Expected a solver failure, got {:?}", other.map(|o| o.0)),
            }
            assert_eq!(mpc.solver.calls, 1, "No retry expected");
        }
    }

    /// Gradient over the actuations, taken through the rollout, against
    /// central differences.
    #[test]
    fn test_reduced_gradient() {
        let params = Params::default();
        let layout = Layout::new(params.horizon_len).unwrap();
        let state = VehicleState::from_slice(&[0.5, -0.3, 0.05, 10.0, 0.4, -0.1]).unwrap();
        let coeffs = PathCoeffs::from_slice(&[0.1, 0.05, 0.01, -0.001]).unwrap();
        let f = formulate(&layout, &params, &state, coeffs);

        let free = f.problem.free_vars().unwrap();
        assert_eq!(free.len(), 2 * layout.num_actuations());
        assert_eq!(free[0], layout.delta(0));

        let reduced = Reduced::new(&f.problem, free, &f.vars_init);
        let u: Vec<f64> = (0..reduced.num_vars())
            .map(|i| 0.02 * (i as f64 - 4.0))
            .collect();

        let mut grad = vec![0.0; u.len()];
        cost_gradient(&reduced, &u, &mut grad);

        let h = 1e-5;
        for j in 0..u.len() {
            let mut up = u.clone();
            let mut down = u.clone();
            up[j] += h;
            down[j] -= h;
            let fd = (reduced.cost(&up) - reduced.cost(&down)) / (2.0 * h);

            assert!(
                (grad[j] - fd).abs() <= 1e-4 * (1.0 + fd.abs()),
                "d/du[{}]: {} against {}",
                j,
                grad[j],
                fd
            );
        }

        // The expanded vector keeps the measured state and is feasible
        let x = reduced.expand(&u);
        assert_eq!(x[layout.v(0)], 10.0);
        assert_eq!(max_violation(&f, &x), 0.0);
    }

    #[test]
    fn test_formulation() {
        let params = Params::default();
        let layout = Layout::new(params.horizon_len).unwrap();
        let state = VehicleState::from_slice(&[1.0, 2.0, 0.1, 5.0, 0.2, 0.3]).unwrap();

        let f = formulate(&layout, &params, &state, PathCoeffs::flat());

        assert_eq!(f.problem.num_vars(), layout.n_vars());
        assert_eq!(f.problem.num_constraints(), layout.n_constraints());
        assert_eq!(f.vars_init[layout.v(0)], 5.0);
        assert_eq!(f.cons_lower[layout.epsi(0)], 0.3);

        // The initial guess satisfies the step 0 constraints exactly
        let mut res = vec![0.0; layout.n_constraints()];
        f.problem.constraints(&f.vars_init, &mut res);
        for &start in layout.state_offsets().iter() {
            assert_eq!(res[start], f.cons_lower[start]);
        }
    }
}
