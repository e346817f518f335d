//! # Nonlinear program solver interface
//!
//! The MPC driver poses its problem through `NlpProblem` and `Formulation`
//! and hands it to any `NlpSolver`. `AlmSolver` is the production backend,
//! solving
//!
//! ```text
//! minimise   f(u)
//! subject to u_lower <= u <= u_upper
//!            g_lower <= g(u) <= g_upper
//! ```
//!
//! with the augmented Lagrangian method from `optimization_engine`, PANOC
//! being used for the inner problems. Derivatives are taken by forward mode
//! automatic differentiation through `num_dual`.
//!
//! Problems which can recompute some of their variables from the others
//! (`NlpProblem::free_vars` and `NlpProblem::complete`) are solved in the
//! reduced space instead: PANOC searches over the free variables only, inside
//! their bounds, and the constraints hold by construction. For the MPC
//! problem the free variables are the actuations and the completion is a
//! rollout of the model, which keeps the search small and well conditioned
//! whatever the bounds on the predicted states.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use num_dual::{Dual64, DualNum};
use optimization_engine::{
    alm::{AlmCache, AlmFactory, AlmOptimizer, AlmProblem, NO_JACOBIAN_MAPPING, NO_MAPPING},
    constraints::{BallInf, Rectangle},
    core::{ExitStatus, Optimizer, Problem},
    panoc::{PANOCCache, PANOCOptimizer},
    FunctionCallResult, SolverError,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

// Internal
use super::ParamsError;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Radius of the set the Lagrange multipliers are projected onto.
const MULTIPLIER_BOUND: f64 = 1.0e12;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A nonlinear program whose cost and constraints can be evaluated over any
/// dual number type, giving derivatives for free.
pub trait NlpProblem {
    /// Length of the decision vector.
    fn num_vars(&self) -> usize;

    /// Length of the constraint residual vector.
    fn num_constraints(&self) -> usize;

    /// Scalar cost of `vars`.
    fn cost<D: DualNum<f64> + Copy>(&self, vars: &[D]) -> D;

    /// Constraint residuals of `vars`, written into `residuals`.
    fn constraints<D: DualNum<f64> + Copy>(&self, vars: &[D], residuals: &mut [D]);

    /// Indices of the variables which, with the initial guess, determine all
    /// others through `complete`. `None` if the problem has no such
    /// structure.
    fn free_vars(&self) -> Option<Vec<usize>> {
        None
    }

    /// Overwrite every variable not listed by `free_vars` so that the
    /// constraints hold.
    fn complete<D: DualNum<f64> + Copy>(&self, _vars: &mut [D]) {}
}

/// A solver for bound constrained nonlinear programs.
pub trait NlpSolver {
    fn solve<P: NlpProblem>(&mut self, formulation: &Formulation<P>, config: &SolverConfig) -> Solution;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Solver settings, loaded as the `[solver]` table of the MPC parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Wall clock budget of a single solve.
    ///
    /// Units: seconds
    pub max_cpu_time_s: f64,

    /// Keep the constraint Jacobian as a list of nonzero entries rather than
    /// a dense matrix.
    pub sparse_forward: bool,

    /// Skip Jacobian rows with a zero multiplier when forming the transpose
    /// product.
    pub sparse_reverse: bool,

    /// Solver verbosity, 0 is silent.
    pub print_level: u8,

    /// Target tolerance of the inner (PANOC) problems.
    pub tolerance: f64,

    /// Allowed constraint violation at convergence.
    pub constraint_tolerance: f64,

    pub max_outer_iterations: usize,

    pub max_inner_iterations: usize,

    /// Number of L-BFGS correction pairs kept by PANOC.
    pub lbfgs_memory: usize,

    /// Starting penalty parameter of the augmented Lagrangian.
    pub initial_penalty: f64,

    /// Factor the penalty is multiplied by when the constraint violation
    /// does not decrease fast enough.
    pub penalty_update_factor: f64,
}

/// The problem handed to a solver.
pub struct Formulation<P: NlpProblem> {
    pub problem: P,
    pub vars_init: Vec<f64>,
    pub vars_lower: Vec<f64>,
    pub vars_upper: Vec<f64>,
    pub cons_lower: Vec<f64>,
    pub cons_upper: Vec<f64>,
}

/// Final status of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolveStatus {
    Success,
    MaxIterations,
    OutOfTime,
    EvaluationError,

    /// Converged, but the answer violates the bounds by more than the
    /// constraint tolerance
    Infeasible,
}

/// Description of a solve attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolveSummary {
    pub status: SolveStatus,
    pub cost: f64,

    /// Total number of inner iterations
    pub num_iterations: usize,

    pub num_outer_iterations: usize,
    pub solve_time_s: f64,
}

/// Summary plus the final decision vector.
#[derive(Debug, Clone)]
pub struct Solution {
    pub summary: SolveSummary,
    pub x: Vec<f64>,
}

/// Augmented Lagrangian backend.
///
/// The solver caches are kept between solves and only rebuilt when the
/// problem size, tolerance or L-BFGS memory changes.
#[derive(Default)]
pub struct AlmSolver {
    alm_cache: Option<CacheEntry<AlmCache>>,
    panoc_cache: Option<CacheEntry<PANOCCache>>,
}

struct CacheEntry<C> {
    key: CacheKey,
    cache: C,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CacheKey {
    num_vars: usize,
    num_constraints: usize,
    lbfgs_memory: usize,
    tolerance: f64,
}

/// A problem seen through its free variables only.
///
/// Each evaluation writes the free values over `base` and lets
/// `NlpProblem::complete` fill in the rest.
pub struct Reduced<'p, P: NlpProblem> {
    problem: &'p P,
    free: Vec<usize>,
    base: Vec<f64>,
}

/// Jacobian of the constraint residuals, `num_constraints` by `num_vars`.
#[derive(Debug, Clone, PartialEq)]
pub enum Jacobian {
    /// Nonzero entries as (row, column, value)
    Sparse {
        rows: usize,
        cols: usize,
        entries: Vec<(usize, usize, f64)>,
    },

    Dense(DMatrix<f64>),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_cpu_time_s: 0.5,
            sparse_forward: true,
            sparse_reverse: true,
            print_level: 0,
            tolerance: 1.0e-4,
            constraint_tolerance: 1.0e-4,
            max_outer_iterations: 50,
            max_inner_iterations: 500,
            lbfgs_memory: 10,
            initial_penalty: 100.0,
            penalty_update_factor: 5.0,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if !(self.max_cpu_time_s > 0.0) || !self.max_cpu_time_s.is_finite() {
            return Err(ParamsError::InvalidSolverConfig("max_cpu_time_s", self.max_cpu_time_s));
        }
        if !(self.tolerance > 0.0) {
            return Err(ParamsError::InvalidSolverConfig("tolerance", self.tolerance));
        }
        if !(self.constraint_tolerance > 0.0) {
            return Err(ParamsError::InvalidSolverConfig(
                "constraint_tolerance",
                self.constraint_tolerance,
            ));
        }
        if self.max_outer_iterations == 0 {
            return Err(ParamsError::InvalidSolverConfig("max_outer_iterations", 0.0));
        }
        if self.max_inner_iterations == 0 {
            return Err(ParamsError::InvalidSolverConfig("max_inner_iterations", 0.0));
        }
        if self.lbfgs_memory == 0 {
            return Err(ParamsError::InvalidSolverConfig("lbfgs_memory", 0.0));
        }
        if !(self.initial_penalty > 0.0) {
            return Err(ParamsError::InvalidSolverConfig("initial_penalty", self.initial_penalty));
        }
        if !(self.penalty_update_factor > 1.0) {
            return Err(ParamsError::InvalidSolverConfig(
                "penalty_update_factor",
                self.penalty_update_factor,
            ));
        }

        Ok(())
    }

    /// The time budget as a `Duration`.
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_cpu_time_s)
    }
}

impl SolveStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SolveStatus::Success)
    }
}

impl From<ExitStatus> for SolveStatus {
    fn from(e: ExitStatus) -> Self {
        match e {
            ExitStatus::Converged => SolveStatus::Success,
            ExitStatus::NotConvergedIterations => SolveStatus::MaxIterations,
            ExitStatus::NotConvergedOutOfTime => SolveStatus::OutOfTime,
        }
    }
}

impl Jacobian {
    /// Compute `J^T d` into `out`.
    ///
    /// If `skip_zero_rows` is set rows whose multiplier is exactly zero are
    /// not visited.
    pub fn tr_mul_into(&self, d: &[f64], out: &mut [f64], skip_zero_rows: bool) {
        match self {
            Jacobian::Sparse { entries, .. } => {
                out.iter_mut().for_each(|o| *o = 0.0);
                for &(row, col, value) in entries.iter() {
                    if skip_zero_rows && d[row] == 0.0 {
                        continue;
                    }
                    out[col] += value * d[row];
                }
            }
            Jacobian::Dense(jac) => {
                if skip_zero_rows {
                    out.iter_mut().for_each(|o| *o = 0.0);
                    for (row, &m) in d.iter().enumerate() {
                        if m == 0.0 {
                            continue;
                        }
                        for (col, o) in out.iter_mut().enumerate() {
                            *o += jac[(row, col)] * m;
                        }
                    }
                } else {
                    let prod = jac.tr_mul(&DVector::from_column_slice(d));
                    out.copy_from_slice(prod.as_slice());
                }
            }
        }
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Jacobian::Sparse { rows, cols, .. } => (*rows, *cols),
            Jacobian::Dense(jac) => jac.shape(),
        }
    }

    /// Number of stored entries.
    pub fn num_entries(&self) -> usize {
        match self {
            Jacobian::Sparse { entries, .. } => entries.len(),
            Jacobian::Dense(jac) => jac.len(),
        }
    }

    /// Value at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self {
            Jacobian::Sparse { entries, .. } => entries
                .iter()
                .filter(|(r, c, _)| *r == row && *c == col)
                .map(|(_, _, v)| v)
                .sum(),
            Jacobian::Dense(jac) => jac[(row, col)],
        }
    }
}

impl<'p, P: NlpProblem> Reduced<'p, P> {
    pub fn new(problem: &'p P, free: Vec<usize>, base: &[f64]) -> Self {
        Self {
            problem,
            free,
            base: base.to_vec(),
        }
    }

    /// Full decision vector for the free values `u`.
    pub fn expand<D: DualNum<f64> + Copy>(&self, u: &[D]) -> Vec<D> {
        let mut vars: Vec<D> = self.base.iter().map(|&b| D::from(b)).collect();

        for (&i, &value) in self.free.iter().zip(u.iter()) {
            vars[i] = value;
        }
        self.problem.complete(&mut vars);

        vars
    }

    /// Pick the free values out of a full vector.
    pub fn restrict(&self, vars: &[f64]) -> Vec<f64> {
        self.free.iter().map(|&i| vars[i]).collect()
    }
}

impl<'p, P: NlpProblem> NlpProblem for Reduced<'p, P> {
    fn num_vars(&self) -> usize {
        self.free.len()
    }

    fn num_constraints(&self) -> usize {
        self.problem.num_constraints()
    }

    fn cost<D: DualNum<f64> + Copy>(&self, vars: &[D]) -> D {
        self.problem.cost(&self.expand(vars))
    }

    fn constraints<D: DualNum<f64> + Copy>(&self, vars: &[D], residuals: &mut [D]) {
        self.problem.constraints(&self.expand(vars), residuals)
    }
}

impl NlpSolver for AlmSolver {
    fn solve<P: NlpProblem>(&mut self, formulation: &Formulation<P>, config: &SolverConfig) -> Solution {
        let start = Instant::now();

        let result = match formulation.problem.free_vars() {
            Some(free) => self.solve_reduced(formulation, config, free),
            None => self.solve_alm(formulation, config),
        };

        let solution = match result {
            Ok(mut sol) => {
                project(&mut sol.x, &formulation.vars_lower, &formulation.vars_upper);
                sol
            }
            Err(e) => {
                debug!("Solver returned an error: {:?}", e);
                Solution {
                    summary: SolveSummary {
                        status: SolveStatus::EvaluationError,
                        cost: std::f64::NAN,
                        num_iterations: 0,
                        num_outer_iterations: 0,
                        solve_time_s: start.elapsed().as_secs_f64(),
                    },
                    x: formulation.vars_init.clone(),
                }
            }
        };

        if config.print_level > 0 {
            info!("Solve summary: {:?}", solution.summary);
        } else {
            debug!("Solve summary: {:?}", solution.summary);
        }

        solution
    }
}

impl AlmSolver {
    /// Solve over the free variables with PANOC.
    fn solve_reduced<P: NlpProblem>(
        &mut self,
        formulation: &Formulation<P>,
        config: &SolverConfig,
        free: Vec<usize>,
    ) -> Result<Solution, SolverError> {
        let lower: Vec<f64> = free.iter().map(|&i| formulation.vars_lower[i]).collect();
        let upper: Vec<f64> = free.iter().map(|&i| formulation.vars_upper[i]).collect();

        let reduced = Reduced::new(&formulation.problem, free, &formulation.vars_init);
        let mut u = reduced.restrict(&formulation.vars_init);
        project(&mut u, &lower, &upper);

        let key = CacheKey {
            num_vars: u.len(),
            num_constraints: 0,
            lbfgs_memory: config.lbfgs_memory,
            tolerance: config.tolerance,
        };
        let cache = cached(&mut self.panoc_cache, key, || {
            PANOCCache::new(key.num_vars, key.tolerance, key.lbfgs_memory)
        });

        let f = |u: &[f64], cost: &mut f64| -> FunctionCallResult {
            *cost = reduced.cost(u);
            finite_or_err(&[*cost])
        };
        let df = |u: &[f64], grad: &mut [f64]| -> FunctionCallResult {
            cost_gradient(&reduced, u, grad);
            finite_or_err(grad)
        };

        let bounds = Rectangle::new(Some(&lower), Some(&upper));
        let problem = Problem::new(&bounds, df, f);

        let mut optimizer = PANOCOptimizer::new(problem, cache)
            .with_max_iter(config.max_inner_iterations)
            .with_max_duration(config.max_duration());

        let panoc_status = optimizer.solve(&mut u)?;

        let x = reduced.expand(&u);
        let cost = formulation.problem.cost(&x);
        finite_or_err(&x)?;

        // The completion must leave the constraints satisfied
        let violation = max_violation(formulation, &x);
        let status = match SolveStatus::from(panoc_status.exit_status()) {
            SolveStatus::Success if violation > config.constraint_tolerance => {
                debug!("Reduced solve violates the bounds by {:e}", violation);
                SolveStatus::Infeasible
            }
            s => s,
        };

        Ok(Solution {
            summary: SolveSummary {
                status,
                cost,
                num_iterations: panoc_status.iterations(),
                num_outer_iterations: 1,
                solve_time_s: panoc_status.solve_time().as_secs_f64(),
            },
            x,
        })
    }

    /// Solve the full problem with the augmented Lagrangian method.
    fn solve_alm<P: NlpProblem>(
        &mut self,
        formulation: &Formulation<P>,
        config: &SolverConfig,
    ) -> Result<Solution, SolverError> {
        let problem = &formulation.problem;
        let n = problem.num_vars();
        let n1 = problem.num_constraints();

        let mut u = formulation.vars_init.clone();
        project(&mut u, &formulation.vars_lower, &formulation.vars_upper);

        let key = CacheKey {
            num_vars: n,
            num_constraints: n1,
            lbfgs_memory: config.lbfgs_memory,
            tolerance: config.tolerance,
        };
        let cache = cached(&mut self.alm_cache, key, || {
            AlmCache::new(PANOCCache::new(n, config.tolerance, config.lbfgs_memory), n1, 0)
        });

        let sparse_forward = config.sparse_forward;
        let sparse_reverse = config.sparse_reverse;

        let f = |u: &[f64], cost: &mut f64| -> FunctionCallResult {
            *cost = problem.cost(u);
            finite_or_err(&[*cost])
        };
        let df = |u: &[f64], grad: &mut [f64]| -> FunctionCallResult {
            cost_gradient(problem, u, grad);
            finite_or_err(grad)
        };
        let f1 = |u: &[f64], res: &mut [f64]| -> FunctionCallResult {
            problem.constraints(u, res);
            finite_or_err(res)
        };
        let jf1_trans = |u: &[f64], d: &[f64], res: &mut [f64]| -> FunctionCallResult {
            constraint_jacobian(problem, u, sparse_forward).tr_mul_into(d, res, sparse_reverse);
            finite_or_err(res)
        };

        let bounds = Rectangle::new(Some(&formulation.vars_lower), Some(&formulation.vars_upper));
        let set_c = Rectangle::new(Some(&formulation.cons_lower), Some(&formulation.cons_upper));
        let set_c_factory =
            Rectangle::new(Some(&formulation.cons_lower), Some(&formulation.cons_upper));
        let set_y = BallInf::new(None, MULTIPLIER_BOUND);

        let factory = AlmFactory::new(
            f,
            df,
            Some(f1),
            Some(jf1_trans),
            NO_MAPPING,
            NO_JACOBIAN_MAPPING,
            Some(set_c_factory),
            0,
        );

        let alm_problem = AlmProblem::new(
            bounds,
            Some(set_c),
            Some(set_y),
            |u: &[f64], xi: &[f64], cost: &mut f64| -> FunctionCallResult {
                factory.psi(u, xi, cost)
            },
            |u: &[f64], xi: &[f64], grad: &mut [f64]| -> FunctionCallResult {
                factory.d_psi(u, xi, grad)
            },
            Some(f1),
            NO_MAPPING,
            n1,
            0,
        );

        let mut optimizer = AlmOptimizer::new(cache, alm_problem)
            .with_delta_tolerance(config.constraint_tolerance)
            .with_epsilon_tolerance(config.tolerance)
            .with_max_outer_iterations(config.max_outer_iterations)
            .with_max_inner_iterations(config.max_inner_iterations)
            .with_initial_penalty(config.initial_penalty)
            .with_penalty_update_factor(config.penalty_update_factor)
            .with_max_duration(config.max_duration());

        let status = optimizer.solve(&mut u)?;

        Ok(Solution {
            summary: SolveSummary {
                status: status.exit_status().into(),
                cost: status.cost(),
                num_iterations: status.num_inner_iterations(),
                num_outer_iterations: status.num_outer_iterations(),
                solve_time_s: status.solve_time().as_secs_f64(),
            },
            x: u,
        })
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Gradient of the cost at `u`, one seeded forward pass per variable.
pub fn cost_gradient<P: NlpProblem>(problem: &P, u: &[f64], grad: &mut [f64]) {
    let mut duals: Vec<Dual64> = u.iter().map(|&x| Dual64::from(x)).collect();

    for j in 0..u.len() {
        duals[j].eps = 1.0;
        grad[j] = problem.cost(&duals).eps;
        duals[j].eps = 0.0;
    }
}

/// Jacobian of the constraint residuals at `u`, one seeded forward pass per
/// variable.
pub fn constraint_jacobian<P: NlpProblem>(problem: &P, u: &[f64], sparse: bool) -> Jacobian {
    let rows = problem.num_constraints();
    let cols = u.len();

    let mut duals: Vec<Dual64> = u.iter().map(|&x| Dual64::from(x)).collect();
    let mut res = vec![Dual64::from(0.0); rows];

    let mut entries = Vec::new();
    let mut dense = if sparse {
        None
    } else {
        Some(DMatrix::<f64>::zeros(rows, cols))
    };

    for col in 0..cols {
        duals[col].eps = 1.0;
        problem.constraints(&duals, &mut res);
        duals[col].eps = 0.0;

        for (row, r) in res.iter().enumerate() {
            match dense {
                Some(ref mut m) => m[(row, col)] = r.eps,
                None => {
                    if r.eps != 0.0 {
                        entries.push((row, col, r.eps))
                    }
                }
            }
        }
    }

    match dense {
        Some(m) => Jacobian::Dense(m),
        None => Jacobian::Sparse { rows, cols, entries },
    }
}

/// Largest distance of `x` from its bounds, or of its constraint residuals
/// from theirs, in the infinity norm.
pub fn max_violation<P: NlpProblem>(formulation: &Formulation<P>, x: &[f64]) -> f64 {
    let mut res = vec![0.0; formulation.problem.num_constraints()];
    formulation.problem.constraints(x, &mut res);

    let vars = x
        .iter()
        .zip(formulation.vars_lower.iter().zip(formulation.vars_upper.iter()));
    let cons = res
        .iter()
        .zip(formulation.cons_lower.iter().zip(formulation.cons_upper.iter()));

    vars.chain(cons)
        .map(|(&v, (&lo, &hi))| (lo - v).max(v - hi).max(0.0))
        .fold(0.0, f64::max)
}

/// Clamp `x` into `[lower, upper]` element wise.
fn project(x: &mut [f64], lower: &[f64], upper: &[f64]) {
    for ((v, &lo), &hi) in x.iter_mut().zip(lower.iter()).zip(upper.iter()) {
        *v = v.max(lo).min(hi);
    }
}

/// Reuse the cache in `slot` if it was built for `key`, otherwise rebuild it.
fn cached<C, F: FnOnce() -> C>(slot: &mut Option<CacheEntry<C>>, key: CacheKey, build: F) -> &mut C {
    if slot.as_ref().map_or(false, |e| e.key != key) {
        *slot = None;
    }

    &mut slot
        .get_or_insert_with(|| {
            debug!(
                "Building solver cache for {} variables and {} constraints",
                key.num_vars, key.num_constraints
            );
            CacheEntry { key, cache: build() }
        })
        .cache
}

fn finite_or_err(values: &[f64]) -> FunctionCallResult {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SolverError::NotFiniteComputation)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
