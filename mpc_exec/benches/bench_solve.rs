//! # MPC Solve Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mpc_lib::mpc_ctrl::{
    constraint_jacobian, cost_gradient, formulate, AlmSolver, Layout, Mpc, NlpProblem, Params,
    PathCoeffs, Reduced, VehicleState,
};

fn solve_benchmark(c: &mut Criterion) {
    // ---- Build the problem ----

    let params = Params::default();
    let layout = Layout::new(params.horizon_len).unwrap();
    let state = VehicleState::from_slice(&[0.0, 0.5, 0.05, 10.0, -0.5, -0.07]).unwrap();
    let coeffs = PathCoeffs::from_slice(&[0.0, 0.02, 0.0005, 0.0]).unwrap();

    let formulation = formulate(&layout, &params, &state, coeffs);
    let problem = &formulation.problem;
    let vars: &[f64] = &formulation.vars_init;

    // ---- Evaluators ----

    c.bench_function("FgEval::cost", |b| b.iter(|| problem.cost(black_box(vars))));

    let mut residuals = vec![0.0; layout.n_constraints()];
    c.bench_function("FgEval::constraints", |b| {
        b.iter(|| problem.constraints(black_box(vars), &mut residuals))
    });

    let mut grad = vec![0.0; layout.n_vars()];
    c.bench_function("cost_gradient", |b| {
        b.iter(|| cost_gradient(problem, black_box(vars), &mut grad))
    });

    c.bench_function("constraint_jacobian::sparse", |b| {
        b.iter(|| constraint_jacobian(problem, black_box(vars), true))
    });
    c.bench_function("constraint_jacobian::dense", |b| {
        b.iter(|| constraint_jacobian(problem, black_box(vars), false))
    });

    // Over the actuations only, through the rollout
    if let Some(free) = problem.free_vars() {
        let reduced = Reduced::new(problem, free, vars);
        let u = vec![0.0; reduced.num_vars()];
        let mut grad = vec![0.0; u.len()];

        c.bench_function("cost_gradient::reduced", |b| {
            b.iter(|| cost_gradient(&reduced, black_box(&u), &mut grad))
        });
    }

    // ---- Full solve ----

    let mut mpc = Mpc::new(params, AlmSolver::default()).unwrap();

    c.bench_function("Mpc::solve", |b| {
        b.iter(|| mpc.solve(black_box(&state), &coeffs).ok())
    });
}

criterion_group!(benches, solve_benchmark);
criterion_main!(benches);
