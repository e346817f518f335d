//! Main MPC executable entry point.
//!
//! # Architecture
//!
//! Runs MPC control in closed loop around a kinematic vehicle simulation:
//!
//!     - Initialise the session, logging and modules
//!     - Main loop:
//!         - Compute the tracking state of the simulated vehicle
//!         - MPC control processing and archiving
//!         - Apply the command to the simulated vehicle
//!     - Save a summary of the run
//!
//! The run is deterministic, cycles are executed back to back rather than
//! at a fixed rate.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::info;
use serde::Serialize;

// Internal
use mpc_lib::{
    mpc_ctrl::{Fallback, InputData, MpcCtrl, PathCoeffs},
    sim::{SimParams, SimVehicle},
};
use util::{
    logger::{logger_init, LevelFilter},
    module::State,
    raise_error,
    session::Session,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Summary of a closed loop run, saved as JSON in the session directory.
#[derive(Serialize, Debug, Default)]
struct RunSummary {
    num_cycles: usize,
    num_solver_failures: usize,
    num_held_cycles: usize,
    num_safe_cycles: usize,
    max_abs_cte_m: f64,
    mean_solve_time_s: f64,
    max_solve_time_s: f64,
    final_state: SimVehicle,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mpc_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("MPC Closed Loop Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let sim_params: SimParams =
        util::params::load("mpc_sim.toml").wrap_err("Could not load sim params")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE MODULES ----

    let mut mpc_ctrl: MpcCtrl = MpcCtrl::default();
    mpc_ctrl
        .init("mpc_ctrl.toml", &session)
        .wrap_err("Failed to initialise MpcCtrl")?;
    info!("MpcCtrl init complete");

    let coeffs = PathCoeffs::from_slice(&sim_params.path_coeffs)
        .wrap_err("Invalid path coefficients")?;
    let mut vehicle = SimVehicle::new(&sim_params);

    info!("Module initialisation complete\n");

    // ---- MAIN LOOP ----

    let mut summary = RunSummary::default();
    let mut total_solve_time_s = 0.0;

    for cycle in 0..sim_params.num_cycles {
        let input = InputData {
            state: vehicle.tracking_state(&coeffs),
            coeffs,
        };

        if input.state.cte.abs() > sim_params.max_abs_cte_m {
            raise_error!(
                "Vehicle diverged from the path on cycle {}: cte = {:.3} m",
                cycle,
                input.state.cte
            );
        }
        summary.max_abs_cte_m = summary.max_abs_cte_m.max(input.state.cte.abs());

        // Process and archive the cycle
        let (output, report) = mpc_ctrl
            .cycle(&input)
            .wrap_err_with(|| format!("MpcCtrl processing failed on cycle {}", cycle))?;

        match report.fallback {
            Fallback::None => (),
            Fallback::HoldPrevious => {
                summary.num_solver_failures += 1;
                summary.num_held_cycles += 1;
            }
            Fallback::Safe => {
                summary.num_solver_failures += 1;
                summary.num_safe_cycles += 1;
            }
        }
        total_solve_time_s += report.solve_time_s;
        summary.max_solve_time_s = summary.max_solve_time_s.max(report.solve_time_s);

        vehicle.step(
            output.steer_rad,
            output.accel_mss,
            sim_params.time_step_s,
            sim_params.lf_m,
        );

        summary.num_cycles += 1;
    }

    // ---- SHUTDOWN ----

    if summary.num_cycles > 0 {
        summary.mean_solve_time_s = total_solve_time_s / summary.num_cycles as f64;
    }
    summary.final_state = vehicle;

    info!("Run complete: {:#?}", summary);

    session.save("run_summary.json", summary);
    session.exit();

    Ok(())
}
