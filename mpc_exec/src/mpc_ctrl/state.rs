//! Implementations for the MpcCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{info, trace, warn};
use serde::Serialize;

// Internal
use super::{
    AlmSolver, Mpc, MpcCtrlError, MpcOutput, NlpSolver, Params, PathCoeffs, SolveStatus,
    SolveSummary, VehicleState,
};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    module::State,
    params,
    session::Session,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// MPC control module state
#[derive(Default)]
pub struct MpcCtrl<S: NlpSolver = AlmSolver> {
    mpc: Option<Mpc<S>>,

    consecutive_failures: u32,

    /// Output of the last successful solve, the only output which may be held
    last_solved: Option<OutputData>,

    pub(crate) report: StatusReport,
    arch_report: Archiver,

    pub(crate) output: Option<OutputData>,
    arch_output: Archiver,
}

/// Input data to MPC control.
#[derive(Debug, Clone, Default)]
pub struct InputData {
    /// The measured vehicle state
    pub state: VehicleState,

    /// The reference path in the same frame as the state
    pub coeffs: PathCoeffs,
}

/// Output command from MpcCtrl.
pub type OutputData = MpcOutput;

/// Status report for MpcCtrl processing.
#[derive(Clone, Copy, Default, Serialize, Debug, PartialEq)]
pub struct StatusReport {
    /// Status of this cycle's solve, `None` if no solve was made
    pub solver_status: Option<SolveStatus>,

    pub cost: f64,
    pub num_iterations: usize,
    pub solve_time_s: f64,

    /// Which fallback, if any, produced the output
    pub fallback: Fallback,

    /// Number of failed solves since the last success, including this one
    pub consecutive_failures: u32,
}

/// The source of a degraded output.
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
pub enum Fallback {
    /// The output is the solver's answer
    None,

    /// The previous command is held, without a predicted trajectory
    HoldPrevious,

    /// Zero steering and the configured fallback acceleration
    Safe,
}

/// Flat form of the output for archiving.
#[derive(Serialize)]
struct OutputRecord {
    steer_rad: f64,
    accel_mss: f64,
    num_trajectory_points: usize,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Fallback {
    fn default() -> Self {
        Fallback::None
    }
}

impl StatusReport {
    fn from_summary(summary: &SolveSummary) -> Self {
        Self {
            solver_status: Some(summary.status),
            cost: summary.cost,
            num_iterations: summary.num_iterations,
            solve_time_s: summary.solve_time_s,
            ..Default::default()
        }
    }
}

impl MpcCtrl<AlmSolver> {
    /// Build the module directly from parameters, without a session.
    ///
    /// No archives are created.
    pub fn from_params(params: Params) -> Result<Self, MpcCtrlError> {
        Self::with_solver(params, AlmSolver::default())
    }
}

impl<S: NlpSolver> MpcCtrl<S> {
    /// Build the module from parameters and a given solver backend.
    pub fn with_solver(params: Params, solver: S) -> Result<Self, MpcCtrlError> {
        Ok(Self {
            mpc: Some(Mpc::new(params, solver)?),
            consecutive_failures: 0,
            last_solved: None,
            report: StatusReport::default(),
            arch_report: Archiver::default(),
            output: None,
            arch_output: Archiver::default(),
        })
    }

    /// The parameters in use, if initialised.
    pub fn params(&self) -> Option<&Params> {
        self.mpc.as_ref().map(|m| m.params())
    }
}

impl<S: NlpSolver + Default> State for MpcCtrl<S> {
    type InitData = &'static str;
    type InitError = MpcCtrlError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = MpcCtrlError;

    /// Initialise the MpcCtrl module.
    ///
    /// Expected init data is the path to the parameter file
    fn init(&mut self, init_data: Self::InitData, session: &Session) -> Result<(), Self::InitError> {
        // Load the parameters
        let params: Params = params::load(init_data).map_err(MpcCtrlError::ParamLoadError)?;
        info!(
            "MpcCtrl parameters loaded from {}: N = {}, dt = {} s",
            init_data, params.horizon_len, params.time_step_s
        );

        self.mpc = Some(Mpc::new(params, S::default())?);
        self.consecutive_failures = 0;
        self.last_solved = None;
        self.output = None;

        // Initialise the archivers
        self.arch_report = Archiver::from_path(session, "mpc_ctrl/status_report.csv")
            .map_err(MpcCtrlError::ArchiveError)?;
        self.arch_output = Archiver::from_path(session, "mpc_ctrl/output.csv")
            .map_err(MpcCtrlError::ArchiveError)?;

        Ok(())
    }

    /// Perform cyclic processing of MPC control.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let mpc = match self.mpc {
            Some(ref mut m) => m,
            None => return Err(MpcCtrlError::NotInitialised),
        };

        let output = match mpc.solve(&input_data.state, &input_data.coeffs) {
            Ok((output, summary)) => {
                self.consecutive_failures = 0;
                self.report = StatusReport::from_summary(&summary);
                self.last_solved = Some(output.clone());
                output
            }
            Err(MpcCtrlError::SolverFailed(summary)) => {
                self.consecutive_failures += 1;
                self.report = StatusReport::from_summary(&summary);
                self.report.consecutive_failures = self.consecutive_failures;

                let fallback = &mpc.params().fallback;

                let output = match self.last_solved {
                    Some(ref prev) if self.consecutive_failures <= fallback.max_held_cycles => {
                        self.report.fallback = Fallback::HoldPrevious;
                        OutputData {
                            steer_rad: prev.steer_rad,
                            accel_mss: prev.accel_mss,
                            trajectory: Vec::new(),
                        }
                    }
                    _ => {
                        self.report.fallback = Fallback::Safe;
                        OutputData {
                            steer_rad: 0.0,
                            accel_mss: fallback.fallback_accel_mss,
                            trajectory: Vec::new(),
                        }
                    }
                };

                warn!(
                    "MPC solve failed ({:?}, {} consecutive), using {:?} output",
                    summary.status, self.consecutive_failures, self.report.fallback
                );

                output
            }
            Err(e) => return Err(e),
        };

        trace!(
            "MpcCtrl output: steer {:.4} rad, accel {:.4} m/s^2",
            output.steer_rad,
            output.accel_mss
        );

        self.output = Some(output.clone());

        Ok((output, self.report))
    }
}

impl<S: NlpSolver> Archived for MpcCtrl<S> {
    fn write(&mut self) -> Result<(), ArchiveError> {
        self.arch_report.serialise(self.report)?;

        if let Some(ref o) = self.output {
            self.arch_output.serialise(OutputRecord {
                steer_rad: o.steer_rad,
                accel_mss: o.accel_mss,
                num_trajectory_points: o.trajectory.len(),
            })?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::mpc_ctrl::{Formulation, Layout, NlpProblem, Solution, SolverConfig};
    use std::collections::VecDeque;

    /// Solver which plays back a list of statuses, answering with the initial
    /// guess plus a fixed first command.
    #[derive(Default)]
    struct ScriptedSolver {
        statuses: VecDeque<SolveStatus>,
        steer: f64,
        accel: f64,
    }

    impl NlpSolver for ScriptedSolver {
        fn solve<P: NlpProblem>(&mut self, formulation: &Formulation<P>, _: &SolverConfig) -> Solution {
            let layout = Layout::new(8).unwrap();
            let mut x = formulation.vars_init.clone();
            x[layout.delta(0)] = self.steer;
            x[layout.a(0)] = self.accel;

            Solution {
                summary: SolveSummary {
                    status: self.statuses.pop_front().unwrap_or(SolveStatus::Success),
                    cost: 1.0,
                    num_iterations: 3,
                    num_outer_iterations: 1,
                    solve_time_s: 0.001,
                },
                x,
            }
        }
    }

    fn ctrl(statuses: &[SolveStatus]) -> MpcCtrl<ScriptedSolver> {
        let mut params = Params::default();
        params.fallback.max_held_cycles = 2;
        params.fallback.fallback_accel_mss = -1.0;

        let solver = ScriptedSolver {
            statuses: statuses.iter().copied().collect(),
            steer: 0.2,
            accel: 0.7,
        };

        MpcCtrl::with_solver(params, solver).unwrap()
    }

    #[test]
    fn test_not_initialised() {
        let mut c = MpcCtrl::<ScriptedSolver>::default();
        assert!(c.params().is_none());
        assert!(matches!(
            c.proc(&InputData::default()),
            Err(MpcCtrlError::NotInitialised)
        ));
    }

    #[test]
    fn test_success() {
        let mut c = ctrl(&[]);
        let (out, report) = c.proc(&InputData::default()).unwrap();

        assert_eq!(out.steer_rad, 0.2);
        assert_eq!(out.accel_mss, 0.7);
        assert_eq!(out.trajectory.len(), 7);
        assert_eq!(report.solver_status, Some(SolveStatus::Success));
        assert_eq!(report.fallback, Fallback::None);
        assert_eq!(report.consecutive_failures, 0);
    }

    #[test]
    fn test_safe_without_previous() {
        let mut c = ctrl(&[SolveStatus::OutOfTime]);
        let (out, report) = c.proc(&InputData::default()).unwrap();

        assert_eq!(out.steer_rad, 0.0);
        assert_eq!(out.accel_mss, -1.0);
        assert!(out.trajectory.is_empty());
        assert_eq!(report.fallback, Fallback::Safe);
        assert_eq!(report.solver_status, Some(SolveStatus::OutOfTime));
        assert_eq!(report.consecutive_failures, 1);
    }

    #[test]
    fn test_hold_then_safe_then_recover() {
        use crate::mpc_ctrl::SolveStatus::*;
        let mut c = ctrl(&[Success, MaxIterations, MaxIterations, EvaluationError, Success]);
        let input = InputData::default();

        // Success
        let (first, _) = c.proc(&input).unwrap();

        // Two held cycles
        for i in 1..=2 {
            let (out, report) = c.proc(&input).unwrap();
            assert_eq!(report.fallback, Fallback::HoldPrevious);
            assert_eq!(report.consecutive_failures, i);
            assert_eq!(out.steer_rad, first.steer_rad);
            assert_eq!(out.accel_mss, first.accel_mss);
            assert!(out.trajectory.is_empty());
        }

        // Limit exceeded
        let (out, report) = c.proc(&input).unwrap();
        assert_eq!(report.fallback, Fallback::Safe);
        assert_eq!(report.consecutive_failures, 3);
        assert_eq!(out.steer_rad, 0.0);
        assert_eq!(out.accel_mss, -1.0);

        // Recovery resets the failure count
        let (out, report) = c.proc(&input).unwrap();
        assert_eq!(report.fallback, Fallback::None);
        assert_eq!(report.consecutive_failures, 0);
        assert_eq!(out.accel_mss, 0.7);
    }

    #[test]
    fn test_safe_output_is_not_held() {
        use crate::mpc_ctrl::SolveStatus::*;
        let mut c = ctrl(&[OutOfTime, MaxIterations, MaxIterations, Success, OutOfTime]);
        let input = InputData::default();

        // Nothing has been solved yet, so every failure gets the safe command
        for i in 1..=3 {
            let (out, report) = c.proc(&input).unwrap();
            assert_eq!(report.fallback, Fallback::Safe, "cycle {}", i);
            assert_eq!(report.consecutive_failures, i);
            assert_eq!(out.accel_mss, -1.0);
        }

        c.proc(&input).unwrap();

        // Only now is there a solved command to hold
        let (out, report) = c.proc(&input).unwrap();
        assert_eq!(report.fallback, Fallback::HoldPrevious);
        assert_eq!(out.steer_rad, 0.2);
        assert_eq!(out.accel_mss, 0.7);
    }

    #[test]
    fn test_write_without_session() {
        let mut c = ctrl(&[]);
        c.proc(&InputData::default()).unwrap();

        assert!(matches!(c.write(), Err(ArchiveError::NotInitialised)));
    }
}
