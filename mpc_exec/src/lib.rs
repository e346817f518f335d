//! # MPC library.
//!
//! This library allows other crates in the workspace, and the integration
//! tests and benchmarks, to access items defined inside the MPC crate.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

/// MPC control module - computes the steering and acceleration command which
/// keeps the vehicle on the reference path
pub mod mpc_ctrl;

/// Kinematic vehicle simulation used to close the loop around MPC control
pub mod sim;
