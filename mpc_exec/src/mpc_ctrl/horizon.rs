//! # Horizon layout
//!
//! The solver works on a single flat decision vector. For a horizon of `N`
//! steps the vector is split into seven contiguous sub-ranges, always in
//! this order:
//!
//! | Sub-range | Length  |
//! |-----------|---------|
//! | x         | N       |
//! | y         | N       |
//! | psi       | N       |
//! | v         | N       |
//! | cte       | N       |
//! | epsi      | N       |
//! | delta     | N - 1   |
//! | a         | N - 1   |
//!
//! The constraint residual vector mirrors the first `6N` entries, so the
//! residual for state component `k` at step `t` lives at the same index as
//! the variable it constrains.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use super::ParamsError;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of state components predicted at each step.
pub const NUM_STATES: usize = 6;

/// Number of actuators commanded at each step.
pub const NUM_ACTUATORS: usize = 2;

/// Minimum horizon length, a single step has no transition to constrain.
pub const MIN_HORIZON_LEN: usize = 2;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Start offsets of each sub-range of the decision vector.
///
/// Only built by `Layout::new`, so the offsets always agree with the
/// horizon length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    n: usize,

    x_start: usize,
    y_start: usize,
    psi_start: usize,
    v_start: usize,
    cte_start: usize,
    epsi_start: usize,
    delta_start: usize,
    a_start: usize,

    n_vars: usize,
    n_constraints: usize,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Layout {
    /// Compute the layout for a horizon of `n` steps.
    pub fn new(n: usize) -> Result<Self, ParamsError> {
        if n < MIN_HORIZON_LEN {
            return Err(ParamsError::HorizonTooShort(n));
        }

        let x_start = 0;
        let y_start = x_start + n;
        let psi_start = y_start + n;
        let v_start = psi_start + n;
        let cte_start = v_start + n;
        let epsi_start = cte_start + n;
        let delta_start = epsi_start + n;
        let a_start = delta_start + n - 1;

        Ok(Self {
            n,
            x_start,
            y_start,
            psi_start,
            v_start,
            cte_start,
            epsi_start,
            delta_start,
            a_start,
            n_vars: NUM_STATES * n + NUM_ACTUATORS * (n - 1),
            n_constraints: NUM_STATES * n,
        })
    }

    /// Horizon length (number of predicted states).
    pub fn n(&self) -> usize {
        self.n
    }

    /// Total length of the decision vector, `6N + 2(N - 1)`.
    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    /// Total length of the constraint residual vector, `6N`.
    pub fn n_constraints(&self) -> usize {
        self.n_constraints
    }

    /// Offset of the first steering actuation. Everything before it is a
    /// predicted state.
    pub fn delta_start(&self) -> usize {
        self.delta_start
    }

    pub fn a_start(&self) -> usize {
        self.a_start
    }

    /// Number of actuation steps in the horizon.
    pub fn num_actuations(&self) -> usize {
        self.n - 1
    }

    /// Start offsets of the six state sub-ranges, in state order
    /// (x, y, psi, v, cte, epsi).
    pub fn state_offsets(&self) -> [usize; NUM_STATES] {
        [
            self.x_start,
            self.y_start,
            self.psi_start,
            self.v_start,
            self.cte_start,
            self.epsi_start,
        ]
    }

    /// Index of the actuation which controls the transition into step `t`.
    ///
    /// The actuator has a one step latency: the command that takes effect at
    /// step `t` was issued at `t - 2`. The first transition has no earlier
    /// command to draw on, so it uses the command issued at `t - 1 = 0`.
    pub fn latency_actuation_index(t: usize) -> usize {
        debug_assert!(t >= 1, "Step 0 has no controlling actuation");

        if t == 1 {
            t - 1
        } else {
            t - 2
        }
    }

    #[inline]
    pub fn x(&self, i: usize) -> usize {
        self.state_index(self.x_start, i)
    }

    #[inline]
    pub fn y(&self, i: usize) -> usize {
        self.state_index(self.y_start, i)
    }

    #[inline]
    pub fn psi(&self, i: usize) -> usize {
        self.state_index(self.psi_start, i)
    }

    #[inline]
    pub fn v(&self, i: usize) -> usize {
        self.state_index(self.v_start, i)
    }

    #[inline]
    pub fn cte(&self, i: usize) -> usize {
        self.state_index(self.cte_start, i)
    }

    #[inline]
    pub fn epsi(&self, i: usize) -> usize {
        self.state_index(self.epsi_start, i)
    }

    #[inline]
    pub fn delta(&self, i: usize) -> usize {
        self.actuation_index(self.delta_start, i)
    }

    #[inline]
    pub fn a(&self, i: usize) -> usize {
        self.actuation_index(self.a_start, i)
    }

    #[inline]
    fn state_index(&self, start: usize, i: usize) -> usize {
        debug_assert!(i < self.n, "State step {} outside horizon {}", i, self.n);
        start + i
    }

    #[inline]
    fn actuation_index(&self, start: usize, i: usize) -> usize {
        debug_assert!(
            i < self.num_actuations(),
            "Actuation step {} outside horizon {}",
            i,
            self.num_actuations()
        );
        start + i
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
