//! Per-cycle inputs to MPC control

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Vector4, Vector6};
use num_dual::DualNum;
use serde::Serialize;

// Internal
use super::{MpcCtrlError, NUM_STATES};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of reference path polynomial coefficients (cubic).
pub const NUM_PATH_COEFFS: usize = 4;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Measured vehicle state, in the same frame as the reference path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VehicleState {
    /// Position along the path frame's x axis
    pub x: f64,

    /// Position along the path frame's y axis
    pub y: f64,

    /// Heading
    ///
    /// Units: radians
    pub psi: f64,

    /// Speed
    pub v: f64,

    /// Cross track error, path minus vehicle y
    pub cte: f64,

    /// Heading error, vehicle heading minus path heading
    ///
    /// Units: radians
    pub epsi: f64,
}

/// Cubic reference path `y = c0 + c1*x + c2*x^2 + c3*x^3`, coefficients in
/// ascending power order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathCoeffs(pub Vector4<f64>);

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VehicleState {
    /// Build the state from a slice ordered (x, y, psi, v, cte, epsi).
    pub fn from_slice(values: &[f64]) -> Result<Self, MpcCtrlError> {
        if values.len() != NUM_STATES {
            return Err(MpcCtrlError::InvalidState(values.len()));
        }

        Ok(Self {
            x: values[0],
            y: values[1],
            psi: values[2],
            v: values[3],
            cte: values[4],
            epsi: values[5],
        })
    }

    /// State values in layout order (x, y, psi, v, cte, epsi).
    pub fn as_array(&self) -> [f64; NUM_STATES] {
        [self.x, self.y, self.psi, self.v, self.cte, self.epsi]
    }
}

impl From<Vector6<f64>> for VehicleState {
    fn from(v: Vector6<f64>) -> Self {
        Self {
            x: v[0],
            y: v[1],
            psi: v[2],
            v: v[3],
            cte: v[4],
            epsi: v[5],
        }
    }
}

impl From<VehicleState> for Vector6<f64> {
    fn from(s: VehicleState) -> Self {
        Vector6::new(s.x, s.y, s.psi, s.v, s.cte, s.epsi)
    }
}

impl PathCoeffs {
    /// Build the coefficients from an ascending-order slice of exactly four
    /// values.
    pub fn from_slice(coeffs: &[f64]) -> Result<Self, MpcCtrlError> {
        if coeffs.len() != NUM_PATH_COEFFS {
            return Err(MpcCtrlError::InvalidCoeffs(coeffs.len()));
        }

        Ok(Self(Vector4::from_column_slice(coeffs)))
    }

    /// A straight path along the x axis.
    pub fn flat() -> Self {
        Self(Vector4::zeros())
    }

    pub fn as_slice(&self) -> &[f64] {
        self.0.as_slice()
    }

    /// Path y at `x`.
    pub fn eval<D: DualNum<f64> + Copy>(&self, x: D) -> D {
        let c = &self.0;
        x * x * x * c[3] + x * x * c[2] + x * c[1] + c[0]
    }

    /// Path heading (angle of the tangent) at `x`.
    pub fn heading<D: DualNum<f64> + Copy>(&self, x: D) -> D {
        let c = &self.0;
        (x * x * (3.0 * c[3]) + x * (2.0 * c[2]) + c[1]).atan()
    }
}

impl Default for PathCoeffs {
    fn default() -> Self {
        Self::flat()
    }
}

impl Serialize for PathCoeffs {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_slice().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_state_conversions() {
        let s = VehicleState::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(s.as_array(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let v: Vector6<f64> = s.into();
        assert_eq!(VehicleState::from(v), s);

        assert!(matches!(
            VehicleState::from_slice(&[1.0, 2.0]),
            Err(MpcCtrlError::InvalidState(2))
        ));
    }

    #[test]
    fn test_coeffs() {
        let c = PathCoeffs::from_slice(&[1.0, 2.0, 3.0, 4.0]).unwrap();

        assert_eq!(c.eval(0.0), 1.0);
        assert_eq!(c.eval(2.0), 1.0 + 4.0 + 12.0 + 32.0);
        assert!((c.heading(1.0) - 20f64.atan()).abs() < 1e-12);

        assert!(matches!(
            PathCoeffs::from_slice(&[1.0, 2.0, 3.0]),
            Err(MpcCtrlError::InvalidCoeffs(3))
        ));
    }

    #[test]
    fn test_coeffs_match_util_polynomials() {
        let raw = [0.3, -0.2, 0.05, -0.001];
        let c = PathCoeffs::from_slice(&raw).unwrap();

        for &x in [-4.0, 0.0, 1.5, 10.0].iter() {
            let y = util::maths::poly_val_asc(x, &raw);
            let slope = util::maths::poly_slope_asc(x, &raw);
            assert!((c.eval(x) - y).abs() < 1e-9);
            assert!((c.heading(x) - slope.atan()).abs() < 1e-12);
        }
    }
}
