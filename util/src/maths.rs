//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Evaluate a polynomial at `value`.
///
/// Coefficients are in ascending power order, i.e. `c[0] + c[1]*x + c[2]*x^2
/// + ...`. An empty coefficient slice evaluates to zero.
pub fn poly_val_asc<T>(value: T, coeffs: &[T]) -> T
where
    T: Float
{
    // Horner's method, starting from the highest power
    coeffs
        .iter()
        .rev()
        .fold(T::zero(), |acc, c| acc * value + *c)
}

/// Evaluate the first derivative of an ascending-order polynomial at `value`.
pub fn poly_slope_asc<T>(value: T, coeffs: &[T]) -> T
where
    T: Float
{
    let mut res = T::zero();

    for (i, c) in coeffs.iter().enumerate().skip(1).rev() {
        let power = match T::from(i) {
            Some(p) => p,
            None => return T::nan()
        };
        res = res * value + *c * power;
    }

    res
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
/// 
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

/// Wrap an angle into the range [-pi, pi).
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: Float
{
    let pi = match T::from(std::f64::consts::PI) {
        Some(p) => p,
        None => return T::nan()
    };

    rem_euclid(angle + pi, pi + pi) - pi
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_poly_val_asc() {
        let coeffs = [1.0, 2.0, 3.0, 4.0];

        assert_eq!(poly_val_asc(0.0, &coeffs), 1.0);
        assert_eq!(poly_val_asc(1.0, &coeffs), 10.0);
        assert_eq!(poly_val_asc(2.0, &coeffs), 1.0 + 4.0 + 12.0 + 32.0);
        assert_eq!(poly_val_asc(3.0f64, &[]), 0.0);
    }

    #[test]
    fn test_poly_slope_asc() {
        let coeffs = [1.0, 2.0, 3.0, 4.0];

        // d/dx = 2 + 6x + 12x^2
        assert_eq!(poly_slope_asc(0.0, &coeffs), 2.0);
        assert_eq!(poly_slope_asc(1.0, &coeffs), 20.0);
        assert_eq!(poly_slope_asc(2.0, &coeffs), 2.0 + 12.0 + 48.0);
        assert_eq!(poly_slope_asc(5.0f64, &[7.0]), 0.0);
    }

    #[test]
    fn test_wrap_to_pi() {
        const PI: f64 = std::f64::consts::PI;

        assert!((wrap_to_pi(0.5f64) - 0.5).abs() < 1e-12);
        assert!((wrap_to_pi(2.0 * PI + 0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_to_pi(-2.0 * PI - 0.5) + 0.5).abs() < 1e-12);
        assert!((wrap_to_pi(PI + 0.25) - (-PI + 0.25)).abs() < 1e-12);
    }
}
