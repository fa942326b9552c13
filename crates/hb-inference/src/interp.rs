//! Normalization-systematic interpolation.
//!
//! Polynomial inside `|alpha| < 1`, exponential outside (HistFactory
//! "code 4" with `alpha0 = 1`). Value, first and second derivative are
//! continuous at `|alpha| = 1`.

const A_INV: [[f64; 6]; 6] = [
    [15.0 / 16.0, -15.0 / 16.0, -7.0 / 16.0, -7.0 / 16.0, 1.0 / 16.0, -1.0 / 16.0],
    [3.0 / 2.0, 3.0 / 2.0, -9.0 / 16.0, 9.0 / 16.0, 1.0 / 16.0, 1.0 / 16.0],
    [-5.0 / 8.0, 5.0 / 8.0, 5.0 / 8.0, 5.0 / 8.0, -1.0 / 8.0, 1.0 / 8.0],
    [-3.0 / 2.0, -3.0 / 2.0, 7.0 / 8.0, -7.0 / 8.0, -1.0 / 8.0, -1.0 / 8.0],
    [3.0 / 16.0, -3.0 / 16.0, -3.0 / 16.0, -3.0 / 16.0, 1.0 / 16.0, -1.0 / 16.0],
    [1.0 / 2.0, 1.0 / 2.0, -5.0 / 16.0, 5.0 / 16.0, 1.0 / 16.0, 1.0 / 16.0],
];

/// Interpolated normalization factor between `lo` (alpha = -1) and `hi` (alpha = +1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Code4 {
    hi: f64,
    lo: f64,
    coeffs: [f64; 6],
}

impl Code4 {
    /// Precompute the polynomial coefficients. Both factors must be positive.
    pub fn new(hi: f64, lo: f64) -> Self {
        let b = [
            hi - 1.0,
            lo - 1.0,
            hi * hi.ln(),
            -lo * lo.ln(),
            hi * hi.ln().powi(2),
            lo * lo.ln().powi(2),
        ];
        let mut coeffs = [0.0; 6];
        for (r, row) in A_INV.iter().enumerate() {
            coeffs[r] = row.iter().zip(&b).map(|(a, b)| a * b).sum();
        }
        Self { hi, lo, coeffs }
    }

    /// Factor at `alpha`.
    pub fn value(&self, alpha: f64) -> f64 {
        self.value_and_derivative(alpha).0
    }

    /// Factor and d(factor)/d(alpha) at `alpha`.
    pub fn value_and_derivative(&self, alpha: f64) -> (f64, f64) {
        if alpha.abs() >= 1.0 {
            let ln_base = if alpha >= 0.0 { self.hi.ln() } else { self.lo.ln() };
            let v = (alpha.abs() * ln_base).exp();
            return (v, alpha.signum() * ln_base * v);
        }

        let mut value = 1.0;
        let mut deriv = 0.0;
        let mut pow = 1.0;
        for (k, c) in self.coeffs.iter().enumerate() {
            // pow == alpha^k here
            deriv += (k + 1) as f64 * c * pow;
            pow *= alpha;
            value += c * pow;
        }
        (value, deriv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_code4_anchor_points() {
        let c = Code4::new(1.15, 0.95);
        assert_relative_eq!(c.value(0.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(c.value(1.0), 1.15, epsilon = 1e-12);
        assert_relative_eq!(c.value(-1.0), 0.95, epsilon = 1e-12);
        assert_relative_eq!(c.value(2.0), 1.15 * 1.15, epsilon = 1e-12);
    }

    #[test]
    fn test_code4_continuous_at_one() {
        let c = Code4::new(1.2, 0.9);
        for edge in [1.0, -1.0] {
            let inside = c.value_and_derivative(edge * (1.0 - 1e-9));
            let outside = c.value_and_derivative(edge * (1.0 + 1e-9));
            assert_relative_eq!(inside.0, outside.0, epsilon = 1e-7);
            assert_relative_eq!(inside.1, outside.1, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_code4_derivative_matches_finite_difference() {
        let c = Code4::new(1.12, 0.92);
        for &a in &[-2.3, -0.7, -0.1, 0.0, 0.4, 0.95, 1.6] {
            let h = 1e-6;
            let fd = (c.value(a + h) - c.value(a - h)) / (2.0 * h);
            assert_relative_eq!(c.value_and_derivative(a).1, fd, epsilon = 1e-6);
        }
    }
}
