//! Hessian estimation and inversion.

use crate::optimizer::ObjectiveFunction;
use hb_core::Result;
use nalgebra::DMatrix;

/// Hessian by forward differences of the gradient, symmetrised.
pub fn compute_hessian(objective: &dyn ObjectiveFunction, best_params: &[f64]) -> Result<DMatrix<f64>> {
    let n = best_params.len();
    let grad_center = objective.gradient(best_params)?;

    let mut hessian = DMatrix::zeros(n, n);
    for j in 0..n {
        let eps = 1e-4 * best_params[j].abs().max(1.0);

        let mut params_plus = best_params.to_vec();
        params_plus[j] += eps;
        let grad_plus = objective.gradient(&params_plus)?;

        for i in 0..n {
            hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
        }
    }

    let ht = hessian.transpose();
    Ok((&hessian + &ht) * 0.5)
}

/// Starting-point estimate for a minimization.
#[derive(Debug, Clone)]
pub struct Seed {
    /// First derivatives.
    pub gradient: Vec<f64>,
    /// Diagonal second derivatives (positive).
    pub g2: Vec<f64>,
    /// Estimated distance to the minimum, `0.5 * sum(g_i^2 / g2_i)`.
    pub edm: f64,
    /// Objective evaluations spent.
    pub n_fev: usize,
}

/// Three-point first and second derivatives along every axis at `x`,
/// where the objective value is already known to be `fval`.
///
/// Non-positive curvature falls back to `1 / step^2`.
pub fn seed_curvature(objective: &dyn ObjectiveFunction, x: &[f64], fval: f64) -> Result<Seed> {
    let n = x.len();
    let mut gradient = vec![0.0; n];
    let mut g2 = vec![0.0; n];
    let mut work = x.to_vec();
    for i in 0..n {
        let h = 1e-3 * x[i].abs().max(1.0);
        work[i] = x[i] + h;
        let f_plus = objective.eval(&work)?;
        work[i] = x[i] - h;
        let f_minus = objective.eval(&work)?;
        work[i] = x[i];

        gradient[i] = (f_plus - f_minus) / (2.0 * h);
        let curvature = (f_plus - 2.0 * fval + f_minus) / (h * h);
        g2[i] = if curvature.is_finite() && curvature > 0.0 { curvature } else { 1.0 / (h * h) };
    }
    let edm = 0.5 * gradient.iter().zip(&g2).map(|(g, c)| g * g / c).sum::<f64>();
    Ok(Seed { gradient, g2, edm, n_fev: 2 * n })
}

/// Covariance from the Hessian via damped Cholesky.
///
/// Returns `None` when no damping up to `diag_scale * 1e-1` makes the matrix
/// positive definite and the LU fallback yields a non-positive variance.
pub fn invert_hessian(hessian: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = hessian.nrows();
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    let max_attempts = 10;

    for attempt in 0..max_attempts {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            if damping > 0.0 {
                log::debug!("hessian inverted with diagonal damping {:.3e}", damping);
            }
            return Some(chol.solve(&identity));
        }
        if attempt + 1 == max_attempts {
            break;
        }
        let next_damping = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        let add = next_damping - damping;
        for i in 0..n {
            h_damped[(i, i)] += add;
        }
        damping = next_damping;
    }

    let cov = h_damped.lu().try_inverse()?;
    for i in 0..n {
        let v = cov[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
    }
    Some(cov)
}

/// `1/sqrt(|H_ii|)` per parameter, used when inversion fails.
pub fn diagonal_uncertainties(hessian: &DMatrix<f64>) -> Vec<f64> {
    (0..hessian.nrows()).map(|i| 1.0 / hessian[(i, i)].abs().max(1e-12).sqrt()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // 0.5 * x^T A x with A = [[4, 1], [1, 2]]
    struct Quadratic;

    impl ObjectiveFunction for Quadratic {
        fn eval(&self, p: &[f64]) -> Result<f64> {
            Ok(0.5 * (4.0 * p[0] * p[0] + 2.0 * p[0] * p[1] + 2.0 * p[1] * p[1]))
        }

        fn gradient(&self, p: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![4.0 * p[0] + p[1], p[0] + 2.0 * p[1]])
        }
    }

    #[test]
    fn test_seed_curvature() {
        let x = [0.3, -0.2];
        let seed = seed_curvature(&Quadratic, &x, Quadratic.eval(&x).unwrap()).unwrap();
        assert_eq!(seed.n_fev, 4);
        assert_relative_eq!(seed.g2[0], 4.0, epsilon = 1e-6);
        assert_relative_eq!(seed.g2[1], 2.0, epsilon = 1e-6);
        assert_relative_eq!(seed.gradient[0], 1.0, epsilon = 1e-8);
        assert_relative_eq!(seed.gradient[1], -0.1, epsilon = 1e-8);
        // 0.5 * (1/4 + 0.01/2)
        assert_relative_eq!(seed.edm, 0.1275, epsilon = 1e-6);

        let at_min = seed_curvature(&Quadratic, &[0.0, 0.0], 0.0).unwrap();
        assert!(at_min.edm < 1e-12);
    }

    #[test]
    fn test_hessian_and_covariance() {
        let h = compute_hessian(&Quadratic, &[0.3, -0.2]).unwrap();
        assert_relative_eq!(h[(0, 0)], 4.0, epsilon = 1e-8);
        assert_relative_eq!(h[(0, 1)], 1.0, epsilon = 1e-8);
        assert_relative_eq!(h[(1, 1)], 2.0, epsilon = 1e-8);

        let cov = invert_hessian(&h).unwrap();
        // inverse of [[4,1],[1,2]] = 1/7 [[2,-1],[-1,4]]
        assert_relative_eq!(cov[(0, 0)], 2.0 / 7.0, epsilon = 1e-8);
        assert_relative_eq!(cov[(1, 1)], 4.0 / 7.0, epsilon = 1e-8);
        assert_relative_eq!(cov[(0, 1)], -1.0 / 7.0, epsilon = 1e-8);
    }

    #[test]
    fn test_indefinite_rejected() {
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -5.0]);
        assert!(invert_hessian(&h).is_none());
        let diag = diagonal_uncertainties(&h);
        assert_relative_eq!(diag[1], 1.0 / 5.0_f64.sqrt(), epsilon = 1e-12);
    }
}
