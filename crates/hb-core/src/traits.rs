//! Core traits for histbench
//!
//! The benchmark harness only sees these seams: an objective to minimize,
//! a minimizer driving it through phases, and an engine that turns a
//! workspace into both. Concrete engines live in `hb-inference`.

use crate::{FitSummary, MinimizerStatus, Phase, Result};
use std::path::Path;
use std::sync::Arc;

/// Negative log-likelihood objective over a fixed parameter vector.
pub trait Objective: Send + Sync {
    /// Number of parameters
    fn dim(&self) -> usize;

    /// Parameter names
    fn parameter_names(&self) -> Vec<String>;

    /// Initial parameter values
    fn parameter_init(&self) -> Vec<f64>;

    /// Parameter bounds (min, max)
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Per-parameter constant flags. Constant parameters never move.
    fn fixed_parameters(&self) -> Vec<bool> {
        vec![false; self.dim()]
    }

    /// Index of the parameter of interest, if any.
    fn poi_index(&self) -> Option<usize> {
        None
    }

    /// Evaluate the objective
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of the objective (central differences if not overridden)
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];

        for i in 0..n {
            let eps = 1e-7 * params[i].abs().max(1.0);

            let mut params_plus = params.to_vec();
            params_plus[i] += eps;
            let f_plus = self.eval(&params_plus)?;

            let mut params_minus = params.to_vec();
            params_minus[i] -= eps;
            let f_minus = self.eval(&params_minus)?;

            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }

        Ok(grad)
    }
}

/// Minimizer handle over one objective.
///
/// Calls return `Ok(status)` when the engine ran (even if it did not converge)
/// and `Err` when it could not run at all.
pub trait Minimizer {
    /// Verbosity of the minimizer's own `log` records (-1 = silent).
    fn set_print_level(&mut self, level: i32);

    /// Effort level (0 = fast, 2 = careful).
    fn set_strategy(&mut self, strategy: u8);

    /// Redirect per-call diagnostics to a file.
    fn set_log_sink(&mut self, path: &Path) -> Result<()>;

    /// Find the minimum.
    fn migrad(&mut self) -> Result<MinimizerStatus>;

    /// Estimate the covariance matrix at the current point.
    fn hesse(&mut self) -> Result<MinimizerStatus>;

    /// Scan asymmetric intervals for every free parameter.
    fn minos(&mut self) -> Result<MinimizerStatus>;

    /// Snapshot of the current state.
    fn summary(&self) -> FitSummary;

    /// Dispatch one phase.
    fn run(&mut self, phase: Phase) -> Result<MinimizerStatus> {
        match phase {
            Phase::Migrad => self.migrad(),
            Phase::Hesse => self.hesse(),
            Phase::Minos => self.minos(),
        }
    }
}

/// Evaluation + minimization engine for workspaces of type `W`.
pub trait LikelihoodEngine<W: ?Sized> {
    /// Objective produced by [`LikelihoodEngine::build_nll`].
    type Objective: Objective + 'static;

    /// Minimizer produced by [`LikelihoodEngine::create_minimizer`].
    type Minimizer: Minimizer;

    /// Build the NLL of density `pdf_name` against dataset `data_name`,
    /// evaluated with `worker_count` workers.
    fn build_nll(
        &self,
        workspace: &W,
        pdf_name: &str,
        data_name: &str,
        worker_count: usize,
    ) -> Result<Self::Objective>;

    /// Create a minimizer over `objective`.
    fn create_minimizer(&self, objective: Arc<Self::Objective>) -> Result<Self::Minimizer>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Parabola;

    impl Objective for Parabola {
        fn dim(&self) -> usize {
            2
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["x".into(), "y".into()]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(-10.0, 10.0); 2]
        }

        fn eval(&self, params: &[f64]) -> Result<f64> {
            Ok((params[0] - 1.0).powi(2) + 3.0 * (params[1] + 2.0).powi(2))
        }
    }

    #[test]
    fn test_default_gradient_is_central_difference() {
        let g = Parabola.gradient(&[0.5, 0.0]).unwrap();
        assert_relative_eq!(g[0], -1.0, epsilon = 1e-5);
        assert_relative_eq!(g[1], 12.0, epsilon = 1e-5);
        assert_eq!(Parabola.fixed_parameters(), vec![false, false]);
        assert!(Parabola.poi_index().is_none());
    }
}
