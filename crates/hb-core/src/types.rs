//! Common data types for histbench

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimization phase driven by the benchmark harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Gradient-based minimum finding.
    Migrad,
    /// Covariance estimation at the minimum.
    Hesse,
    /// Asymmetric interval scan around the minimum.
    Minos,
}

impl Phase {
    /// All phases in harness order.
    pub const ALL: [Phase; 3] = [Phase::Migrad, Phase::Hesse, Phase::Minos];

    /// Lower-case phase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Migrad => "migrad",
            Phase::Hesse => "hesse",
            Phase::Minos => "minos",
        }
    }

    /// Default diagnostic log sink name for this phase.
    pub fn log_sink_name(self) -> &'static str {
        match self {
            Phase::Migrad => "benchmigradlog",
            Phase::Hesse => "benchhesselog",
            Phase::Minos => "benchminoslog",
        }
    }

    /// Whether measuring this phase needs an unmeasured MIGRAD pass first.
    pub fn needs_warmup(self) -> bool {
        !matches!(self, Phase::Migrad)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "migrad" => Ok(Phase::Migrad),
            "hesse" => Ok(Phase::Hesse),
            "minos" => Ok(Phase::Minos),
            other => Err(crate::Error::Config(format!("unknown phase '{}'", other))),
        }
    }
}

/// Status returned by one minimizer call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum MinimizerStatus {
    /// The call reached its goal.
    Converged,
    /// The call ran but did not reach its goal (iteration budget, singular Hessian, ...).
    Failed(String),
}

impl MinimizerStatus {
    /// `true` for [`MinimizerStatus::Converged`].
    pub fn is_success(&self) -> bool {
        matches!(self, MinimizerStatus::Converged)
    }
}

impl fmt::Display for MinimizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinimizerStatus::Converged => f.write_str("converged"),
            MinimizerStatus::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Snapshot of the minimizer state after the latest call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSummary {
    /// Parameter names (objective order).
    pub names: Vec<String>,

    /// Current parameter values.
    pub parameters: Vec<f64>,

    /// Parabolic errors from the latest HESSE (`None` before HESSE, or for fixed parameters).
    pub errors: Vec<Option<f64>>,

    /// Asymmetric errors `(lower, upper)` from the latest MINOS, as signed offsets.
    pub minos_errors: Vec<Option<(f64, f64)>>,

    /// Objective value at `parameters`.
    pub fval: f64,

    /// Whether the latest MIGRAD converged.
    pub converged: bool,

    /// Total objective evaluations spent by the minimizer.
    pub n_evaluations: usize,
}

impl FitSummary {
    /// Look up a parameter value by name.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.names.iter().position(|n| n == name).map(|i| self.parameters[i])
    }

    /// Look up a parabolic error by name.
    pub fn error(&self, name: &str) -> Option<f64> {
        self.names.iter().position(|n| n == name).and_then(|i| self.errors[i])
    }
}
