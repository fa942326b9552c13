//! # hb-core
//!
//! Shared vocabulary for histbench: the error taxonomy, the phase/status
//! types, and the traits the benchmark harness drives engines through.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{LikelihoodEngine, Minimizer, Objective};
pub use types::{FitSummary, MinimizerStatus, Phase};
