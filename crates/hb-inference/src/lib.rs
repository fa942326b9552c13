//! # hb-inference
//!
//! Evaluation and minimization engine for histbench workspaces.
//!
//! - [`BinnedNll`]: Poisson + Gaussian-constraint NLL on a rayon pool
//! - [`LbfgsbOptimizer`]: bounded L-BFGS (argmin)
//! - [`BenchMinimizer`]: MIGRAD / HESSE / MINOS over any [`hb_core::Objective`]
//! - [`BinnedEngine`]: ties both to [`hb_core::LikelihoodEngine`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod covariance;
pub mod engine;
pub mod interp;
pub mod minimizer;
pub mod minos;
pub mod nll;
pub mod optimizer;

pub use engine::BinnedEngine;
pub use minimizer::BenchMinimizer;
pub use minos::{MinosConfig, MinosInterval};
pub use nll::{BinnedNll, ParameterInfo};
pub use optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
