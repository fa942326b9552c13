//! The default [`LikelihoodEngine`] for histbench workspaces.

use crate::minimizer::BenchMinimizer;
use crate::nll::BinnedNll;
use hb_core::{LikelihoodEngine, Result};
use hb_model::Workspace;
use std::sync::Arc;

/// Compiles workspaces into [`BinnedNll`] and drives them with [`BenchMinimizer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BinnedEngine;

impl BinnedEngine {
    /// New engine.
    pub fn new() -> Self {
        Self
    }
}

impl LikelihoodEngine<Workspace> for BinnedEngine {
    type Objective = BinnedNll;
    type Minimizer = BenchMinimizer<BinnedNll>;

    fn build_nll(
        &self,
        workspace: &Workspace,
        pdf_name: &str,
        data_name: &str,
        worker_count: usize,
    ) -> Result<BinnedNll> {
        BinnedNll::compile(workspace, pdf_name, data_name, worker_count)
    }

    fn create_minimizer(&self, objective: Arc<BinnedNll>) -> Result<BenchMinimizer<BinnedNll>> {
        BenchMinimizer::new(objective)
    }
}
