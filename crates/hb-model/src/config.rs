//! Build specifications for synthetic workspaces.

use crate::channel::ChannelAssembler;
use crate::combine::ModelCombiner;
use crate::workspace::{Measurement, Workspace};
use hb_core::{Error, Result};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Everything that determines a synthetic workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Number of channels (`Region0..`).
    pub channels: usize,
    /// Bins per channel.
    pub bins: usize,
    /// Normalization systematics per sample.
    pub nuisances: usize,
    /// Track MC stat errors on both samples.
    #[serde(default = "default_true")]
    pub stat_errors: bool,
    /// Share signal nuisances across channels.
    #[serde(default = "default_true")]
    pub crosstalk: bool,
}

impl BuildSpec {
    /// Spec with stat errors and crosstalk on.
    pub fn new(channels: usize, bins: usize, nuisances: usize) -> Self {
        Self { channels, bins, nuisances, stat_errors: true, crosstalk: true }
    }

    /// The reference model: one channel, ten bins, no nuisances, no stat errors.
    pub fn reference() -> Self {
        Self { stat_errors: false, ..Self::new(1, 10, 0) }
    }

    /// Toggle stat-error tracking.
    pub fn with_stat_errors(mut self, on: bool) -> Self {
        self.stat_errors = on;
        self
    }

    /// Reject zero channel or bin counts.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(Error::Config("channel count must be at least 1".to_string()));
        }
        if self.bins == 0 {
            return Err(Error::Config("bin count must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Stable string identifying this spec; stored next to cached workspaces.
    pub fn signature(&self) -> String {
        format!(
            "channels={};bins={};nuisances={};stat={};crosstalk={}",
            self.channels, self.bins, self.nuisances, self.stat_errors, self.crosstalk
        )
    }

    /// Assemble and combine the channels with the benchmark measurement.
    pub fn build_workspace(&self) -> Result<Workspace> {
        self.build_workspace_with(&ModelCombiner::new(Measurement::benchmark()))
    }

    /// Assemble the channels and combine them with `combiner`.
    pub fn build_workspace_with(&self, combiner: &ModelCombiner) -> Result<Workspace> {
        self.validate()?;
        let assembler = ChannelAssembler::new().with_stat_errors(self.stat_errors);
        let channels = (0..self.channels)
            .map(|i| assembler.assemble(i, self.bins, self.nuisances, self.crosstalk))
            .collect::<Result<Vec<_>>>()?;
        combiner.combine(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_spec() {
        let spec = BuildSpec::reference();
        assert_eq!((spec.channels, spec.bins, spec.nuisances), (1, 10, 0));
        assert!(!spec.stat_errors);
        let ws = spec.build_workspace().unwrap();
        assert_eq!(ws.name(), "BinnedWorkspace");
        assert_eq!(ws.channels()[0].name, "Region0");
    }

    #[test]
    fn test_signature_distinguishes_flags() {
        let a = BuildSpec::new(1, 10, 0);
        assert_ne!(a.signature(), BuildSpec::reference().signature());
        assert_eq!(a.signature(), BuildSpec::new(1, 10, 0).signature());
    }

    #[test]
    fn test_json_defaults() {
        let spec: BuildSpec = serde_json::from_str(r#"{"channels":2,"bins":30,"nuisances":3}"#).unwrap();
        assert_eq!(spec, BuildSpec::new(2, 30, 3));
    }

    #[test]
    fn test_zero_counts_rejected() {
        assert!(matches!(BuildSpec::new(0, 10, 0).build_workspace(), Err(Error::Config(_))));
        assert!(matches!(BuildSpec::new(1, 0, 0).build_workspace(), Err(Error::Config(_))));
    }
}
