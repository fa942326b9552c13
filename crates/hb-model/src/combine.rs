//! Combine assembled channels into a workspace.

use crate::channel::Channel;
use crate::factory::WorkspaceFactory;
use crate::workspace::{BINNED_LIKELIHOOD, Measurement, Workspace};
use hb_core::{Error, Result};

/// Mark every weighted-sum density for per-bin evaluation.
///
/// Returns the number of components tagged. Only the evaluation strategy
/// changes; data and parameters are untouched.
pub fn tag_binned(workspace: &mut Workspace) -> usize {
    let mut tagged = 0;
    for component in workspace.components_mut() {
        if component.is_weighted_sum() {
            component.set_attribute(BINNED_LIKELIHOOD);
            log::info!("component {} is a binned likelihood", component.name);
            tagged += 1;
        }
    }
    tagged
}

/// Builds single-channel or combined workspaces.
#[derive(Debug, Clone)]
pub struct ModelCombiner {
    factory: WorkspaceFactory,
    binned_tagging: bool,
}

impl ModelCombiner {
    /// Combiner for `measurement`, tagging weighted sums for binned evaluation.
    pub fn new(measurement: Measurement) -> Self {
        Self { factory: WorkspaceFactory::new(measurement), binned_tagging: true }
    }

    /// Leave weighted sums untagged so the engine takes the normalised-density path.
    pub fn without_binned_tagging(mut self) -> Self {
        self.binned_tagging = false;
        self
    }

    /// The measurement applied to every workspace.
    pub fn measurement(&self) -> &Measurement {
        self.factory.measurement()
    }

    /// Combine `channels`. One channel gives a single-channel model,
    /// more give the simultaneous model.
    pub fn combine(&self, channels: Vec<Channel>) -> Result<Workspace> {
        match channels.len() {
            0 => return Err(Error::Config("channel list is empty".to_string())),
            1 => log::info!("making single-channel model for {}", channels[0].name),
            n => log::info!("making combined model over {} channels", n),
        }

        let mut workspace = self.factory.build(channels)?;
        if self.binned_tagging {
            tag_binned(&mut workspace);
        }
        Ok(workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelAssembler;

    #[test]
    fn test_single_and_combined() {
        let asm = ChannelAssembler::new();
        let combiner = ModelCombiner::new(Measurement::benchmark());

        let single = combiner.combine(vec![asm.assemble(0, 5, 1, true).unwrap()]).unwrap();
        assert!(!single.is_combined());
        assert_eq!(single.components_with_attribute(BINNED_LIKELIHOOD), ["Region0_model"]);

        let chans = (0..3).map(|i| asm.assemble(i, 5, 1, true).unwrap()).collect();
        let combined = combiner.combine(chans).unwrap();
        assert!(combined.is_combined());
        assert_eq!(
            combined.components_with_attribute(BINNED_LIKELIHOOD),
            ["Region0_model", "Region1_model", "Region2_model"]
        );
    }

    #[test]
    fn test_untagged_keeps_data() {
        let ch = ChannelAssembler::new().assemble(0, 5, 1, true).unwrap();
        let combiner = ModelCombiner::new(Measurement::benchmark());
        let tagged = combiner.combine(vec![ch.clone()]).unwrap();
        let untagged = combiner.clone().without_binned_tagging().combine(vec![ch]).unwrap();
        assert!(untagged.components_with_attribute(BINNED_LIKELIHOOD).is_empty());
        assert_eq!(tagged.data("obsData"), untagged.data("obsData"));
        assert_eq!(tagged.model_config(), untagged.model_config());
    }

    #[test]
    fn test_empty_list() {
        let err = ModelCombiner::new(Measurement::benchmark()).combine(Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
