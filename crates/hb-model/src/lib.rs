//! # hb-model
//!
//! Synthetic HistFactory-style models for histbench.
//!
//! - [`HistogramSynthesizer`]: deterministic signal/background/data histograms
//! - [`SystematicVariationGenerator`]: seeded normalization systematics
//! - [`ChannelAssembler`]: one `Region<i>` channel from the two above
//! - [`ModelCombiner`]: single-channel or simultaneous workspaces

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod combine;
pub mod config;
pub mod factory;
pub mod histogram;
pub mod synth;
pub mod systematics;
pub mod workspace;

pub use channel::{Channel, ChannelAssembler, NormFactor, SIGNAL_STRENGTH, Sample};
pub use combine::{ModelCombiner, tag_binned};
pub use config::BuildSpec;
pub use factory::WorkspaceFactory;
pub use histogram::Histogram;
pub use synth::{HistogramSynthesizer, SynthesizedHistograms};
pub use systematics::{NuisanceSpec, SystematicVariationGenerator, seed_for};
pub use workspace::{
    BINNED_LIKELIHOOD, ChannelData, ComponentKind, DensityComponent, LUMI, Measurement,
    ModelConfig, OBS_DATA, ObservedData, SIM_PDF, Workspace,
};
