//! Workspace representation: measurement, channels, density graph, data.

use crate::channel::Channel;
use hb_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Attribute that switches a weighted-sum density to per-bin evaluation.
pub const BINNED_LIKELIHOOD: &str = "BinnedLikelihood";

/// Name of the observed dataset.
pub const OBS_DATA: &str = "obsData";

/// Name of the model configuration object.
pub const MODEL_CONFIG: &str = "ModelConfig";

/// Name given to every synthetic workspace.
pub const WORKSPACE_NAME: &str = "BinnedWorkspace";

/// Name of the combined (multi-channel) density.
pub const SIM_PDF: &str = "simPdf";

/// Name of the luminosity parameter.
pub const LUMI: &str = "Lumi";

/// Measurement-level settings shared by all channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Measurement name.
    pub name: String,
    /// Parameter of interest.
    pub poi: String,
    /// Luminosity value.
    pub luminosity: f64,
    /// Relative luminosity uncertainty.
    pub luminosity_rel_err: f64,
    /// Parameters held constant in fits.
    #[serde(default)]
    pub constant_params: BTreeSet<String>,
}

impl Measurement {
    /// Measurement with unit luminosity and no constants.
    pub fn new(name: impl Into<String>, poi: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            poi: poi.into(),
            luminosity: 1.0,
            luminosity_rel_err: 0.0,
            constant_params: BTreeSet::new(),
        }
    }

    /// The benchmark measurement: POI `SignalStrength`, lumi 1 ± 10 %, `Lumi` constant.
    pub fn benchmark() -> Self {
        let mut m = Self::new("meas", crate::channel::SIGNAL_STRENGTH);
        m.luminosity = 1.0;
        m.luminosity_rel_err = 0.10;
        m.add_constant_param(LUMI);
        m
    }

    /// Hold `name` constant.
    pub fn add_constant_param(&mut self, name: impl Into<String>) {
        self.constant_params.insert(name.into());
    }
}

/// Kind of a density-graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentKind {
    /// Nominal template of one sample.
    Template {
        /// Sample name.
        sample: String,
    },
    /// Product of a sample's normalization terms.
    ScaleFactors {
        /// Sample name.
        sample: String,
    },
    /// Per-bin statistical-uncertainty factors of a channel.
    StatGammas,
    /// Weighted sum of sample contributions (per-bin sum density).
    RealSum,
    /// Gaussian constraint on one parameter.
    GaussianConstraint {
        /// Constrained parameter.
        parameter: String,
        /// Constraint centre.
        mean: f64,
        /// Constraint width.
        sigma: f64,
    },
    /// Channel density: weighted sum times its constraints.
    ChannelModel,
    /// Simultaneous density over several channel models.
    Simultaneous,
}

/// Node of the density graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityComponent {
    /// Unique component name.
    pub name: String,
    /// Component kind.
    pub kind: ComponentKind,
    /// Channel this component belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Names of the parameters/components this node depends on.
    #[serde(default)]
    pub servers: Vec<String>,
    /// String attributes (evaluation hints).
    #[serde(default)]
    pub attributes: BTreeSet<String>,
}

impl DensityComponent {
    /// Component with no attributes.
    pub fn new(
        name: impl Into<String>,
        kind: ComponentKind,
        channel: Option<&str>,
        servers: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            channel: channel.map(str::to_string),
            servers,
            attributes: BTreeSet::new(),
        }
    }

    /// Whether this is a weighted-sum (per-bin sum) density.
    pub fn is_weighted_sum(&self) -> bool {
        matches!(self.kind, ComponentKind::RealSum)
    }

    /// Whether this component is a full density usable for a likelihood.
    pub fn is_pdf(&self) -> bool {
        matches!(self.kind, ComponentKind::ChannelModel | ComponentKind::Simultaneous)
    }

    /// Set a string attribute.
    pub fn set_attribute(&mut self, attr: &str) {
        self.attributes.insert(attr.to_string());
    }

    /// Query a string attribute.
    pub fn has_attribute(&self, attr: &str) -> bool {
        self.attributes.contains(attr)
    }
}

/// Observed counts of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    /// Channel name.
    pub channel: String,
    /// Counts per bin.
    pub counts: Vec<f64>,
}

/// Named binned dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedData {
    /// Dataset name.
    pub name: String,
    /// Per-channel counts, in channel order.
    pub channels: Vec<ChannelData>,
}

impl ObservedData {
    /// Counts for `channel`.
    pub fn counts(&self, channel: &str) -> Option<&[f64]> {
        self.channels.iter().find(|c| c.channel == channel).map(|c| c.counts.as_slice())
    }
}

/// Which density, dataset and parameters make up the statistical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Object name.
    pub name: String,
    /// Name of the top-level density.
    pub pdf_name: String,
    /// Name of the observed dataset.
    pub observed_data: String,
    /// Parameters of interest.
    pub parameters_of_interest: Vec<String>,
    /// Constrained nuisance parameters.
    pub nuisance_parameters: Vec<String>,
    /// Parameters held constant.
    #[serde(default)]
    pub constant_parameters: BTreeSet<String>,
}

impl ModelConfig {
    /// Name of the top-level density.
    pub fn pdf_name(&self) -> &str {
        &self.pdf_name
    }

    /// The (single) parameter of interest.
    pub fn poi(&self) -> Option<&str> {
        self.parameters_of_interest.first().map(String::as_str)
    }
}

/// Complete statistical model.
///
/// Built once by [`crate::ModelCombiner`]; afterwards only component
/// attributes change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    name: String,
    measurement: Measurement,
    channels: Vec<Channel>,
    combined: bool,
    components: Vec<DensityComponent>,
    data: Vec<ObservedData>,
    model_config: ModelConfig,
}

impl Workspace {
    pub(crate) fn from_parts(
        measurement: Measurement,
        channels: Vec<Channel>,
        components: Vec<DensityComponent>,
        data: ObservedData,
        model_config: ModelConfig,
    ) -> Self {
        let combined = channels.len() > 1;
        Self {
            name: WORKSPACE_NAME.to_string(),
            measurement,
            channels,
            combined,
            components,
            data: vec![data],
            model_config,
        }
    }

    /// Workspace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Measurement settings.
    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    /// Channels in build order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Look up a channel.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// `true` when built from more than one channel.
    pub fn is_combined(&self) -> bool {
        self.combined
    }

    /// All density-graph nodes.
    pub fn components(&self) -> &[DensityComponent] {
        &self.components
    }

    pub(crate) fn components_mut(&mut self) -> &mut [DensityComponent] {
        &mut self.components
    }

    /// Look up any component.
    pub fn component(&self, name: &str) -> Option<&DensityComponent> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Look up a full density by name.
    pub fn pdf(&self, name: &str) -> Option<&DensityComponent> {
        self.component(name).filter(|c| c.is_pdf())
    }

    /// Look up a dataset by name.
    pub fn data(&self, name: &str) -> Option<&ObservedData> {
        self.data.iter().find(|d| d.name == name)
    }

    /// The model configuration.
    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    /// Names of the components carrying `attr`.
    pub fn components_with_attribute(&self, attr: &str) -> Vec<&str> {
        self.components.iter().filter(|c| c.has_attribute(attr)).map(|c| c.name.as_str()).collect()
    }

    /// Check the structural invariants. Used after loading from disk.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::Validation("workspace has no channels".to_string()));
        }
        if self.combined != (self.channels.len() > 1) {
            return Err(Error::Validation(format!(
                "combined flag {} inconsistent with {} channel(s)",
                self.combined,
                self.channels.len()
            )));
        }
        for ch in &self.channels {
            ch.validate()?;
        }

        let poi = &self.measurement.poi;
        let supplies_poi = self.channels.iter().flat_map(|c| &c.samples).any(|s| {
            s.norm_factor.as_ref().map(|nf| &nf.name == poi).unwrap_or(false)
        });
        if !supplies_poi {
            return Err(Error::Validation(format!("no sample supplies the POI '{}'", poi)));
        }

        if self.pdf(&self.model_config.pdf_name).is_none() {
            return Err(Error::Validation(format!(
                "model config refers to missing pdf '{}'",
                self.model_config.pdf_name
            )));
        }
        let data = self.data(&self.model_config.observed_data).ok_or_else(|| {
            Error::Validation(format!(
                "model config refers to missing dataset '{}'",
                self.model_config.observed_data
            ))
        })?;
        for ch in &self.channels {
            let counts = data.counts(&ch.name).ok_or_else(|| {
                Error::Validation(format!("dataset has no entry for channel '{}'", ch.name))
            })?;
            if counts.len() != ch.n_bins() {
                return Err(Error::Validation(format!(
                    "dataset bins for '{}' ({}) != channel bins ({})",
                    ch.name,
                    counts.len(),
                    ch.n_bins()
                )));
            }
        }
        Ok(())
    }
}
