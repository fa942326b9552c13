//! Density-graph construction for assembled channels.
//!
//! Turns a list of [`Channel`]s into the component graph, observed dataset
//! and model configuration of a [`Workspace`]. Parameter naming follows the
//! HistFactory conventions:
//!
//! - norm factors keep their own name;
//! - overall systematic `x` becomes `alpha_x`, unit-Gaussian constrained;
//! - per-bin stat factors are `gamma_stat_<channel>_bin_<i>`;
//! - luminosity is `Lumi`.

use crate::channel::Channel;
use crate::workspace::{
    ChannelData, ComponentKind, DensityComponent, LUMI, MODEL_CONFIG, Measurement, ModelConfig,
    OBS_DATA, ObservedData, SIM_PDF, Workspace,
};
use hb_core::{Error, Result};
use std::collections::{BTreeSet, HashSet};

/// Bins whose relative MC stat error falls below this keep a constant gamma.
pub const STAT_REL_THRESHOLD: f64 = 0.05;

/// `alpha_<systematic>`
pub fn alpha_name(systematic: &str) -> String {
    format!("alpha_{}", systematic)
}

/// `gamma_stat_<channel>_bin_<bin>`
pub fn gamma_name(channel: &str, bin: usize) -> String {
    format!("gamma_stat_{}_bin_{}", channel, bin)
}

/// Name of the Gaussian constraint on `parameter`.
pub fn constraint_name(parameter: &str) -> String {
    format!("{}Constraint", parameter)
}

/// Name of a channel's full density.
pub fn channel_pdf_name(channel: &str) -> String {
    format!("model_{}", channel)
}

/// Name of a channel's weighted-sum density.
pub fn density_sum_name(channel: &str) -> String {
    format!("{}_model", channel)
}

fn template_name(channel: &str, sample: &str) -> String {
    format!("{}_{}_nominal", channel, sample)
}

fn scale_factors_name(channel: &str, sample: &str) -> String {
    format!("{}_{}_scaleFactors", channel, sample)
}

fn stat_gammas_name(channel: &str) -> String {
    format!("mc_stat_{}", channel)
}

/// Relative MC stat error per bin over the samples with stat error active.
///
/// `None` when no sample of the channel tracks its stat error.
pub fn stat_relative_errors(channel: &Channel) -> Option<Vec<f64>> {
    let tracked: Vec<_> = channel.samples.iter().filter(|s| s.has_stat_error).collect();
    if tracked.is_empty() {
        return None;
    }
    let rel = (0..channel.n_bins())
        .map(|b| {
            let nominal: f64 = tracked.iter().map(|s| s.histogram.counts()[b]).sum();
            let sumw2: f64 = tracked.iter().map(|s| s.histogram.sumw2()[b]).sum();
            if nominal > 0.0 { sumw2.sqrt() / nominal } else { 0.0 }
        })
        .collect();
    Some(rel)
}

/// Builds workspaces from channels under one measurement.
#[derive(Debug, Clone)]
pub struct WorkspaceFactory {
    measurement: Measurement,
}

impl WorkspaceFactory {
    /// Factory for `measurement`.
    pub fn new(measurement: Measurement) -> Self {
        Self { measurement }
    }

    /// The measurement applied to every built workspace.
    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    /// The weighted-sum density of one channel: templates times scale factors
    /// (times stat gammas when tracked).
    pub fn build_density_sum(&self, channel: &Channel) -> DensityComponent {
        let mut servers = Vec::with_capacity(2 * channel.samples.len() + 1);
        for s in &channel.samples {
            servers.push(template_name(&channel.name, &s.name));
            servers.push(scale_factors_name(&channel.name, &s.name));
        }
        if channel.samples.iter().any(|s| s.has_stat_error) {
            servers.push(stat_gammas_name(&channel.name));
        }
        DensityComponent::new(
            density_sum_name(&channel.name),
            ComponentKind::RealSum,
            Some(&channel.name),
            servers,
        )
    }

    fn check_measurement(&self) -> Result<()> {
        let m = &self.measurement;
        if !(m.luminosity.is_finite() && m.luminosity > 0.0) {
            return Err(Error::Config(format!("luminosity must be positive, got {}", m.luminosity)));
        }
        if !(m.luminosity_rel_err.is_finite() && m.luminosity_rel_err >= 0.0) {
            return Err(Error::Config(format!(
                "luminosity relative error must be non-negative, got {}",
                m.luminosity_rel_err
            )));
        }
        Ok(())
    }

    /// Build the full workspace. A single channel yields `model_<channel>`;
    /// several yield the simultaneous `simPdf`.
    pub fn build(&self, channels: Vec<Channel>) -> Result<Workspace> {
        if channels.is_empty() {
            return Err(Error::Config("cannot build a model from zero channels".to_string()));
        }
        self.check_measurement()?;

        let mut channel_names = HashSet::new();
        for ch in &channels {
            if !channel_names.insert(ch.name.as_str()) {
                return Err(Error::Validation(format!("duplicate channel '{}'", ch.name)));
            }
            ch.validate()?;
        }

        let poi = self.measurement.poi.as_str();
        let supplies_poi = channels
            .iter()
            .flat_map(|c| &c.samples)
            .any(|s| s.norm_factor.as_ref().is_some_and(|nf| nf.name == poi));
        if !supplies_poi {
            return Err(Error::Validation(format!("no sample supplies the POI '{}'", poi)));
        }

        let mut components = Vec::new();
        let mut emitted = HashSet::new();
        let mut nuisances = Vec::new();
        let mut constants: BTreeSet<String> = self.measurement.constant_params.clone();
        let mut channel_pdfs = Vec::with_capacity(channels.len());

        for ch in &channels {
            let mut constraints = Vec::new();

            for s in &ch.samples {
                components.push(DensityComponent::new(
                    template_name(&ch.name, &s.name),
                    ComponentKind::Template { sample: s.name.clone() },
                    Some(&ch.name),
                    Vec::new(),
                ));

                let mut factors = Vec::new();
                if let Some(nf) = &s.norm_factor {
                    factors.push(nf.name.clone());
                }
                if s.normalize_by_theory {
                    factors.push(LUMI.to_string());
                    let lumi_sigma = self.measurement.luminosity * self.measurement.luminosity_rel_err;
                    self.constrain(
                        LUMI,
                        self.measurement.luminosity,
                        lumi_sigma,
                        &mut components,
                        &mut emitted,
                        &mut constraints,
                        &mut nuisances,
                        &constants,
                    );
                }
                for sys in &s.systematics {
                    let alpha = alpha_name(&sys.name);
                    factors.push(alpha.clone());
                    self.constrain(
                        &alpha,
                        0.0,
                        1.0,
                        &mut components,
                        &mut emitted,
                        &mut constraints,
                        &mut nuisances,
                        &constants,
                    );
                }
                components.push(DensityComponent::new(
                    scale_factors_name(&ch.name, &s.name),
                    ComponentKind::ScaleFactors { sample: s.name.clone() },
                    Some(&ch.name),
                    factors,
                ));
            }

            if let Some(rel) = stat_relative_errors(ch) {
                let gammas: Vec<String> = (0..rel.len()).map(|b| gamma_name(&ch.name, b)).collect();
                for (gamma, &sigma) in gammas.iter().zip(&rel) {
                    if sigma < STAT_REL_THRESHOLD {
                        log::debug!("{} below stat threshold ({:.4}); held constant", gamma, sigma);
                        constants.insert(gamma.clone());
                    } else {
                        self.constrain(
                            gamma,
                            1.0,
                            sigma,
                            &mut components,
                            &mut emitted,
                            &mut constraints,
                            &mut nuisances,
                            &constants,
                        );
                    }
                }
                components.push(DensityComponent::new(
                    stat_gammas_name(&ch.name),
                    ComponentKind::StatGammas,
                    Some(&ch.name),
                    gammas,
                ));
            }

            components.push(self.build_density_sum(ch));

            let pdf = channel_pdf_name(&ch.name);
            let mut servers = vec![density_sum_name(&ch.name)];
            servers.extend(constraints);
            components.push(DensityComponent::new(
                pdf.clone(),
                ComponentKind::ChannelModel,
                Some(&ch.name),
                servers,
            ));
            channel_pdfs.push(pdf);
        }

        let pdf_name = if channels.len() > 1 {
            components.push(DensityComponent::new(
                SIM_PDF,
                ComponentKind::Simultaneous,
                None,
                channel_pdfs,
            ));
            SIM_PDF.to_string()
        } else {
            channel_pdfs.remove(0)
        };

        let data = ObservedData {
            name: OBS_DATA.to_string(),
            channels: channels
                .iter()
                .map(|c| ChannelData { channel: c.name.clone(), counts: c.observed.counts().to_vec() })
                .collect(),
        };

        let model_config = ModelConfig {
            name: MODEL_CONFIG.to_string(),
            pdf_name,
            observed_data: OBS_DATA.to_string(),
            parameters_of_interest: vec![self.measurement.poi.clone()],
            nuisance_parameters: nuisances,
            constant_parameters: constants,
        };

        Ok(Workspace::from_parts(self.measurement.clone(), channels, components, data, model_config))
    }

    /// Emit the constraint on `parameter` once; always record it as a server
    /// of the current channel.
    #[allow(clippy::too_many_arguments)]
    fn constrain(
        &self,
        parameter: &str,
        mean: f64,
        sigma: f64,
        components: &mut Vec<DensityComponent>,
        emitted: &mut HashSet<String>,
        channel_constraints: &mut Vec<String>,
        nuisances: &mut Vec<String>,
        constants: &BTreeSet<String>,
    ) {
        let name = constraint_name(parameter);
        if !channel_constraints.contains(&name) {
            channel_constraints.push(name.clone());
        }
        if !emitted.insert(parameter.to_string()) {
            return;
        }
        components.push(DensityComponent::new(
            name,
            ComponentKind::GaussianConstraint { parameter: parameter.to_string(), mean, sigma },
            None,
            vec![parameter.to_string()],
        ));
        if !constants.contains(parameter) {
            nuisances.push(parameter.to_string());
        }
    }
}
