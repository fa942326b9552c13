//! Samples, channels and the synthetic channel assembler.

use crate::histogram::Histogram;
use crate::synth::HistogramSynthesizer;
use crate::systematics::{NuisanceSpec, SystematicVariationGenerator};
use hb_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Name of the parameter of interest carried by every synthetic signal sample.
pub const SIGNAL_STRENGTH: &str = "SignalStrength";

/// Free-floating normalization factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormFactor {
    /// Parameter name.
    pub name: String,
    /// Initial value.
    pub initial: f64,
    /// Lower bound.
    pub low: f64,
    /// Upper bound.
    pub high: f64,
}

/// One contribution to a channel's expected yield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Sample name.
    pub name: String,
    /// Nominal template.
    pub histogram: Histogram,
    /// Scale the template by the luminosity parameter.
    pub normalize_by_theory: bool,
    /// Include the template's MC statistical error in the per-bin gammas.
    pub has_stat_error: bool,
    /// Optional normalization factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub norm_factor: Option<NormFactor>,
    /// Overall systematics, in attachment order.
    #[serde(default)]
    pub systematics: Vec<NuisanceSpec>,
}

impl Sample {
    /// Sample with no modifiers.
    pub fn new(name: impl Into<String>, histogram: Histogram) -> Self {
        Self {
            name: name.into(),
            histogram,
            normalize_by_theory: true,
            has_stat_error: false,
            norm_factor: None,
            systematics: Vec::new(),
        }
    }

    /// Toggle luminosity scaling.
    pub fn set_normalize_by_theory(&mut self, on: bool) {
        self.normalize_by_theory = on;
    }

    /// Track this sample's statistical error.
    pub fn activate_stat_error(&mut self) {
        self.has_stat_error = true;
    }

    /// Attach a normalization factor.
    pub fn add_norm_factor(&mut self, name: impl Into<String>, initial: f64, low: f64, high: f64) {
        self.norm_factor = Some(NormFactor { name: name.into(), initial, low, high });
    }

    /// Attach overall systematics. Names must stay unique within the sample.
    pub fn add_systematics(&mut self, specs: Vec<NuisanceSpec>) -> Result<()> {
        let mut seen: HashSet<&str> = self.systematics.iter().map(|s| s.name.as_str()).collect();
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::Validation(format!(
                    "sample '{}': duplicate systematic '{}'",
                    self.name, spec.name
                )));
            }
            spec.validate()?;
        }
        self.systematics.extend(specs);
        Ok(())
    }
}

/// Named set of samples sharing one observed histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel name.
    pub name: String,
    /// Observed counts.
    pub observed: Histogram,
    /// Samples (unique by name).
    pub samples: Vec<Sample>,
}

impl Channel {
    /// Channel with observed data and no samples yet.
    pub fn new(name: impl Into<String>, observed: Histogram) -> Self {
        Self { name: name.into(), observed, samples: Vec::new() }
    }

    /// Add a sample; its binning must match the observed histogram.
    pub fn add_sample(&mut self, sample: Sample) -> Result<()> {
        if self.samples.iter().any(|s| s.name == sample.name) {
            return Err(Error::Validation(format!(
                "channel '{}': duplicate sample '{}'",
                self.name, sample.name
            )));
        }
        if !sample.histogram.same_binning(&self.observed) {
            return Err(Error::Validation(format!(
                "channel '{}': sample '{}' binning differs from observed data",
                self.name, sample.name
            )));
        }
        self.samples.push(sample);
        Ok(())
    }

    /// Look up a sample by name.
    pub fn sample(&self, name: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.name == name)
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.observed.n_bins()
    }

    /// Re-check the histogram, binning and uniqueness invariants (used after deserialization).
    pub fn validate(&self) -> Result<()> {
        self.observed.validate()?;
        let mut names = HashSet::new();
        for s in &self.samples {
            s.histogram.validate()?;
            for spec in &s.systematics {
                spec.validate()?;
            }
            if !names.insert(s.name.as_str()) {
                return Err(Error::Validation(format!(
                    "channel '{}': duplicate sample '{}'",
                    self.name, s.name
                )));
            }
            if !s.histogram.same_binning(&self.observed) {
                return Err(Error::Validation(format!(
                    "channel '{}': sample '{}' binning differs from observed data",
                    self.name, s.name
                )));
            }
        }
        Ok(())
    }
}

/// Builds the synthetic `Region<i>` channels.
#[derive(Debug, Clone)]
pub struct ChannelAssembler {
    synthesizer: HistogramSynthesizer,
    systematics: SystematicVariationGenerator,
    stat_errors: bool,
}

impl Default for ChannelAssembler {
    fn default() -> Self {
        Self {
            synthesizer: HistogramSynthesizer,
            systematics: SystematicVariationGenerator::new(),
            stat_errors: true,
        }
    }
}

impl ChannelAssembler {
    /// Assembler with stat-error tracking on both samples.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable stat-error tracking.
    pub fn with_stat_errors(mut self, on: bool) -> Self {
        self.stat_errors = on;
        self
    }

    /// Assemble channel `Region<channel_index>`.
    ///
    /// Signal nuisances are shared across channels when `crosstalk` is set;
    /// background nuisances are always channel-local.
    pub fn assemble(
        &self,
        channel_index: usize,
        bin_count: usize,
        nuisance_count: usize,
        crosstalk: bool,
    ) -> Result<Channel> {
        let hists = self.synthesizer.synthesize(bin_count)?;

        let mut background = Sample::new("background", hists.background);
        background.set_normalize_by_theory(false);
        if self.stat_errors {
            background.activate_stat_error();
        }

        let mut signal = Sample::new("signal", hists.signal);
        signal.set_normalize_by_theory(false);
        if self.stat_errors {
            signal.activate_stat_error();
        }
        signal.add_norm_factor(SIGNAL_STRENGTH, 1.0, 0.0, 3.0);

        if nuisance_count > 0 {
            signal.add_systematics(self.systematics.generate(
                nuisance_count,
                channel_index,
                crosstalk,
            ))?;
            background.add_systematics(self.systematics.generate(
                nuisance_count,
                channel_index,
                false,
            ))?;
        }

        let mut channel = Channel::new(format!("Region{}", channel_index), hists.observed);
        channel.add_sample(background)?;
        channel.add_sample(signal)?;
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_region0() {
        let ch = ChannelAssembler::new().assemble(0, 10, 3, true).unwrap();
        assert_eq!(ch.name, "Region0");
        let names: Vec<_> = ch.samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["background", "signal"]);

        let signal = ch.sample("signal").unwrap();
        assert!(!signal.normalize_by_theory);
        assert!(signal.has_stat_error);
        let nf = signal.norm_factor.as_ref().unwrap();
        assert_eq!((nf.name.as_str(), nf.initial, nf.low, nf.high), (SIGNAL_STRENGTH, 1.0, 0.0, 3.0));
        let sig_sys: Vec<_> = signal.systematics.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(sig_sys, ["norm_uncertainty_0", "norm_uncertainty_1", "norm_uncertainty_2"]);

        let background = ch.sample("background").unwrap();
        assert!(background.norm_factor.is_none());
        let bkg_sys: Vec<_> = background.systematics.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            bkg_sys,
            [
                "norm_uncertainty_0_channel_0",
                "norm_uncertainty_1_channel_0",
                "norm_uncertainty_2_channel_0"
            ]
        );
    }

    #[test]
    fn test_no_nuisances_means_no_systematics() {
        let ch = ChannelAssembler::new().with_stat_errors(false).assemble(4, 5, 0, true).unwrap();
        assert_eq!(ch.name, "Region4");
        assert!(ch.samples.iter().all(|s| s.systematics.is_empty() && !s.has_stat_error));
    }

    #[test]
    fn test_channel_rejects_mismatched_binning() {
        let mut ch = Channel::new("c", Histogram::with_unit_bins("d", 3).unwrap());
        let bad = Sample::new("s", Histogram::with_unit_bins("s", 4).unwrap());
        assert!(ch.add_sample(bad).is_err());
        let ok = Sample::new("s", Histogram::with_unit_bins("s", 3).unwrap());
        ch.add_sample(ok.clone()).unwrap();
        assert!(ch.add_sample(ok).is_err());
        assert!(ch.validate().is_ok());
    }

    #[test]
    fn test_duplicate_systematic_rejected() {
        let mut s = Sample::new("s", Histogram::with_unit_bins("s", 2).unwrap());
        let spec = NuisanceSpec { name: "a".into(), uncertainty_up: 0.1, uncertainty_down: 0.1 };
        assert!(s.add_systematics(vec![spec.clone(), spec]).is_err());
        assert!(s.systematics.is_empty());

        let flat = NuisanceSpec { name: "b".into(), uncertainty_up: 0.1, uncertainty_down: 1.0 };
        assert!(s.add_systematics(vec![flat]).is_err());
    }

    #[test]
    fn test_validate_catches_damaged_content() {
        let ch = ChannelAssembler::new().assemble(0, 5, 1, true).unwrap();
        assert!(ch.validate().is_ok());

        let mut json = serde_json::to_value(&ch).unwrap();
        json["samples"][0]["histogram"]["sumw2"].as_array_mut().unwrap().pop();
        let damaged: Channel = serde_json::from_value(json).unwrap();
        assert!(matches!(damaged.validate(), Err(Error::Validation(_))));

        let mut bad_sys = ch.clone();
        bad_sys.samples[1].systematics[0].uncertainty_down = 1.5;
        assert!(bad_sys.validate().is_err());
    }
}
