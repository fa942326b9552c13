//! Pseudo-random normalization systematics.

use hb_core::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Overall (normalization) systematic attached to a sample.
///
/// `uncertainty_up` / `uncertainty_down` are relative effects: the +1σ
/// variation scales the sample by `1 + up`, the −1σ variation by `1 - down`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuisanceSpec {
    /// Nuisance name (unique within a sample).
    pub name: String,
    /// Relative upward effect.
    pub uncertainty_up: f64,
    /// Relative downward effect.
    pub uncertainty_down: f64,
}

impl NuisanceSpec {
    /// Both effects must be positive and the downward factor `1 - down` must stay positive.
    pub fn validate(&self) -> Result<()> {
        let up = self.uncertainty_up;
        let down = self.uncertainty_down;
        if !(up.is_finite() && up > 0.0 && down.is_finite() && down > 0.0 && down < 1.0) {
            return Err(Error::Validation(format!(
                "systematic '{}': invalid up/down uncertainties ({}, {})",
                self.name, up, down
            )));
        }
        Ok(())
    }
}

/// Seed for nuisance `nuisance` of `nuisance_count` in channel `channel`.
///
/// Integer formula `channel * nuisance / nuisance_count`. It collides often
/// (every nuisance of channel 0 gets seed 0); reproducibility of cached
/// workspaces depends on it staying exactly this.
pub fn seed_for(channel: usize, nuisance: usize, nuisance_count: usize) -> u64 {
    if nuisance_count == 0 {
        return 0;
    }
    (channel as u64).wrapping_mul(nuisance as u64) / nuisance_count as u64
}

/// Generates reproducible per-nuisance up/down uncertainties.
#[derive(Debug, Clone, Copy)]
pub struct SystematicVariationGenerator {
    seed_fn: fn(usize, usize, usize) -> u64,
}

impl Default for SystematicVariationGenerator {
    fn default() -> Self {
        Self { seed_fn: seed_for }
    }
}

impl SystematicVariationGenerator {
    /// Generator with the standard seed derivation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator with a custom seed derivation `(channel, nuisance, count) -> seed`.
    pub fn with_seed_fn(seed_fn: fn(usize, usize, usize) -> u64) -> Self {
        Self { seed_fn }
    }

    /// One spec per nuisance index, in index order.
    ///
    /// Names are `norm_uncertainty_<k>`, suffixed `_channel_<channel_index>`
    /// unless `shared_across_channels`. `nuisance_count == 0` yields nothing.
    pub fn generate(
        &self,
        nuisance_count: usize,
        channel_index: usize,
        shared_across_channels: bool,
    ) -> Vec<NuisanceSpec> {
        let scale = 100.0_f64.sqrt();
        (0..nuisance_count)
            .map(|k| {
                let seed = (self.seed_fn)(channel_index, k, nuisance_count);
                let r: f64 = StdRng::seed_from_u64(seed).r#gen();
                let uncertainty_up = (1.0 + r) / scale;
                let uncertainty_down = (1.0 - r) / scale;
                log::debug!(
                    "channel {} nuisance {}: +/- [{}, {}]",
                    channel_index,
                    k,
                    uncertainty_up,
                    uncertainty_down
                );

                let mut name = format!("norm_uncertainty_{}", k);
                if !shared_across_channels {
                    name.push_str(&format!("_channel_{}", channel_index));
                }
                NuisanceSpec { name, uncertainty_up, uncertainty_down }
            })
            .collect()
    }
}
