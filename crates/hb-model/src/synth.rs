//! Deterministic per-channel histogram synthesis.

use crate::histogram::Histogram;
use hb_core::{Error, Result};

/// Entries added to every background bin.
pub const BACKGROUND_ENTRIES_PER_BIN: usize = 101;

/// Signal, background and observed histograms for one channel.
#[derive(Debug, Clone)]
pub struct SynthesizedHistograms {
    /// Signal template: bin `b` (1-based) holds `b + 1` entries.
    pub signal: Histogram,
    /// Background template: every bin holds 101 entries.
    pub background: Histogram,
    /// Observed counts: signal + background.
    pub observed: Histogram,
}

/// Builds the synthetic signal/background/data histograms.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistogramSynthesizer;

impl HistogramSynthesizer {
    /// Synthesize `bin_count` bins over `[0, bin_count)`.
    ///
    /// For 1-based bin `b`, signal and data receive `b + 1` fills and
    /// background and data receive 101 fills, all at the centre of `b`.
    pub fn synthesize(&self, bin_count: usize) -> Result<SynthesizedHistograms> {
        if bin_count == 0 {
            return Err(Error::Config("bin count must be positive".to_string()));
        }

        let mut signal = Histogram::with_unit_bins("Signal", bin_count)?;
        let mut background = Histogram::with_unit_bins("Background", bin_count)?;
        let mut observed = Histogram::with_unit_bins("Data", bin_count)?;

        for bin in 1..=bin_count {
            let x = signal.bin_center(bin - 1);
            for _ in 0..=bin {
                signal.fill(x);
                observed.fill(x);
            }
            for _ in 0..BACKGROUND_ENTRIES_PER_BIN {
                background.fill(x);
                observed.fill(x);
            }
        }

        Ok(SynthesizedHistograms { signal, background, observed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ten_bins() {
        let h = HistogramSynthesizer.synthesize(10).unwrap();
        assert_eq!(h.signal.counts()[0], 2.0);
        assert_eq!(h.signal.counts()[9], 11.0);
        assert_eq!(h.background.counts(), &[101.0; 10]);
        assert_eq!(h.observed.counts()[4], 6.0 + 101.0);
        assert_eq!(h.observed.outside_range(), (0.0, 0.0));
    }

    #[test]
    fn test_zero_bins_is_config_error() {
        let err = HistogramSynthesizer.synthesize(0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

        #[test]
        fn prop_observed_is_signal_plus_background(bins in 1usize..150) {
            let h = HistogramSynthesizer.synthesize(bins).unwrap();
            prop_assert_eq!(h.observed.n_bins(), bins);
            for idx in 0..bins {
                let b = (idx + 1) as f64;
                prop_assert_eq!(h.signal.counts()[idx], b + 1.0);
                prop_assert_eq!(h.background.counts()[idx], 101.0);
                prop_assert_eq!(
                    h.observed.counts()[idx],
                    h.signal.counts()[idx] + h.background.counts()[idx]
                );
            }
        }
    }
}
