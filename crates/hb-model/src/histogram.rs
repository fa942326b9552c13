//! Fixed-binning 1D histograms.

use hb_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Uniformly binned histogram over `[low, high)`.
///
/// Bin contents only ever grow: there is no way to remove entries.
/// Fills outside the range are kept in the under/overflow totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    name: String,
    low: f64,
    high: f64,
    counts: Vec<f64>,
    sumw2: Vec<f64>,
    #[serde(default)]
    underflow: f64,
    #[serde(default)]
    overflow: f64,
}

impl Histogram {
    /// Create an empty histogram with `n_bins` bins over `[low, high)`.
    pub fn new(name: impl Into<String>, n_bins: usize, low: f64, high: f64) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Config("histogram needs at least one bin".to_string()));
        }
        if !(low.is_finite() && high.is_finite() && high > low) {
            return Err(Error::Config(format!("invalid histogram range [{}, {})", low, high)));
        }
        Ok(Self {
            name: name.into(),
            low,
            high,
            counts: vec![0.0; n_bins],
            sumw2: vec![0.0; n_bins],
            underflow: 0.0,
            overflow: 0.0,
        })
    }

    /// Histogram over `[0, n_bins)` with unit-width bins.
    pub fn with_unit_bins(name: impl Into<String>, n_bins: usize) -> Result<Self> {
        Self::new(name, n_bins, 0.0, n_bins as f64)
    }

    /// Histogram name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of in-range bins.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    /// Axis range `(low, high)`.
    pub fn range(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    /// Width of every bin.
    pub fn bin_width(&self) -> f64 {
        (self.high - self.low) / self.counts.len() as f64
    }

    /// Centre of the 0-based bin `idx`.
    pub fn bin_center(&self, idx: usize) -> f64 {
        self.low + (idx as f64 + 0.5) * self.bin_width()
    }

    /// 0-based bin containing `x`, or `None` when `x` is out of range.
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        if !(x >= self.low && x < self.high) {
            return None;
        }
        let idx = ((x - self.low) / self.bin_width()) as usize;
        Some(idx.min(self.counts.len() - 1))
    }

    /// Add one unit-weight entry at `x`.
    pub fn fill(&mut self, x: f64) {
        self.accumulate(x, 1.0);
    }

    /// Add an entry of weight `w >= 0` at `x`.
    pub fn fill_weighted(&mut self, x: f64, w: f64) -> Result<()> {
        if !(w.is_finite() && w >= 0.0) {
            return Err(Error::Validation(format!(
                "histogram '{}': weight must be finite and non-negative, got {}",
                self.name, w
            )));
        }
        self.accumulate(x, w);
        Ok(())
    }

    fn accumulate(&mut self, x: f64, w: f64) {
        match self.find_bin(x) {
            Some(idx) => {
                self.counts[idx] += w;
                self.sumw2[idx] += w * w;
            }
            None if x < self.low => self.underflow += w,
            None => self.overflow += w,
        }
    }

    /// Bin contents (0-based).
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Per-bin sum of squared weights.
    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    /// Sum of in-range contents.
    pub fn integral(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Entries that fell below / above the axis range.
    pub fn outside_range(&self) -> (f64, f64) {
        (self.underflow, self.overflow)
    }

    /// Re-check the construction invariants (used after deserialization).
    pub fn validate(&self) -> Result<()> {
        if self.counts.is_empty() {
            return Err(Error::Validation(format!("histogram '{}' has no bins", self.name)));
        }
        if self.sumw2.len() != self.counts.len() {
            return Err(Error::Validation(format!(
                "histogram '{}': {} sumw2 entries for {} bins",
                self.name,
                self.sumw2.len(),
                self.counts.len()
            )));
        }
        if !(self.low.is_finite() && self.high.is_finite() && self.high > self.low) {
            return Err(Error::Validation(format!(
                "histogram '{}': invalid range [{}, {})",
                self.name, self.low, self.high
            )));
        }
        let bad = self.counts.iter().chain(&self.sumw2).any(|v| !(v.is_finite() && *v >= 0.0));
        if bad {
            return Err(Error::Validation(format!(
                "histogram '{}': contents must be finite and non-negative",
                self.name
            )));
        }
        Ok(())
    }

    /// Whether `other` has the same bin count and range.
    pub fn same_binning(&self, other: &Histogram) -> bool {
        self.counts.len() == other.counts.len() && self.low == other.low && self.high == other.high
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_lands_in_expected_bin() {
        let mut h = Histogram::with_unit_bins("h", 4).unwrap();
        h.fill(0.5);
        h.fill(3.99);
        h.fill(3.5);
        assert_eq!(h.counts(), &[1.0, 0.0, 0.0, 2.0]);
        assert_eq!(h.sumw2(), &[1.0, 0.0, 0.0, 2.0]);
        assert_eq!(h.integral(), 3.0);
    }

    #[test]
    fn test_out_of_range_goes_to_flow_totals() {
        let mut h = Histogram::with_unit_bins("h", 2).unwrap();
        h.fill(-0.1);
        h.fill(2.0);
        h.fill(7.0);
        assert_eq!(h.integral(), 0.0);
        assert_eq!(h.outside_range(), (1.0, 2.0));
    }

    #[test]
    fn test_weighted_fill_rejects_negative_weight() {
        let mut h = Histogram::with_unit_bins("h", 2).unwrap();
        h.fill_weighted(1.5, 2.0).unwrap();
        assert_eq!(h.counts()[1], 2.0);
        assert_eq!(h.sumw2()[1], 4.0);
        assert!(h.fill_weighted(1.5, -1.0).is_err());
        assert_eq!(h.counts()[1], 2.0);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(Histogram::with_unit_bins("h", 0).is_err());
        assert!(Histogram::new("h", 3, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_validate_rejects_inconsistent_content() {
        let mut h = Histogram::with_unit_bins("h", 3).unwrap();
        h.fill(1.5);
        assert!(h.validate().is_ok());

        let mut short = h.clone();
        short.sumw2.pop();
        assert!(matches!(short.validate(), Err(Error::Validation(_))));

        let mut negative = h.clone();
        negative.counts[0] = -1.0;
        assert!(negative.validate().is_err());

        let mut nan = h.clone();
        nan.sumw2[2] = f64::NAN;
        assert!(nan.validate().is_err());

        let mut inverted = h.clone();
        inverted.high = inverted.low;
        assert!(inverted.validate().is_err());

        let json = r#"{"name":"e","low":0.0,"high":1.0,"counts":[],"sumw2":[]}"#;
        let empty: Histogram = serde_json::from_str(json).unwrap();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_binning_geometry() {
        let h = Histogram::new("h", 5, 0.0, 10.0).unwrap();
        assert_eq!(h.bin_width(), 2.0);
        assert_eq!(h.bin_center(0), 1.0);
        assert_eq!(h.find_bin(9.999), Some(4));
        let other = Histogram::with_unit_bins("o", 5).unwrap();
        assert!(!h.same_binning(&other));
    }
}
