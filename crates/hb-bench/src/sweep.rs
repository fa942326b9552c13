//! Parameter sweeps: the built-in reference / n-channel / n-bin scans and
//! user-supplied plans.

use crate::cache::CacheKey;
use crate::harness::{BenchmarkHarness, TimingSummary};
use hb_core::{Error, LikelihoodEngine, Phase, Result};
use hb_model::{BuildSpec, Workspace};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Timed calls per sweep point unless overridden.
pub const DEFAULT_ITERATIONS: usize = 12;

/// Sink shared by the channel and bin scans.
pub const SCAN_LOG_SINK: &str = "benchmigradnchanellog";

/// One configuration to measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    /// Model to build.
    #[serde(flatten)]
    pub spec: BuildSpec,
    /// Evaluation workers.
    pub workers: usize,
    /// Cache file name; derived from the build spec when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl SweepPoint {
    /// Cache key for this point.
    pub fn key(&self) -> CacheKey {
        match &self.file_name {
            Some(name) => CacheKey::new(self.spec, name.clone()),
            None => CacheKey::from_spec(self.spec),
        }
    }
}

/// Named list of points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    /// Plan name (used in reports).
    pub name: String,
    /// Sink override applied while the plan runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_sink: Option<String>,
    /// Points, measured in order.
    pub points: Vec<SweepPoint>,
}

/// Built-in scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Reference model with 1..=3 workers.
    Reference,
    /// 1..=7 channels (30 bins, 3 nuisances) × 1..=4 workers.
    NChannel,
    /// 10..=100 bins (1 channel, 3 nuisances) × 1..=4 workers.
    NBin,
}

impl FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reference" | "ref" => Ok(Preset::Reference),
            "nchannel" | "nchannels" => Ok(Preset::NChannel),
            "nbin" | "nbins" => Ok(Preset::NBin),
            other => Err(Error::Config(format!("unknown sweep preset '{}'", other))),
        }
    }
}

impl Preset {
    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Reference => "reference",
            Preset::NChannel => "nchannel",
            Preset::NBin => "nbin",
        }
    }

    /// Expand into concrete points.
    pub fn plan(self) -> SweepPlan {
        match self {
            Preset::Reference => SweepPlan {
                name: self.as_str().to_string(),
                log_sink: None,
                points: (1..=3)
                    .map(|workers| SweepPoint {
                        spec: BuildSpec::reference(),
                        workers,
                        file_name: Some(CacheKey::reference().file_name().to_string()),
                    })
                    .collect(),
            },
            Preset::NChannel => scan(self, (1..=7).map(|c| (c, BuildSpec::new(c, 30, 3)))),
            Preset::NBin => scan(self, (10..=100).step_by(10).map(|b| (b, BuildSpec::new(1, b, 3)))),
        }
    }
}

fn scan(preset: Preset, axis: impl Iterator<Item = (usize, BuildSpec)>) -> SweepPlan {
    let mut points = Vec::new();
    for (value, spec) in axis {
        for workers in 1..=4 {
            let key = CacheKey::with_axes(spec, value, workers);
            points.push(SweepPoint { spec, workers, file_name: Some(key.file_name().to_string()) });
        }
    }
    SweepPlan { name: preset.as_str().to_string(), log_sink: Some(SCAN_LOG_SINK.to_string()), points }
}

/// Read a plan from JSON (`.json`) or YAML (anything else).
pub fn load_plan(path: &Path) -> Result<SweepPlan> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let plan: SweepPlan = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
    };
    if plan.points.is_empty() {
        return Err(Error::Config(format!("{}: plan has no points", path.display())));
    }
    for p in &plan.points {
        p.spec.validate()?;
        if p.workers == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }
    }
    Ok(plan)
}

/// Result of one sweep point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOutcome {
    /// Cache file used.
    pub file_name: String,
    /// Channels.
    pub channels: usize,
    /// Bins per channel.
    pub bins: usize,
    /// Nuisances per sample.
    pub nuisances: usize,
    /// Workers.
    pub workers: usize,
    /// Timing, when the point ran to completion.
    pub timing: Option<TimingSummary>,
    /// Calls reporting a failed status.
    pub failed_calls: usize,
    /// Error that aborted the point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PointOutcome {
    /// Ran to completion with every call converged.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failed_calls == 0
    }
}

/// Outcome of a whole sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    /// Plan name.
    pub plan: String,
    /// Phase measured.
    pub phase: Phase,
    /// Timed calls per point.
    pub iterations: usize,
    /// One entry per point, in plan order.
    pub points: Vec<PointOutcome>,
}

impl SweepReport {
    /// Points that errored or had failed calls.
    pub fn failures(&self) -> impl Iterator<Item = &PointOutcome> {
        self.points.iter().filter(|p| !p.is_success())
    }

    /// Every point succeeded.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Measure `phase` at every point of `plan`.
///
/// A failing point is recorded and the sweep moves on.
pub fn run_sweep<E: LikelihoodEngine<Workspace>>(
    harness: &mut BenchmarkHarness<E>,
    plan: &SweepPlan,
    phase: Phase,
    iterations: usize,
) -> Result<SweepReport> {
    if iterations == 0 {
        return Err(Error::Config("iteration count must be at least 1".to_string()));
    }
    let previous = plan.log_sink.clone().map(|sink| harness.set_log_sink(Some(sink)));

    let mut points = Vec::with_capacity(plan.points.len());
    for (i, point) in plan.points.iter().enumerate() {
        let key = point.key();
        log::info!(
            "[{}/{}] {} {}: {} workers",
            i + 1,
            plan.points.len(),
            plan.name,
            key.file_name(),
            point.workers
        );
        let spec = point.spec;
        let result = harness.run(phase, &key, || spec.build_workspace(), point.workers, iterations);
        let (timing, failed_calls, error) = match result {
            Ok(report) => (Some(report.timing()), report.failed_calls(), None),
            Err(e) => {
                log::warn!("{} failed: {}", key.file_name(), e);
                (None, 0, Some(e.to_string()))
            }
        };
        points.push(PointOutcome {
            file_name: key.file_name().to_string(),
            channels: spec.channels,
            bins: spec.bins,
            nuisances: spec.nuisances,
            workers: point.workers,
            timing,
            failed_calls,
            error,
        });
    }

    if let Some(prev) = previous {
        harness.set_log_sink(prev);
    }
    Ok(SweepReport { plan: plan.name.clone(), phase, iterations, points })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_sizes() {
        let r = Preset::Reference.plan();
        assert_eq!(r.points.len(), 3);
        assert!(r.points.iter().all(|p| p.file_name.as_deref() == Some("workspace.root")));

        let c = Preset::NChannel.plan();
        assert_eq!(c.points.len(), 28);
        assert_eq!(c.log_sink.as_deref(), Some(SCAN_LOG_SINK));
        assert_eq!(c.points[0].key().file_name(), "workspace11.root");
        assert_eq!(c.points[27].key().file_name(), "workspace74.root");

        let b = Preset::NBin.plan();
        assert_eq!(b.points.len(), 40);
        assert_eq!(b.points[39].spec, BuildSpec::new(1, 100, 3));
        assert_eq!(b.points[39].key().file_name(), "workspace1004.root");
    }

    #[test]
    fn test_preset_parse() {
        assert_eq!("NChannel".parse::<Preset>().unwrap(), Preset::NChannel);
        assert_eq!("nbin".parse::<Preset>().unwrap(), Preset::NBin);
        assert!(matches!("bogus".parse::<Preset>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_point_yaml_flattened() {
        let yaml = "name: custom\npoints:\n  - channels: 2\n    bins: 5\n    nuisances: 1\n    workers: 2\n";
        let plan: SweepPlan = serde_yaml_ng::from_str(yaml).unwrap();
        let p = &plan.points[0];
        assert_eq!(p.spec, BuildSpec::new(2, 5, 1));
        assert_eq!(p.key().file_name(), "workspace_c2_b5_n1.root");
    }
}
