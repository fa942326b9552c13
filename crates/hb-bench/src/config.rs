//! Harness configuration.

use hb_core::Phase;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Diagnostics and storage settings for a [`crate::BenchmarkHarness`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Minimizer print level (-1 = silent).
    pub print_level: i32,
    /// Minimizer strategy.
    pub strategy: u8,
    /// Directory for per-phase log sinks.
    pub log_dir: PathBuf,
    /// Sink file name overriding the per-phase default.
    pub log_sink: Option<String>,
    /// Directory of cached workspaces.
    pub cache_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            print_level: -1,
            strategy: 0,
            log_dir: PathBuf::from("."),
            log_sink: None,
            cache_dir: PathBuf::from("."),
        }
    }
}

impl HarnessConfig {
    /// Set the log directory.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Set the cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Override the sink file name for every phase.
    pub fn with_log_sink(mut self, name: impl Into<String>) -> Self {
        self.log_sink = Some(name.into());
        self
    }

    /// Sink path used for `phase`.
    pub fn sink_path(&self, phase: Phase) -> PathBuf {
        let name = self.log_sink.as_deref().unwrap_or(phase.log_sink_name());
        self.log_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_sinks() {
        let cfg = HarnessConfig::default().with_log_dir("logs");
        assert_eq!(cfg.print_level, -1);
        assert_eq!(cfg.strategy, 0);
        assert_eq!(cfg.sink_path(Phase::Hesse), PathBuf::from("logs/benchhesselog"));
        let cfg = cfg.with_log_sink("benchmigradnchanellog");
        assert_eq!(cfg.sink_path(Phase::Migrad), PathBuf::from("logs/benchmigradnchanellog"));
    }

    #[test]
    fn test_partial_json() {
        let cfg: HarnessConfig = serde_json::from_str(r#"{"strategy": 1}"#).unwrap();
        assert_eq!(cfg.strategy, 1);
        assert_eq!(cfg.print_level, -1);
    }
}
