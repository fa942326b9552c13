//! Error types for histbench

use thiserror::Error;

/// histbench error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid model or benchmark configuration (bad counts, empty channel list).
    ///
    /// Raised before any engine interaction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persisted workspace entry could not be read back.
    ///
    /// The model cache recovers from this by rebuilding; it never leaves
    /// `ModelCache::load_or_build`.
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// Objective or minimizer failure reported by the engine.
    #[error("Engine failure: {0}")]
    Engine(String),

    /// Structural validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// `true` for errors the sweep treats as a failed configuration
    /// rather than a reason to abort the whole run.
    pub fn is_engine_failure(&self) -> bool {
        matches!(self, Error::Engine(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_category() {
        let e = Error::Config("bin count must be positive".into());
        assert_eq!(e.to_string(), "Configuration error: bin count must be positive");
        assert!(!e.is_engine_failure());
        assert!(Error::Engine("migrad".into()).is_engine_failure());
    }
}
