//! # hb-bench
//!
//! Benchmark harness for histbench: a file-backed workspace cache, the
//! phase state machine that drives a [`hb_core::LikelihoodEngine`] through
//! MIGRAD, HESSE or MINOS, and the built-in parameter sweeps.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod harness;
pub mod store;
pub mod sweep;

pub use cache::{CacheKey, Lookup, ModelCache};
pub use config::HarnessConfig;
pub use harness::{
    BenchmarkHarness, HandleKind, HandleLedger, HarnessState, PhaseReport, PhaseSession,
    TimingSummary, Tracked,
};
pub use store::{LoadOutcome, WorkspaceFile};
pub use sweep::{
    DEFAULT_ITERATIONS, PointOutcome, Preset, SweepPlan, SweepPoint, SweepReport, load_plan,
    run_sweep,
};
