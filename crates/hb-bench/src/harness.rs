//! Benchmark harness: drives an engine through one phase and times it.
//!
//! Every engine handle (model config, density, data, objective, minimizer)
//! is a [`Tracked`] guard registered in a [`HandleLedger`]; dropping the
//! guard releases it, so all exit paths leave the ledger at zero.

use crate::cache::{CacheKey, ModelCache};
use crate::config::HarnessConfig;
use hb_core::{
    Error, FitSummary, LikelihoodEngine, Minimizer, MinimizerStatus, Objective, Phase, Result,
};
use hb_model::{DensityComponent, ModelConfig, ObservedData, Workspace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Harness lifecycle.
///
/// `Unloaded → Loaded → ObjectiveBuilt → (MigradReady | WarmedUp) → Measuring → Done`,
/// with `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarnessState {
    /// No model yet.
    Unloaded,
    /// Model available.
    Loaded,
    /// Objective and minimizer created and configured.
    ObjectiveBuilt,
    /// Ready to measure MIGRAD.
    MigradReady,
    /// Unmeasured MIGRAD done; ready to measure HESSE or MINOS.
    WarmedUp,
    /// Timed calls in progress.
    Measuring,
    /// All handles released after a successful run.
    Done,
    /// Run aborted; all handles released.
    Failed,
}

impl HarnessState {
    fn rank(self) -> u8 {
        match self {
            HarnessState::Unloaded => 0,
            HarnessState::Loaded => 1,
            HarnessState::ObjectiveBuilt => 2,
            HarnessState::MigradReady | HarnessState::WarmedUp => 3,
            HarnessState::Measuring => 4,
            HarnessState::Done => 5,
            HarnessState::Failed => 6,
        }
    }

    /// Terminal states accept no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, HarnessState::Done | HarnessState::Failed)
    }

    /// Whether `next` is a legal (forward, single-step) transition.
    pub fn can_advance_to(self, next: HarnessState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == HarnessState::Failed || next.rank() == self.rank() + 1
    }
}

/// Kind of engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Model configuration.
    Config,
    /// Top-level density.
    Density,
    /// Observed dataset.
    Data,
    /// NLL objective.
    Objective,
    /// Minimizer.
    Minimizer,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandleKind::Config => "config",
            HandleKind::Density => "density",
            HandleKind::Data => "data",
            HandleKind::Objective => "objective",
            HandleKind::Minimizer => "minimizer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    live: AtomicUsize,
    acquired: AtomicUsize,
}

/// Counts live engine handles.
#[derive(Debug, Clone, Default)]
pub struct HandleLedger {
    inner: Arc<LedgerInner>,
}

impl HandleLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles currently held.
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Handles ever acquired.
    pub fn acquired(&self) -> usize {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    /// Register `value` as a live handle until the guard drops.
    pub fn track<T>(&self, kind: HandleKind, value: T) -> Tracked<T> {
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        log::trace!("acquired {} handle", kind);
        Tracked { value, kind, ledger: self.clone() }
    }
}

/// Scoped engine handle.
pub struct Tracked<T> {
    value: T,
    kind: HandleKind,
    ledger: HandleLedger,
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.ledger.inner.live.fetch_sub(1, Ordering::SeqCst);
        log::trace!("released {} handle", self.kind);
    }
}

/// Open objective + minimizer for one workspace.
///
/// Backs both the harness and the criterion benches: open once, then call
/// [`PhaseSession::step`] as often as needed.
pub struct PhaseSession<'w, E: LikelihoodEngine<Workspace>> {
    // Fields drop in declaration order: minimizer first.
    minimizer: Tracked<E::Minimizer>,
    objective: Tracked<Arc<E::Objective>>,
    data: Tracked<&'w ObservedData>,
    density: Tracked<&'w DensityComponent>,
    config: Tracked<&'w ModelConfig>,
    warmed_up: bool,
}

impl<'w, E: LikelihoodEngine<Workspace>> PhaseSession<'w, E> {
    /// Resolve config, density and data; build the objective on `worker_count`
    /// workers; create and configure the minimizer with its log sink.
    pub fn open(
        engine: &E,
        workspace: &'w Workspace,
        worker_count: usize,
        config: &HarnessConfig,
        sink: &Path,
        ledger: &HandleLedger,
    ) -> Result<Self> {
        let model_config = ledger.track(HandleKind::Config, workspace.model_config());
        let pdf = workspace.pdf(model_config.pdf_name()).ok_or_else(|| {
            Error::Engine(format!("model config names missing pdf '{}'", model_config.pdf_name()))
        })?;
        let density = ledger.track(HandleKind::Density, pdf);
        let observed = workspace.data(&model_config.observed_data).ok_or_else(|| {
            Error::Engine(format!(
                "model config names missing dataset '{}'",
                model_config.observed_data
            ))
        })?;
        let data = ledger.track(HandleKind::Data, observed);

        let nll = engine.build_nll(workspace, &density.name, &data.name, worker_count)?;
        let objective = ledger.track(HandleKind::Objective, Arc::new(nll));
        let shared: Arc<E::Objective> = Arc::clone(&*objective);
        let mut minimizer = ledger.track(HandleKind::Minimizer, engine.create_minimizer(shared)?);
        minimizer.set_print_level(config.print_level);
        minimizer.set_strategy(config.strategy);
        minimizer.set_log_sink(sink)?;

        Ok(Self { minimizer, objective, data, density, config: model_config, warmed_up: false })
    }

    /// Name of the density being minimized.
    pub fn pdf_name(&self) -> &str {
        &self.density.name
    }

    /// Name of the dataset.
    pub fn data_name(&self) -> &str {
        &self.data.name
    }

    /// Parameter of interest.
    pub fn poi(&self) -> Option<&str> {
        self.config.poi()
    }

    /// The objective.
    pub fn objective(&self) -> &Arc<E::Objective> {
        &self.objective
    }

    /// Unmeasured MIGRAD pass.
    pub fn warm_up(&mut self) -> Result<MinimizerStatus> {
        let status = self.minimizer.migrad()?;
        self.warmed_up = true;
        Ok(status)
    }

    /// One call of `phase`; HESSE and MINOS warm up first if needed.
    pub fn step(&mut self, phase: Phase) -> Result<MinimizerStatus> {
        if phase.needs_warmup() && !self.warmed_up {
            self.warm_up()?;
        }
        self.minimizer.run(phase)
    }

    /// Current minimizer state.
    pub fn summary(&self) -> FitSummary {
        self.minimizer.summary()
    }
}

/// Timing statistics over the measured calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    /// Measured calls.
    pub calls: usize,
    /// Sum of all calls.
    pub total_ms: f64,
    /// Mean per call.
    pub mean_ms: f64,
    /// Median per call.
    pub median_ms: f64,
    /// Fastest call.
    pub min_ms: f64,
    /// Slowest call.
    pub max_ms: f64,
    /// Throughput.
    pub calls_per_sec: f64,
}

impl TimingSummary {
    /// Statistics of `samples`; all zero when empty.
    pub fn from_samples(samples: &[Duration]) -> Self {
        let mut ms: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1e3).collect();
        ms.sort_by(|a, b| a.total_cmp(b));
        let calls = ms.len();
        if calls == 0 {
            return Self {
                calls,
                total_ms: 0.0,
                mean_ms: 0.0,
                median_ms: 0.0,
                min_ms: 0.0,
                max_ms: 0.0,
                calls_per_sec: 0.0,
            };
        }
        let total_ms: f64 = ms.iter().sum();
        let median_ms =
            if calls % 2 == 1 { ms[calls / 2] } else { 0.5 * (ms[calls / 2 - 1] + ms[calls / 2]) };
        Self {
            calls,
            total_ms,
            mean_ms: total_ms / calls as f64,
            median_ms,
            min_ms: ms[0],
            max_ms: ms[calls - 1],
            calls_per_sec: if total_ms > 0.0 { calls as f64 / (total_ms / 1e3) } else { f64::INFINITY },
        }
    }
}

/// Outcome of one measured phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    /// Phase measured.
    pub phase: Phase,
    /// Evaluation workers.
    pub worker_count: usize,
    /// One duration per measured call.
    pub samples: Vec<Duration>,
    /// One status per measured call.
    pub statuses: Vec<MinimizerStatus>,
    /// Duration of the unmeasured warm-up, if any.
    pub warmup: Option<Duration>,
    /// Status of the warm-up, if any.
    pub warmup_status: Option<MinimizerStatus>,
    /// Minimizer state after the last call.
    pub summary: FitSummary,
}

impl PhaseReport {
    /// Calls that reported a failure status, warm-up included.
    pub fn failed_calls(&self) -> usize {
        let warm = self.warmup_status.as_ref().map_or(0, |s| usize::from(!s.is_success()));
        warm + self.statuses.iter().filter(|s| !s.is_success()).count()
    }

    /// No call reported failure.
    pub fn all_converged(&self) -> bool {
        self.failed_calls() == 0
    }

    /// Timing statistics.
    pub fn timing(&self) -> TimingSummary {
        TimingSummary::from_samples(&self.samples)
    }
}

/// Runs phases of a [`LikelihoodEngine`] against cached workspaces.
pub struct BenchmarkHarness<E> {
    engine: E,
    config: HarnessConfig,
    cache: ModelCache,
    ledger: HandleLedger,
    state: HarnessState,
    transitions: Vec<HarnessState>,
}

impl<E: LikelihoodEngine<Workspace>> BenchmarkHarness<E> {
    /// Harness over `engine`, caching in `config.cache_dir`.
    pub fn new(engine: E, config: HarnessConfig) -> Self {
        let cache = ModelCache::new(config.cache_dir.clone());
        Self {
            engine,
            config,
            cache,
            ledger: HandleLedger::new(),
            state: HarnessState::Unloaded,
            transitions: vec![HarnessState::Unloaded],
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Replace the log sink override, returning the previous one.
    pub fn set_log_sink(&mut self, sink: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.config.log_sink, sink)
    }

    /// Workspace cache.
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Live-handle ledger.
    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }

    /// Current state.
    pub fn state(&self) -> HarnessState {
        self.state
    }

    /// States visited by the latest run, in order.
    pub fn transitions(&self) -> &[HarnessState] {
        &self.transitions
    }

    fn reset(&mut self) {
        self.state = HarnessState::Unloaded;
        self.transitions.clear();
        self.transitions.push(HarnessState::Unloaded);
    }

    fn advance(&mut self, next: HarnessState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(Error::Validation(format!(
                "illegal harness transition {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        self.transitions.push(next);
        Ok(())
    }

    fn fail(&mut self) {
        if self.state != HarnessState::Failed {
            self.state = HarnessState::Failed;
            self.transitions.push(HarnessState::Failed);
        }
    }

    fn check_counts(worker_count: usize, iterations: usize) -> Result<()> {
        if worker_count == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }
        if iterations == 0 {
            return Err(Error::Config("iteration count must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Load (or build) the workspace for `key`, then measure `phase`.
    pub fn run<F>(
        &mut self,
        phase: Phase,
        key: &CacheKey,
        builder: F,
        worker_count: usize,
        iterations: usize,
    ) -> Result<PhaseReport>
    where
        F: FnOnce() -> Result<Workspace>,
    {
        self.reset();
        if let Err(e) = Self::check_counts(worker_count, iterations) {
            self.fail();
            return Err(e);
        }
        let workspace = match self.cache.load_or_build(key, builder) {
            Ok(ws) => ws,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };
        self.advance(HarnessState::Loaded)?;
        self.measure(phase, &workspace, worker_count, iterations)
    }

    /// Measure `phase` on an already loaded workspace.
    pub fn run_phase(
        &mut self,
        phase: Phase,
        workspace: &Workspace,
        worker_count: usize,
        iterations: usize,
    ) -> Result<PhaseReport> {
        self.reset();
        self.advance(HarnessState::Loaded)?;
        self.measure(phase, workspace, worker_count, iterations)
    }

    fn measure(
        &mut self,
        phase: Phase,
        workspace: &Workspace,
        worker_count: usize,
        iterations: usize,
    ) -> Result<PhaseReport> {
        let result = Self::check_counts(worker_count, iterations)
            .and_then(|_| self.measure_session(phase, workspace, worker_count, iterations));

        // The session is gone by now; anything still live is a leak.
        let live = self.ledger.live();
        if live != 0 {
            log::warn!("{} engine handle(s) still live after {}", live, phase);
        }

        match result {
            Ok(report) => {
                self.advance(HarnessState::Done)?;
                let t = report.timing();
                log::info!(
                    "{} x{} with {} worker(s): mean {:.3} ms, {} failed call(s)",
                    phase,
                    t.calls,
                    worker_count,
                    t.mean_ms,
                    report.failed_calls()
                );
                Ok(report)
            }
            Err(e) => {
                log::warn!("{} with {} worker(s) failed: {}", phase, worker_count, e);
                self.fail();
                Err(e)
            }
        }
    }

    fn measure_session(
        &mut self,
        phase: Phase,
        workspace: &Workspace,
        worker_count: usize,
        iterations: usize,
    ) -> Result<PhaseReport> {
        let sink = self.config.sink_path(phase);
        let mut session = PhaseSession::<E>::open(
            &self.engine,
            workspace,
            worker_count,
            &self.config,
            &sink,
            &self.ledger,
        )?;
        self.advance(HarnessState::ObjectiveBuilt)?;
        log::debug!(
            "{}: {} on {} (poi {}), {} parameters, {} worker(s)",
            phase,
            session.pdf_name(),
            session.data_name(),
            session.poi().unwrap_or("-"),
            session.objective().dim(),
            worker_count
        );

        let (warmup, warmup_status) = if phase.needs_warmup() {
            let start = Instant::now();
            let status = session.warm_up()?;
            self.advance(HarnessState::WarmedUp)?;
            (Some(start.elapsed()), Some(status))
        } else {
            self.advance(HarnessState::MigradReady)?;
            (None, None)
        };

        self.advance(HarnessState::Measuring)?;
        let mut samples = Vec::with_capacity(iterations);
        let mut statuses = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let start = Instant::now();
            let status = session.step(phase)?;
            samples.push(start.elapsed());
            statuses.push(status);
        }
        let summary = session.summary();
        drop(session);

        Ok(PhaseReport { phase, worker_count, samples, statuses, warmup, warmup_status, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_forward_only() {
        use HarnessState::*;
        assert!(Unloaded.can_advance_to(Loaded));
        assert!(ObjectiveBuilt.can_advance_to(MigradReady));
        assert!(ObjectiveBuilt.can_advance_to(WarmedUp));
        assert!(WarmedUp.can_advance_to(Measuring));
        assert!(!MigradReady.can_advance_to(WarmedUp));
        assert!(!Loaded.can_advance_to(Unloaded));
        assert!(!Loaded.can_advance_to(Measuring));
        assert!(Measuring.can_advance_to(Failed));
        assert!(!Done.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Unloaded));
    }

    #[test]
    fn test_ledger_counts_guards() {
        let ledger = HandleLedger::new();
        {
            let a = ledger.track(HandleKind::Config, 1);
            let _b = ledger.track(HandleKind::Minimizer, "m");
            assert_eq!(ledger.live(), 2);
            assert_eq!(*a, 1);
        }
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.acquired(), 2);
    }

    #[test]
    fn test_timing_summary() {
        let samples: Vec<_> = [4, 1, 3, 2].iter().map(|&ms| Duration::from_millis(ms)).collect();
        let t = TimingSummary::from_samples(&samples);
        assert_eq!(t.calls, 4);
        assert!((t.median_ms - 2.5).abs() < 1e-9);
        assert!((t.min_ms - 1.0).abs() < 1e-9);
        assert!((t.mean_ms - 2.5).abs() < 1e-9);
        assert_eq!(TimingSummary::from_samples(&[]).calls, 0);
    }
}
