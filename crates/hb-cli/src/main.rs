//! histbench CLI

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use hb_bench::{
    BenchmarkHarness, CacheKey, DEFAULT_ITERATIONS, HarnessConfig, Preset, WorkspaceFile,
    load_plan, run_sweep,
};
use hb_core::Phase;
use hb_inference::BinnedEngine;
use hb_model::BuildSpec;
use hb_model::workspace::WORKSPACE_NAME;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "histbench")]
#[command(about = "histbench - binned likelihood fit benchmarks on synthetic workspaces")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct ModelArgs {
    /// Number of channels
    #[arg(long, default_value = "1")]
    channels: usize,

    /// Bins per channel
    #[arg(long, default_value = "10")]
    bins: usize,

    /// Normalization systematics per sample
    #[arg(long, default_value = "0")]
    nuisances: usize,

    /// Do not track MC statistical errors
    #[arg(long)]
    no_stat_error: bool,

    /// Keep signal systematics channel-local
    #[arg(long)]
    no_crosstalk: bool,
}

impl ModelArgs {
    fn spec(self) -> BuildSpec {
        BuildSpec {
            channels: self.channels,
            bins: self.bins,
            nuisances: self.nuisances,
            stat_errors: !self.no_stat_error,
            crosstalk: !self.no_crosstalk,
        }
    }
}

#[derive(Args)]
struct HarnessArgs {
    /// Directory of cached workspaces
    #[arg(long, default_value = ".")]
    cache_dir: PathBuf,

    /// Directory for minimizer log sinks
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    /// Minimizer strategy (0, 1, 2)
    #[arg(long, default_value = "0")]
    strategy: u8,

    /// Minimizer print level (-1 = silent)
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    print_level: i32,
}

impl HarnessArgs {
    fn config(&self) -> HarnessConfig {
        HarnessConfig {
            print_level: self.print_level,
            strategy: self.strategy,
            ..HarnessConfig::default()
        }
        .with_cache_dir(&self.cache_dir)
        .with_log_dir(&self.log_dir)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a synthetic workspace and write it to disk
    Build {
        #[command(flatten)]
        model: ModelArgs,

        /// Output workspace file. Defaults to a name derived from the model.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Measure one phase on one model
    Run {
        /// Phase to measure (migrad, hesse, minos)
        #[arg(long, default_value = "migrad")]
        phase: Phase,

        #[command(flatten)]
        model: ModelArgs,

        /// Evaluation workers
        #[arg(long, default_value = "1")]
        workers: usize,

        /// Timed calls
        #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: usize,

        #[command(flatten)]
        harness: HarnessArgs,

        /// Output file for the report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Measure one phase over a preset or a plan file
    Sweep {
        /// Built-in sweep (reference, nchannel, nbin)
        #[arg(long, conflicts_with = "config", required_unless_present = "config")]
        preset: Option<Preset>,

        /// Sweep plan (YAML or JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Phase to measure (migrad, hesse, minos)
        #[arg(long, default_value = "migrad")]
        phase: Phase,

        /// Timed calls per point
        #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: usize,

        #[command(flatten)]
        harness: HarnessArgs,

        /// Output file for the report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Build { model, output } => cmd_build(model.spec(), output),
        Commands::Run { phase, model, workers, iterations, harness, output } => {
            cmd_run(phase, model.spec(), workers, iterations, &harness, output.as_ref())
        }
        Commands::Sweep { preset, config, phase, iterations, harness, output } => {
            cmd_sweep(preset, config, phase, iterations, &harness, output.as_ref())
        }
    }
}

fn cmd_build(spec: BuildSpec, output: Option<PathBuf>) -> Result<()> {
    let key = CacheKey::from_spec(spec);
    let path = output.unwrap_or_else(|| PathBuf::from(key.file_name()));
    let workspace = spec.build_workspace()?;

    let mut file = WorkspaceFile::create(&path);
    file.set_signature(key.signature());
    file.write(&workspace, WORKSPACE_NAME)?;
    file.save()?;
    tracing::info!(path = %path.display(), components = workspace.components().len(), "workspace written");

    write_json(
        None,
        serde_json::json!({
            "path": path.display().to_string(),
            "signature": key.signature(),
            "channels": workspace.channels().len(),
            "components": workspace.components().len(),
            "combined": workspace.is_combined(),
        }),
    )
}

fn cmd_run(
    phase: Phase,
    spec: BuildSpec,
    workers: usize,
    iterations: usize,
    args: &HarnessArgs,
    output: Option<&PathBuf>,
) -> Result<()> {
    spec.validate()?;
    let key = CacheKey::from_spec(spec);
    let mut harness = BenchmarkHarness::new(BinnedEngine::new(), args.config());
    let report = harness.run(phase, &key, || spec.build_workspace(), workers, iterations)?;
    let timing = report.timing();
    tracing::info!(
        phase = %phase,
        workers,
        mean_ms = timing.mean_ms,
        median_ms = timing.median_ms,
        "phase measured"
    );

    write_json(
        output,
        serde_json::json!({
            "file_name": key.file_name(),
            "spec": spec,
            "phase": phase,
            "workers": workers,
            "timing": timing,
            "failed_calls": report.failed_calls(),
            "statuses": report.statuses,
            "summary": report.summary,
        }),
    )?;

    if !report.all_converged() {
        bail!("{} {} call(s) reported a failure status", report.failed_calls(), phase);
    }
    Ok(())
}

fn cmd_sweep(
    preset: Option<Preset>,
    config: Option<PathBuf>,
    phase: Phase,
    iterations: usize,
    args: &HarnessArgs,
    output: Option<&PathBuf>,
) -> Result<()> {
    let plan = match (preset, config) {
        (_, Some(path)) => load_plan(&path)?,
        (Some(preset), None) => preset.plan(),
        (None, None) => bail!("either --preset or --config is required"),
    };
    tracing::info!(plan = %plan.name, points = plan.points.len(), %phase, "starting sweep");

    let mut harness = BenchmarkHarness::new(BinnedEngine::new(), args.config());
    let report = run_sweep(&mut harness, &plan, phase, iterations)?;
    write_json(output, serde_json::to_value(&report)?)?;

    let failed: Vec<&str> = report.failures().map(|p| p.file_name.as_str()).collect();
    if !failed.is_empty() {
        bail!("{} of {} sweep point(s) failed: {}", failed.len(), report.points.len(), failed.join(", "));
    }
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
