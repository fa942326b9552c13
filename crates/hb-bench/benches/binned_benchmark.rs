use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hb_bench::{HandleLedger, HarnessConfig, PhaseSession};
use hb_core::Phase;
use hb_inference::BinnedEngine;
use hb_model::BuildSpec;
use std::hint::black_box;
use std::path::PathBuf;

fn log_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hb-bench-logs-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn bench_reference_phases(c: &mut Criterion) {
    let engine = BinnedEngine::new();
    let config = HarnessConfig::default().with_log_dir(log_dir());
    let ledger = HandleLedger::new();
    let ws = BuildSpec::reference().build_workspace().unwrap();

    for phase in Phase::ALL {
        let mut group = c.benchmark_group(format!("reference/{}", phase));
        for workers in 1..=3usize {
            let sink = config.sink_path(phase);
            let mut session =
                PhaseSession::open(&engine, &ws, workers, &config, &sink, &ledger).unwrap();
            if phase.needs_warmup() {
                session.warm_up().unwrap();
            }
            group.bench_function(BenchmarkId::from_parameter(workers), |b| {
                b.iter(|| black_box(session.step(phase).unwrap()))
            });
        }
        group.finish();
    }
}

fn bench_migrad_scan(c: &mut Criterion, name: &str, axis: &[(usize, BuildSpec)]) {
    let engine = BinnedEngine::new();
    let config = HarnessConfig::default().with_log_dir(log_dir()).with_log_sink("benchmigradnchanellog");
    let ledger = HandleLedger::new();
    let mut group = c.benchmark_group(name);
    group.sample_size(10);

    for &(value, spec) in axis {
        let ws = spec.build_workspace().unwrap();
        for workers in 1..=4usize {
            let sink = config.sink_path(Phase::Migrad);
            let mut session =
                PhaseSession::open(&engine, &ws, workers, &config, &sink, &ledger).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("workers={}", workers), value),
                &value,
                |b, _| b.iter(|| black_box(session.step(Phase::Migrad).unwrap())),
            );
        }
    }
    group.finish();
}

fn bench_nchannel(c: &mut Criterion) {
    let axis: Vec<_> = (1..=7).map(|ch| (ch, BuildSpec::new(ch, 30, 3))).collect();
    bench_migrad_scan(c, "migrad/nchannel", &axis);
}

fn bench_nbin(c: &mut Criterion) {
    let axis: Vec<_> = (10..=100).step_by(10).map(|b| (b, BuildSpec::new(1, b, 3))).collect();
    bench_migrad_scan(c, "migrad/nbin", &axis);
}

criterion_group!(benches, bench_reference_phases, bench_nchannel, bench_nbin);
criterion_main!(benches);
