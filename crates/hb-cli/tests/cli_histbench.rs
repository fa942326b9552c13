use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_histbench"))
}

fn unique_tmp_dir(name: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let p = std::env::temp_dir().join(format!("histbench_cli_{}_{}_{}", std::process::id(), n, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn stdout_json(out: &Output) -> serde_json::Value {
    serde_json::from_slice(&out.stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, String::from_utf8_lossy(&out.stdout)))
}

#[test]
fn build_writes_workspace_file() {
    let dir = unique_tmp_dir("build");
    let path = dir.join("ws.root");
    let out = run(&[
        "build",
        "--channels",
        "2",
        "--bins",
        "5",
        "--nuisances",
        "1",
        "--output",
        path.to_string_lossy().as_ref(),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v = stdout_json(&out);
    assert_eq!(v["channels"], 2);
    assert_eq!(v["combined"], true);

    let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(doc["format"], "histbench-workspace");
    assert!(doc["objects"]["BinnedWorkspace"].is_object());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn run_reports_timing_and_writes_sink() {
    let dir = unique_tmp_dir("run");
    let d = dir.to_string_lossy().to_string();
    let out = run(&[
        "run",
        "--phase",
        "migrad",
        "--workers",
        "2",
        "--iterations",
        "3",
        "--cache-dir",
        &d,
        "--log-dir",
        &d,
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v = stdout_json(&out);
    assert_eq!(v["timing"]["calls"], 3);
    assert_eq!(v["failed_calls"], 0);
    assert!(dir.join("benchmigradlog").exists());
    assert!(dir.join("workspace_c1_b10_n0.root").exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn run_rejects_zero_workers() {
    let dir = unique_tmp_dir("zero");
    let d = dir.to_string_lossy().to_string();
    let out = run(&["run", "--workers", "0", "--cache-dir", &d, "--log-dir", &d]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("worker count"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn sweep_plan_with_bad_point_exits_nonzero() {
    let dir = unique_tmp_dir("sweep");
    let d = dir.to_string_lossy().to_string();
    let plan = dir.join("plan.json");
    std::fs::write(
        &plan,
        r#"{"name":"mixed","points":[
            {"channels":1,"bins":6,"nuisances":1,"workers":1},
            {"channels":1,"bins":6,"nuisances":1,"workers":0}
        ]}"#,
    )
    .unwrap();
    let out = run(&["sweep", "--config", plan.to_string_lossy().as_ref(), "--iterations", "1"]);
    assert!(!out.status.success(), "plan with zero workers must be rejected");

    std::fs::write(
        &plan,
        r#"{"name":"ok","log_sink":"sweeplog","points":[
            {"channels":1,"bins":6,"nuisances":1,"workers":1},
            {"channels":2,"bins":6,"nuisances":1,"workers":2}
        ]}"#,
    )
    .unwrap();
    let report = dir.join("report.json");
    let out = run(&[
        "sweep",
        "--config",
        plan.to_string_lossy().as_ref(),
        "--iterations",
        "1",
        "--cache-dir",
        &d,
        "--log-dir",
        &d,
        "--output",
        report.to_string_lossy().as_ref(),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&std::fs::read(&report).unwrap()).unwrap();
    assert_eq!(v["plan"], "ok");
    assert_eq!(v["points"].as_array().unwrap().len(), 2);
    assert!(dir.join("sweeplog").exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn sweep_requires_preset_or_config() {
    let out = run(&["sweep"]);
    assert!(!out.status.success());
}
