use std::fs;
use std::path::Path;
use std::process::Command;

use mpp_optim::{RunConfig, RunReport};
use tempfile::tempdir;

fn mpp_sim() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mpp-sim"))
}

#[test]
fn demo_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/demo.yaml");
    let config = RunConfig::load(&path).expect("demo config");
    assert_eq!(config.kernels.len(), 5);
    assert_eq!(config.seed_policy.label.as_deref(), Some("demo"));
}

#[test]
fn synth_then_run_writes_report_and_csv() {
    let dir = tempdir().unwrap();
    let stack = dir.path().join("stack.json");
    let truth = dir.path().join("truth.json");
    let status = mpp_sim()
        .args(["synth", "--marks", "3", "--seed", "5", "--size", "32", "32", "1"])
        .arg("--out")
        .arg(&stack)
        .arg("--truth")
        .arg(&truth)
        .status()
        .expect("run mpp-sim synth");
    assert!(status.success());
    let marks: serde_json::Value = serde_json::from_str(&fs::read_to_string(&truth).unwrap()).unwrap();
    assert_eq!(marks.as_array().map(Vec::len), Some(3));

    let config = dir.path().join("run.yaml");
    fs::write(
        &config,
        "iterations: 300\nchains: 2\nfeedback: { log_every: 100, csv: true }\n",
    )
    .unwrap();
    let out = dir.path().join("out");
    let status = mpp_sim()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .arg("--stack")
        .arg(&stack)
        .arg("--out")
        .arg(&out)
        .args(["--seed", "9"])
        .status()
        .expect("run mpp-sim run");
    assert!(status.success());

    let report = RunReport::load(&out.join("report.json")).unwrap();
    assert_eq!(report.master_seed, 9);
    assert_eq!(report.chains.len(), 2);
    assert!(report.chains.iter().all(|chain| chain.iterations == 300));
    let csv = fs::read_to_string(out.join("iterations.csv")).unwrap();
    assert_eq!(csv.lines().count(), 301);
    assert!(out.join("chains").join("chain-1.csv").exists());
}

#[test]
fn run_rejects_invalid_config() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("bad.yaml");
    fs::write(&config, "chains: 0\n").unwrap();
    let stack = dir.path().join("stack.json");
    let status = mpp_sim()
        .args(["synth", "--marks", "1", "--size", "16", "16", "1"])
        .arg("--out")
        .arg(&stack)
        .status()
        .unwrap();
    assert!(status.success());
    let output = mpp_sim()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .arg("--stack")
        .arg(&stack)
        .arg("--out")
        .arg(dir.path().join("out"))
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn run_rejects_initial_marks_with_invalid_radii() {
    let dir = tempdir().unwrap();
    let stack = dir.path().join("stack.json");
    let status = mpp_sim()
        .args(["synth", "--marks", "1", "--size", "16", "16", "1"])
        .arg("--out")
        .arg(&stack)
        .status()
        .unwrap();
    assert!(status.success());
    let config = dir.path().join("run.yaml");
    fs::write(&config, "iterations: 10\n").unwrap();
    let initial = dir.path().join("initial.json");
    fs::write(
        &initial,
        r#"[{"id":0,"shape":{"type":"ellipse","centre":{"x":5.0,"y":5.0,"z":0.0},"radii":[-3.0,0.0],"angle":0.0}}]"#,
    )
    .unwrap();
    let out = dir.path().join("out");
    let output = mpp_sim()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .arg("--stack")
        .arg(&stack)
        .arg("--initial")
        .arg(&initial)
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("radii must be positive"));
    assert!(!out.join("report.json").exists());
}
