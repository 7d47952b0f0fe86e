//! End-to-end tests for the `ao` binary

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command isolated from any config file on the host
fn ao(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ao").expect("ao binary should be built");
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("ao.yml");
    std::fs::write(
        &path,
        "log_level: warn\n\
         scheduler:\n  tick_micros: 500\n\
         workload:\n  tickers: 2\n  ticker_period: 2\n  ticker_rounds: 3\n  requesters: 2\n  requests: 3\n  min_latency_ms: 0\n  max_latency_ms: 1\n",
    )
    .expect("Failed to write config");
    path
}

// =============================================================================
// config
// =============================================================================

#[test]
fn test_config_prints_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    ao(temp_dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("ready_queue_reserve: 20"))
        .stdout(predicate::str::contains("tick_micros: 1000"))
        .stdout(predicate::str::contains("mode: blocking"));
}

#[test]
fn test_config_reads_explicit_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_config(temp_dir.path());
    ao(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("tick_micros: 500"))
        .stdout(predicate::str::contains("log_level: warn"));
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    ao(temp_dir.path())
        .args(["--config", "does-not-exist.yml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

// =============================================================================
// run
// =============================================================================

#[test]
fn test_run_json_report() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_config(temp_dir.path());
    let output = ao(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "--format", "json", "--seed", "11"])
        .output()
        .expect("Failed to run ao");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["mode"], "blocking");
    assert_eq!(report["ticker_runs"], 6);
    assert_eq!(report["requests_completed"], 6);
    assert_eq!(report["objects"].as_array().map(Vec::len), Some(4));
    assert_eq!(report["stats"]["total_runs"], 6 + 2 * 4);
}

#[test]
fn test_run_non_blocking_text_report() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_config(temp_dir.path());
    ao(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "--mode", "non-blocking", "--requesters", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Workload finished"))
        .stdout(predicate::str::contains("non-blocking"))
        .stdout(predicate::str::contains("requester-0"))
        .stdout(predicate::str::contains("Host iterations"));
}

#[test]
fn test_run_rejects_unknown_mode() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    ao(temp_dir.path())
        .args(["run", "--mode", "eager"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown mode"));
}
