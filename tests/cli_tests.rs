//! Integration tests for the CLI interface
//!
//! Every invocation runs with `--dry-run`, so no `gcloud` or `kubectl`
//! command is actually spawned.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn slicekit() -> Command {
    let mut cmd = Command::cargo_bin("slicekit").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("SLICEKIT_BATCH_SIZE")
        .env_remove("SLICEKIT_PROJECT")
        .env_remove("SLICEKIT_ZONE")
        .env_remove("SLICEKIT_GKE_VERSION");
    cmd
}

/// Config file whose log and manifest directory is inside `dir`.
fn write_config(dir: &TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    let log_dir = dir.path().join("logs");
    std::fs::create_dir_all(&log_dir).unwrap();
    std::fs::write(
        &path,
        format!(
            "project = \"test-project\"\nzone = \"us-central2-b\"\nlog_dir = {:?}\n{extra}",
            log_dir.to_string_lossy()
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_cli_help_flag() {
    slicekit()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("cluster"))
        .stdout(predicate::str::contains("workload"));
}

#[test]
fn test_cluster_create_help_lists_capacity_flags() {
    slicekit()
        .args(["cluster", "create", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--on-demand"))
        .stdout(predicate::str::contains("--reservation"))
        .stdout(predicate::str::contains("--spot"));
}

#[test]
fn test_invalid_command() {
    slicekit()
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_dry_run_cluster_create() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "");

    slicekit()
        .arg("--dry-run")
        .arg("--config")
        .arg(&config)
        .args([
            "cluster",
            "create",
            "--cluster",
            "demo",
            "--tpu-type",
            "v5p-8",
            "--num-slices",
            "2",
            "--spot",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("node-pools create demo-np-1"))
        .stdout(predicate::str::contains("Pretending all the jobs succeeded"))
        .stdout(predicate::str::contains("GKE commands done"));
}

#[test]
fn test_dry_run_workload_create() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "");

    slicekit()
        .arg("--dry-run")
        .arg("--config")
        .arg(&config)
        .args([
            "workload",
            "create",
            "--cluster",
            "demo",
            "--device-type",
            "n2-standard-32-4",
            "--workload",
            "train-1",
            "--command",
            "python train.py",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Creating Workload"));
}

#[test]
fn test_invalid_workload_name_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "");

    slicekit()
        .arg("--dry-run")
        .arg("--config")
        .arg(&config)
        .args([
            "workload",
            "create",
            "--cluster",
            "demo",
            "--tpu-type",
            "v5p-8",
            "--workload",
            "Not_Valid",
            "--command",
            "true",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Workload name"));
}

#[test]
fn test_unknown_device_type_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "");

    slicekit()
        .arg("--dry-run")
        .arg("--config")
        .arg(&config)
        .args(["cluster", "create", "--cluster", "demo", "--tpu-type", "v9-8", "--spot"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown device type v9-8"));
}

#[test]
fn test_zero_batch_size_in_config_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "batch_size = 0\n");

    slicekit()
        .arg("--dry-run")
        .arg("--config")
        .arg(&config)
        .args(["cluster", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("batch_size"));
}
