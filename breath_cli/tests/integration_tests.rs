//! Integration tests for the breathe binary.
//!
//! These tests verify end-to-end behavior including:
//! - Session logging and dry runs
//! - Circuit breaker lockout across runs
//! - Tier gating driven by session history
//! - CSV rollup and event-log replay

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// CLI pointed at an isolated data dir and an empty config file
fn cli(data_dir: &Path) -> Command {
    let config_path = data_dir.join("config.toml");
    if !config_path.exists() {
        fs::write(&config_path, "").expect("Failed to write config");
    }
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("breathe"));
    cmd.arg("--data-dir")
        .arg(data_dir)
        .arg("--config")
        .arg(config_path);
    cmd
}

fn wal_path(data_dir: &Path) -> PathBuf {
    data_dir.join("wal/sessions.wal")
}

fn wal_records(data_dir: &Path) -> Vec<Value> {
    fs::read_to_string(wal_path(data_dir))
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("WAL line is JSON"))
        .collect()
}

fn registry(data_dir: &Path) -> Value {
    let contents =
        fs::read_to_string(data_dir.join("wal/safety_registry.json")).expect("registry exists");
    serde_json::from_str(&contents).expect("registry is JSON")
}

#[test]
fn test_cli_help() {
    Command::new(assert_cmd::cargo::cargo_bin!("breathe"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Guided breathing sessions with adaptive safety limits",
        ));
}

#[test]
fn test_patterns_lists_catalog_with_gating() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .arg("patterns")
        .assert()
        .success()
        .stdout(predicate::str::contains("box"))
        .stdout(predicate::str::contains("4-7-8"))
        .stdout(predicate::str::contains("requires 5 quality sessions"));
}

#[test]
fn test_session_logged_to_wal_and_registry() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["session", "--pattern", "box", "--cycles", "1", "--heart-rate", "66"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Inhale"))
        .stdout(predicate::str::contains("Session logged"));

    let records = wal_records(data_dir);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["pattern_id"], "box");
    assert_eq!(records[0]["cycles"], 1);
    let duration = records[0]["duration_secs"].as_f64().unwrap();
    assert!((16.0..17.0).contains(&duration), "duration {}", duration);

    // 16s is too short to count as a success
    assert_eq!(records[0]["outcome"], "adverse");
    assert_eq!(registry(data_dir)["box"]["cumulative_stress_score"], 1);
}

#[test]
fn test_dry_run_does_not_log() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["session", "--pattern", "calm", "--cycles", "1", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"));

    assert!(!wal_path(data_dir).exists());
    assert!(!data_dir.join("wal/safety_registry.json").exists());
}

#[test]
fn test_unknown_pattern_fails() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["session", "--pattern", "no-such-pattern"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown pattern"));
}

#[test]
fn test_circuit_breaker_locks_pattern_after_six_adverse_sessions() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    for run in 1..=5 {
        cli(data_dir)
            .args(["session", "--pattern", "calm", "--stop-after", "10"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Adverse"));
        assert_eq!(registry(data_dir)["calm"]["cumulative_stress_score"], run);
    }

    cli(data_dir)
        .args(["session", "--pattern", "calm", "--stop-after", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is locked until"));

    let profile = &registry(data_dir)["calm"];
    assert_eq!(profile["cumulative_stress_score"], 0);
    assert!(profile["safety_lock_until"].as_f64().unwrap() > 0.0);
    assert_eq!(profile["resonance_history"].as_array().unwrap().len(), 5);

    cli(data_dir)
        .args(["session", "--pattern", "calm", "--stop-after", "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("PatternLocked"));

    // Other patterns are unaffected
    cli(data_dir)
        .args(["session", "--pattern", "box", "--cycles", "1", "--dry-run"])
        .assert()
        .success();

    cli(data_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Locked until"));
}

#[test]
fn test_tier_two_unlocks_after_quality_sessions() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["session", "--pattern", "4-7-8", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TierLocked"));

    // Four box cycles take 64s, over the 60s quality threshold
    for _ in 0..5 {
        cli(data_dir)
            .args(["session", "--pattern", "box", "--cycles", "4"])
            .assert()
            .success();
    }
    assert_eq!(wal_records(data_dir).len(), 5);

    cli(data_dir)
        .args(["session", "--pattern", "4-7-8", "--cycles", "1", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4-7-8 Relaxing Breath"));

    // Tier 3 still needs more practice
    cli(data_dir)
        .args(["session", "--pattern", "buteyko", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TierLocked"));
}

#[test]
fn test_rollup_creates_csv_and_keeps_history() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    for pattern in ["box", "calm"] {
        cli(data_dir)
            .args(["session", "--pattern", pattern, "--cycles", "1"])
            .assert()
            .success();
    }

    cli(data_dir)
        .args(["rollup", "--cleanup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled up 2 sessions"))
        .stdout(predicate::str::contains("Cleaned up 1 processed WAL files"));

    assert!(!wal_path(data_dir).exists());
    let csv = fs::read_to_string(data_dir.join("sessions.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3);

    // History from the CSV still feeds status
    cli(data_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Last session"));
}

#[test]
fn test_empty_rollup() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .arg("rollup")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to roll up"));
}

#[test]
fn test_exported_log_replays_to_final_state() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    let log_path = data_dir.join("events.jsonl");

    cli(data_dir)
        .args(["session", "--pattern", "box", "--cycles", "1", "--dry-run"])
        .arg("--export-log")
        .arg(&log_path)
        .assert()
        .success();

    let first_line = fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .next()
        .unwrap()
        .to_string();
    assert!(first_line.contains("\"type\":\"BOOT\""));

    let output = cli(data_dir)
        .arg("replay")
        .arg(&log_path)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let state: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(state["status"], "HALTED");
    assert_eq!(state["cycle_count"], 1);
    assert_eq!(state["pattern"]["id"], "box");
    assert_eq!(state["phase"], "inhale");
}

#[test]
fn test_replay_missing_log_fails() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["replay", "does-not-exist.jsonl"])
        .assert()
        .failure();
}

#[test]
fn test_custom_pattern_from_config() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    fs::write(
        data_dir.join("config.toml"),
        r#"
[[patterns.custom]]
id = "long-exhale"
label = "Long Exhale"
inhale = 3
exhale = 9
recommended_cycles = 2
"#,
    )
    .unwrap();

    cli(data_dir)
        .arg("patterns")
        .assert()
        .success()
        .stdout(predicate::str::contains("long-exhale"));

    cli(data_dir)
        .args(["session", "--pattern", "long-exhale"])
        .assert()
        .success();

    let records = wal_records(data_dir);
    assert_eq!(records[0]["pattern_id"], "long-exhale");
    assert_eq!(records[0]["cycles"], 2);
}

#[test]
fn test_invalid_custom_pattern_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    fs::write(
        data_dir.join("config.toml"),
        r#"
[[patterns.custom]]
id = "broken"
label = "Broken"
inhale = 4
exhale = 0
"#,
    )
    .unwrap();

    cli(data_dir)
        .arg("patterns")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Catalog validation errors"));
}

#[test]
fn test_zero_inhale_custom_pattern_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    fs::write(
        data_dir.join("config.toml"),
        r#"
[[patterns.custom]]
id = "noin"
label = "No Inhale"
inhale = 0
hold_in = 4
exhale = 4
"#,
    )
    .unwrap();

    cli(data_dir)
        .args(["session", "--pattern", "noin", "--cycles", "1"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("inhale must be positive"));

    assert!(!wal_path(data_dir).exists());
}
