//! End-to-end tests for the reqflow CLI
//!
//! These run the compiled `reqflow` binary and check its output.

use std::fs;
use std::process::Command;

fn reqflow() -> Command {
    Command::new(env!("CARGO_BIN_EXE_reqflow"))
}

/// `reqflow config` prints the defaults as JSON
#[test]
fn test_config_command() {
    let output = reqflow()
        .arg("config")
        .env_remove("REQFLOW_BATCH_DELAY_MS")
        .env_remove("REQFLOW_MAX_CONCURRENT")
        .output()
        .expect("Failed to run reqflow config");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "Command failed: {}", stderr);

    let json: serde_json::Value = serde_json::from_str(stdout.trim()).expect("Invalid JSON in config output");
    assert_eq!(json["batch"]["batch_delay_ms"], 50);
    assert_eq!(json["batch"]["max_batch_size"], 10);
    assert_eq!(json["scheduler"]["max_concurrent"], 5);
    assert_eq!(json["loader"]["cache"], true);
}

/// Environment variables override the defaults
#[test]
fn test_config_reads_environment() {
    let output = reqflow()
        .arg("config")
        .env("REQFLOW_BATCH_DELAY_MS", "7")
        .env("REQFLOW_MAX_CONCURRENT", "3")
        .output()
        .expect("Failed to run reqflow config");

    assert!(output.status.success());
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("Invalid JSON in config output");
    assert_eq!(json["batch"]["batch_delay_ms"], 7);
    assert_eq!(json["scheduler"]["max_concurrent"], 3);
}

#[test]
fn test_config_preset() {
    let output = reqflow()
        .args(["config", "--preset", "high-throughput"])
        .output()
        .expect("Failed to run reqflow config --preset");

    assert!(output.status.success());
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("Invalid JSON in config output");
    assert_eq!(json["batch"]["max_batch_size"], 50);
}

/// `reqflow bench -s <name> -o <file>` writes one result with savings
#[test]
fn test_bench_writes_results() {
    let path = std::env::temp_dir().join(format!("reqflow-bench-{}.json", std::process::id()));

    let output = reqflow()
        .args(["bench", "--preset", "low-latency", "-s", "point_lookups", "-o"])
        .arg(&path)
        .output()
        .expect("Failed to run reqflow bench");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "Command failed: {}", stderr);
    assert!(stdout.contains("Scenario Summary"), "Missing summary");
    assert!(stdout.contains("Results saved to"), "Missing save notice");

    let contents = fs::read_to_string(&path).expect("Results file not written");
    let _ = fs::remove_file(&path);

    let results: serde_json::Value = serde_json::from_str(&contents).expect("Invalid results JSON");
    let results = results.as_array().expect("Results should be an array");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["config"]["name"], "point_lookups");

    let requests = results[0]["metrics"]["total_requests"].as_u64().unwrap();
    let calls = results[0]["downstream_calls"].as_u64().unwrap();
    assert!(calls < requests, "expected fewer downstream calls than requests");
}

#[test]
fn test_bench_unknown_scenario_fails() {
    let output = reqflow()
        .args(["bench", "-s", "no_such_scenario"])
        .output()
        .expect("Failed to run reqflow bench");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown scenario"));
}
