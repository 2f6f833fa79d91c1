//! Tests for the `evalbox` binary.

use serde_json::{json, Value};
use std::io::Write;
use std::process::{Command, Output, Stdio};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn evalbox(args: &[&str], stdin: Option<&str>) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_evalbox"))
        .args(args)
        .env_remove("EVALBOX_CONFIG")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start evalbox");
    if let Some(input) = stdin {
        child
            .stdin
            .take()
            .expect("stdin is piped")
            .write_all(input.as_bytes())
            .expect("failed to write stdin");
    }
    child.wait_with_output().expect("evalbox did not finish")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// ══════════════════════════════════════════════════════════════════════════════
// Commands
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_evaluate_from_stdin() {
    let request = json!({
        "code": "def add(a, b):\n    return a + b\n",
        "test_cases": [
            {"input": {"a": 1, "b": 2}, "expected_output": 3},
            {"input": [2, 2], "output": 5}
        ]
    });
    let output = evalbox(&["evaluate", "-"], Some(&request.to_string()));
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let response = stdout_json(&output);
    assert_eq!(response["success"], json!(false));
    assert_eq!(response["score"], json!(50));
    assert_eq!(response["test_results"][0]["passed"], json!(true));
    assert_eq!(response["error"], json!("Some tests failed"));
}

#[test]
fn test_evaluate_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.json");
    let request = json!({"code": "def f(): return 42", "test_cases": [{"expected_output": 42}]});
    std::fs::write(&path, request.to_string()).unwrap();

    let output = evalbox(&["evaluate", path.to_str().unwrap(), "--pretty"], None);
    assert!(output.status.success());
    let response = stdout_json(&output);
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["score"], json!(100));
}

#[test]
fn test_malformed_request_fails() {
    let output = evalbox(&["evaluate", "-"], Some("{not json"));
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("parsing request JSON"));
}

#[test]
fn test_health_reports_healthy() {
    let output = evalbox(&["health"], None);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "healthy");
}

#[test]
fn test_stats_prints_limits() {
    let output = evalbox(&["stats"], None);
    assert!(output.status.success());
    let stats = stdout_json(&output);
    assert_eq!(stats["evaluations_completed"], json!(0));
    assert_eq!(stats["max_execution_time"], json!(5));
}

#[test]
fn test_config_file_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evalbox.toml");
    std::fs::write(&path, "default_timeout_secs = 2\nmax_parallel_tests = 1\n").unwrap();

    let output = evalbox(&["--config", path.to_str().unwrap(), "config"], None);
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("default_timeout_secs = 2"), "{text}");
    assert!(text.contains("max_parallel_tests = 1"), "{text}");
}

#[test]
fn test_invalid_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evalbox.toml");
    std::fs::write(&path, "recursion_limit = 0\n").unwrap();
    let output = evalbox(&["--config", path.to_str().unwrap(), "stats"], None);
    assert!(!output.status.success());
}
