//! Integration tests for reqburst
//!
//! End-to-end runs against a tiny HTTP responder bound to localhost, plus
//! the `rb` binary driven through assert_cmd.

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use assert_cmd::Command;
use execs::Executor;
use predicates::prelude::*;
use reqburst::aggregator::{Aggregator, Record};
use reqburst::client::Outcome;
use reqburst::config::ConfigFile;
use reqburst::plan::Plan;
use reqburst::runner::{RunOptions, Runner};
use reqburst::summary::Summary;
use tempfile::{NamedTempFile, TempDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// =============================================================================
// Helpers
// =============================================================================

/// Serve `200 ok` on `/ok` and `404` everywhere else, one response per
/// connection
async fn spawn_responder() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind responder");
    let addr = listener.local_addr().expect("Failed to get responder address");

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf);
                let path = head.split_whitespace().nth(1).unwrap_or("/");
                let (status, body) = if path == "/ok" {
                    ("200 OK", "ok")
                } else {
                    ("404 Not Found", "missing")
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

fn full_config(addr: SocketAddr) -> String {
    format!(
        r##"{{
            "reqs": {{
                "ok": {{"url": "http://{addr}/ok", "method": "GET"}},
                "missing": {{"url": "http://{addr}/missing", "method": "GET", "headers": {{"X-Test": ["1"]}}}}
            }},
            "req_burst": {{
                "fast": {{"rps": 10, "duration": 1}},
                "slow": {{"rpm": 300, "duration": 1}}
            }},
            "executions": {{
                "mixed": ["ok/fast", "missing/slow", "#ok/slow"]
            }},
            "steps": ["main", "mixed"],
            "settings": {{"timeout-ms": 2000}}
        }}"##
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp config");
    file.write_all(content.as_bytes()).expect("Failed to write temp config");
    file
}

/// `rb` with logs and config lookups kept inside `home`
fn rb(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rb").expect("rb binary should build");
    cmd.env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .current_dir(home.path());
    cmd
}

// =============================================================================
// Runner Tests
// =============================================================================

#[tokio::test]
async fn test_run_against_local_server() {
    let addr = spawn_responder().await;
    let config = ConfigFile::from_json(&full_config(addr)).unwrap();
    let plan = Plan::resolve(&config).unwrap();
    let runner = Runner::new(plan, config.settings, RunOptions::default()).unwrap();

    let report = runner.run().await.unwrap();
    let summary = report.summary();

    assert_eq!(report.skipped, vec!["#ok/slow"]);
    assert_eq!(report.steps.len(), 2);
    assert_eq!(summary.total, report.fires());
    assert_eq!(summary.errors, 0, "unexpected errors: {:?}", summary.error_messages);

    let ok = summary.statuses.get(&200).copied().unwrap_or(0);
    let missing = summary.statuses.get(&404).copied().unwrap_or(0);
    assert!(ok.abs_diff(10) <= 1, "expected ~10 x 200, got {ok}");
    assert!(missing.abs_diff(5) <= 1, "expected ~5 x 404, got {missing}");

    for drain in report.drains.values() {
        assert!(drain.is_clean(), "drain not clean: {drain:?}");
    }
    assert!(summary.latency.is_some());
}

#[tokio::test]
async fn test_odd_items_fail_through_executor_and_aggregator() {
    let aggregator = Aggregator::spawn();
    let sink = aggregator.clone();
    let executor = Executor::new(
        |i: u64| async move {
            let outcome = if i % 2 == 1 {
                Outcome::failure("odd", Duration::from_millis(1))
            } else {
                Outcome::response(200, Duration::from_millis(1), 0)
            };
            Record {
                label: "odd-even".to_string(),
                request_id: "r".to_string(),
                burst_id: "b".to_string(),
                outcome,
            }
        },
        move |record: Record| {
            let sink = sink.clone();
            async move {
                sink.record(record).await.unwrap();
            }
        },
    );

    let n: u64 = 11;
    for i in 0..n {
        executor.fire(i).await.unwrap();
    }
    let drain = executor.kill().await;
    assert!(drain.is_clean());

    let records = aggregator.finish().await.unwrap();
    let summary = Summary::from_records(&records);
    assert_eq!(summary.total, n);
    assert_eq!(summary.errors, n / 2);
    assert_eq!(summary.statuses.get(&200), Some(&(n - n / 2)));
    assert_eq!(summary.error_messages.get("odd"), Some(&(n / 2)));
}

#[tokio::test]
async fn test_shared_request_template_across_runs() {
    let addr = spawn_responder().await;
    let json = format!(
        r##"{{
            "reqs": {{"ok": {{"url": "http://{addr}/ok"}}}},
            "executions": {{"burst": {{"rps": 5, "duration": 1}}}},
            "steps": ["ok/burst", "-ok/burst", "ok/burst"]
        }}"##
    );
    let config = ConfigFile::from_json(&json).unwrap();
    let plan = Plan::resolve(&config).unwrap();
    assert_eq!(plan.runs.len(), 3);

    let runner = Runner::new(plan, config.settings, RunOptions::default()).unwrap();
    let report = runner.run().await.unwrap();

    assert_eq!(report.skipped, vec!["-ok/burst"]);
    assert_eq!(report.drains.len(), 1);
    let summary = report.summary();
    assert_eq!(summary.steps.len(), 1, "both runs share one label, request and burst");
    assert!(summary.total.abs_diff(10) <= 2);
    assert_eq!(summary.errors, 0);
}

// =============================================================================
// CLI Tests
// =============================================================================

#[test]
fn test_cli_check_prints_plan() {
    let home = TempDir::new().unwrap();
    let config = write_config(&full_config("127.0.0.1:9".parse().unwrap()));

    rb(&home)
        .args(["check", "-c"])
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("main (execution: mixed)"))
        .stdout(predicate::str::contains("[skipped]"))
        .stdout(predicate::str::contains("2 active step(s)"));
}

#[test]
fn test_cli_malformed_config_fails() {
    let home = TempDir::new().unwrap();
    let config = write_config("{ this is not json");

    rb(&home)
        .args(["check", "-c"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_cli_unknown_reference_fails() {
    let home = TempDir::new().unwrap();
    let config = write_config(
        r##"{
            "reqs": {},
            "executions": {"b": {"rps": 1, "duration": 1}},
            "steps": ["nope/b"]
        }"##,
    );

    rb(&home)
        .args(["run", "--no-progress", "-c"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown request"));
}

#[test]
fn test_cli_missing_config_fails() {
    let home = TempDir::new().unwrap();

    rb(&home)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No config file found"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cli_run_json_summary() {
    let addr = spawn_responder().await;
    let home = TempDir::new().unwrap();
    let config = write_config(&format!(
        r##"{{
            "reqs": {{"ok": {{"url": "http://{addr}/ok"}}}},
            "executions": {{"b": {{"rps": 5, "duration": 1}}}},
            "steps": ["ok/b"]
        }}"##
    ));
    let path = config.path().to_path_buf();

    let output = tokio::task::spawn_blocking(move || {
        rb(&home)
            .args(["run", "--format", "json", "-c"])
            .arg(&path)
            .output()
            .expect("Failed to run rb")
    })
    .await
    .unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    let total = summary["total"].as_u64().unwrap();
    assert!(total.abs_diff(5) <= 1, "expected ~5 requests, got {total}");
    assert_eq!(summary["errors"], 0);
    assert_eq!(summary["statuses"]["200"].as_u64(), Some(total));
}
