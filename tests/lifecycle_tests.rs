//! End-to-end lifecycle tests: the real binary with shell-script probes.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command as StdCommand, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

#[allow(deprecated)]
fn daemon_cmd() -> Command {
    Command::cargo_bin("ccusage-daemon").expect("binary should exist")
}

#[allow(deprecated)]
fn daemon_bin() -> PathBuf {
    assert_cmd::cargo::cargo_bin("ccusage-daemon")
}

/// Write a config with `sh -c` probes and one-second cadence.
fn write_config(dir: &Path, usage: &str, liveness: &str, liveness_interval_secs: u64) -> PathBuf {
    let path = dir.join("test-config.json");
    let config = json!({
        "tick_interval_secs": 1,
        "liveness_interval_secs": liveness_interval_secs,
        "refresh_interval_secs": 300,
        "usage_timeout_secs": 5,
        "liveness_timeout_secs": 5,
        "log_level": "debug",
        "usage_command": ["sh", "-c", usage],
        "liveness_command": ["sh", "-c", liveness],
    });
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).expect("write config");
    path
}

fn read_cache(dir: &Path) -> Value {
    let content =
        std::fs::read_to_string(dir.join("ccusage-cache.json")).expect("cache file exists");
    serde_json::from_str(&content).expect("cache is JSON")
}

fn wait_for_exit(child: &mut Child, limit: Duration) -> ExitStatus {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("daemon did not exit within {:?}", limit);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn wait_for_file(path: &Path, limit: Duration) {
    let deadline = Instant::now() + limit;
    while !path.exists() {
        assert!(Instant::now() < deadline, "{} never appeared", path.display());
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_exits_when_parent_application_is_gone() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let config = write_config(
        tmp_dir.path(),
        r#"echo '{"tokenPercent": 12, "tokenLimit": 19000000}'"#,
        "echo 0",
        0,
    );

    daemon_cmd()
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(tmp_dir.path())
        .timeout(Duration::from_secs(20))
        .assert()
        .success();

    assert!(!tmp_dir.path().join("ccusage-daemon.pid").exists());
    let cache = read_cache(tmp_dir.path());
    assert_eq!(cache["tokenPercent"], 12.0);
    assert_eq!(cache["plan"], "pro");

    let log = std::fs::read_to_string(tmp_dir.path().join("ccusage-daemon.log"))
        .expect("log file exists");
    assert!(log.contains("[INFO] Daemon started"), "log: {}", log);
    assert!(log.contains("No parent application processes found"), "log: {}", log);
}

#[test]
fn test_second_instance_exits_without_touching_cache() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let config = write_config(tmp_dir.path(), "echo '{}'", "echo 1", 60);
    let pid_path = tmp_dir.path().join("ccusage-daemon.pid");
    let live_pid = std::os::unix::process::parent_id().to_string();
    std::fs::write(&pid_path, &live_pid).expect("write marker");

    daemon_cmd()
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(tmp_dir.path())
        .timeout(Duration::from_secs(20))
        .assert()
        .success()
        .stderr(predicate::str::contains("already running"));

    assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), live_pid);
    assert!(!tmp_dir.path().join("ccusage-cache.json").exists());
}

#[test]
fn test_sigterm_stops_gracefully_and_releases_marker() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let config = write_config(
        tmp_dir.path(),
        r#"echo '{"tokenPercent": 82}'; exit 1"#,
        "echo 1",
        1,
    );
    let pid_path = tmp_dir.path().join("ccusage-daemon.pid");

    let mut child = StdCommand::new(daemon_bin())
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(tmp_dir.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn daemon");

    // The cache write follows acquisition, so both exist once the cache does.
    wait_for_file(&tmp_dir.path().join("ccusage-cache.json"), Duration::from_secs(15));
    assert_eq!(
        std::fs::read_to_string(&pid_path).unwrap(),
        child.id().to_string()
    );
    assert_eq!(read_cache(tmp_dir.path())["tokenPercent"], 82.0);

    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let status = wait_for_exit(&mut child, Duration::from_secs(15));
    assert_eq!(status.code(), Some(0));
    assert!(!pid_path.exists());
}

#[test]
fn test_stop_command_stops_running_daemon() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let config = write_config(tmp_dir.path(), "echo '{}'", "echo 1", 60);
    let pid_path = tmp_dir.path().join("ccusage-daemon.pid");

    let mut child = StdCommand::new(daemon_bin())
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(tmp_dir.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn daemon");
    wait_for_file(&tmp_dir.path().join("ccusage-cache.json"), Duration::from_secs(15));

    daemon_cmd()
        .args(["stop", "--data-dir"])
        .arg(tmp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("shutting down"));

    let status = wait_for_exit(&mut child, Duration::from_secs(15));
    assert_eq!(status.code(), Some(0));
    assert!(!pid_path.exists());
}

#[test]
fn test_stale_marker_is_replaced() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let config = write_config(tmp_dir.path(), "echo '{}'", "echo 0", 0);
    std::fs::write(
        tmp_dir.path().join("ccusage-daemon.pid"),
        (i32::MAX - 1).to_string(),
    )
    .expect("write stale marker");

    daemon_cmd()
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(tmp_dir.path())
        .timeout(Duration::from_secs(20))
        .assert()
        .success()
        .stderr(predicate::str::contains("Removing stale PID file"));

    assert!(tmp_dir.path().join("ccusage-cache.json").exists());
    assert!(!tmp_dir.path().join("ccusage-daemon.pid").exists());
}

#[test]
fn test_failing_usage_probe_writes_degraded_cache() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let config = write_config(
        tmp_dir.path(),
        "echo 'boom' 1>&2; exit 3",
        "echo 0",
        0,
    );

    daemon_cmd()
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(tmp_dir.path())
        .timeout(Duration::from_secs(20))
        .assert()
        .success();

    let cache = read_cache(tmp_dir.path());
    assert_eq!(cache["tokenPercent"], 0.0);
    assert!(cache["error"].as_str().unwrap_or_default().contains("boom"));
}
