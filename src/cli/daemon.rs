// CLI daemon commands: run, status, stop

use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::daemon::{self, logging, DaemonPaths, PidFile};
use crate::models::{CacheRecord, StopReason};
use crate::storage::cache::JsonCacheStore;
use crate::storage::CacheStore;

fn resolve_paths(config: Option<&Path>, data_dir: Option<&Path>) -> anyhow::Result<DaemonPaths> {
    let config = daemon::load_config(config, data_dir)?;
    Ok(DaemonPaths::new(daemon::effective_data_dir(&config, data_dir)))
}

/// ccusage-daemon run
pub async fn cmd_run(
    config_path: Option<&Path>,
    data_dir: Option<&Path>,
    verbose: bool,
) -> anyhow::Result<()> {
    let config = daemon::load_config(config_path, data_dir)?;
    let data_dir = daemon::effective_data_dir(&config, data_dir);
    daemon::create_data_dirs(&data_dir).await?;

    let level = if verbose { "debug" } else { config.log_level.as_str() };
    // Held until return so buffered log lines are flushed.
    let _log_guard = logging::init_logging(&data_dir, level, config.max_log_size);

    tracing::info!("Using data directory: {}", data_dir.display());

    match daemon::start_daemon(&config, &data_dir).await {
        Ok(StopReason::AlreadyRunning) => {
            tracing::info!("Another instance is already running. Exiting.");
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

/// Snapshot of what is on disk for a data directory.
#[derive(Debug, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub uptime_seconds: Option<u64>,
    pub pid_file: String,
    pub cache_file: String,
    pub cache: Option<CacheRecord>,
}

/// Gather the daemon status for `paths`. A corrupt cache is reported as absent.
pub async fn collect_status(paths: &DaemonPaths) -> DaemonStatus {
    let pid_file = PidFile::new(paths.pid_file.clone());
    let pid = pid_file.read_pid();
    let running = pid.map(daemon::is_process_alive).unwrap_or(false);

    // The marker is written once at startup, so its mtime is the start time.
    let uptime_seconds = if running {
        std::fs::metadata(&paths.pid_file)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .map(|d| d.as_secs())
    } else {
        None
    };

    let cache = match JsonCacheStore::at(paths.cache_file.clone()).read().await {
        Ok(record) => record,
        Err(e) => {
            tracing::debug!("Could not read cache: {:#}", e);
            None
        }
    };

    DaemonStatus {
        running,
        pid,
        uptime_seconds,
        pid_file: paths.pid_file.display().to_string(),
        cache_file: paths.cache_file.display().to_string(),
        cache,
    }
}

/// Human-readable status report.
pub fn render_status(status: &DaemonStatus) -> String {
    let mut out = String::new();
    let state = match (status.running, status.pid) {
        (true, Some(pid)) => format!("running (PID {})", pid),
        (false, Some(pid)) => format!("not running (stale PID file for {})", pid),
        _ => "not running".to_string(),
    };
    out.push_str(&format!("Daemon Status: {}\n", state));
    out.push_str(&format!("  PID File:    {}\n", status.pid_file));
    if let Some(uptime) = status.uptime_seconds {
        out.push_str(&format!("  Uptime:      {}\n", format_uptime(uptime)));
    }
    out.push_str(&format!("  Cache:       {}\n", status.cache_file));
    match &status.cache {
        Some(record) => {
            out.push_str(&format!("  Usage:       {}\n", record.summary()));
            out.push_str(&format!(
                "  Updated:     {}\n",
                record.timestamp.to_rfc3339()
            ));
            if let Some(ref err) = record.error {
                out.push_str(&format!("  Error:       {}\n", err));
            }
        }
        None => out.push_str("  Usage:       no cached data\n"),
    }
    out
}

/// ccusage-daemon status
pub async fn cmd_status(
    config_path: Option<&Path>,
    data_dir: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let paths = resolve_paths(config_path, data_dir)?;
    let status = collect_status(&paths).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render_status(&status));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// stop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NoPidFile,
    Invalid,
    Stale(u32),
    Signalled(u32),
}

/// Signal the daemon recorded in `paths`. With `force` the process is killed
/// and the marker removed, since the daemon cannot clean up after itself.
pub fn stop_daemon(paths: &DaemonPaths, force: bool) -> anyhow::Result<StopOutcome> {
    if !paths.pid_file.exists() {
        return Ok(StopOutcome::NoPidFile);
    }

    let pid_file = PidFile::new(paths.pid_file.clone());
    let pid = match pid_file.read_pid() {
        Some(pid) if daemon::is_process_alive(pid) => pid,
        Some(pid) => return Ok(StopOutcome::Stale(pid)),
        None => return Ok(StopOutcome::Invalid),
    };

    send_stop(pid, force)?;

    if force {
        if let Err(e) = std::fs::remove_file(&paths.pid_file) {
            tracing::warn!("Could not remove PID file: {}", e);
        }
    }
    Ok(StopOutcome::Signalled(pid))
}

#[cfg(unix)]
fn send_stop(pid: u32, force: bool) -> anyhow::Result<()> {
    let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Exited between the liveness check and the signal.
        return Ok(());
    }
    Err(anyhow::anyhow!("Failed to signal process {}: {}", pid, err))
}

#[cfg(windows)]
fn send_stop(pid: u32, force: bool) -> anyhow::Result<()> {
    let mut cmd = std::process::Command::new("taskkill");
    if force {
        cmd.arg("/F");
    }
    let status = cmd
        .args(["/PID", &pid.to_string()])
        .status()
        .context("Failed to execute taskkill")?;

    if !status.success() {
        tracing::warn!(
            "taskkill exited with code {:?} (process may already be dead)",
            status.code()
        );
    }
    Ok(())
}

/// ccusage-daemon stop
pub fn cmd_stop(
    config_path: Option<&Path>,
    data_dir: Option<&Path>,
    force: bool,
) -> anyhow::Result<()> {
    let paths = resolve_paths(config_path, data_dir)?;

    match stop_daemon(&paths, force).context("Failed to stop daemon")? {
        StopOutcome::NoPidFile => {
            println!("No PID file found. Daemon may not be running.");
        }
        StopOutcome::Invalid => {
            println!(
                "PID file {} does not contain a valid PID. Daemon may not be running.",
                paths.pid_file.display()
            );
        }
        StopOutcome::Stale(pid) => {
            println!("Process {} not found (stale PID file)", pid);
        }
        StopOutcome::Signalled(pid) if force => {
            println!("Killed daemon process {}", pid);
        }
        StopOutcome::Signalled(pid) => {
            println!("Daemon (PID {}) is shutting down...", pid);
        }
    }
    Ok(())
}

/// Format seconds into a human-readable uptime string.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
