// Daemon module: singleton guard, config/data-dir resolution, signal wiring
// and the bootstrap that builds and runs the lifecycle controller.

pub mod clock;
pub mod controller;
pub mod logging;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::daemon::clock::{Clock, SystemClock};
use crate::daemon::controller::{LifecycleController, Timing};
use crate::models::{DaemonConfig, StopReason};
use crate::probe::{self, CommandLivenessProbe, CommandUsageFetcher, ProbeCommand};
use crate::storage::cache::{JsonCacheStore, CACHE_FILE_NAME};

pub const PID_FILE_NAME: &str = "ccusage-daemon.pid";

// ---------------------------------------------------------------------------
// PidFile: singleton guard
// ---------------------------------------------------------------------------

/// Manages a PID file to ensure only one daemon instance runs at a time.
///
/// The marker is claimed exclusively with a hard link from a temp file that
/// already holds the PID, so it is never observed empty. An existing
/// marker naming a dead process, or holding anything other than a positive
/// integer, is removed before acquisition. A held marker is removed when the
/// `PidFile` is dropped.
pub struct PidFile {
    path: PathBuf,
    held: AtomicBool,
}

/// Parse marker content as a positive PID.
pub fn parse_pid(content: &str) -> Option<u32> {
    content
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|pid| *pid > 0 && *pid <= i32::MAX as i64)
        .map(|pid| pid as u32)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Publish `content` at `path` only if nothing is there yet.
///
/// The content is written to a sibling temp file and hard-linked into place,
/// so the marker never exists without its PID. Returns `Ok(false)` if `path`
/// already exists.
pub fn claim_marker(path: &Path, content: &str) -> std::io::Result<bool> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| -> std::io::Result<bool> {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);

        match std::fs::hard_link(&tmp_path, path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    })();

    let _ = std::fs::remove_file(&tmp_path);
    result
}

impl PidFile {
    /// Create a new PidFile handle (does not acquire yet).
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            held: AtomicBool::new(false),
        }
    }

    /// Acquire the PID file.
    ///
    /// - If the file does not exist, claims it with the current PID.
    /// - If the content is not a positive integer, removes it and acquires.
    /// - If the recorded PID is alive, returns `Ok(false)`.
    /// - If the recorded PID is dead, removes the stale file and acquires.
    ///
    /// Losing the claim race to another instance also returns
    /// `Ok(false)`. Any other failure to write the marker is an error.
    pub fn acquire(&self) -> Result<bool> {
        if self.path.exists() {
            match std::fs::read_to_string(&self.path) {
                Ok(content) => match parse_pid(&content) {
                    None => {
                        tracing::warn!("Invalid PID in PID file: {:?}", content.trim());
                        remove_if_exists(&self.path)
                            .context("Failed to remove invalid PID file")?;
                    }
                    Some(pid) if pid == std::process::id() => {
                        // A previous incarnation with our PID cannot still be running.
                        tracing::info!("Removing stale PID file naming this process ({})", pid);
                        remove_if_exists(&self.path).context("Failed to remove stale PID file")?;
                    }
                    Some(pid) if is_process_alive(pid) => {
                        tracing::info!("Daemon already running (PID: {})", pid);
                        return Ok(false);
                    }
                    Some(pid) => {
                        tracing::info!("Removing stale PID file (PID: {})", pid);
                        remove_if_exists(&self.path).context("Failed to remove stale PID file")?;
                    }
                },
                Err(e) => {
                    tracing::error!("Error reading PID file: {}", e);
                    remove_if_exists(&self.path)
                        .context("Failed to remove unreadable PID file")?;
                }
            }
        }

        let pid = std::process::id();
        let claimed = claim_marker(&self.path, &pid.to_string())
            .with_context(|| format!("Failed to create PID file {}", self.path.display()))?;
        if !claimed {
            tracing::info!("Another daemon instance created the PID file first");
            return Ok(false);
        }
        self.held.store(true, Ordering::SeqCst);

        tracing::debug!("PID file acquired: {} (PID {})", self.path.display(), pid);
        Ok(true)
    }

    /// Release the PID file by removing it. Idempotent.
    pub fn release(&self) -> Result<()> {
        self.held.store(false, Ordering::SeqCst);
        if self.path.exists() {
            remove_if_exists(&self.path).context("Failed to remove PID file")?;
            tracing::info!("PID file removed");
        }
        Ok(())
    }

    /// Whether this handle acquired the marker and has not released it.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Read the PID recorded in the marker, if it is valid.
    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| parse_pid(&content))
    }

    /// Check if the PID file exists and the recorded process is alive.
    pub fn is_alive(&self) -> bool {
        self.read_pid().map(is_process_alive).unwrap_or(false)
    }

    /// Return the path to this PID file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if self.held.swap(false, Ordering::SeqCst) {
            if let Err(e) = remove_if_exists(&self.path) {
                tracing::error!("Failed to remove PID file on drop: {}", e);
            }
        }
    }
}

/// Check whether a process with the given PID is alive.
///
/// - Unix: uses kill(pid, 0). EPERM means the process exists but belongs to
///   someone else, which still counts as alive.
/// - Windows: uses OpenProcess with PROCESS_QUERY_LIMITED_INFORMATION.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        if pid == 0 || pid > i32::MAX as u32 {
            return false;
        }
        // signal 0 tests process existence
        if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(windows)]
    {
        // PROCESS_QUERY_LIMITED_INFORMATION = 0x1000
        const PROCESS_QUERY_LIMITED_INFORMATION: u32 = 0x1000;

        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                false
            } else {
                CloseHandle(handle);
                true
            }
        }
    }
}

#[cfg(windows)]
extern "system" {
    fn OpenProcess(
        dwDesiredAccess: u32,
        bInheritHandle: i32,
        dwProcessId: u32,
    ) -> *mut std::ffi::c_void;
    fn CloseHandle(hObject: *mut std::ffi::c_void) -> i32;
}

// ---------------------------------------------------------------------------
// Paths and config loading
// ---------------------------------------------------------------------------

/// The fixed files the daemon owns inside its data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    pub data_dir: PathBuf,
    pub pid_file: PathBuf,
    pub cache_file: PathBuf,
    pub log_file: PathBuf,
}

impl DaemonPaths {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            pid_file: data_dir.join(PID_FILE_NAME),
            cache_file: data_dir.join(CACHE_FILE_NAME),
            log_file: data_dir.join(logging::LOG_FILE_NAME),
            data_dir,
        }
    }
}

fn read_config_file(path: &Path) -> Result<DaemonConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: DaemonConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Load the DaemonConfig. Resolution order:
///   1. `--config` path (must exist)
///   2. `CCUSAGE_CONFIG_DIR/config.json`
///   3. platform config dir (`dirs::config_dir()/ccusage-daemon/config.json`)
///   4. `{data_dir}/config.json`
///   5. `DaemonConfig::default()`
pub fn load_config(
    config_path: Option<&Path>,
    data_dir_override: Option<&Path>,
) -> Result<DaemonConfig> {
    if let Some(path) = config_path {
        if path.exists() {
            return read_config_file(path);
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    let mut candidates = Vec::new();
    if let Ok(config_dir) = std::env::var("CCUSAGE_CONFIG_DIR") {
        candidates.push(PathBuf::from(config_dir).join("config.json"));
    }
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join("ccusage-daemon").join("config.json"));
    }
    candidates.push(resolve_data_dir(data_dir_override).join("config.json"));

    for path in candidates {
        if path.exists() {
            return read_config_file(&path);
        }
    }

    Ok(DaemonConfig::default())
}

/// Resolve the data directory. If `override_dir` is Some, use it, then
/// `CCUSAGE_DATA_DIR`, then `~/.claude/cache`.
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    if let Ok(d) = std::env::var("CCUSAGE_DATA_DIR") {
        return PathBuf::from(d);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("cache")
}

/// Pick the data directory for a run: CLI flag, then config, then defaults.
pub fn effective_data_dir(config: &DaemonConfig, flag: Option<&Path>) -> PathBuf {
    match (flag, config.data_dir.as_deref()) {
        (Some(dir), _) => dir.to_path_buf(),
        (None, Some(dir)) => dir.to_path_buf(),
        (None, None) => resolve_data_dir(None),
    }
}

/// Create the data directory if needed.
pub async fn create_data_dirs(data_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .context("Failed to create data directory")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Install interrupt/termination handlers that flip `shutdown_tx` to `true`.
///
/// Handlers are registered before this returns. Repeated signals only resend
/// `true`, so delivery is idempotent.
pub fn spawn_signal_listener(
    shutdown_tx: watch::Sender<bool>,
) -> Result<tokio::task::JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigint.recv() => tracing::info!("Received SIGINT signal"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                }
                if shutdown_tx.send(true).is_err() {
                    break;
                }
            }
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C signal");
                if shutdown_tx.send(true).is_err() {
                    break;
                }
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// Daemon bootstrap
// ---------------------------------------------------------------------------

fn probe_command(
    configured: Option<&[String]>,
    default: impl FnOnce() -> ProbeCommand,
) -> Result<ProbeCommand> {
    match configured {
        Some(argv) => Ok(ProbeCommand::from_argv(argv)?),
        None => Ok(default()),
    }
}

/// Wire the production collaborators into a controller.
pub async fn build_controller(
    config: &DaemonConfig,
    paths: &DaemonPaths,
    clock: Arc<dyn Clock>,
) -> Result<LifecycleController> {
    let usage_command = probe_command(
        config.usage_command.as_deref(),
        probe::default_usage_command,
    )
    .context("Invalid usage_command")?;
    let liveness_command = probe_command(
        config.liveness_command.as_deref(),
        probe::default_liveness_command,
    )
    .context("Invalid liveness_command")?;

    tracing::debug!("Usage probe: {}", usage_command);
    tracing::debug!("Liveness probe: {}", liveness_command);

    let fetcher = Arc::new(CommandUsageFetcher::new(
        usage_command,
        config.usage_timeout(),
        Arc::clone(&clock),
    ));
    let liveness = Arc::new(CommandLivenessProbe::new(
        liveness_command,
        config.liveness_timeout(),
    ));
    let cache = Arc::new(JsonCacheStore::new(&paths.data_dir).await?);

    Ok(LifecycleController::new(
        PidFile::new(paths.pid_file.clone()),
        fetcher,
        liveness,
        cache,
        clock,
        Timing::from(config),
    ))
}

/// Start the daemon and run it until a stop condition.
///
/// 1. Installs signal handlers
/// 2. Builds the controller (probes, cache writer, PID guard)
/// 3. Runs the lifecycle: guard acquisition, initial refresh, tick loop
/// 4. Releases the guard on every exit path
pub async fn start_daemon(config: &DaemonConfig, data_dir: &Path) -> Result<StopReason> {
    let paths = DaemonPaths::new(data_dir.to_path_buf());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = spawn_signal_listener(shutdown_tx)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let result = match build_controller(config, &paths, clock).await {
        Ok(mut controller) => controller.run(shutdown_rx).await,
        Err(e) => Err(e),
    };

    signal_task.abort();
    result
}
