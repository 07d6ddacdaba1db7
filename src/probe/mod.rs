// External probes: the usage command and the parent-application liveness
// command. Both run as short-lived child processes bounded by a timeout.

pub mod liveness;
pub mod usage;

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use crate::errors::DaemonError;

pub use liveness::{CommandLivenessProbe, LivenessProbe};
pub use usage::{CommandUsageFetcher, UsageFetcher};

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Captured result of a probe that ran to completion.
#[derive(Debug, Clone)]
pub struct ProbeOutput {
    /// Exit code, or `None` if the child was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProbeCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build a command from a configured `[program, args...]` list.
    pub fn from_argv(argv: &[String]) -> Result<Self, DaemonError> {
        match argv.split_first() {
            Some((program, args)) if !program.is_empty() => {
                Ok(Self::new(program.clone(), args.to_vec()))
            }
            _ => Err(DaemonError::Config(
                "probe command must name a program".to_string(),
            )),
        }
    }

    /// Run the command with stdin closed and stdout/stderr captured.
    ///
    /// The child is killed if it outlives `timeout` or if the returned future
    /// is dropped first.
    pub async fn run(&self, timeout: Duration) -> Result<ProbeOutput, DaemonError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DaemonError::NotFound(format!("{}: {}", self.program, e))
                } else {
                    DaemonError::Spawn(format!("{}: {}", self, e))
                }
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ProbeOutput {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(DaemonError::Spawn(format!("{}: {}", self, e))),
            Err(_) => Err(DaemonError::Timeout(format!(
                "{} did not finish within {:?}",
                self, timeout
            ))),
        }
    }
}

impl fmt::Display for ProbeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Directory holding the helper scripts the default probes invoke.
///
/// `CCUSAGE_SCRIPT_DIR` overrides the default of `~/.claude`.
pub fn script_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CCUSAGE_SCRIPT_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
}

/// Default usage probe: the message-usage script run by the local Python.
pub fn default_usage_command() -> ProbeCommand {
    let script = script_dir().join("get-message-usage.py");
    ProbeCommand::new(
        python_command(),
        vec![script.to_string_lossy().into_owned()],
    )
}

/// Default liveness probe: the platform's process-detection script.
pub fn default_liveness_command() -> ProbeCommand {
    #[cfg(windows)]
    {
        let script = script_dir().join("check-claude-process.ps1");
        ProbeCommand::new(
            "powershell",
            vec![
                "-NoProfile".to_string(),
                "-ExecutionPolicy".to_string(),
                "Bypass".to_string(),
                "-File".to_string(),
                script.to_string_lossy().into_owned(),
            ],
        )
    }

    #[cfg(not(windows))]
    {
        let script = script_dir().join("check-claude-process.sh");
        ProbeCommand::new("bash", vec![script.to_string_lossy().into_owned()])
    }
}

/// Resolve the Python interpreter used by the default usage probe.
///
/// On Windows the common per-user install locations are tried in order, each
/// confirmed with `--version`; elsewhere `python3` is assumed to be on PATH.
fn python_command() -> String {
    #[cfg(windows)]
    {
        let local = std::env::var("LOCALAPPDATA").unwrap_or_default();
        let candidates = [
            format!("{}\\Programs\\Python\\Python312-arm64\\python.exe", local),
            format!("{}\\Programs\\Python\\Python312\\python.exe", local),
            format!("{}\\Programs\\Python\\Python311\\python.exe", local),
        ];
        for candidate in candidates {
            let found = std::process::Command::new(&candidate)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false);
            if found {
                return candidate;
            }
        }
        "python".to_string()
    }

    #[cfg(not(windows))]
    {
        "python3".to_string()
    }
}
