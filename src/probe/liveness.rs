use std::time::Duration;

use async_trait::async_trait;

use crate::errors::DaemonError;
use crate::probe::ProbeCommand;

/// Counts running instances of the parent application.
///
/// Every failure is normalized to a count of 0.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn count(&self) -> u32;
}

/// Liveness probe that runs a process-detection command printing a count.
///
/// Exit code 1 means "no matching process" and is a normal outcome. Exit code
/// 127 is how shells report a missing script.
pub struct CommandLivenessProbe {
    command: ProbeCommand,
    timeout: Duration,
}

impl CommandLivenessProbe {
    pub fn new(command: ProbeCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

/// Parse the leading integer of the probe output; anything else counts as 0.
pub fn parse_count(stdout: &str) -> u32 {
    stdout
        .split_whitespace()
        .next()
        .and_then(|token| token.parse::<u32>().ok())
        .unwrap_or(0)
}

#[async_trait]
impl LivenessProbe for CommandLivenessProbe {
    async fn count(&self) -> u32 {
        match self.command.run(self.timeout).await {
            Ok(output) => match output.status {
                Some(0) => {
                    let count = parse_count(&output.stdout);
                    tracing::debug!("Process detection: {} processes found", count);
                    count
                }
                Some(1) => {
                    tracing::debug!("Process detection: no processes found (exit code 1)");
                    0
                }
                Some(127) => {
                    tracing::error!(
                        "Process detection failed: script not found ({}): {}",
                        self.command,
                        output.stderr.trim()
                    );
                    0
                }
                status => {
                    tracing::error!(
                        "Process detection error: exited with {:?}: {}",
                        status,
                        output.stderr.trim()
                    );
                    0
                }
            },
            Err(DaemonError::NotFound(msg)) => {
                tracing::error!("Process detection failed: program not found - {}", msg);
                0
            }
            Err(e) => {
                tracing::error!("Process detection error: {}", e);
                0
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn probe(script: &str) -> CommandLivenessProbe {
        CommandLivenessProbe::new(
            ProbeCommand::new("sh", vec!["-c".to_string(), script.to_string()]),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("3\n"), 3);
        assert_eq!(parse_count("  2\r\n"), 2);
        assert_eq!(parse_count("4 processes"), 4);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("none"), 0);
        assert_eq!(parse_count("-1"), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_count_reads_stdout() {
        assert_eq!(probe("echo 2").count().await, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_count_exit_one_means_none_found() {
        assert_eq!(probe("echo 5; exit 1").count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_count_unexpected_exit_is_zero() {
        assert_eq!(probe("echo 3; exit 4").count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_count_missing_script_is_zero() {
        let probe = CommandLivenessProbe::new(
            ProbeCommand::new(
                "sh",
                vec!["/nonexistent/check-claude-process.sh".to_string()],
            ),
            Duration::from_secs(5),
        );
        assert_eq!(probe.count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_count_timeout_is_zero() {
        let probe = CommandLivenessProbe::new(
            ProbeCommand::new("sh", vec!["-c".to_string(), "exec sleep 30".to_string()]),
            Duration::from_millis(300),
        );
        assert_eq!(probe.count().await, 0);
    }

    #[tokio::test]
    async fn test_count_missing_program_is_zero() {
        let probe = CommandLivenessProbe::new(
            ProbeCommand::new("ccusage-daemon-no-such-probe", Vec::new()),
            Duration::from_secs(1),
        );
        assert_eq!(probe.count().await, 0);
    }
}
