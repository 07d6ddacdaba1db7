use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::daemon::clock::Clock;
use crate::errors::DaemonError;
use crate::models::UsageSnapshot;
use crate::probe::{ProbeCommand, ProbeOutput};

/// Source of usage snapshots.
///
/// Implementations never fail: any problem obtaining data is reported as a
/// degraded snapshot.
#[async_trait]
pub trait UsageFetcher: Send + Sync {
    async fn fetch(&self) -> UsageSnapshot;
}

/// Usage fetcher that runs an external command printing a JSON object.
///
/// The command may exit non-zero (exit 1 signals high usage) while still
/// printing a valid object, so stdout is always parsed before the run is
/// treated as failed.
pub struct CommandUsageFetcher {
    command: ProbeCommand,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl CommandUsageFetcher {
    pub fn new(command: ProbeCommand, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            command,
            timeout,
            clock,
        }
    }

    fn snapshot_from_output(&self, output: &ProbeOutput) -> Result<UsageSnapshot, DaemonError> {
        match parse_snapshot(&output.stdout) {
            Ok(snapshot) => {
                match output.status {
                    Some(0) => {}
                    Some(1) => tracing::info!("Usage probe reported high usage (exit code 1)"),
                    status => tracing::warn!(
                        "Usage probe exited with {:?} but produced usable output",
                        status
                    ),
                }
                Ok(snapshot)
            }
            Err(e) => {
                let detail = match e {
                    DaemonError::InvalidOutput(msg) => msg,
                    other => other.to_string(),
                };
                let stderr = output.stderr.trim();
                let mut message = format!("{} (exit status {:?})", detail, output.status);
                if !stderr.is_empty() {
                    message.push_str(": ");
                    message.push_str(stderr);
                }
                Err(DaemonError::InvalidOutput(message))
            }
        }
    }
}

/// Parse probe stdout into a snapshot. The output must be a JSON object.
pub fn parse_snapshot(stdout: &str) -> Result<UsageSnapshot, DaemonError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(DaemonError::InvalidOutput("empty output".to_string()));
    }
    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| DaemonError::InvalidOutput(format!("not JSON: {}", e)))?;
    if !value.is_object() {
        return Err(DaemonError::InvalidOutput(
            "expected a JSON object".to_string(),
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| DaemonError::InvalidOutput(format!("unexpected field type: {}", e)))
}

#[async_trait]
impl UsageFetcher for CommandUsageFetcher {
    async fn fetch(&self) -> UsageSnapshot {
        let fetched_at = self.clock.now();

        let result = match self.command.run(self.timeout).await {
            Ok(output) => self.snapshot_from_output(&output),
            Err(e) => Err(e),
        };

        match result {
            Ok(mut snapshot) => {
                snapshot.fetched_at = fetched_at;
                if let Some(ref err) = snapshot.error {
                    tracing::warn!("Usage probe reported an error: {}", err);
                }
                snapshot
            }
            Err(e) => {
                tracing::error!("Failed to get usage: {}", e);
                UsageSnapshot::degraded(e.to_string(), fetched_at)
            }
        }
    }
}
