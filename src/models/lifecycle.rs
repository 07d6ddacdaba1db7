use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of the running daemon instance, recorded when the PID marker is
/// acquired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleState {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl LifecycleState {
    pub fn current(started_at: DateTime<Utc>) -> Self {
        Self {
            pid: std::process::id(),
            started_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Why the controller left its loop. Every variant maps to exit code 0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Another live instance holds the PID marker.
    AlreadyRunning,
    /// Interrupt or termination signal.
    Signal,
    /// The liveness probe reported no running parent application.
    ParentExited,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::AlreadyRunning => write!(f, "another instance is already running"),
            StopReason::Signal => write!(f, "received shutdown signal"),
            StopReason::ParentExited => write!(f, "no parent application processes found"),
        }
    }
}
