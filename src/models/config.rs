use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_usage_timeout_secs")]
    pub usage_timeout_secs: u64,
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,
    #[serde(default = "default_max_log_size")]
    pub max_log_size: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Program and arguments for the usage probe. `None` selects the
    /// platform default.
    #[serde(default)]
    pub usage_command: Option<Vec<String>>,
    /// Program and arguments for the liveness probe. `None` selects the
    /// platform default.
    #[serde(default)]
    pub liveness_command: Option<Vec<String>>,
}

fn default_tick_interval_secs() -> u64 {
    10
}

fn default_liveness_interval_secs() -> u64 {
    60
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_usage_timeout_secs() -> u64 {
    10
}

fn default_liveness_timeout_secs() -> u64 {
    5
}

fn default_max_log_size() -> u64 {
    5_242_880 // 5MB
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn usage_timeout(&self) -> Duration {
        Duration::from_secs(self.usage_timeout_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            tick_interval_secs: default_tick_interval_secs(),
            liveness_interval_secs: default_liveness_interval_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            usage_timeout_secs: default_usage_timeout_secs(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            max_log_size: default_max_log_size(),
            log_level: default_log_level(),
            usage_command: None,
            liveness_command: None,
        }
    }
}
