pub mod config;
pub mod lifecycle;
pub mod usage;

pub use config::DaemonConfig;
pub use lifecycle::{LifecycleState, Phase, StopReason};
pub use usage::{CacheRecord, DegradedRecord, UsageSnapshot};
