pub mod cache;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CacheRecord, UsageSnapshot};

/// What a cache write ended up persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The full record composed from the snapshot.
    Full,
    /// The minimal degraded record, after the full write failed.
    Degraded,
    /// Nothing could be written; the failure was logged.
    Failed,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Persist the snapshot. Never fails: write errors are absorbed and
    /// reported through the returned outcome.
    async fn write(&self, snapshot: &UsageSnapshot) -> WriteOutcome;
    async fn read(&self) -> Result<Option<CacheRecord>>;
}
