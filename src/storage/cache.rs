use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{CacheRecord, DegradedRecord, UsageSnapshot};
use crate::storage::{CacheStore, WriteOutcome};

pub const CACHE_FILE_NAME: &str = "ccusage-cache.json";

/// Cache writer backed by a single pretty-printed JSON file that is
/// overwritten wholesale on every refresh.
pub struct JsonCacheStore {
    file_path: PathBuf,
}

impl JsonCacheStore {
    /// Create a new JsonCacheStore writing `ccusage-cache.json` in `data_dir`.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .context("Failed to create cache directory")?;
        Ok(Self::at(data_dir.join(CACHE_FILE_NAME)))
    }

    /// Use an explicit cache file path. The parent directory must exist.
    pub fn at(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Write to a .tmp file first, then rename over the cache file so readers
    /// never observe a partial record.
    async fn persist<T: Serialize + Sync>(&self, value: &T) -> Result<()> {
        let tmp_path = self.file_path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(value).context("Failed to serialize cache")?;

        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .context("Failed to write temporary cache file")?;

        tokio::fs::rename(&tmp_path, &self.file_path)
            .await
            .context("Failed to rename temporary cache file")?;

        Ok(())
    }

    /// Overwrite the cache file directly, skipping the tmp file that the
    /// failed atomic write may have left behind.
    async fn write_in_place<T: Serialize + Sync>(&self, value: &T) -> Result<()> {
        let tmp_path = self.file_path.with_extension("json.tmp");
        if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("Could not remove {}: {}", tmp_path.display(), e);
            }
        }

        let json = serde_json::to_string_pretty(value).context("Failed to serialize cache")?;
        tokio::fs::write(&self.file_path, json.as_bytes())
            .await
            .context("Failed to write cache file")?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for JsonCacheStore {
    async fn write(&self, snapshot: &UsageSnapshot) -> WriteOutcome {
        let record = CacheRecord::from_snapshot(snapshot);

        let err = match self.persist(&record).await {
            Ok(()) => {
                tracing::info!("Cache updated: {}", record.summary());
                return WriteOutcome::Full;
            }
            Err(e) => e,
        };

        tracing::error!("Failed to update cache: {:#}", err);
        let degraded = DegradedRecord::new(snapshot.fetched_at, format!("{:#}", err));
        match self.write_in_place(&degraded).await {
            Ok(()) => WriteOutcome::Degraded,
            Err(e) => {
                tracing::error!("Failed to write degraded cache record: {:#}", e);
                WriteOutcome::Failed
            }
        }
    }

    async fn read(&self) -> Result<Option<CacheRecord>> {
        if !self.file_path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.file_path)
            .await
            .context("Failed to read cache file")?;
        let record = serde_json::from_str(&content).context("Failed to parse cache file")?;
        Ok(Some(record))
    }
}
