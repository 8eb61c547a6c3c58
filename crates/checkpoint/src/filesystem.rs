//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::store::{CheckpointStore, StoredCheckpoint};

/// Filesystem implementation of the [`CheckpointStore`] trait.
///
/// Stores one JSON file per domain under a directory, e.g.
/// `.shoplens-checkpoints/checkpoint_collection-sync.json`.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("checkpoint_{domain}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn get(&self, domain: &str) -> Result<Option<DateTime<Utc>>> {
        let path = self.path_for(domain);
        if !path.exists() {
            return Ok(None);
        }

        // A present-but-unreadable file is an error, never "absent".
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint file {}", path.display()))?;
        let stored: StoredCheckpoint = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint file {}", path.display()))?;

        if stored.domain != domain {
            anyhow::bail!(
                "Checkpoint file {} belongs to domain '{}', expected '{domain}'",
                path.display(),
                stored.domain
            );
        }

        Ok(Some(stored.last_sync_at))
    }

    async fn set(&self, domain: &str, last_sync_at: DateTime<Utc>) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create checkpoint directory {}", self.dir.display())
        })?;

        let stored = StoredCheckpoint {
            domain: domain.to_string(),
            last_sync_at,
            updated_at: Utc::now(),
        };

        let path = self.path_for(domain);
        std::fs::write(&path, serde_json::to_string_pretty(&stored)?)
            .with_context(|| format!("Failed to write checkpoint file {}", path.display()))?;

        tracing::info!(
            "Stored checkpoint for domain '{}' to {}: {}",
            domain,
            path.display(),
            last_sync_at.to_rfc3339()
        );
        Ok(())
    }

    async fn delete(&self, domain: &str) -> Result<()> {
        let path = self.path_for(domain);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete checkpoint file {}", path.display()))?;
            tracing::info!("Deleted checkpoint for domain '{domain}'");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn roundtrip_and_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        assert_eq!(store.get("collection-sync").await.unwrap(), None);

        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        store.set("collection-sync", ts).await.unwrap();
        assert_eq!(store.get("collection-sync").await.unwrap(), Some(ts));

        // Domains are independent
        assert_eq!(store.get("other-domain").await.unwrap(), None);

        store.delete("collection-sync").await.unwrap();
        assert_eq!(store.get("collection-sync").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        store.set("collection-sync", t1).await.unwrap();
        store.set("collection-sync", t2).await.unwrap();
        assert_eq!(store.get("collection-sync").await.unwrap(), Some(t2));
    }

    #[tokio::test]
    async fn corrupt_file_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        std::fs::write(
            dir.path().join("checkpoint_collection-sync.json"),
            "not json",
        )
        .unwrap();

        // Must error rather than report "absent" and trigger a full reload
        assert!(store.get("collection-sync").await.is_err());
    }

    #[tokio::test]
    async fn delete_missing_checkpoint_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        store.delete("collection-sync").await.unwrap();
    }
}
