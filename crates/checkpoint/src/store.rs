//! Checkpoint storage trait and the stored record shape.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint record as persisted by a storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    /// Sync domain this checkpoint belongs to (e.g. "collection-sync")
    pub domain: String,
    /// Timestamp of the last fully successful sync for the domain
    pub last_sync_at: DateTime<Utc>,
    /// When this record was written
    pub updated_at: DateTime<Utc>,
}

/// Trait for checkpoint storage operations.
///
/// Checkpoints are stored with no expiry. Implementations must distinguish
/// "no checkpoint recorded" (`Ok(None)`) from "storage unreachable"
/// (`Err`); conflating the two would silently downgrade incremental syncs
/// to full reloads.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint for a domain. Returns `None` if no checkpoint
    /// has ever been written for it.
    async fn get(&self, domain: &str) -> Result<Option<DateTime<Utc>>>;

    /// Write the checkpoint for a domain, replacing any previous value.
    async fn set(&self, domain: &str, last_sync_at: DateTime<Utc>) -> Result<()>;

    /// Remove the checkpoint for a domain, forcing the next run into full
    /// load mode. Removing a missing checkpoint is not an error.
    async fn delete(&self, domain: &str) -> Result<()>;
}
