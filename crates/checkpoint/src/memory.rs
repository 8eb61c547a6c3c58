//! In-memory checkpoint storage, intended for tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::CheckpointStore;

/// In-process implementation of the [`CheckpointStore`] trait.
///
/// Keeps checkpoints in a mutex-guarded map. Useful as an injected test
/// double for the sync engine.
#[derive(Default)]
pub struct MemoryStore {
    checkpoints: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a checkpoint for a domain.
    pub fn with_checkpoint(domain: &str, last_sync_at: DateTime<Utc>) -> Self {
        let store = Self::new();
        store
            .checkpoints
            .lock()
            .unwrap()
            .insert(domain.to_string(), last_sync_at);
        store
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, domain: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.checkpoints.lock().unwrap().get(domain).copied())
    }

    async fn set(&self, domain: &str, last_sync_at: DateTime<Utc>) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(domain.to_string(), last_sync_at);
        Ok(())
    }

    async fn delete(&self, domain: &str) -> Result<()> {
        self.checkpoints.lock().unwrap().remove(domain);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn seeded_checkpoint_is_visible() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let store = MemoryStore::with_checkpoint("collection-sync", ts);
        assert_eq!(store.get("collection-sync").await.unwrap(), Some(ts));
        assert_eq!(store.get("unrelated").await.unwrap(), None);
    }
}
