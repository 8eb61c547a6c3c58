//! Collection sync engine.
//!
//! Replicates operational collections into the warehouse. The mode for a
//! whole run is decided once from the checkpoint store: a present
//! checkpoint means incremental (records updated strictly after it,
//! upserted via staged MERGE), an absent one means full load (destination
//! cleared once, then plain inserts).
//!
//! `sync_all` runs every registered collection job sequentially in
//! registration order. Only after all of them succeed does it write a fresh
//! checkpoint, using the wall-clock time captured at the *start* of the run
//! so records updated during a long sync are not missed. Any failure aborts
//! the run without touching the checkpoint, so the next run retries the
//! same window.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use checkpoint::{CheckpointStore, COLLECTION_SYNC_DOMAIN};
use std::str::FromStr;
use tracing::info;

use crate::config::EngineConfig;
use crate::jobs::{self, CollectionSyncJob};
use crate::source::{OperationalSource, SourceFilter};
use crate::table;
use crate::transform::{self, Collection};
use crate::upsert;
use crate::warehouse::Warehouse;

/// Write mode for one sync run, decided from the checkpoint store.
#[derive(Debug, Clone, Copy)]
enum SyncMode {
    Full,
    Incremental(DateTime<Utc>),
}

pub struct SyncEngine<'a> {
    source: &'a dyn OperationalSource,
    warehouse: &'a dyn Warehouse,
    checkpoints: &'a dyn CheckpointStore,
    config: &'a EngineConfig,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        source: &'a dyn OperationalSource,
        warehouse: &'a dyn Warehouse,
        checkpoints: &'a dyn CheckpointStore,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            source,
            warehouse,
            checkpoints,
            config,
        }
    }

    /// Sync every registered collection, then advance the checkpoint.
    pub async fn sync_all(&self) -> Result<()> {
        let started_at = Utc::now();

        // An unreachable checkpoint store must abort the run here; silently
        // treating it as "absent" would trigger an unwanted full reload.
        let checkpoint = self
            .checkpoints
            .get(COLLECTION_SYNC_DOMAIN)
            .await
            .context("Failed to read sync checkpoint")?;

        let mode = match checkpoint {
            Some(ts) => {
                info!("Checkpoint found ({}), running incremental sync", ts.to_rfc3339());
                SyncMode::Incremental(ts)
            }
            None => {
                info!("No checkpoint found, running full load");
                SyncMode::Full
            }
        };

        let jobs = jobs::collection_sync_jobs(self.config);
        for job in &jobs {
            let synced = self
                .sync_collection(job, mode)
                .await
                .with_context(|| format!("Collection sync job '{}' failed", job.name))?;
            info!("Job '{}' synced {synced} record(s)", job.name);
        }

        self.checkpoints
            .set(COLLECTION_SYNC_DOMAIN, started_at)
            .await
            .context("Failed to write sync checkpoint")?;

        info!(
            "Collection sync completed, checkpoint advanced to {}",
            started_at.to_rfc3339()
        );
        Ok(())
    }

    /// Paginate one collection and write each transformed page.
    async fn sync_collection(&self, job: &CollectionSyncJob, mode: SyncMode) -> Result<usize> {
        // Unknown collection names are a config error, surfaced before any
        // source or warehouse call.
        let collection = Collection::from_str(job.source_collection)?;
        let destination = &job.destination_table;

        table::ensure_table(self.warehouse, destination, &self.config.location).await?;

        let filter = match mode {
            SyncMode::Full => {
                // The only place this engine destructively removes data:
                // a full load replaces the destination's entire contents.
                self.warehouse
                    .run_statement(&format!("DELETE FROM {destination} WHERE TRUE"), &[])
                    .await
                    .with_context(|| format!("Failed to clear table '{destination}'"))?;
                SourceFilter::All
            }
            SyncMode::Incremental(ts) => SourceFilter::UpdatedAfter(ts),
        };

        let page_size = self.config.page_size;
        let mut offset = 0u64;
        let mut total = 0usize;

        loop {
            let records = self
                .source
                .find(job.source_collection, &filter, offset, page_size as i64)
                .await?;

            let batch = records
                .iter()
                .map(|document| transform::transform(collection, document))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Failed to transform '{collection}' records"))?;

            match mode {
                SyncMode::Full => upsert::insert_batch(self.warehouse, destination, &batch).await?,
                SyncMode::Incremental(_) => {
                    upsert::merge_batch(self.warehouse, destination, &self.config.location, &batch)
                        .await?
                }
            }
            total += batch.len();

            // A short page means the collection is exhausted
            if records.len() < page_size {
                break;
            }
            offset += page_size as u64;
        }

        Ok(total)
    }
}
