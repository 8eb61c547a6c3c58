//! Operational store abstraction and the MongoDB implementation.
//!
//! The sync engine pages through source collections via the
//! [`OperationalSource`] trait; the only filter shape it ever needs is
//! "everything" (full load) or "updated strictly after the checkpoint"
//! (incremental).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::Client as MongoClient;
use std::time::Duration;

/// Source record filter for one sync run.
#[derive(Debug, Clone, Copy)]
pub enum SourceFilter {
    /// Full load: every record in the collection.
    All,
    /// Incremental: records updated strictly after the checkpoint.
    UpdatedAfter(DateTime<Utc>),
}

/// Paginated read access to the operational document store.
#[async_trait]
pub trait OperationalSource: Send + Sync {
    /// Fetch one page of records, ordered stably so offset pagination never
    /// skips or repeats records between pages.
    async fn find(
        &self,
        collection: &str,
        filter: &SourceFilter,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<Document>>;
}

/// MongoDB implementation of [`OperationalSource`].
pub struct MongoSource {
    db: mongodb::Database,
}

impl MongoSource {
    /// Connect to the operational MongoDB database.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .context("Failed to parse MongoDB connection options")?;
        // Bounded timeouts so an unreachable source fails instead of hanging
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));

        let client = MongoClient::with_options(options)?;
        tracing::info!("Connected to operational store database '{database}'");
        Ok(Self {
            db: client.database(database),
        })
    }
}

#[async_trait]
impl OperationalSource for MongoSource {
    async fn find(
        &self,
        collection: &str,
        filter: &SourceFilter,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<Document>> {
        let query = match filter {
            SourceFilter::All => doc! {},
            SourceFilter::UpdatedAfter(ts) => doc! {
                "updated_at": { "$gt": mongodb::bson::DateTime::from_chrono(*ts) }
            },
        };

        tracing::debug!(
            "Fetching page from collection '{collection}' (skip={skip}, limit={limit}, filter={query:?})"
        );

        let mut cursor = self
            .db
            .collection::<Document>(collection)
            .find(query)
            .sort(doc! { "_id": 1 })
            .skip(skip)
            .limit(limit)
            .await
            .with_context(|| format!("Failed to query source collection '{collection}'"))?;

        let mut records = Vec::new();
        while cursor.advance().await? {
            let document: Document = cursor.current().try_into()?;
            records.push(document);
        }
        Ok(records)
    }
}
