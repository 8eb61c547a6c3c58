//! Analytical warehouse abstraction.
//!
//! The engine only ever talks to the [`Warehouse`] trait; the concrete
//! PostgreSQL backend lives in [`postgres`], and an in-memory recording
//! implementation for tests lives in [`crate::testing`]. Keeping the seam
//! here lets the sync engine, table manager and upsert engine be exercised
//! without a live database.

use anyhow::Result;
use async_trait::async_trait;

use crate::schema::{Field, TableSchema};
use crate::value::{QueryParam, Row};

pub mod postgres;

pub use postgres::PostgresWarehouse;

/// Narrow contract of the analytical warehouse.
///
/// `location` is a region tag attached to every table creation; backends
/// that have no notion of placement carry it for parity and log it.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Create a table with the given schema. Fails if the table exists.
    async fn create_table(&self, table: &str, schema: &TableSchema, location: &str) -> Result<()>;

    /// Live column names of a table, in ordinal order.
    async fn table_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Add columns to an existing table in one batched statement.
    async fn alter_table_add_columns(&self, table: &str, fields: &[Field]) -> Result<()>;

    /// Bulk-insert rows. Every row must carry an identical key set.
    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<()>;

    /// Drop a table. Dropping a missing table is not an error (staging
    /// cleanup runs on failure paths where the table may never have been
    /// created).
    async fn delete_table(&self, table: &str) -> Result<()>;

    /// Run a SELECT and return its rows. Parameters are referenced as
    /// `@name` in the SQL text.
    async fn run_query(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<Row>>;

    /// Run a DDL/DML statement (DELETE, MERGE, INSERT ... SELECT) and
    /// return the affected row count where the backend reports one.
    async fn run_statement(&self, sql: &str, params: &[QueryParam]) -> Result<u64>;
}
