//! Warehouse table manager.
//!
//! Ensures a destination table exists with its static schema and applies
//! additive-only migrations when the static schema has grown past the live
//! table. Existing columns are never dropped or retyped.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::schema;
use crate::warehouse::Warehouse;

/// Ensure `table` exists with its registered static schema.
///
/// Missing tables are created; existing tables are diffed against the
/// static schema and every missing field is added in one batched
/// `ALTER TABLE`. Calling this twice in a row performs no DDL the second
/// time.
pub async fn ensure_table(warehouse: &dyn Warehouse, table: &str, location: &str) -> Result<()> {
    let table_schema = schema::table_schema(table)
        .with_context(|| format!("Cannot ensure warehouse table '{table}'"))?;

    if !warehouse.table_exists(table).await? {
        warehouse
            .create_table(table, table_schema, location)
            .await
            .with_context(|| format!("Failed to create table '{table}'"))?;
        return Ok(());
    }

    let live_columns = warehouse.table_columns(table).await?;
    let missing: Vec<_> = table_schema
        .fields
        .iter()
        .filter(|f| !live_columns.iter().any(|c| c == f.name))
        .copied()
        .collect();

    if missing.is_empty() {
        debug!("Table {table} is up to date ({} columns)", live_columns.len());
        return Ok(());
    }

    info!(
        "Table {table} is missing {} column(s): {:?}",
        missing.len(),
        missing.iter().map(|f| f.name).collect::<Vec<_>>()
    );
    warehouse
        .alter_table_add_columns(table, &missing)
        .await
        .with_context(|| format!("Failed to migrate table '{table}'"))
}
