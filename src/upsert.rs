//! Batch upsert engine.
//!
//! Two write paths into a destination table:
//!
//! - **Full load**: plain bulk insert. The collection sync engine clears
//!   the destination once at the start of a full run, so no dedup is
//!   needed.
//! - **Incremental upsert**: a disposable staging table is created with the
//!   destination's schema, the batch is bulk-inserted into it, and a single
//!   MERGE reconciles staging into the destination on the `id` key. The
//!   staging table is dropped on every exit path; a failed drop is logged
//!   and never escalated so it cannot mask the primary error.
//!
//! Both paths fail the whole batch atomically from the caller's
//! perspective: the caller must not advance pagination past a failed batch.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, warn};

use crate::schema;
use crate::value::Row;
use crate::warehouse::Warehouse;

/// Key column joining staging and destination in a MERGE.
const MERGE_KEY: &str = "id";

/// Full-load path: plain bulk insert of a transformed batch.
pub async fn insert_batch(warehouse: &dyn Warehouse, table: &str, rows: &[Row]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    warehouse
        .insert_rows(table, rows)
        .await
        .with_context(|| format!("Full-load insert of {} rows into '{table}' failed", rows.len()))?;
    debug!("Inserted batch of {} rows into {table}", rows.len());
    Ok(())
}

/// Incremental-upsert path: staged MERGE of a transformed batch.
pub async fn merge_batch(
    warehouse: &dyn Warehouse,
    table: &str,
    location: &str,
    rows: &[Row],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    // Unique per batch so retried or accidentally overlapping runs never
    // collide on the staging name.
    let staging = format!("{table}_staging_{}", Utc::now().timestamp_millis());

    let result = stage_and_merge(warehouse, table, &staging, location, rows).await;

    // Scoped-resource discipline: the staging table is dropped on success
    // and failure alike. DROP IF EXISTS semantics make this safe even when
    // staging creation itself failed.
    if let Err(e) = warehouse.delete_table(&staging).await {
        warn!("Failed to drop staging table {staging}: {e:#}");
    }

    result
}

async fn stage_and_merge(
    warehouse: &dyn Warehouse,
    table: &str,
    staging: &str,
    location: &str,
    rows: &[Row],
) -> Result<()> {
    let table_schema = schema::table_schema(table)?;

    warehouse
        .create_table(staging, table_schema, location)
        .await
        .with_context(|| format!("Failed to create staging table '{staging}'"))?;

    warehouse
        .insert_rows(staging, rows)
        .await
        .with_context(|| format!("Failed to populate staging table '{staging}'"))?;

    // Every record in a batch carries an identical key set (guaranteed by
    // the transforms), so the first row defines the MERGE column list.
    let columns: Vec<&str> = rows[0].keys().map(|k| k.as_str()).collect();
    let merge = build_merge_statement(table, staging, &columns)?;

    warehouse
        .run_statement(&merge, &[])
        .await
        .with_context(|| format!("MERGE into '{table}' failed"))?;

    debug!("Merged batch of {} rows into {table}", rows.len());
    Ok(())
}

/// Build the MERGE statement joining destination and staging on the record
/// id: matched rows get every non-key column updated, unmatched rows are
/// inserted whole.
fn build_merge_statement(dest: &str, staging: &str, columns: &[&str]) -> Result<String> {
    if !columns.contains(&MERGE_KEY) {
        anyhow::bail!("Batch rows carry no '{MERGE_KEY}' column, cannot MERGE into '{dest}'");
    }

    let update_set = columns
        .iter()
        .filter(|c| **c != MERGE_KEY)
        .map(|c| format!("{c} = source.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let matched = if update_set.is_empty() {
        "WHEN MATCHED THEN DO NOTHING".to_string()
    } else {
        format!("WHEN MATCHED THEN UPDATE SET {update_set}")
    };

    let insert_columns = columns.join(", ");
    let insert_values = columns
        .iter()
        .map(|c| format!("source.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "MERGE INTO {dest} AS target\n\
         USING {staging} AS source\n\
         ON target.{MERGE_KEY} = source.{MERGE_KEY}\n\
         {matched}\n\
         WHEN NOT MATCHED THEN INSERT ({insert_columns}) VALUES ({insert_values})"
    ))
}
