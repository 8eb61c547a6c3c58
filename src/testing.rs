//! Injected test doubles for the engine's external collaborators.
//!
//! The warehouse, operational source and checkpoint store are all trait
//! seams, so tests exercise the real engine code against these in-process
//! implementations: [`MemoryWarehouse`] records every DDL/DML call and
//! applies enough statement semantics (table clear, MERGE upsert) for the
//! sync properties to be asserted end to end.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::Document;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::schema::{Field, TableSchema};
use crate::source::{OperationalSource, SourceFilter};
use crate::value::{QueryParam, Row, RowValue};
use crate::warehouse::Warehouse;

/// One table held by the in-memory warehouse.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub location: String,
    pub rows: Vec<Row>,
}

/// Recorded warehouse operation, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum WarehouseCall {
    CreateTable { table: String },
    AlterTable { table: String, added: Vec<String> },
    InsertRows { table: String, row_count: usize },
    DeleteTable { table: String },
    Statement { sql: String },
    Query { sql: String },
}

#[derive(Default)]
struct Inner {
    tables: BTreeMap<String, MemoryTable>,
    calls: Vec<WarehouseCall>,
    scripted_counts: VecDeque<i64>,
    fail_substring: Option<String>,
    fail_once_substring: Option<String>,
    fail_inserts_into: Option<String>,
}

/// In-memory recording implementation of the [`Warehouse`] trait.
#[derive(Default)]
pub struct MemoryWarehouse {
    inner: Mutex<Inner>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with arbitrary live columns, bypassing the static
    /// schema. Used to simulate tables that predate a schema change.
    pub fn seed_table(&self, table: &str, columns: &[&str]) {
        self.inner.lock().unwrap().tables.insert(
            table.to_string(),
            MemoryTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                location: String::new(),
                rows: Vec::new(),
            },
        );
    }

    /// Append rows to an existing table without recording an insert call.
    pub fn push_rows(&self, table: &str, rows: Vec<Row>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .tables
            .get_mut(table)
            .expect("push_rows target must exist")
            .rows
            .extend(rows);
    }

    /// Queue the result of the next availability count query.
    pub fn script_event_count(&self, count: i64) {
        self.inner.lock().unwrap().scripted_counts.push_back(count);
    }

    /// Make every statement containing `needle` fail.
    pub fn fail_statements_containing(&self, needle: &str) {
        self.inner.lock().unwrap().fail_substring = Some(needle.to_string());
    }

    /// Make the next statement containing `needle` fail, once.
    pub fn fail_statements_containing_once(&self, needle: &str) {
        self.inner.lock().unwrap().fail_once_substring = Some(needle.to_string());
    }

    /// Make every insert into `table` fail.
    pub fn fail_inserts_into(&self, table: &str) {
        self.inner.lock().unwrap().fail_inserts_into = Some(table.to_string());
    }

    pub fn table(&self, table: &str) -> Option<MemoryTable> {
        self.inner.lock().unwrap().tables.get(table).cloned()
    }

    pub fn calls(&self) -> Vec<WarehouseCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Executed statements (DDL via dedicated calls excluded), in order.
    pub fn statements(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                WarehouseCall::Statement { sql } => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, WarehouseCall::Query { .. }))
            .count()
    }

    /// Count of schema-changing calls (create + alter).
    pub fn ddl_call_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    WarehouseCall::CreateTable { .. } | WarehouseCall::AlterTable { .. }
                )
            })
            .count()
    }

    /// Names of staging tables currently live.
    pub fn staging_tables(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .keys()
            .filter(|t| t.contains("_staging_"))
            .cloned()
            .collect()
    }

    /// Whether any MERGE statement was ever executed.
    pub fn merge_count(&self) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.trim_start().starts_with("MERGE INTO"))
            .count()
    }
}

fn check_failure_hooks(inner: &mut Inner, sql: &str) -> Result<()> {
    if let Some(needle) = &inner.fail_once_substring {
        if sql.contains(needle.as_str()) {
            inner.fail_once_substring = None;
            anyhow::bail!("Injected statement failure");
        }
    }
    if let Some(needle) = &inner.fail_substring {
        if sql.contains(needle.as_str()) {
            anyhow::bail!("Injected statement failure");
        }
    }
    Ok(())
}

/// Apply a staged MERGE statement: upsert staging rows into the
/// destination on the `id` column. Statement shape is
/// `MERGE INTO <dest> AS target USING <staging> AS source ...`.
/// MERGEs sourcing a subquery instead of a staging table (the SQL transform
/// templates) are recorded but not interpreted.
fn apply_merge(inner: &mut Inner, sql: &str) -> Result<u64> {
    let tokens: Vec<&str> = sql.split_whitespace().collect();
    let dest = tokens
        .get(2)
        .ok_or_else(|| anyhow::anyhow!("Malformed MERGE statement: {sql}"))?
        .to_string();
    let staging = tokens
        .get(6)
        .ok_or_else(|| anyhow::anyhow!("Malformed MERGE statement: {sql}"))?
        .to_string();
    if !staging.contains("_staging_") {
        return Ok(0);
    }

    let staged = inner
        .tables
        .get(&staging)
        .ok_or_else(|| anyhow::anyhow!("Staging table '{staging}' does not exist"))?
        .rows
        .clone();
    let dest_table = inner
        .tables
        .get_mut(&dest)
        .ok_or_else(|| anyhow::anyhow!("Destination table '{dest}' does not exist"))?;

    let mut affected = 0u64;
    for row in staged {
        let id = row.get("id").cloned();
        match dest_table
            .rows
            .iter_mut()
            .find(|existing| existing.get("id") == id.as_ref())
        {
            Some(existing) => *existing = row,
            None => dest_table.rows.push(row),
        }
        affected += 1;
    }
    Ok(affected)
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().tables.contains_key(table))
    }

    async fn create_table(&self, table: &str, schema: &TableSchema, location: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.tables.contains_key(table) {
            anyhow::bail!("Table '{table}' already exists");
        }
        inner.tables.insert(
            table.to_string(),
            MemoryTable {
                columns: schema.fields.iter().map(|f| f.name.to_string()).collect(),
                location: location.to_string(),
                rows: Vec::new(),
            },
        );
        inner.calls.push(WarehouseCall::CreateTable {
            table: table.to_string(),
        });
        Ok(())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        inner
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| anyhow::anyhow!("Table '{table}' does not exist"))
    }

    async fn alter_table_add_columns(&self, table: &str, fields: &[Field]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let added: Vec<String> = fields.iter().map(|f| f.name.to_string()).collect();
        let entry = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow::anyhow!("Table '{table}' does not exist"))?;
        entry.columns.extend(added.clone());
        inner.calls.push(WarehouseCall::AlterTable {
            table: table.to_string(),
            added,
        });
        Ok(())
    }

    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_inserts_into.as_deref() == Some(table) {
            anyhow::bail!("Injected insert failure for '{table}'");
        }
        let entry = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow::anyhow!("Table '{table}' does not exist"))?;
        entry.rows.extend(rows.iter().cloned());
        inner.calls.push(WarehouseCall::InsertRows {
            table: table.to_string(),
            row_count: rows.len(),
        });
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.tables.remove(table);
        inner.calls.push(WarehouseCall::DeleteTable {
            table: table.to_string(),
        });
        Ok(())
    }

    async fn run_query(&self, sql: &str, _params: &[QueryParam]) -> Result<Vec<Row>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(WarehouseCall::Query {
            sql: sql.to_string(),
        });
        if sql.contains("COUNT(*)") {
            if let Some(count) = inner.scripted_counts.pop_front() {
                let mut row = Row::new();
                row.insert("event_count".into(), RowValue::Int(count));
                return Ok(vec![row]);
            }
        }
        Ok(Vec::new())
    }

    async fn run_statement(&self, sql: &str, _params: &[QueryParam]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(WarehouseCall::Statement {
            sql: sql.to_string(),
        });
        check_failure_hooks(&mut inner, sql)?;

        let trimmed = sql.trim_start();
        if trimmed.starts_with("MERGE INTO") {
            return apply_merge(&mut inner, sql);
        }
        if trimmed.starts_with("DELETE FROM") && trimmed.ends_with("WHERE TRUE") {
            let table = trimmed
                .split_whitespace()
                .nth(2)
                .unwrap_or_default()
                .to_string();
            if let Some(entry) = inner.tables.get_mut(&table) {
                let cleared = entry.rows.len() as u64;
                entry.rows.clear();
                return Ok(cleared);
            }
            anyhow::bail!("Table '{table}' does not exist");
        }
        Ok(0)
    }
}

/// In-memory implementation of [`OperationalSource`].
#[derive(Default)]
pub struct MemorySource {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register source documents for a collection, in insertion order.
    pub fn insert(&self, collection: &str, documents: Vec<Document>) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }
}

#[async_trait]
impl OperationalSource for MemorySource {
    async fn find(
        &self,
        collection: &str,
        filter: &SourceFilter,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<Document>> {
        let collections = self.collections.lock().unwrap();
        let all = collections.get(collection).cloned().unwrap_or_default();

        let filtered: Vec<Document> = all
            .into_iter()
            .filter(|document| match filter {
                SourceFilter::All => true,
                SourceFilter::UpdatedAfter(ts) => document
                    .get_datetime("updated_at")
                    .map(|dt| dt.to_chrono() > *ts)
                    .unwrap_or(false),
            })
            .collect();

        Ok(filtered
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }
}

/// Checkpoint store whose backend is unreachable. Used to assert that the
/// sync engine fails loudly instead of falling back to a full reload.
pub struct UnreachableCheckpointStore;

#[async_trait]
impl checkpoint::CheckpointStore for UnreachableCheckpointStore {
    async fn get(&self, _domain: &str) -> Result<Option<DateTime<Utc>>> {
        anyhow::bail!("Checkpoint store unreachable")
    }

    async fn set(&self, _domain: &str, _last_sync_at: DateTime<Utc>) -> Result<()> {
        anyhow::bail!("Checkpoint store unreachable")
    }

    async fn delete(&self, _domain: &str) -> Result<()> {
        anyhow::bail!("Checkpoint store unreachable")
    }
}

/// Write minimal SQL transform fixtures for every registered template into
/// `dir`, for tests that point `sql_template_dir` at a tempdir.
pub fn write_templates(dir: &std::path::Path) {
    let templates: &[(&str, &str)] = &[
        (
            "daily_scan_events.sql",
            "SELECT (occurred_at AT TIME ZONE 'UTC')::date AS event_date,\n\
             \x20      user_id, product_id, event_type, COUNT(*) AS event_count\n\
             FROM {{raw_dataset}}.events\n\
             WHERE (occurred_at AT TIME ZONE 'UTC')::date = @target_date\n\
             GROUP BY 1, 2, 3, 4",
        ),
        (
            "user_activity_summary.sql",
            "MERGE INTO {{destination}} AS target\n\
             USING (SELECT user_id AS id, COUNT(*) AS total_scans FROM\n\
             {{foundation_dataset}}.daily_scan_events WHERE event_date = @target_date\n\
             GROUP BY user_id) AS source\n\
             ON target.id = source.id\n\
             WHEN MATCHED THEN UPDATE SET total_scans = source.total_scans\n\
             WHEN NOT MATCHED THEN INSERT (id, total_scans) VALUES (source.id, source.total_scans)",
        ),
        (
            "product_scan_summary.sql",
            "MERGE INTO {{destination}} AS target\n\
             USING (SELECT product_id AS id, COUNT(*) AS scan_count FROM\n\
             {{foundation_dataset}}.daily_scan_events WHERE event_date = @target_date\n\
             GROUP BY product_id) AS source\n\
             ON target.id = source.id\n\
             WHEN MATCHED THEN UPDATE SET scan_count = source.scan_count\n\
             WHEN NOT MATCHED THEN INSERT (id, scan_count) VALUES (source.id, source.scan_count)",
        ),
    ];

    for (file_name, body) in templates {
        std::fs::write(dir.join(file_name), body).expect("write SQL fixture");
    }
}
