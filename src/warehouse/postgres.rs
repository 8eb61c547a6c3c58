//! PostgreSQL warehouse backend.
//!
//! Datasets map to PostgreSQL schemas (`raw.events`, `foundation.users`),
//! and the incremental upsert path relies on the native `MERGE` statement
//! (PostgreSQL 15+).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info};

use crate::schema::{Field, TableSchema};
use crate::value::{QueryParam, Row, RowValue};
use crate::warehouse::Warehouse;

pub struct PostgresWarehouse {
    client: Client,
}

impl PostgresWarehouse {
    /// Connect to the warehouse and spawn the connection driver task.
    pub async fn connect(uri: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(uri, NoTls)
            .await
            .context("Failed to connect to warehouse")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Warehouse connection error: {e}");
            }
        });

        Ok(Self { client })
    }

    /// Split a dataset-qualified table name into (dataset schema, table).
    fn split_qualified(table: &str) -> (&str, &str) {
        match table.split_once('.') {
            Some((dataset, name)) => (dataset, name),
            None => ("public", table),
        }
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let (dataset, name) = Self::split_qualified(table);
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                )",
                &[&dataset, &name],
            )
            .await
            .with_context(|| format!("Failed to check existence of table '{table}'"))?;
        Ok(row.get::<_, bool>(0))
    }

    async fn create_table(&self, table: &str, schema: &TableSchema, location: &str) -> Result<()> {
        let (dataset, _) = Self::split_qualified(table);
        self.client
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {dataset}"), &[])
            .await
            .with_context(|| format!("Failed to ensure dataset schema '{dataset}'"))?;

        let columns = schema
            .fields
            .iter()
            .map(|f| format!("{} {}", f.name, f.field_type.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");

        // PostgreSQL has no per-table region placement; the location tag is
        // carried for the warehouse contract and recorded in the logs.
        debug!("Creating table {table} with location tag '{location}'");
        self.client
            .execute(&format!("CREATE TABLE {table} ({columns})"), &[])
            .await
            .with_context(|| format!("Failed to create table '{table}'"))?;

        info!("Created warehouse table {table}");
        Ok(())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let (dataset, name) = Self::split_qualified(table);
        let rows = self
            .client
            .query(
                "SELECT column_name FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&dataset, &name],
            )
            .await
            .with_context(|| format!("Failed to read columns of table '{table}'"))?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn alter_table_add_columns(&self, table: &str, fields: &[Field]) -> Result<()> {
        let additions = fields
            .iter()
            .map(|f| format!("ADD COLUMN {} {}", f.name, f.field_type.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");

        self.client
            .execute(&format!("ALTER TABLE {table} {additions}"), &[])
            .await
            .with_context(|| format!("Failed to add columns to table '{table}'"))?;

        info!(
            "Added {} column(s) to warehouse table {table}",
            fields.len()
        );
        Ok(())
    }

    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        // Every row in a batch carries an identical key set (the transforms
        // guarantee this), so the first row defines the column list.
        let columns: Vec<&str> = rows[0].keys().map(|k| k.as_str()).collect();
        let values = rows
            .iter()
            .map(|row| {
                let literals = columns
                    .iter()
                    .map(|c| {
                        row.get(*c)
                            .map(RowValue::to_sql_literal)
                            .unwrap_or_else(|| "NULL".to_string())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({literals})")
            })
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO {table} ({}) VALUES {values}",
            columns.join(", ")
        );
        self.client
            .execute(&sql, &[])
            .await
            .with_context(|| format!("Failed to insert {} rows into '{table}'", rows.len()))?;

        debug!("Inserted {} rows into {table}", rows.len());
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        self.client
            .execute(&format!("DROP TABLE IF EXISTS {table}"), &[])
            .await
            .with_context(|| format!("Failed to drop table '{table}'"))?;
        debug!("Dropped table {table}");
        Ok(())
    }

    async fn run_query(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<Row>> {
        let (sql, values) = bind_named_params(sql, params);
        let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v.as_ref() as &(dyn ToSql + Sync)).collect();
        let rows = self
            .client
            .query(&sql, &refs)
            .await
            .context("Warehouse query failed")?;
        rows.iter().map(convert_row).collect()
    }

    async fn run_statement(&self, sql: &str, params: &[QueryParam]) -> Result<u64> {
        let (sql, values) = bind_named_params(sql, params);
        let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v.as_ref() as &(dyn ToSql + Sync)).collect();
        self.client
            .execute(&sql, &refs)
            .await
            .context("Warehouse statement failed")
    }
}

/// Rewrite `@name` references to positional `$n` placeholders and collect
/// the bound values in matching order.
fn bind_named_params(sql: &str, params: &[QueryParam]) -> (String, Vec<Box<dyn ToSql + Sync + Send>>) {
    let mut rewritten = sql.to_string();
    let mut values: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

    // Longer names first so '@date' never clobbers '@date_from'.
    let mut ordered: Vec<&QueryParam> = params.iter().collect();
    ordered.sort_by_key(|p| std::cmp::Reverse(p.name.len()));

    for param in ordered {
        let placeholder = format!("@{}", param.name);
        if !rewritten.contains(&placeholder) {
            continue;
        }
        values.push(to_sql_value(&param.value));
        rewritten = rewritten.replace(&placeholder, &format!("${}", values.len()));
    }

    (rewritten, values)
}

fn to_sql_value(value: &RowValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        RowValue::Null => Box::new(Option::<String>::None),
        RowValue::Bool(b) => Box::new(*b),
        RowValue::Int(i) => Box::new(*i),
        RowValue::Float(f) => Box::new(*f),
        RowValue::String(s) => Box::new(s.clone()),
        RowValue::Timestamp(ts) => Box::new(*ts),
        RowValue::Date(d) => Box::new(*d),
    }
}

/// Convert a PostgreSQL row into the engine's row shape.
fn convert_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => match row.try_get::<_, Option<bool>>(i)? {
                Some(b) => RowValue::Bool(b),
                None => RowValue::Null,
            },
            Type::INT2 => match row.try_get::<_, Option<i16>>(i)? {
                Some(v) => RowValue::Int(v as i64),
                None => RowValue::Null,
            },
            Type::INT4 => match row.try_get::<_, Option<i32>>(i)? {
                Some(v) => RowValue::Int(v as i64),
                None => RowValue::Null,
            },
            Type::INT8 => match row.try_get::<_, Option<i64>>(i)? {
                Some(v) => RowValue::Int(v),
                None => RowValue::Null,
            },
            Type::FLOAT4 => match row.try_get::<_, Option<f32>>(i)? {
                Some(v) => RowValue::Float(v as f64),
                None => RowValue::Null,
            },
            Type::FLOAT8 => match row.try_get::<_, Option<f64>>(i)? {
                Some(v) => RowValue::Float(v),
                None => RowValue::Null,
            },
            Type::TIMESTAMPTZ => match row.try_get::<_, Option<DateTime<Utc>>>(i)? {
                Some(ts) => RowValue::Timestamp(ts),
                None => RowValue::Null,
            },
            Type::TIMESTAMP => match row.try_get::<_, Option<NaiveDateTime>>(i)? {
                Some(ts) => {
                    RowValue::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc))
                }
                None => RowValue::Null,
            },
            Type::DATE => match row.try_get::<_, Option<NaiveDate>>(i)? {
                Some(d) => RowValue::Date(d),
                None => RowValue::Null,
            },
            Type::JSON | Type::JSONB => match row.try_get::<_, Option<serde_json::Value>>(i)? {
                Some(json) => RowValue::String(json.to_string()),
                None => RowValue::Null,
            },
            _ => match row.try_get::<_, Option<String>>(i) {
                Ok(Some(s)) => RowValue::String(s),
                Ok(None) => RowValue::Null,
                Err(_) => {
                    anyhow::bail!(
                        "Unsupported warehouse column type {:?} for column '{}'",
                        column.type_(),
                        column.name()
                    )
                }
            },
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn named_params_rewrite_to_positional() {
        let params = vec![QueryParam::new(
            "target_date",
            RowValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        )];
        let (sql, values) =
            bind_named_params("SELECT * FROM t WHERE event_date = @target_date", &params);
        assert_eq!(sql, "SELECT * FROM t WHERE event_date = $1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn unreferenced_params_are_not_bound() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let params = vec![
            QueryParam::new("target_date", RowValue::Timestamp(ts)),
            QueryParam::new("unused", RowValue::Int(1)),
        ];
        let (sql, values) = bind_named_params("DELETE FROM t WHERE d = @target_date", &params);
        assert_eq!(sql, "DELETE FROM t WHERE d = $1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn longer_param_names_bind_first() {
        let params = vec![
            QueryParam::new("date", RowValue::Int(1)),
            QueryParam::new("date_from", RowValue::Int(2)),
        ];
        let (sql, values) = bind_named_params("WHERE a = @date_from AND b = @date", &params);
        assert_eq!(sql, "WHERE a = $1 AND b = $2");
        assert_eq!(values.len(), 2);
    }
}
