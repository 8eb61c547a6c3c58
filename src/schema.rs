//! Static warehouse table schemas.
//!
//! Every destination table the engine writes to has a statically registered
//! schema here. Schema evolution is additive-only: once a field is part of a
//! live table it is never removed or retyped by this engine, the table
//! manager only ever adds columns that appear here but are missing live.
//!
//! A table name with no registered schema is a deployment/config mismatch
//! and fails fast, it is never skipped silently.

use anyhow::Result;

/// Warehouse field type, mapped to a concrete SQL type per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    Date,
    /// Nested documents serialized to JSON text
    Json,
}

impl FieldType {
    /// SQL type used when creating or altering tables.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::String => "TEXT",
            FieldType::Int => "BIGINT",
            FieldType::Float => "DOUBLE PRECISION",
            FieldType::Bool => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMPTZ",
            FieldType::Date => "DATE",
            FieldType::Json => "TEXT",
        }
    }
}

/// One field of a destination table schema.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub field_type: FieldType,
}

const fn field(name: &'static str, field_type: FieldType) -> Field {
    Field { name, field_type }
}

/// Ordered schema of one destination table, keyed by its bare table name.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table_name: &'static str,
    pub fields: &'static [Field],
}

const USERS: TableSchema = TableSchema {
    table_name: "users",
    fields: &[
        field("id", FieldType::String),
        field("email", FieldType::String),
        field("display_name", FieldType::String),
        field("locale", FieldType::String),
        field("accessibility_profile", FieldType::Json),
        field("created_at", FieldType::Timestamp),
        field("updated_at", FieldType::Timestamp),
    ],
};

const PRODUCTS: TableSchema = TableSchema {
    table_name: "products",
    fields: &[
        field("id", FieldType::String),
        field("barcode", FieldType::String),
        field("name", FieldType::String),
        field("brand", FieldType::String),
        field("category", FieldType::String),
        field("price", FieldType::Float),
        field("nutrition", FieldType::Json),
        field("created_at", FieldType::Timestamp),
        field("updated_at", FieldType::Timestamp),
    ],
};

const SCANS: TableSchema = TableSchema {
    table_name: "scans",
    fields: &[
        field("id", FieldType::String),
        field("user_id", FieldType::String),
        field("product_id", FieldType::String),
        field("barcode", FieldType::String),
        field("scan_mode", FieldType::String),
        field("successful", FieldType::Bool),
        field("scanned_at", FieldType::Timestamp),
        field("updated_at", FieldType::Timestamp),
    ],
};

const DAILY_SCAN_EVENTS: TableSchema = TableSchema {
    table_name: "daily_scan_events",
    fields: &[
        field("event_date", FieldType::Date),
        field("user_id", FieldType::String),
        field("product_id", FieldType::String),
        field("event_type", FieldType::String),
        field("event_count", FieldType::Int),
    ],
};

const USER_ACTIVITY_SUMMARY: TableSchema = TableSchema {
    table_name: "user_activity_summary",
    fields: &[
        field("id", FieldType::String),
        field("total_scans", FieldType::Int),
        field("active_days", FieldType::Int),
        field("last_scan_at", FieldType::Timestamp),
        field("summary_date", FieldType::Date),
    ],
};

const PRODUCT_SCAN_SUMMARY: TableSchema = TableSchema {
    table_name: "product_scan_summary",
    fields: &[
        field("id", FieldType::String),
        field("scan_count", FieldType::Int),
        field("unique_users", FieldType::Int),
        field("last_scanned_at", FieldType::Timestamp),
        field("summary_date", FieldType::Date),
    ],
};

/// Look up the static schema for a destination table.
///
/// Accepts either a bare table name or a dataset-qualified one
/// (`foundation.users`); staging-table suffixes are not resolved here on
/// purpose, staging tables are created from the destination's schema
/// directly.
pub fn table_schema(table: &str) -> Result<&'static TableSchema> {
    let bare = table.rsplit('.').next().unwrap_or(table);
    match bare {
        "users" => Ok(&USERS),
        "products" => Ok(&PRODUCTS),
        "scans" => Ok(&SCANS),
        "daily_scan_events" => Ok(&DAILY_SCAN_EVENTS),
        "user_activity_summary" => Ok(&USER_ACTIVITY_SUMMARY),
        "product_scan_summary" => Ok(&PRODUCT_SCAN_SUMMARY),
        other => Err(anyhow::anyhow!(
            "No table schema registered for '{other}' - destination tables must have a static schema"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_resolve_to_bare_schema() {
        let schema = table_schema("foundation.users").unwrap();
        assert_eq!(schema.table_name, "users");
        assert_eq!(schema.fields[0].name, "id");
    }

    #[test]
    fn unknown_table_is_a_config_error() {
        let err = table_schema("foundation.sessions").unwrap_err();
        assert!(err.to_string().contains("sessions"));
    }

    #[test]
    fn every_sync_schema_has_id_and_updated_at() {
        for table in ["users", "products", "scans"] {
            let schema = table_schema(table).unwrap();
            let names: Vec<_> = schema.fields.iter().map(|f| f.name).collect();
            assert!(names.contains(&"id"), "{table} missing id");
            assert!(names.contains(&"updated_at"), "{table} missing updated_at");
        }
    }
}
