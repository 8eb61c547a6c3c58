//! Per-collection record transforms.
//!
//! Each synced source collection has a pure mapping from its document shape
//! to the destination row shape. The set of collections is closed: an
//! unknown collection name is a configuration error surfaced at parse time,
//! and adding a collection means extending the [`Collection`] enum, which
//! makes every match below exhaustive.
//!
//! Transforms are total over all known source shapes: a missing optional
//! field maps to an explicit `RowValue::Null`, never to an omitted column,
//! so every row in a batch carries the identical key set the upsert engine
//! relies on.

use anyhow::Result;
use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};
use std::str::FromStr;

use crate::value::{Row, RowValue};

/// Closed set of source collections the sync engine knows how to transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Users,
    Products,
    Scans,
}

impl FromStr for Collection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "users" => Ok(Collection::Users),
            "products" => Ok(Collection::Products),
            "scans" => Ok(Collection::Scans),
            other => Err(anyhow::anyhow!(
                "Unknown source collection '{other}' - no transform registered"
            )),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Collection::Users => "users",
            Collection::Products => "products",
            Collection::Scans => "scans",
        };
        f.write_str(s)
    }
}

/// Transform one source document into its destination row.
pub fn transform(collection: Collection, document: &Document) -> Result<Row> {
    match collection {
        Collection::Users => transform_user(document),
        Collection::Products => transform_product(document),
        Collection::Scans => transform_scan(document),
    }
}

fn transform_user(document: &Document) -> Result<Row> {
    let mut row = Row::new();
    row.insert("id".into(), record_id(document)?);
    row.insert("email".into(), string_field(document, "email")?);
    row.insert("display_name".into(), string_field(document, "display_name")?);
    row.insert("locale".into(), string_field(document, "locale")?);
    row.insert(
        "accessibility_profile".into(),
        json_field(document, "accessibility_profile")?,
    );
    row.insert("created_at".into(), timestamp_field(document, "created_at")?);
    row.insert("updated_at".into(), timestamp_field(document, "updated_at")?);
    Ok(row)
}

fn transform_product(document: &Document) -> Result<Row> {
    let mut row = Row::new();
    row.insert("id".into(), record_id(document)?);
    row.insert("barcode".into(), string_field(document, "barcode")?);
    row.insert("name".into(), string_field(document, "name")?);
    row.insert("brand".into(), string_field(document, "brand")?);
    row.insert("category".into(), string_field(document, "category")?);
    row.insert("price".into(), float_field(document, "price")?);
    row.insert("nutrition".into(), json_field(document, "nutrition")?);
    row.insert("created_at".into(), timestamp_field(document, "created_at")?);
    row.insert("updated_at".into(), timestamp_field(document, "updated_at")?);
    Ok(row)
}

fn transform_scan(document: &Document) -> Result<Row> {
    let mut row = Row::new();
    row.insert("id".into(), record_id(document)?);
    row.insert("user_id".into(), string_field(document, "user_id")?);
    row.insert("product_id".into(), string_field(document, "product_id")?);
    row.insert("barcode".into(), string_field(document, "barcode")?);
    row.insert("scan_mode".into(), string_field(document, "scan_mode")?);
    row.insert("successful".into(), bool_field(document, "successful")?);
    row.insert("scanned_at".into(), timestamp_field(document, "scanned_at")?);
    row.insert("updated_at".into(), timestamp_field(document, "updated_at")?);
    Ok(row)
}

/// Extract the record's primary identifier from `_id`, stringified.
fn record_id(document: &Document) -> Result<RowValue> {
    match document.get("_id") {
        Some(Bson::ObjectId(oid)) => Ok(RowValue::String(oid.to_hex())),
        Some(Bson::String(s)) => Ok(RowValue::String(s.clone())),
        Some(Bson::Int32(i)) => Ok(RowValue::String(i.to_string())),
        Some(Bson::Int64(i)) => Ok(RowValue::String(i.to_string())),
        Some(other) => Err(anyhow::anyhow!(
            "Unsupported _id type in source document: {other:?}"
        )),
        None => Err(anyhow::anyhow!("Source document has no _id field")),
    }
}

fn string_field(document: &Document, key: &str) -> Result<RowValue> {
    match document.get(key) {
        Some(Bson::String(s)) => Ok(RowValue::String(s.clone())),
        Some(Bson::ObjectId(oid)) => Ok(RowValue::String(oid.to_hex())),
        Some(Bson::Int32(i)) => Ok(RowValue::String(i.to_string())),
        Some(Bson::Int64(i)) => Ok(RowValue::String(i.to_string())),
        Some(Bson::Null) | None => Ok(RowValue::Null),
        Some(other) => Err(anyhow::anyhow!(
            "Field '{key}' has unsupported type for a string column: {other:?}"
        )),
    }
}

fn float_field(document: &Document, key: &str) -> Result<RowValue> {
    match document.get(key) {
        Some(Bson::Double(f)) => Ok(RowValue::Float(*f)),
        Some(Bson::Int32(i)) => Ok(RowValue::Float(*i as f64)),
        Some(Bson::Int64(i)) => Ok(RowValue::Float(*i as f64)),
        Some(Bson::Decimal128(d)) => {
            let parsed = d
                .to_string()
                .parse::<f64>()
                .map_err(|e| anyhow::anyhow!("Field '{key}' has unparsable decimal: {e}"))?;
            Ok(RowValue::Float(parsed))
        }
        Some(Bson::Null) | None => Ok(RowValue::Null),
        Some(other) => Err(anyhow::anyhow!(
            "Field '{key}' has unsupported type for a float column: {other:?}"
        )),
    }
}

fn bool_field(document: &Document, key: &str) -> Result<RowValue> {
    match document.get(key) {
        Some(Bson::Boolean(b)) => Ok(RowValue::Bool(*b)),
        Some(Bson::Null) | None => Ok(RowValue::Null),
        Some(other) => Err(anyhow::anyhow!(
            "Field '{key}' has unsupported type for a boolean column: {other:?}"
        )),
    }
}

/// Normalize source timestamps to UTC. Accepts native BSON datetimes and
/// ISO-8601 strings.
fn timestamp_field(document: &Document, key: &str) -> Result<RowValue> {
    match document.get(key) {
        Some(Bson::DateTime(dt)) => Ok(RowValue::Timestamp(dt.to_chrono())),
        Some(Bson::String(s)) => {
            let parsed = DateTime::parse_from_rfc3339(s)
                .map_err(|e| anyhow::anyhow!("Field '{key}' has unparsable timestamp '{s}': {e}"))?;
            Ok(RowValue::Timestamp(parsed.with_timezone(&Utc)))
        }
        Some(Bson::Null) | None => Ok(RowValue::Null),
        Some(other) => Err(anyhow::anyhow!(
            "Field '{key}' has unsupported type for a timestamp column: {other:?}"
        )),
    }
}

/// Serialize a nested document or array to JSON text.
fn json_field(document: &Document, key: &str) -> Result<RowValue> {
    match document.get(key) {
        Some(Bson::Null) | None => Ok(RowValue::Null),
        Some(value) => {
            let json = value.clone().into_relaxed_extjson();
            Ok(RowValue::String(json.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId};

    #[test]
    fn unknown_collection_fails_fast() {
        let err = Collection::from_str("sessions").unwrap_err();
        assert!(err.to_string().contains("sessions"));
    }

    #[test]
    fn user_transform_maps_missing_fields_to_null() {
        let document = doc! {
            "_id": ObjectId::new(),
            "email": "test1@example.com",
            "updated_at": bson::DateTime::now(),
        };
        let row = transform(Collection::Users, &document).unwrap();

        // Every schema column is present, absent source fields become NULL
        assert_eq!(row.len(), 7);
        assert_eq!(
            row.get("email"),
            Some(&RowValue::String("test1@example.com".into()))
        );
        assert_eq!(row.get("display_name"), Some(&RowValue::Null));
        assert_eq!(row.get("accessibility_profile"), Some(&RowValue::Null));
        assert_eq!(row.get("created_at"), Some(&RowValue::Null));
    }

    #[test]
    fn object_ids_are_stringified() {
        let oid = ObjectId::new();
        let document = doc! { "_id": oid, "user_id": oid };
        let row = transform(Collection::Scans, &document).unwrap();
        assert_eq!(row.get("id"), Some(&RowValue::String(oid.to_hex())));
        assert_eq!(row.get("user_id"), Some(&RowValue::String(oid.to_hex())));
    }

    #[test]
    fn nested_documents_serialize_to_json_text() {
        let document = doc! {
            "_id": "u1",
            "accessibility_profile": { "font_scale": 1.5, "voice_over": true },
        };
        let row = transform(Collection::Users, &document).unwrap();
        match row.get("accessibility_profile") {
            Some(RowValue::String(json)) => {
                assert!(json.contains("font_scale"));
                assert!(json.contains("voice_over"));
            }
            other => panic!("Expected JSON text, got {other:?}"),
        }
    }

    #[test]
    fn rows_of_one_collection_share_a_key_set() {
        let full = doc! {
            "_id": "p1",
            "barcode": "4901234567894",
            "name": "Soy Sauce",
            "brand": "Marudai",
            "category": "condiments",
            "price": 3.5,
            "nutrition": { "sodium_mg": 5493 },
            "created_at": bson::DateTime::now(),
            "updated_at": bson::DateTime::now(),
        };
        let sparse = doc! { "_id": "p2" };

        let a = transform(Collection::Products, &full).unwrap();
        let b = transform(Collection::Products, &sparse).unwrap();
        let keys_a: Vec<_> = a.keys().collect();
        let keys_b: Vec<_> = b.keys().collect();
        assert_eq!(keys_a, keys_b);
    }
}
