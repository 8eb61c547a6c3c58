//! Warehouse cell values.
//!
//! [`RowValue`] is the closed set of scalar types the warehouse tables use.
//! Transforms produce rows of these values, the upsert engine moves them
//! around, and the warehouse backends render or bind them.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

/// A single warehouse cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

/// One warehouse row. A `BTreeMap` keeps the column order deterministic,
/// which the MERGE statement builder relies on.
pub type Row = BTreeMap<String, RowValue>;

impl RowValue {
    /// Extract an integer, coercing from the types COUNT-style queries can
    /// come back as.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RowValue::Int(i) => Some(*i),
            RowValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Render as a SQL literal for inline DML.
    ///
    /// Strings are single-quoted with embedded quotes doubled; timestamps
    /// and dates are quoted ISO-8601 with an explicit cast so NULLs and
    /// literals land with the right column type.
    pub fn to_sql_literal(&self) -> String {
        match self {
            RowValue::Null => "NULL".to_string(),
            RowValue::Bool(b) => b.to_string(),
            RowValue::Int(i) => i.to_string(),
            RowValue::Float(f) => f.to_string(),
            RowValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            RowValue::Timestamp(ts) => format!("TIMESTAMPTZ '{}'", ts.to_rfc3339()),
            RowValue::Date(d) => format!("DATE '{d}'"),
        }
    }
}

/// Named parameter for a warehouse query, referenced as `@name` in SQL text.
#[derive(Debug, Clone)]
pub struct QueryParam {
    pub name: String,
    pub value: RowValue,
}

impl QueryParam {
    pub fn new(name: &str, value: RowValue) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn string_literals_escape_quotes() {
        let v = RowValue::String("O'Brien".to_string());
        assert_eq!(v.to_sql_literal(), "'O''Brien'");
    }

    #[test]
    fn timestamp_literal_is_iso8601() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(
            RowValue::Timestamp(ts).to_sql_literal(),
            "TIMESTAMPTZ '2024-01-01T10:00:00+00:00'"
        );
    }

    #[test]
    fn count_values_coerce_to_i64() {
        assert_eq!(RowValue::Int(3).as_i64(), Some(3));
        assert_eq!(RowValue::Float(3.0).as_i64(), Some(3));
        assert_eq!(RowValue::String("3".into()).as_i64(), None);
    }
}
