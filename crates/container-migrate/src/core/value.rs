//! Row values and their schema-driven JSON encoding.
//!
//! Archive row files hold one JSON array per row. Types that JSON cannot carry
//! natively are encoded as strings: timestamps as RFC 3339, blobs as lowercase
//! hex, and non-finite doubles as `NaN` / `Infinity` / `-Infinity`.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as Json;

use super::schema::{Column, ColumnType, ContainerSchema};

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Blob(Vec<u8>),
}

/// One row, positionally aligned with the container's columns.
pub type Row = Vec<Value>;

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value may be stored in a column of `column_type`.
    pub fn fits(&self, column_type: ColumnType) -> bool {
        matches!(
            (self, column_type),
            (Value::Null, _)
                | (Value::Bool(_), ColumnType::Bool)
                | (Value::Long(_), ColumnType::Long)
                | (Value::Double(_), ColumnType::Double)
                | (Value::String(_), ColumnType::String)
                | (Value::Timestamp(_), ColumnType::Timestamp)
                | (Value::Blob(_), ColumnType::Blob)
        )
    }

    /// Encode to JSON.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(v) => Json::Bool(*v),
            Value::Long(v) => Json::from(*v),
            Value::Double(v) => match serde_json::Number::from_f64(*v) {
                Some(n) => Json::Number(n),
                None if v.is_nan() => Json::String("NaN".into()),
                None if *v > 0.0 => Json::String("Infinity".into()),
                None => Json::String("-Infinity".into()),
            },
            Value::String(v) => Json::String(v.clone()),
            Value::Timestamp(v) => Json::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Blob(v) => Json::String(hex::encode(v)),
        }
    }

    /// Decode a JSON value for `column`, enforcing its type and nullability.
    pub fn from_json(json: &Json, column: &Column) -> Result<Value, String> {
        if json.is_null() {
            return if column.nullable {
                Ok(Value::Null)
            } else {
                Err(format!("column {} is not nullable", column.name))
            };
        }

        let mismatch = || {
            format!(
                "column {} expects {}, got {}",
                column.name,
                column.column_type.as_str(),
                json
            )
        };

        match column.column_type {
            ColumnType::Bool => json.as_bool().map(Value::Bool).ok_or_else(mismatch),
            ColumnType::Long => json.as_i64().map(Value::Long).ok_or_else(mismatch),
            ColumnType::Double => match json {
                Json::Number(n) => n.as_f64().map(Value::Double).ok_or_else(mismatch),
                Json::String(s) => match s.as_str() {
                    "NaN" => Ok(Value::Double(f64::NAN)),
                    "Infinity" => Ok(Value::Double(f64::INFINITY)),
                    "-Infinity" => Ok(Value::Double(f64::NEG_INFINITY)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            ColumnType::String => json
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(mismatch),
            ColumnType::Timestamp => {
                let s = json.as_str().ok_or_else(mismatch)?;
                parse_timestamp(s)
                    .map(Value::Timestamp)
                    .ok_or_else(|| format!("column {}: invalid timestamp {:?}", column.name, s))
            }
            ColumnType::Blob => {
                let s = json.as_str().ok_or_else(mismatch)?;
                hex::decode(s)
                    .map(Value::Blob)
                    .map_err(|e| format!("column {}: invalid hex blob: {}", column.name, e))
            }
        }
    }

    /// Order two values of compatible types; `None` when they cannot be compared.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
            (Value::Long(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Long(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Encode a row as a JSON array.
pub fn encode_row(row: &Row) -> Json {
    Json::Array(row.iter().map(Value::to_json).collect())
}

/// Decode a JSON array into a row shaped by `schema`.
pub fn decode_row(json: &Json, schema: &ContainerSchema) -> Result<Row, String> {
    let items = json
        .as_array()
        .ok_or_else(|| format!("row is not a JSON array: {}", json))?;
    if items.len() != schema.columns.len() {
        return Err(format!(
            "row has {} values, schema has {} columns",
            items.len(),
            schema.columns.len()
        ));
    }
    items
        .iter()
        .zip(&schema.columns)
        .map(|(item, column)| Value::from_json(item, column))
        .collect()
}

/// Check that a row matches the schema's arity, types and nullability.
pub fn validate_row(row: &Row, schema: &ContainerSchema) -> Result<(), String> {
    if row.len() != schema.columns.len() {
        return Err(format!(
            "row has {} values, schema has {} columns",
            row.len(),
            schema.columns.len()
        ));
    }
    for (value, column) in row.iter().zip(&schema.columns) {
        if value.is_null() && !column.nullable {
            return Err(format!("column {} is not nullable", column.name));
        }
        if !value.fits(column.column_type) {
            return Err(format!(
                "column {} expects {}, got {:?}",
                column.name,
                column.column_type.as_str(),
                value
            ));
        }
    }
    Ok(())
}
