//! Container metadata: kind, columns and the append-compatibility check.

use serde::{Deserialize, Serialize};

use super::value::Row;

/// Storage layout of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// General-purpose collection keyed by an optional row key.
    #[default]
    Collection,
    /// Time-ordered container keyed by a timestamp row key.
    TimeSeries,
}

/// Column data types carried through the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Long,
    Double,
    String,
    Timestamp,
    Blob,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::Long => "long",
            ColumnType::Double => "double",
            ColumnType::String => "string",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Blob => "blob",
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Whether NULL is allowed.
    #[serde(default = "default_true")]
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Container schema metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSchema {
    /// Collection or time series.
    #[serde(default)]
    pub kind: ContainerKind,

    /// Column definitions in row order.
    pub columns: Vec<Column>,

    /// Whether the first column is the row key.
    #[serde(default)]
    pub row_key: bool,
}

impl ContainerSchema {
    pub fn new(kind: ContainerKind, columns: Vec<Column>, row_key: bool) -> Self {
        Self {
            kind,
            columns,
            row_key,
        }
    }

    /// Position of a column, matched ignoring case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Check whether rows shaped by `other` can be appended to a container with this schema.
    ///
    /// Requires the same kind and row-key flag, the same number of columns,
    /// column names equal ignoring case and identical column types.
    pub fn is_compatible_with(&self, other: &ContainerSchema) -> bool {
        self.incompatibility(other).is_none()
    }

    /// Describe the first difference that makes `other` incompatible, if any.
    pub fn incompatibility(&self, other: &ContainerSchema) -> Option<String> {
        if self.kind != other.kind {
            return Some(format!(
                "container kind differs ({:?} vs {:?})",
                self.kind, other.kind
            ));
        }
        if self.row_key != other.row_key {
            return Some("row key definition differs".to_string());
        }
        if self.columns.len() != other.columns.len() {
            return Some(format!(
                "column count differs ({} vs {})",
                self.columns.len(),
                other.columns.len()
            ));
        }
        for (i, (mine, theirs)) in self.columns.iter().zip(&other.columns).enumerate() {
            if !mine.name.eq_ignore_ascii_case(&theirs.name) {
                return Some(format!(
                    "column {} name differs ({} vs {})",
                    i, mine.name, theirs.name
                ));
            }
            if mine.column_type != theirs.column_type {
                return Some(format!(
                    "column {} type differs ({} vs {})",
                    mine.name,
                    mine.column_type.as_str(),
                    theirs.column_type.as_str()
                ));
            }
        }
        None
    }
}

/// Schema plus rows: the unit moved between a store and an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerData {
    pub schema: ContainerSchema,
    pub rows: Vec<Row>,
}

impl ContainerData {
    pub fn new(schema: ContainerSchema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    /// Same schema, no rows.
    pub fn schema_only(schema: ContainerSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }
}

fn default_true() -> bool {
    true
}
