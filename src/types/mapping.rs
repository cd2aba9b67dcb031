//! Column type mapping between declared SQL types and Apache Arrow.
//!
//! The server reports each column's declared type verbatim (`decltype`).
//! Those strings are free-form, so they are reduced to a column affinity
//! following SQLite's rules before any Arrow type is chosen.

use arrow::datatypes::DataType;
use std::collections::HashMap;

/// Metadata key under which the declared type is kept on Arrow fields.
pub const DECLTYPE_METADATA_KEY: &str = "hrana:decltype";

/// Column affinity derived from a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Declared type contains `INT`
    Integer,
    /// Declared type contains `CHAR`, `CLOB` or `TEXT`
    Text,
    /// Declared type contains `BLOB`, or is empty
    Blob,
    /// Declared type contains `REAL`, `FLOA` or `DOUB`
    Real,
    /// Any other declared type (`NUMERIC`, `DECIMAL`, `BOOLEAN`, `DATE`, ...)
    Numeric,
    /// The column is an expression without a declared type
    Untyped,
}

/// Type mapper for declared column types.
pub struct TypeMapper;

impl TypeMapper {
    /// Derive the affinity of a declared type.
    ///
    /// Rules are checked in order, so `CHARINT` is an integer column and
    /// `FLOATING POINT` is an integer column too (it contains `INT`).
    pub fn column_type(decltype: Option<&str>) -> ColumnType {
        let Some(decltype) = decltype else {
            return ColumnType::Untyped;
        };
        let upper = decltype.to_ascii_uppercase();

        if upper.contains("INT") {
            ColumnType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::Text
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            ColumnType::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ColumnType::Real
        } else {
            ColumnType::Numeric
        }
    }

    /// Arrow type for a column affinity.
    ///
    /// Returns `None` for affinities whose storage class is only known from
    /// the values themselves.
    pub fn to_arrow(column_type: ColumnType) -> Option<DataType> {
        match column_type {
            ColumnType::Integer => Some(DataType::Int64),
            ColumnType::Real => Some(DataType::Float64),
            ColumnType::Text => Some(DataType::Utf8),
            ColumnType::Blob => Some(DataType::Binary),
            ColumnType::Numeric | ColumnType::Untyped => None,
        }
    }

    /// Field metadata preserving the declared type.
    pub fn field_metadata(decltype: Option<&str>) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        if let Some(decltype) = decltype {
            metadata.insert(DECLTYPE_METADATA_KEY.to_string(), decltype.to_string());
        }
        metadata
    }

    /// Declared type stored on an Arrow field, if any.
    pub fn from_field_metadata(metadata: &HashMap<String, String>) -> Option<&str> {
        metadata.get(DECLTYPE_METADATA_KEY).map(String::as_str)
    }
}
