//! Array builders for converting column values to Arrow arrays.
//!
//! This module provides type-specific builders that turn one column of
//! [`Value`]s into an Arrow array with proper NULL handling. Values are
//! never coerced, with one exception: integers are widened into `Float64`
//! columns.

use std::sync::Arc;

use arrow::array::{ArrayRef, BinaryBuilder, Float64Builder, Int64Builder, NullArray, StringBuilder};
use arrow::datatypes::DataType;

use crate::error::ConversionError;
use crate::query::results::Row;
use crate::types::Value;

/// Build the Arrow array for column `column` of `rows`.
///
/// # Arguments
/// * `data_type` - Arrow type of the column
/// * `rows` - Rows to read the column from
/// * `column` - Column index
/// * `name` - Column name for error reporting
pub fn build_array(
    data_type: &DataType,
    rows: &[Row],
    column: usize,
    name: &str,
) -> Result<ArrayRef, ConversionError> {
    let values = rows.iter().map(|row| row.value(column));
    match data_type {
        DataType::Int64 => build_int64_array(values, name),
        DataType::Float64 => build_float64_array(values, name),
        DataType::Utf8 => build_string_array(values, name),
        DataType::Binary => build_binary_array(values, name),
        DataType::Null => Ok(Arc::new(NullArray::new(rows.len()))),
        other => Err(ConversionError::Arrow(format!(
            "no builder for Arrow type {} (column '{}')",
            other, name
        ))),
    }
}

fn mismatch(name: &str, expected: &'static str, value: &Value) -> ConversionError {
    ConversionError::MixedColumnTypes {
        column: name.to_string(),
        first: expected,
        second: value.type_name(),
    }
}

fn build_int64_array<'a>(
    values: impl Iterator<Item = Result<&'a Value, ConversionError>>,
    name: &str,
) -> Result<ArrayRef, ConversionError> {
    let mut builder = Int64Builder::new();
    for value in values {
        match value? {
            Value::Null => builder.append_null(),
            Value::Integer(i) => builder.append_value(*i),
            other => return Err(mismatch(name, "integer", other)),
        }
    }
    Ok(Arc::new(builder.finish()))
}

fn build_float64_array<'a>(
    values: impl Iterator<Item = Result<&'a Value, ConversionError>>,
    name: &str,
) -> Result<ArrayRef, ConversionError> {
    let mut builder = Float64Builder::new();
    for value in values {
        match value? {
            Value::Null => builder.append_null(),
            Value::Float(f) => builder.append_value(*f),
            Value::Integer(i) => builder.append_value(*i as f64),
            other => return Err(mismatch(name, "float", other)),
        }
    }
    Ok(Arc::new(builder.finish()))
}

fn build_string_array<'a>(
    values: impl Iterator<Item = Result<&'a Value, ConversionError>>,
    name: &str,
) -> Result<ArrayRef, ConversionError> {
    let mut builder = StringBuilder::new();
    for value in values {
        match value? {
            Value::Null => builder.append_null(),
            Value::Text(s) => builder.append_value(s),
            other => return Err(mismatch(name, "text", other)),
        }
    }
    Ok(Arc::new(builder.finish()))
}

fn build_binary_array<'a>(
    values: impl Iterator<Item = Result<&'a Value, ConversionError>>,
    name: &str,
) -> Result<ArrayRef, ConversionError> {
    let mut builder = BinaryBuilder::new();
    for value in values {
        match value? {
            Value::Null => builder.append_null(),
            Value::Blob(b) => builder.append_value(b),
            other => return Err(mismatch(name, "blob", other)),
        }
    }
    Ok(Arc::new(builder.finish()))
}
