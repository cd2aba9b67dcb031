//! Converter from query results to Arrow `RecordBatch`es.
//!
//! Declared column types are only hints in SQLite: a column declared
//! `INTEGER` may hold text. The schema is therefore derived from the values
//! first and from the declared type only where the values say nothing
//! (empty or all-NULL columns).

use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, Field, Schema};

use super::builders::build_array;
use crate::error::ConversionError;
use crate::query::results::{Column, ResultSet, Row};
use crate::types::{TypeMapper, Value};

/// Converter for transforming rows to Arrow RecordBatch.
#[derive(Debug, Clone)]
pub struct ArrowConverter {
    schema: Arc<Schema>,
}

impl ArrowConverter {
    /// Derive the Arrow schema for `columns` from the values in `rows`.
    ///
    /// Every field is nullable and keeps the declared type in its metadata
    /// under [`crate::types::DECLTYPE_METADATA_KEY`].
    ///
    /// # Errors
    /// Returns `ConversionError::MixedColumnTypes` if a column holds values
    /// of incompatible types.
    pub fn new(columns: &[Column], rows: &[Row]) -> Result<Self, ConversionError> {
        let fields = columns
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let data_type = infer_column_type(column, index, rows)?;
                Ok(Field::new(&column.name, data_type, true)
                    .with_metadata(TypeMapper::field_metadata(column.decltype.as_deref())))
            })
            .collect::<Result<Vec<_>, ConversionError>>()?;

        Ok(Self {
            schema: Arc::new(Schema::new(fields)),
        })
    }

    /// Get the Arrow schema for this converter.
    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    /// Convert rows to a RecordBatch with this converter's schema.
    ///
    /// # Errors
    /// Returns `ConversionError` if a row does not match the schema.
    pub fn convert(&self, rows: &[Row]) -> Result<RecordBatch, ConversionError> {
        if rows.is_empty() {
            return Ok(RecordBatch::new_empty(Arc::clone(&self.schema)));
        }

        let arrays = self
            .schema
            .fields()
            .iter()
            .enumerate()
            .map(|(index, field)| build_array(field.data_type(), rows, index, field.name()))
            .collect::<Result<Vec<_>, _>>()?;

        RecordBatch::try_new(Arc::clone(&self.schema), arrays)
            .map_err(|e| ConversionError::Arrow(e.to_string()))
    }

    /// Convert several chunks of rows that share this converter's schema.
    pub fn convert_chunks(&self, chunks: &[Vec<Row>]) -> Result<Vec<RecordBatch>, ConversionError> {
        chunks.iter().map(|chunk| self.convert(chunk)).collect()
    }

    /// Convert a whole result set.
    pub fn convert_result_set(result: &ResultSet) -> Result<RecordBatch, ConversionError> {
        Self::new(result.columns(), result.rows())?.convert(result.rows())
    }
}

/// Arrow type of a value's storage class.
fn value_type(value: &Value) -> Option<DataType> {
    match value {
        Value::Null => None,
        Value::Integer(_) => Some(DataType::Int64),
        Value::Float(_) => Some(DataType::Float64),
        Value::Text(_) => Some(DataType::Utf8),
        Value::Blob(_) => Some(DataType::Binary),
    }
}

fn infer_column_type(column: &Column, index: usize, rows: &[Row]) -> Result<DataType, ConversionError> {
    let mut observed: Option<(DataType, &Value)> = None;

    for row in rows {
        let value = row.value(index)?;
        let Some(data_type) = value_type(value) else {
            continue;
        };
        observed = match observed {
            None => Some((data_type, value)),
            Some((seen, first)) if seen == data_type => Some((seen, first)),
            // Integers and floats share a Float64 column
            Some((DataType::Int64, _)) if data_type == DataType::Float64 => Some((data_type, value)),
            Some((DataType::Float64, first)) if data_type == DataType::Int64 => Some((DataType::Float64, first)),
            Some((_, first)) => {
                return Err(ConversionError::MixedColumnTypes {
                    column: column.name.clone(),
                    first: first.type_name(),
                    second: value.type_name(),
                })
            }
        };
    }

    Ok(match observed {
        Some((data_type, _)) => data_type,
        None => TypeMapper::to_arrow(column.column_type()).unwrap_or(DataType::Null),
    })
}

impl ResultSet {
    /// Convert this result set to an Arrow RecordBatch.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use hrana_client::Client;
    /// # async fn example(client: &Client) -> Result<(), Box<dyn std::error::Error>> {
    /// let batch = client.query("SELECT id, name FROM users").await?.to_record_batch()?;
    /// println!("{} rows, schema {:?}", batch.num_rows(), batch.schema());
    /// # Ok(())
    /// # }
    /// ```
    pub fn to_record_batch(&self) -> Result<RecordBatch, ConversionError> {
        ArrowConverter::convert_result_set(self)
    }
}
