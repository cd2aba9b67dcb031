//! Buffered query results.
//!
//! A [`ResultSet`] is fully materialized when it is returned: it owns its
//! rows, can be iterated any number of times and outlives the connection
//! that produced it.

use std::sync::Arc;

use crate::error::{ConversionError, ProtocolError};
use crate::types::{ColumnType, FromValue, TypeMapper, Value};

/// Column descriptor as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name (empty if the server did not report one)
    pub name: String,
    /// Declared type, verbatim
    pub decltype: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, decltype: Option<String>) -> Self {
        Self {
            name: name.into(),
            decltype,
        }
    }

    /// Affinity derived from the declared type.
    pub fn column_type(&self) -> ColumnType {
        TypeMapper::column_type(self.decltype.as_deref())
    }
}

/// Server-side statistics for one statement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueryStats {
    pub rows_read: Option<u64>,
    pub rows_written: Option<u64>,
    pub query_duration_ms: Option<f64>,
}

/// One row of a result, aligned with the result's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[Column]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Number of values in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value at `index`.
    pub fn value(&self, index: usize) -> Result<&Value, ConversionError> {
        self.values
            .get(index)
            .ok_or(ConversionError::ColumnOutOfRange {
                index,
                count: self.values.len(),
            })
    }

    /// Typed value at `index`.
    ///
    /// Values are never coerced: reading an integer column as `f64` or
    /// `String` fails with [`ConversionError::TypeMismatch`].
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T, ConversionError> {
        T::from_value(self.value(index)?)
    }

    /// Typed value of the first column named `name`.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T, ConversionError> {
        let index = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| ConversionError::UnknownColumn(name.to_string()))?;
        self.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}

/// Rows and columns returned by a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Arc<[Column]>,
    rows: Vec<Row>,
    rows_affected: u64,
    last_insert_id: Option<i64>,
    stats: QueryStats,
}

impl ResultSet {
    /// Build a result set, checking that every row has one value per column.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self, ProtocolError> {
        let columns: Arc<[Column]> = columns.into();
        let mut built = Vec::with_capacity(rows.len());
        for (index, values) in rows.into_iter().enumerate() {
            if values.len() != columns.len() {
                return Err(ProtocolError::RowArity {
                    row: index,
                    expected: columns.len(),
                    actual: values.len(),
                });
            }
            built.push(Row::new(Arc::clone(&columns), values));
        }

        Ok(Self {
            columns,
            rows: built,
            rows_affected: 0,
            last_insert_id: None,
            stats: QueryStats::default(),
        })
    }

    /// Empty result carrying the summary of a statement without columns.
    pub(crate) fn from_affected(affected: AffectedRows) -> Self {
        Self {
            rows_affected: affected.rows_affected,
            last_insert_id: affected.last_insert_id,
            stats: affected.stats,
            ..Self::default()
        }
    }

    pub(crate) fn with_summary(mut self, rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        self.rows_affected = rows_affected;
        self.last_insert_id = last_insert_id;
        self
    }

    pub(crate) fn with_stats(mut self, stats: QueryStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Index of the first column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows changed by the statement (e.g. `INSERT ... RETURNING`).
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }
}

impl Default for ResultSet {
    fn default() -> Self {
        Self {
            columns: Arc::from(Vec::new()),
            rows: Vec::new(),
            rows_affected: 0,
            last_insert_id: None,
            stats: QueryStats::default(),
        }
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Summary of a statement that returned no columns.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AffectedRows {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
    pub stats: QueryStats,
}

/// What a successful statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The statement returned at least one column
    Rows(ResultSet),
    /// The statement returned no columns
    Affected(AffectedRows),
}

impl ExecutionOutcome {
    pub fn rows_affected(&self) -> u64 {
        match self {
            ExecutionOutcome::Rows(rs) => rs.rows_affected(),
            ExecutionOutcome::Affected(a) => a.rows_affected,
        }
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        match self {
            ExecutionOutcome::Rows(rs) => rs.last_insert_id(),
            ExecutionOutcome::Affected(a) => a.last_insert_id,
        }
    }

    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            ExecutionOutcome::Rows(rs) => Some(rs),
            ExecutionOutcome::Affected(_) => None,
        }
    }

    pub fn into_result_set(self) -> Option<ResultSet> {
        match self {
            ExecutionOutcome::Rows(rs) => Some(rs),
            ExecutionOutcome::Affected(_) => None,
        }
    }

    pub fn is_rows(&self) -> bool {
        matches!(self, ExecutionOutcome::Rows(_))
    }
}

/// What the server knows about a statement without running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    /// Parameter names in position order; `None` for anonymous `?`
    pub params: Vec<Option<String>>,
    pub columns: Vec<Column>,
    pub is_explain: bool,
    pub is_readonly: bool,
}

impl Description {
    pub fn parameter_count(&self) -> usize {
        self.params.len()
    }
}
