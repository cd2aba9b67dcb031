//! Hrana message types.
//!
//! JSON structures exchanged with the server's `/v2/pipeline` and
//! `/v3/cursor` endpoints. Requests are tagged by `"type"` and answered
//! positionally: the n-th result in a pipeline response belongs to the n-th
//! request.

use serde::{Deserialize, Serialize};

use super::deserialize::{bytes_as_base64, i64_as_str, option_i64_as_str};
use crate::types::Value;

/// Body of `POST /v2/pipeline`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRequest {
    /// Stream identity from the previous response, `None` opens a new stream
    pub baton: Option<String>,
    /// Requests executed in order on the stream
    pub requests: Vec<StreamRequest>,
}

/// Response to a pipeline request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineResponse {
    /// Baton for the next request, `None` when the stream was closed
    #[serde(default)]
    pub baton: Option<String>,
    /// Base URL to use for subsequent requests on this stream
    #[serde(default)]
    pub base_url: Option<String>,
    /// One result per request
    pub results: Vec<StreamResult>,
}

/// A single request on a stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRequest {
    /// Close the stream
    Close {},
    /// Execute one statement
    Execute { stmt: Stmt },
    /// Execute a batch of conditional steps
    Batch { batch: Batch },
    /// Execute a `;`-separated script without returning rows
    Sequence { sql: String },
    /// Describe a statement without executing it
    Describe { sql: String },
    /// Ask whether the stream is outside of a transaction
    GetAutocommit {},
}

impl StreamRequest {
    /// Tag of the response this request expects.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamRequest::Close {} => "close",
            StreamRequest::Execute { .. } => "execute",
            StreamRequest::Batch { .. } => "batch",
            StreamRequest::Sequence { .. } => "sequence",
            StreamRequest::Describe { .. } => "describe",
            StreamRequest::GetAutocommit {} => "get_autocommit",
        }
    }
}

/// Outcome of one stream request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: WireError },
}

/// Successful response to one stream request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResponse {
    Close {},
    Execute { result: StmtResult },
    Batch { result: BatchResult },
    Sequence {},
    Describe { result: DescribeResult },
    GetAutocommit { is_autocommit: bool },
}

impl StreamResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamResponse::Close {} => "close",
            StreamResponse::Execute { .. } => "execute",
            StreamResponse::Batch { .. } => "batch",
            StreamResponse::Sequence {} => "sequence",
            StreamResponse::Describe { .. } => "describe",
            StreamResponse::GetAutocommit { .. } => "get_autocommit",
        }
    }
}

/// Error reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// A statement as sent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stmt {
    pub sql: String,
    #[serde(default)]
    pub args: Vec<WireValue>,
    #[serde(default)]
    pub named_args: Vec<NamedArg>,
    /// Whether the server should return rows
    #[serde(default)]
    pub want_rows: bool,
}

impl Stmt {
    /// A parameterless statement.
    pub fn plain(sql: impl Into<String>, want_rows: bool) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
            named_args: Vec::new(),
            want_rows,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedArg {
    pub name: String,
    pub value: WireValue,
}

/// Result of executing one statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StmtResult {
    pub cols: Vec<Col>,
    pub rows: Vec<Vec<WireValue>>,
    #[serde(default)]
    pub affected_row_count: u64,
    #[serde(default, with = "option_i64_as_str")]
    pub last_insert_rowid: Option<i64>,
    #[serde(default)]
    pub rows_read: Option<u64>,
    #[serde(default)]
    pub rows_written: Option<u64>,
    #[serde(default)]
    pub query_duration_ms: Option<f64>,
}

/// Column descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Col {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub decltype: Option<String>,
}

/// Steps executed in order, each guarded by an optional condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub steps: Vec<BatchStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<BatchCond>,
    pub stmt: Stmt,
}

/// Condition on the outcome of earlier batch steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchCond {
    /// Step `step` succeeded
    Ok { step: u32 },
    /// Step `step` failed
    Error { step: u32 },
    Not { cond: Box<BatchCond> },
    And { conds: Vec<BatchCond> },
    Or { conds: Vec<BatchCond> },
    IsAutocommit {},
}

/// Per-step outcome of a batch. A step that did not run has neither a
/// result nor an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchResult {
    pub step_results: Vec<Option<StmtResult>>,
    pub step_errors: Vec<Option<WireError>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescribeResult {
    pub params: Vec<DescribeParam>,
    pub cols: Vec<DescribeCol>,
    pub is_explain: bool,
    pub is_readonly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DescribeParam {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DescribeCol {
    pub name: String,
    #[serde(default)]
    pub decltype: Option<String>,
}

/// Body of `POST /v3/cursor`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorRequest {
    pub baton: Option<String>,
    pub batch: Batch,
}

/// First line of a cursor response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorResponse {
    #[serde(default)]
    pub baton: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// One line of a cursor response after the header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorEntry {
    StepBegin {
        step: u32,
        cols: Vec<Col>,
    },
    StepEnd {
        #[serde(default)]
        affected_row_count: u64,
        #[serde(default, with = "option_i64_as_str")]
        last_insert_rowid: Option<i64>,
    },
    StepError {
        step: u32,
        error: WireError,
    },
    Row {
        row: Vec<WireValue>,
    },
    Error {
        error: WireError,
    },
    /// Entries this client does not interpret (e.g. `replication_index`)
    #[serde(other)]
    Unknown,
}

/// Tagged value as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireValue {
    Null,
    Integer {
        #[serde(with = "i64_as_str")]
        value: i64,
    },
    Float {
        value: f64,
    },
    Text {
        value: String,
    },
    Blob {
        #[serde(rename = "base64", with = "bytes_as_base64")]
        value: Vec<u8>,
    },
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => WireValue::Null,
            Value::Integer(value) => WireValue::Integer { value },
            Value::Float(value) => WireValue::Float { value },
            Value::Text(value) => WireValue::Text { value },
            Value::Blob(value) => WireValue::Blob { value },
        }
    }
}

impl From<WireValue> for Value {
    fn from(value: WireValue) -> Self {
        match value {
            WireValue::Null => Value::Null,
            WireValue::Integer { value } => Value::Integer(value),
            WireValue::Float { value } => Value::Float(value),
            WireValue::Text { value } => Value::Text(value),
            WireValue::Blob { value } => Value::Blob(value),
        }
    }
}
