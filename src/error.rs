//! Error types for hrana-client.
//!
//! Errors are organized by functional area and folded into [`ClientError`].
//! Every failure surfaced by an `execute` call maps to exactly one
//! [`ErrorKind`], which is how callers tell "my SQL was wrong" apart from
//! "the server was unreachable".

use std::fmt;
use thiserror::Error;

/// Hrana error codes that mean the server no longer knows our stream.
const STREAM_LOST_CODES: &[&str] = &["STREAM_EXPIRED", "STREAM_CLOSED", "STREAM_NOT_FOUND"];

/// Top-level error type returned by the client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server could not be reached or the channel was lost
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The exchange did not complete before the deadline
    #[error("Request timed out after {timeout_ms}ms{}", timeout_note(.outcome_unknown))]
    Timeout {
        timeout_ms: u64,
        /// The request was handed to the channel, so it may have executed
        outcome_unknown: bool,
    },

    /// The request/response exchange was malformed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server parsed or executed the statement and reported an error
    #[error(transparent)]
    Statement(#[from] StatementError),

    /// The server rejected the credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A statement inside a batch failed; later statements did not run
    #[error("Batch failed at statement {failed_index}: {source}")]
    Batch {
        failed_index: usize,
        source: Box<ClientError>,
    },

    /// Rows were requested from a stream whose connection has been closed
    #[error("Result set invalidated: the owning connection was closed")]
    ResultSetInvalidated,

    /// The statement could not be built locally
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// A value could not be converted to the requested type
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

fn timeout_note(outcome_unknown: &bool) -> &'static str {
    if *outcome_unknown {
        " (the statement may or may not have executed)"
    } else {
        ""
    }
}

/// Errors related to reaching the server and keeping the channel alive.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The endpoint URL could not be parsed
    #[error("Invalid endpoint '{url}': {message}")]
    InvalidEndpoint { url: String, message: String },

    /// The URL scheme does not select a supported transport
    #[error("Unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    /// Invalid client configuration
    #[error("Invalid configuration parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    /// No channel could be established; nothing was sent
    #[error("Failed to connect to {endpoint}: {message}")]
    ConnectFailed { endpoint: String, message: String },

    /// The channel was severed after the request was sent
    #[error("Connection reset: {0}")]
    Reset(String),

    /// A gateway in front of the server answered instead of the server
    #[error("Server unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The server no longer knows the stream this connection was using
    #[error("Stream lost ({code}): {message}")]
    StreamLost { code: String, message: String },

    /// TLS/SSL error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection is closed
    #[error("Connection is closed")]
    Closed,
}

/// Errors related to the wire exchange itself.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload is not valid for the protocol
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// The payload could not be encoded
    #[error("Failed to encode request: {0}")]
    Encode(String),

    /// The response does not match the request that was sent
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A row does not have one value per column
    #[error("Row {row} has {actual} values but the result has {expected} columns")]
    RowArity {
        row: usize,
        expected: usize,
        actual: usize,
    },

    /// The endpoint does not speak the protocol
    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// SQL-level error reported by the server, carried verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct StatementError {
    /// Server-provided error code, if any
    pub code: Option<String>,
    /// Server-provided error message
    pub message: String,
}

impl StatementError {
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "SQL error [{}]: {}", code, self.message),
            None => write!(f, "SQL error: {}", self.message),
        }
    }
}

/// Errors raised while binding parameters or assembling a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindingError {
    /// Both positional and named parameters were bound
    #[error("Cannot mix positional and named parameters in one statement")]
    MixedBindings,

    /// NaN and infinities have no wire representation
    #[error("Parameter {parameter} is a non-finite float ({value})")]
    NonFiniteFloat { parameter: String, value: f64 },

    /// A named parameter without a name
    #[error("Named parameter must have a non-empty name")]
    EmptyName,

    /// BEGIN/COMMIT/ROLLBACK would break the batch's own transaction
    #[error("Statement {index} of the batch is a transaction control statement")]
    TransactionControlInBatch { index: usize },
}

/// Errors related to value conversion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// The value has a different type than requested
    #[error("Type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// The column index is past the end of the row
    #[error("Column index {index} out of range for {count} columns")]
    ColumnOutOfRange { index: usize, count: usize },

    /// No column with this name
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    /// The integer does not fit the requested type
    #[error("Integer {value} out of range for {target}")]
    IntegerOutOfRange { value: i64, target: &'static str },

    /// A column mixes incompatible value types
    #[error("Column '{column}' mixes {first} and {second} values")]
    MixedColumnTypes {
        column: String,
        first: &'static str,
        second: &'static str,
    },

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(String),
}

/// Low-level failures reported by a transport implementation.
///
/// These never reach callers directly; they are classified into
/// [`ClientError`] by the `From` conversion below.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No channel could be established; nothing was sent
    #[error("Connect to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },

    /// The server did not answer in time
    #[error("Timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The channel broke after the request was sent
    #[error("Connection reset: {0}")]
    Reset(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// TLS/SSL error
    #[error("TLS error: {0}")]
    Tls(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    Request(String),

    /// The transport was closed
    #[error("Transport is closed")]
    Closed,
}

/// Error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Could not reach the server, or the channel was lost
    Connection,
    /// Deadline expired
    Timeout,
    /// Malformed exchange
    Protocol,
    /// SQL-level error from the server
    Statement,
    /// Credential rejected
    Auth,
    /// Batch statement failure
    Batch,
    /// Streamed rows outlived their connection
    ResultSetInvalidated,
    /// Invalid local input
    InvalidArgument,
    /// Typed extraction failed
    Conversion,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "CONNECTION"),
            ErrorKind::Timeout => write!(f, "TIMEOUT"),
            ErrorKind::Protocol => write!(f, "PROTOCOL"),
            ErrorKind::Statement => write!(f, "STATEMENT"),
            ErrorKind::Auth => write!(f, "AUTH"),
            ErrorKind::Batch => write!(f, "BATCH"),
            ErrorKind::ResultSetInvalidated => write!(f, "RESULT_SET_INVALIDATED"),
            ErrorKind::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorKind::Conversion => write!(f, "CONVERSION"),
        }
    }
}

impl ClientError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connection(e) => e.kind(),
            ClientError::Timeout { .. } => ErrorKind::Timeout,
            ClientError::Protocol(_) => ErrorKind::Protocol,
            ClientError::Statement(_) => ErrorKind::Statement,
            ClientError::Auth(_) => ErrorKind::Auth,
            ClientError::Batch { .. } => ErrorKind::Batch,
            ClientError::ResultSetInvalidated => ErrorKind::ResultSetInvalidated,
            ClientError::Binding(_) => ErrorKind::InvalidArgument,
            ClientError::Conversion(_) => ErrorKind::Conversion,
        }
    }

    /// Classify an error payload returned by the server for one request.
    pub fn from_server(code: Option<String>, message: String) -> Self {
        match code {
            Some(code) if STREAM_LOST_CODES.contains(&code.as_str()) => {
                ClientError::Connection(ConnectionError::StreamLost { code, message })
            }
            code => ClientError::Statement(StatementError { code, message }),
        }
    }

    /// Whether a server error code means the stream is gone.
    pub fn is_stream_lost_code(code: Option<&str>) -> bool {
        code.is_some_and(|code| STREAM_LOST_CODES.contains(&code))
    }

    /// Whether the session must drop its stream after this error.
    pub fn is_stream_lost(&self) -> bool {
        matches!(
            self,
            ClientError::Connection(
                ConnectionError::StreamLost { .. }
                    | ConnectionError::Reset(_)
                    | ConnectionError::ConnectFailed { .. }
                    | ConnectionError::Tls(_)
            ) | ClientError::Timeout { .. }
        )
    }

    /// The server-provided error code, for statement errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Statement(e) => e.code.as_deref(),
            ClientError::Batch { source, .. } => source.code(),
            _ => None,
        }
    }
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::InvalidEndpoint { .. }
            | ConnectionError::UnsupportedScheme(_)
            | ConnectionError::InvalidParameter { .. } => ErrorKind::InvalidArgument,
            _ => ErrorKind::Connection,
        }
    }
}

/// Body of a non-success HTTP response, as sent by Hrana servers.
#[derive(serde::Deserialize)]
struct HttpErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect { endpoint, message } => {
                ClientError::Connection(ConnectionError::ConnectFailed { endpoint, message })
            }
            TransportError::Timeout { elapsed_ms } => ClientError::Timeout {
                timeout_ms: elapsed_ms,
                outcome_unknown: true,
            },
            TransportError::Reset(message) => ClientError::Connection(ConnectionError::Reset(message)),
            TransportError::Tls(message) => ClientError::Connection(ConnectionError::Tls(message)),
            TransportError::Closed => ClientError::Connection(ConnectionError::Closed),
            TransportError::Request(message) => ClientError::Protocol(ProtocolError::Encode(message)),
            TransportError::Http { status, body } => classify_http_status(status, body),
        }
    }
}

fn classify_http_status(status: u16, body: String) -> ClientError {
    match status {
        401 | 403 => {
            let message = serde_json::from_str::<HttpErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or(body);
            ClientError::Auth(message)
        }
        404 | 405 => ClientError::Protocol(ProtocolError::UnexpectedStatus { status, body }),
        // The request never got an answer from the database itself
        502 | 503 => ClientError::Connection(ConnectionError::Unavailable {
            status,
            message: excerpt(&body),
        }),
        _ => match serde_json::from_str::<HttpErrorBody>(&body) {
            Ok(parsed) => ClientError::from_server(parsed.code, parsed.message),
            // sqld reports some SQL errors as plain text
            Err(_) if status == 400 || status == 500 => {
                let message = if body.trim().is_empty() {
                    format!("HTTP status {}", status)
                } else {
                    body
                };
                ClientError::Statement(StatementError::new(None, message))
            }
            Err(_) => ClientError::Protocol(ProtocolError::UnexpectedStatus { status, body }),
        },
    }
}

/// First line of an error body, bounded for display.
fn excerpt(body: &str) -> String {
    let line = body.trim().lines().next().unwrap_or_default();
    match line.char_indices().nth(MAX_EXCERPT_CHARS) {
        Some((end, _)) => format!("{}...", &line[..end]),
        None => line.to_string(),
    }
}

const MAX_EXCERPT_CHARS: usize = 200;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for ConversionError {
    fn from(err: arrow::error::ArrowError) -> Self {
        ConversionError::Arrow(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_builder() {
            TransportError::Request(message)
        } else if err.is_connect() {
            let endpoint = err
                .url()
                .map(|url| url.origin().ascii_serialization())
                .unwrap_or_else(|| "server".to_string());
            TransportError::Connect { endpoint, message }
        } else if err.is_timeout() {
            TransportError::Timeout { elapsed_ms: 0 }
        } else {
            TransportError::Reset(message)
        }
    }
}
