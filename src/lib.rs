//! # hrana-client
//!
//! Async client for libSQL/sqld-compatible servers speaking the Hrana
//! protocol over HTTP.
//!
//! The client encodes statements and typed parameters into Hrana pipeline
//! requests, keeps the server-side stream alive across requests, decodes
//! typed result sets and classifies every failure: the request never
//! reached the server, the server rejected the statement, or the exchange
//! itself broke down.
//!
//! ## Example
//!
//! ```no_run
//! # use hrana_client::*;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a client; nothing is sent yet
//! let client = Client::new(ClientConfig::new("http://127.0.0.1:8080"))?;
//!
//! // Execute a statement with bound parameters
//! let stmt = Statement::new("SELECT ?1 + ?2").bind(1)?.bind(2)?;
//! let rows = client.query(stmt).await?;
//! assert_eq!(rows.rows()[0].get::<i64>(0)?, 3);
//!
//! // Classify failures
//! match client.execute("SELECT * FROM missing").await {
//!     Err(e) if e.kind() == ErrorKind::Statement => println!("bad SQL: {}", e),
//!     Err(e) => return Err(e.into()),
//!     Ok(_) => {}
//! }
//!
//! // Close the default connection
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod arrow_conversion;
pub mod client;
pub mod connection;
pub mod error;
pub mod query;
pub mod transport;
pub mod types;

// Re-export public API
pub use arrow_conversion::ArrowConverter;
pub use client::{Client, Connection, Transaction, TransactionMode};
pub use connection::{BatchMode, ClientConfig, ClientConfigBuilder, Endpoint};
pub use error::{
    BindingError, ClientError, ConnectionError, ConversionError, ErrorKind, ProtocolError, StatementError,
    TransportError,
};
pub use query::{
    AffectedRows, Column, Description, ExecutionOutcome, QueryStats, ResultSet, Row, RowStream, Statement,
    StatementType,
};
pub use types::{ColumnType, FromValue, TypeMapper, Value};
