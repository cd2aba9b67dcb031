//! Client interface.
//!
//! # Architecture
//!
//! The client interface is organized into three components:
//! - `Client` - Validated configuration and factory for connections, with a
//!   lazily created default connection
//! - `Connection` - One session to the server; executes statements
//! - `Transaction` - Statements pinned to one stream between `BEGIN` and
//!   `COMMIT`/`ROLLBACK`
//!
//! # Example
//!
//! ```no_run
//! use hrana_client::{Client, ClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(ClientConfig::new("http://127.0.0.1:8080"))?;
//!
//! let rows = client.execute("SELECT 1").await?.into_result_set().unwrap_or_default();
//! assert_eq!(rows.rows()[0].get::<i64>(0)?, 1);
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod transaction;

pub use connection::Connection;
pub use transaction::{Transaction, TransactionMode};

use std::str::FromStr;

use tokio::sync::OnceCell;

use crate::connection::params::{ClientConfig, Endpoint};
use crate::error::{ClientError, ConnectionError};
use crate::query::results::{ExecutionOutcome, ResultSet};
use crate::query::statement::Statement;

/// Configured entry point for talking to one server.
///
/// A `Client` is created explicitly and passed around; there is no global
/// instance. Operations on the client itself run on a default connection
/// that is created on first use.
pub struct Client {
    config: ClientConfig,
    endpoint: Endpoint,
    default: OnceCell<Connection>,
}

impl Client {
    /// Create a client, validating the configuration.
    ///
    /// No request is sent until the first operation.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` for an invalid URL or settings.
    pub fn new(config: ClientConfig) -> Result<Self, ConnectionError> {
        let endpoint = config.validate()?;
        Ok(Self {
            config,
            endpoint,
            default: OnceCell::new(),
        })
    }

    /// Create a client from the `LIBSQL_*` environment variables.
    pub fn from_env() -> Result<Self, ConnectionError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Open a new connection, independent of the default one.
    pub fn connect(&self) -> Result<Connection, ConnectionError> {
        Connection::open(&self.config)
    }

    /// The default connection, created on first use.
    pub async fn connection(&self) -> Result<&Connection, ClientError> {
        let connection = self
            .default
            .get_or_try_init(|| async { Connection::open(&self.config) })
            .await?;
        Ok(connection)
    }

    /// Execute a statement on the default connection.
    pub async fn execute(&self, statement: impl Into<Statement>) -> Result<ExecutionOutcome, ClientError> {
        self.connection().await?.execute(statement).await
    }

    /// Execute a statement on the default connection and return its rows.
    pub async fn query(&self, statement: impl Into<Statement>) -> Result<ResultSet, ClientError> {
        self.connection().await?.query(statement).await
    }

    /// Execute statements atomically on the default connection.
    pub async fn execute_batch<I, S>(&self, statements: I) -> Result<Vec<ExecutionOutcome>, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Statement>,
    {
        self.connection().await?.execute_batch(statements).await
    }

    /// Close the default connection, if it was created.
    ///
    /// Connections returned by [`Client::connect`] are closed separately.
    pub async fn close(&self) -> Result<(), ClientError> {
        match self.default.get() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }
}

impl FromStr for Client {
    type Err = ConnectionError;

    /// Create a client for a URL with default settings.
    fn from_str(url: &str) -> Result<Self, Self::Err> {
        Self::new(ClientConfig::from_str(url)?)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("connected", &self.default.initialized())
            .finish()
    }
}
