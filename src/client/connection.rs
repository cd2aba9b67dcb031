//! Connection implementation.
//!
//! This module provides the `Connection` type which owns one session to a
//! Hrana server and serializes the operations of all its callers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::transaction::{Transaction, TransactionMode};
use crate::connection::params::{ClientConfig, Endpoint};
use crate::connection::session::{Session, SessionState};
use crate::error::{ClientError, ConnectionError};
use crate::query::cursor::RowStream;
use crate::query::executor::Executor;
use crate::query::results::{Description, ExecutionOutcome, ResultSet};
use crate::query::statement::Statement;
use crate::transport::{HttpTransport, TransportProtocol};

/// A connection to a Hrana server.
///
/// Operations from concurrent callers are queued on an internal FIFO lock,
/// so requests go out (and responses are returned) in submission order.
/// The underlying stream is reopened on demand after it is lost.
///
/// # Example
///
/// ```no_run
/// use hrana_client::{ClientConfig, Connection, Statement};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connection = Connection::open(&ClientConfig::new("http://127.0.0.1:8080"))?;
///
/// connection.execute("CREATE TABLE IF NOT EXISTS users (id INTEGER, name TEXT)").await?;
/// let stmt = Statement::new("INSERT INTO users VALUES (?, ?)").bind(1)?.bind("Alice")?;
/// let outcome = connection.execute(stmt).await?;
/// println!("Inserted {} rows", outcome.rows_affected());
///
/// connection.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    session: Arc<Mutex<Session>>,
    executor: Executor,
    /// Shared with open row streams
    closed: Arc<AtomicBool>,
    endpoint: Endpoint,
}

impl Connection {
    /// Create a connection over HTTP.
    ///
    /// Nothing is sent until the first operation; an unreachable server is
    /// reported by that operation.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the configuration is invalid.
    pub fn open(config: &ClientConfig) -> Result<Self, ConnectionError> {
        Self::with_transport(config, Box::new(HttpTransport::new()))
    }

    /// Create a connection over a custom transport.
    pub fn with_transport(
        config: &ClientConfig,
        transport: Box<dyn TransportProtocol>,
    ) -> Result<Self, ConnectionError> {
        let endpoint = config.validate()?;
        log::debug!("[CONN] New connection to {}", endpoint);
        Ok(Self {
            session: Arc::new(Mutex::new(Session::new(endpoint.clone(), transport))),
            executor: Executor::new(config.timeout(), config.batch_mode),
            closed: Arc::new(AtomicBool::new(false)),
            endpoint,
        })
    }

    /// Execute a single statement.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Statement` if the server rejected the statement,
    /// `ClientError::Timeout` if it did not answer in time, and
    /// `ConnectionError::Closed` after [`Connection::close`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use hrana_client::Connection;
    /// # async fn example(connection: &Connection) -> Result<(), Box<dyn std::error::Error>> {
    /// let outcome = connection.execute("SELECT COUNT(*) FROM users").await?;
    /// let rows = outcome.into_result_set().unwrap_or_default();
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute(&self, statement: impl Into<Statement>) -> Result<ExecutionOutcome, ClientError> {
        let statement = statement.into();
        let mut session = self.lock().await?;
        self.executor.execute(&mut session, &statement).await
    }

    /// Execute a statement and return its rows.
    ///
    /// Statements that produce no columns yield an empty result set carrying
    /// the affected-row summary.
    pub async fn query(&self, statement: impl Into<Statement>) -> Result<ResultSet, ClientError> {
        match self.execute(statement).await? {
            ExecutionOutcome::Rows(rows) => Ok(rows),
            ExecutionOutcome::Affected(affected) => Ok(ResultSet::from_affected(affected)),
        }
    }

    /// Execute statements atomically, in order.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Batch` with the index of the first failing
    /// statement; later statements are not executed and earlier ones are
    /// rolled back.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use hrana_client::{Connection, Statement};
    /// # async fn example(connection: &Connection) -> Result<(), Box<dyn std::error::Error>> {
    /// let outcomes = connection
    ///     .execute_batch(vec![
    ///         Statement::new("INSERT INTO users VALUES (1, 'Alice')"),
    ///         Statement::new("INSERT INTO users VALUES (2, 'Bob')"),
    ///     ])
    ///     .await?;
    /// assert_eq!(outcomes.len(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute_batch<I, S>(&self, statements: I) -> Result<Vec<ExecutionOutcome>, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Statement>,
    {
        let statements: Vec<Statement> = statements.into_iter().map(Into::into).collect();
        if statements.is_empty() {
            self.check_open()?;
            return Ok(Vec::new());
        }
        let mut session = self.lock().await?;
        self.executor.execute_batch(&mut session, &statements).await
    }

    /// Execute a statement and stream its rows.
    ///
    /// The cursor runs on its own stream, so the connection stays usable
    /// while rows are being read. Closing the connection invalidates the
    /// returned stream.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use hrana_client::Connection;
    /// # async fn example(connection: &Connection) -> Result<(), Box<dyn std::error::Error>> {
    /// let mut rows = connection.query_stream("SELECT id, name FROM users").await?;
    /// while let Some(row) = rows.next().await? {
    ///     let name: String = row.get(1)?;
    ///     println!("{}", name);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn query_stream(&self, statement: impl Into<Statement>) -> Result<RowStream, ClientError> {
        let statement = statement.into().with_want_rows(true);
        let body = {
            let mut session = self.lock().await?;
            self.executor.open_cursor(&mut session, &statement).await?
        };
        RowStream::open(body, Arc::clone(&self.closed), self.executor.timeout()).await
    }

    /// Run several `;`-separated statements, discarding their results.
    pub async fn execute_script(&self, sql: &str) -> Result<(), ClientError> {
        let mut session = self.lock().await?;
        self.executor.execute_script(&mut session, sql).await
    }

    /// Whether the connection's stream is outside an explicit transaction.
    pub async fn is_autocommit(&self) -> Result<bool, ClientError> {
        let mut session = self.lock().await?;
        self.executor.is_autocommit(&mut session).await
    }

    /// Describe a statement without executing it.
    pub async fn describe(&self, sql: &str) -> Result<Description, ClientError> {
        let mut session = self.lock().await?;
        self.executor.describe(&mut session, sql).await
    }

    /// Begin a deferred transaction.
    ///
    /// The transaction holds the connection until it is committed, rolled
    /// back or dropped; other callers wait for it.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use hrana_client::Connection;
    /// # async fn example(connection: &Connection) -> Result<(), Box<dyn std::error::Error>> {
    /// let mut tx = connection.transaction().await?;
    /// tx.execute("UPDATE accounts SET balance = balance - 10 WHERE id = 1").await?;
    /// tx.execute("UPDATE accounts SET balance = balance + 10 WHERE id = 2").await?;
    /// tx.commit().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn transaction(&self) -> Result<Transaction, ClientError> {
        self.transaction_with(TransactionMode::Deferred).await
    }

    /// Begin a transaction in the given mode.
    pub async fn transaction_with(&self, mode: TransactionMode) -> Result<Transaction, ClientError> {
        self.check_open()?;
        let session = Arc::clone(&self.session).lock_owned().await;
        if session.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        Transaction::begin(session, self.executor.clone(), mode).await
    }

    /// Check if the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// State of the underlying session.
    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Close the connection.
    ///
    /// Open row streams become invalid. Closing twice is a no-op, and no
    /// operation succeeds afterwards.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::debug!("[CONN] Closing connection to {}", self.endpoint);
        let mut session = self.session.lock().await;
        session.close().await
    }

    fn check_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        Ok(())
    }

    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, Session>, ClientError> {
        self.check_open()?;
        let session = self.session.lock().await;
        // Closed while this caller was queued
        if session.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        Ok(session)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("batch_mode", &self.executor.batch_mode())
            .field("closed", &self.is_closed())
            .finish()
    }
}
