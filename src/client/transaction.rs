//! Interactive transactions.
//!
//! A [`Transaction`] pins its connection's stream: every statement runs on
//! the stream that received `BEGIN`, and if that stream is lost the
//! transaction is over (the server rolls it back when the stream goes away).

use tokio::sync::OwnedMutexGuard;

use crate::connection::session::Session;
use crate::error::{ClientError, ConnectionError, ProtocolError};
use crate::query::executor::{Executor, Retry};
use crate::query::results::{ExecutionOutcome, ResultSet};
use crate::query::statement::Statement;

/// How a transaction acquires its locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionMode {
    /// Locks are taken on first use (`BEGIN DEFERRED`)
    #[default]
    Deferred,
    /// The write lock is taken immediately (`BEGIN IMMEDIATE`)
    Immediate,
    /// Writes are refused (`BEGIN TRANSACTION READONLY`)
    ReadOnly,
}

impl TransactionMode {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionMode::Deferred => "BEGIN DEFERRED",
            TransactionMode::Immediate => "BEGIN IMMEDIATE",
            TransactionMode::ReadOnly => "BEGIN TRANSACTION READONLY",
        }
    }
}

/// An open transaction on a connection.
///
/// The connection is reserved for the transaction until [`commit`],
/// [`rollback`] or drop. Dropping an unfinished transaction discards its
/// stream, which makes the server roll it back.
///
/// [`commit`]: Transaction::commit
/// [`rollback`]: Transaction::rollback
pub struct Transaction {
    session: OwnedMutexGuard<Session>,
    executor: Executor,
    /// Stream generation that received `BEGIN`
    generation: u64,
    finished: bool,
}

impl Transaction {
    pub(crate) async fn begin(
        mut session: OwnedMutexGuard<Session>,
        executor: Executor,
        mode: TransactionMode,
    ) -> Result<Self, ClientError> {
        let begin = Statement::new(mode.begin_sql());
        executor
            .execute_with(&mut session, &begin, Retry::Allowed, executor.deadline())
            .await?;

        if session.baton().is_none() {
            return Err(ProtocolError::UnexpectedResponse(
                "server closed the stream after BEGIN".to_string(),
            )
            .into());
        }

        log::debug!("[TX] Began {:?} transaction on {}", mode, session.endpoint());
        let generation = session.generation();
        Ok(Self {
            session,
            executor,
            generation,
            finished: false,
        })
    }

    /// Execute a statement inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::StreamLost` once the transaction's stream
    /// is gone; the transaction cannot continue after that.
    pub async fn execute(&mut self, statement: impl Into<Statement>) -> Result<ExecutionOutcome, ClientError> {
        let statement = statement.into();
        self.check_stream()?;
        let outcome = self
            .executor
            .execute_with(&mut self.session, &statement, Retry::Never, self.executor.deadline())
            .await?;
        // The statement ran, but the stream may have closed with it.
        self.check_stream()?;
        Ok(outcome)
    }

    /// Execute a statement inside the transaction and return its rows.
    pub async fn query(&mut self, statement: impl Into<Statement>) -> Result<ResultSet, ClientError> {
        match self.execute(statement).await? {
            ExecutionOutcome::Rows(rows) => Ok(rows),
            ExecutionOutcome::Affected(affected) => Ok(ResultSet::from_affected(affected)),
        }
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> Result<(), ClientError> {
        self.finish("COMMIT").await
    }

    /// Roll the transaction back.
    pub async fn rollback(mut self) -> Result<(), ClientError> {
        self.finish("ROLLBACK").await
    }

    /// Whether the stream that received `BEGIN` is still open.
    pub fn is_active(&self) -> bool {
        !self.finished && self.session.generation() == self.generation
    }

    async fn finish(&mut self, sql: &str) -> Result<(), ClientError> {
        self.check_stream()?;
        let result = self
            .executor
            .execute_with(
                &mut self.session,
                &Statement::new(sql),
                Retry::Never,
                self.executor.deadline(),
            )
            .await;
        if result.is_ok() {
            self.finished = true;
            log::debug!("[TX] {} on {}", sql, self.session.endpoint());
        }
        // On failure, drop discards the stream.
        result.map(|_| ())
    }

    fn check_stream(&self) -> Result<(), ClientError> {
        if self.session.generation() != self.generation {
            return Err(ConnectionError::StreamLost {
                code: "STREAM_CLOSED".to_string(),
                message: "the transaction's stream was lost and the server rolled it back".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!(
                "[TX] Transaction on {} dropped without commit or rollback, discarding its stream",
                self.session.endpoint()
            );
            self.session.invalidate_stream();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("generation", &self.generation)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::client::Connection;
    use crate::connection::params::ClientConfig;
    use crate::connection::session::tests::{execute_ok, scripted, to_bytes};
    use crate::error::{ClientError, ConnectionError, ErrorKind, TransportError};
    use serde_json::json;

    fn config() -> ClientConfig {
        ClientConfig::new("http://127.0.0.1:8080")
    }

    #[tokio::test]
    async fn test_statements_share_the_begin_stream() {
        let (mock, recorded) = scripted(vec![
            Ok(execute_ok(Some("b1"), 0)),
            Ok(execute_ok(Some("b2"), 1)),
            Ok(execute_ok(Some("b3"), 0)),
        ]);
        let connection = Connection::with_transport(&config(), Box::new(mock)).unwrap();

        let mut tx = connection.transaction().await.unwrap();
        assert!(tx.is_active());
        tx.execute("INSERT INTO t VALUES (1)").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(recorded.body(0)["requests"][0]["stmt"]["sql"], "BEGIN DEFERRED");
        assert_eq!(recorded.body(1)["baton"], "b1");
        assert_eq!(recorded.body(2)["requests"][0]["stmt"]["sql"], "COMMIT");
        assert_eq!(recorded.body(2)["baton"], "b2");
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_stream() {
        let (mock, recorded) = scripted(vec![Ok(execute_ok(Some("b1"), 0)), Ok(execute_ok(Some("b2"), 1))]);
        let connection = Connection::with_transport(&config(), Box::new(mock)).unwrap();

        {
            let _tx = connection.transaction().await.unwrap();
        }

        connection.execute("SELECT 1").await.unwrap();
        // The next statement starts a new stream
        assert!(recorded.body(1)["baton"].is_null());
    }

    #[tokio::test]
    async fn test_lost_stream_ends_transaction() {
        let (mock, recorded) = scripted(vec![
            Ok(execute_ok(Some("b1"), 0)),
            Err(TransportError::Reset("connection reset by peer".to_string())),
        ]);
        let connection = Connection::with_transport(&config(), Box::new(mock)).unwrap();

        let mut tx = connection.transaction().await.unwrap();
        let err = tx.execute("INSERT INTO t VALUES (1)").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(!tx.is_active());

        // Nothing else is sent on behalf of the lost transaction
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Connection(ConnectionError::StreamLost { .. })
        ));
        assert_eq!(recorded.request_count(), 2);
    }

    #[tokio::test]
    async fn test_statement_error_keeps_transaction_open() {
        let (mock, _) = scripted(vec![
            Ok(execute_ok(Some("b1"), 0)),
            Ok(to_bytes(json!({
                "baton": "b2",
                "base_url": null,
                "results": [{"type": "error", "error": {"message": "no such table: x", "code": "SQLITE_ERROR"}}]
            }))),
            Ok(execute_ok(Some("b3"), 0)),
        ]);
        let connection = Connection::with_transport(&config(), Box::new(mock)).unwrap();

        let mut tx = connection.transaction().await.unwrap();
        let err = tx.execute("SELECT * FROM x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Statement);
        assert!(tx.is_active());
        tx.rollback().await.unwrap();
    }
}
