//! Statement execution policy.
//!
//! The [`Executor`] turns statements into stream requests, sends them
//! through a [`Session`] and decodes what comes back. It owns the two
//! policies that sit above the session state machine: the deadline of each
//! call and the single retry of requests that never left the client. A
//! batch is one call, so every request it sends shares one deadline.

use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use crate::connection::params::BatchMode;
use crate::connection::session::Session;
use crate::error::{BindingError, ClientError, ConnectionError, ProtocolError};
use crate::query::results::{Column, Description, ExecutionOutcome};
use crate::query::statement::{Statement, StatementType};
use crate::transport::codec;
use crate::transport::messages::{Stmt, StreamRequest, StreamResponse, StreamResult};
use crate::transport::ByteStream;

/// Whether a failed request may be sent again on a new stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retry {
    /// Statement does not depend on the stream it runs on
    Allowed,
    /// Statement belongs to a transaction pinned to the current stream
    Never,
}

/// Executes statements on a session.
#[derive(Debug, Clone)]
pub struct Executor {
    timeout: Duration,
    batch_mode: BatchMode,
}

impl Executor {
    pub fn new(timeout: Duration, batch_mode: BatchMode) -> Self {
        Self { timeout, batch_mode }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn batch_mode(&self) -> BatchMode {
        self.batch_mode
    }

    /// Deadline for a call starting now.
    pub(crate) fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    /// Execute one statement.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Timeout` if no response arrived in time,
    /// `ClientError::Statement` if the server rejected the statement, and
    /// connection or protocol errors for failures of the exchange itself.
    pub async fn execute(&self, session: &mut Session, statement: &Statement) -> Result<ExecutionOutcome, ClientError> {
        self.execute_with(session, statement, Retry::Allowed, self.deadline())
            .await
    }

    pub(crate) async fn execute_with(
        &self,
        session: &mut Session,
        statement: &Statement,
        retry: Retry,
        deadline: Instant,
    ) -> Result<ExecutionOutcome, ClientError> {
        log::debug!("[EXEC] {:?}: {}", statement.statement_type(), statement.sql());
        let request = StreamRequest::Execute {
            stmt: codec::encode_stmt(statement),
        };
        let result = self.send_one(session, request, retry, deadline).await?;
        match codec::expect_response(result, "execute")? {
            StreamResponse::Execute { result } => Ok(codec::decode_stmt_result(result)?),
            other => Err(unexpected("execute", &other)),
        }
    }

    /// Execute statements atomically.
    ///
    /// Statements run in order inside one transaction; the first failure
    /// stops the batch and rolls it back. An empty batch returns without
    /// contacting the server. The timeout covers the whole batch.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Batch` naming the index of the statement that
    /// failed (`statements.len()` if the commit failed), or
    /// `BindingError::TransactionControlInBatch` if a statement would
    /// interfere with the surrounding transaction. Failures that no
    /// statement can be blamed for, such as a rejected `BEGIN`, are
    /// returned unwrapped.
    pub async fn execute_batch(
        &self,
        session: &mut Session,
        statements: &[Statement],
    ) -> Result<Vec<ExecutionOutcome>, ClientError> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(index) = statements
            .iter()
            .position(|s| s.statement_type() == StatementType::Transaction)
        {
            return Err(BindingError::TransactionControlInBatch { index }.into());
        }

        log::debug!(
            "[EXEC] Batch of {} statements ({:?} mode)",
            statements.len(),
            self.batch_mode
        );
        let deadline = self.deadline();
        match self.batch_mode {
            BatchMode::Server => self.server_batch(session, statements, deadline).await,
            BatchMode::Emulated => self.emulated_batch(session, statements, deadline).await,
            BatchMode::Auto => self.negotiated_batch(session, statements, deadline).await,
        }
    }

    /// Try a server batch unless the server already rejected one, and fall
    /// back to emulation when it does.
    async fn negotiated_batch(
        &self,
        session: &mut Session,
        statements: &[Statement],
        deadline: Instant,
    ) -> Result<Vec<ExecutionOutcome>, ClientError> {
        match session.server_batches() {
            Some(true) => return self.server_batch(session, statements, deadline).await,
            Some(false) => return self.emulated_batch(session, statements, deadline).await,
            None => {}
        }

        match self.server_batch(session, statements, deadline).await {
            Err(e) if rejects_batches(&e) => {
                log::warn!(
                    "[EXEC] {} rejected a batch request, emulating batches from now on: {}",
                    session.endpoint(),
                    e
                );
                session.set_server_batches(false);
                self.emulated_batch(session, statements, deadline).await
            }
            result => {
                if matches!(result, Ok(_) | Err(ClientError::Batch { .. })) {
                    session.set_server_batches(true);
                }
                result
            }
        }
    }

    async fn server_batch(
        &self,
        session: &mut Session,
        statements: &[Statement],
        deadline: Instant,
    ) -> Result<Vec<ExecutionOutcome>, ClientError> {
        let stmts = statements.iter().map(codec::encode_stmt).collect();
        let request = StreamRequest::Batch {
            batch: codec::transactional_batch(stmts),
        };
        let result = self.send_one(session, request, Retry::Allowed, deadline).await?;
        match codec::expect_response(result, "batch")? {
            StreamResponse::Batch { result } => codec::decode_transactional_batch(result, statements.len()),
            other => Err(unexpected("batch", &other)),
        }
    }

    /// Run the batch as separate requests on one stream, for servers that
    /// do not evaluate batch requests.
    async fn emulated_batch(
        &self,
        session: &mut Session,
        statements: &[Statement],
        deadline: Instant,
    ) -> Result<Vec<ExecutionOutcome>, ClientError> {
        self.control(session, "BEGIN", Retry::Allowed, deadline).await?;
        let generation = session.generation();
        if session.baton().is_none() {
            return Err(stream_lost("the server did not keep the stream open"));
        }

        let mut outcomes = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            match self.execute_with(session, statement, Retry::Never, deadline).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    self.abort(session, generation, deadline).await;
                    return Err(codec::batch_failure(index, e));
                }
            }
            if session.generation() != generation {
                return Err(codec::batch_failure(
                    index,
                    stream_lost("the stream closed before the batch finished"),
                ));
            }
        }

        if let Err(e) = self.control(session, "COMMIT", Retry::Never, deadline).await {
            self.abort(session, generation, deadline).await;
            return Err(codec::batch_failure(statements.len(), e));
        }
        Ok(outcomes)
    }

    /// Best-effort `ROLLBACK` after a failed emulated batch step.
    async fn abort(&self, session: &mut Session, generation: u64, deadline: Instant) {
        if session.generation() != generation {
            // The stream is gone; the server rolls back on its own.
            return;
        }
        if let Err(e) = self.control(session, "ROLLBACK", Retry::Never, deadline).await {
            log::debug!("[EXEC] Rollback failed, discarding stream: {}", e);
            session.invalidate_stream();
        }
    }

    async fn control(&self, session: &mut Session, sql: &str, retry: Retry, deadline: Instant) -> Result<(), ClientError> {
        let request = StreamRequest::Execute {
            stmt: Stmt::plain(sql, false),
        };
        let result = self.send_one(session, request, retry, deadline).await?;
        codec::expect_response(result, "execute")?;
        Ok(())
    }

    /// Run several `;`-separated statements, discarding their results.
    pub async fn execute_script(&self, session: &mut Session, sql: &str) -> Result<(), ClientError> {
        log::debug!("[EXEC] Script of {} bytes", sql.len());
        let request = StreamRequest::Sequence { sql: sql.to_string() };
        let result = self
            .send_one(session, request, Retry::Allowed, self.deadline())
            .await?;
        codec::expect_response(result, "sequence")?;
        Ok(())
    }

    /// Whether the stream is outside an explicit transaction.
    pub async fn is_autocommit(&self, session: &mut Session) -> Result<bool, ClientError> {
        let result = self
            .send_one(session, StreamRequest::GetAutocommit {}, Retry::Never, self.deadline())
            .await?;
        match codec::expect_response(result, "get_autocommit")? {
            StreamResponse::GetAutocommit { is_autocommit } => Ok(is_autocommit),
            other => Err(unexpected("get_autocommit", &other)),
        }
    }

    /// Ask the server to analyze a statement without running it.
    pub async fn describe(&self, session: &mut Session, sql: &str) -> Result<Description, ClientError> {
        let request = StreamRequest::Describe { sql: sql.to_string() };
        let result = self
            .send_one(session, request, Retry::Allowed, self.deadline())
            .await?;
        match codec::expect_response(result, "describe")? {
            StreamResponse::Describe { result } => Ok(Description {
                params: result.params.into_iter().map(|p| p.name).collect(),
                columns: result
                    .cols
                    .into_iter()
                    .map(|c| Column::new(c.name, c.decltype))
                    .collect(),
                is_explain: result.is_explain,
                is_readonly: result.is_readonly,
            }),
            other => Err(unexpected("describe", &other)),
        }
    }

    /// Open a cursor over one statement.
    ///
    /// The deadline covers the request until the response headers arrive;
    /// reading the body is bounded by the stream itself.
    pub async fn open_cursor(&self, session: &mut Session, statement: &Statement) -> Result<ByteStream, ClientError> {
        log::debug!("[EXEC] Cursor: {}", statement.sql());
        let batch = codec::single_step_batch(codec::encode_stmt(statement));
        let deadline = self.deadline();
        let mut retried = false;
        loop {
            match timeout_at(deadline, session.open_cursor(batch.clone())).await {
                Err(_) => return Err(self.expired(session)),
                Ok(Err(e)) if !retried && is_pre_send(&e) => {
                    log::debug!("[EXEC] Cursor request was not sent, retrying once: {}", e);
                    retried = true;
                }
                Ok(result) => return result,
            }
        }
    }

    async fn send_one(
        &self,
        session: &mut Session,
        request: StreamRequest,
        retry: Retry,
        deadline: Instant,
    ) -> Result<StreamResult, ClientError> {
        let mut retried = retry == Retry::Never;
        loop {
            match timeout_at(deadline, session.send_one(request.clone())).await {
                Err(_) => return Err(self.expired(session)),
                Ok(Err(e)) if !retried && is_pre_send(&e) => {
                    log::debug!("[EXEC] Request was not sent, retrying once: {}", e);
                    retried = true;
                }
                Ok(result) => return result,
            }
        }
    }

    /// Abandon the outstanding request after the deadline passed.
    fn expired(&self, session: &mut Session) -> ClientError {
        let outcome_unknown = session.is_in_flight();
        log::warn!(
            "[EXEC] Request to {} timed out after {:?} (sent: {})",
            session.endpoint(),
            self.timeout,
            outcome_unknown
        );
        // A late response must never be matched to a later request.
        session.invalidate_stream();
        ClientError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
            outcome_unknown,
        }
    }
}

fn is_pre_send(error: &ClientError) -> bool {
    matches!(error, ClientError::Connection(ConnectionError::ConnectFailed { .. }))
}

/// Whether a failed `batch` request shows that the server does not evaluate
/// batches. These answers come back before any step runs.
fn rejects_batches(error: &ClientError) -> bool {
    matches!(error, ClientError::Protocol(_) | ClientError::Statement(_))
}

fn stream_lost(message: &str) -> ClientError {
    ConnectionError::StreamLost {
        code: "STREAM_CLOSED".to_string(),
        message: message.to_string(),
    }
    .into()
}

fn unexpected(expected: &str, response: &StreamResponse) -> ClientError {
    ProtocolError::UnexpectedResponse(format!(
        "expected a '{}' response, got '{}'",
        expected,
        response.kind()
    ))
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::params::Endpoint;
    use crate::connection::session::tests::{endpoint, execute_ok, scripted, to_bytes};
    use crate::error::{ErrorKind, TransportError};
    use crate::transport::TransportProtocol;
    use crate::types::Value;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;

    fn executor(mode: BatchMode) -> Executor {
        Executor::new(Duration::from_secs(5), mode)
    }

    fn ok_execute(baton: Option<&str>) -> serde_json::Value {
        json!({
            "baton": baton,
            "base_url": null,
            "results": [{
                "type": "ok",
                "response": {
                    "type": "execute",
                    "result": {"cols": [], "rows": [], "affected_row_count": 1, "last_insert_rowid": null}
                }
            }]
        })
    }

    fn error_result(baton: Option<&str>, message: &str) -> serde_json::Value {
        json!({
            "baton": baton,
            "base_url": null,
            "results": [{"type": "error", "error": {"message": message, "code": "SQLITE_CONSTRAINT"}}]
        })
    }

    fn inserts() -> Vec<Statement> {
        vec![
            Statement::new("INSERT INTO t VALUES (1)"),
            Statement::new("INSERT INTO t VALUES (1)"),
            Statement::new("INSERT INTO t VALUES (2)"),
        ]
    }

    /// Transport that accepts requests and never answers them.
    struct SilentTransport;

    #[async_trait]
    impl TransportProtocol for SilentTransport {
        async fn connect(&mut self, _endpoint: &Endpoint) -> Result<(), TransportError> {
            Ok(())
        }

        async fn round_trip(&mut self, _url: &str, _body: Bytes) -> Result<Bytes, TransportError> {
            std::future::pending().await
        }

        async fn open_cursor(&mut self, _url: &str, _body: Bytes) -> Result<ByteStream, TransportError> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    /// Transport that answers every request after `SLOW_RESPONSE`.
    struct SlowTransport;

    const SLOW_RESPONSE: Duration = Duration::from_millis(300);

    #[async_trait]
    impl TransportProtocol for SlowTransport {
        async fn connect(&mut self, _endpoint: &Endpoint) -> Result<(), TransportError> {
            Ok(())
        }

        async fn round_trip(&mut self, _url: &str, _body: Bytes) -> Result<Bytes, TransportError> {
            tokio::time::sleep(SLOW_RESPONSE).await;
            Ok(to_bytes(ok_execute(Some("b1"))))
        }

        async fn open_cursor(&mut self, _url: &str, _body: Bytes) -> Result<ByteStream, TransportError> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_execute_select() {
        let (mock, _) = scripted(vec![Ok(execute_ok(Some("b1"), 1))]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let outcome = executor(BatchMode::Server)
            .execute(&mut session, &Statement::new("SELECT 1"))
            .await
            .unwrap();

        let rs = outcome.into_result_set().unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.columns().len(), 1);
        assert_eq!(rs.rows()[0].value(0).unwrap(), &Value::Integer(1));
    }

    #[tokio::test]
    async fn test_execute_statement_error() {
        let (mock, _) = scripted(vec![Ok(to_bytes(error_result(Some("b1"), "UNIQUE constraint failed")))]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let err = executor(BatchMode::Server)
            .execute(&mut session, &Statement::new("INSERT INTO t VALUES (1)"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Statement);
        assert_eq!(err.code(), Some("SQLITE_CONSTRAINT"));
        // The stream survives statement errors
        assert_eq!(session.baton(), Some("b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_drops_stream() {
        let mut session = Session::new(endpoint(), Box::new(SilentTransport));
        let exec = Executor::new(Duration::from_millis(200), BatchMode::Server);

        let err = exec
            .execute(&mut session, &Statement::new("SELECT 1"))
            .await
            .unwrap_err();

        match err {
            ClientError::Timeout {
                timeout_ms,
                outcome_unknown,
            } => {
                assert_eq!(timeout_ms, 200);
                assert!(outcome_unknown);
            }
            other => panic!("expected a timeout, got {:?}", other),
        }
        assert!(!session.is_in_flight());
        assert!(session.baton().is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_is_retried_once() {
        let (mock, recorded) = scripted(vec![
            Err(TransportError::Connect {
                endpoint: "127.0.0.1:8080".to_string(),
                message: "connection refused".to_string(),
            }),
            Ok(execute_ok(Some("b1"), 7)),
        ]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let outcome = executor(BatchMode::Server)
            .execute(&mut session, &Statement::new("SELECT 7"))
            .await
            .unwrap();

        assert_eq!(outcome.result_set().unwrap().rows()[0].get::<i64>(0).unwrap(), 7);
        assert_eq!(recorded.request_count(), 2);
    }

    #[tokio::test]
    async fn test_second_connect_failure_is_surfaced() {
        let refused = || TransportError::Connect {
            endpoint: "127.0.0.1:8080".to_string(),
            message: "connection refused".to_string(),
        };
        let (mock, recorded) = scripted(vec![Err(refused()), Err(refused()), Ok(execute_ok(None, 1))]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let err = executor(BatchMode::Server)
            .execute(&mut session, &Statement::new("SELECT 1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(recorded.request_count(), 2);
    }

    #[tokio::test]
    async fn test_reset_after_send_is_not_retried() {
        let (mock, recorded) = scripted(vec![
            Err(TransportError::Reset("connection reset by peer".to_string())),
            Ok(execute_ok(None, 1)),
        ]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let err = executor(BatchMode::Server)
            .execute(&mut session, &Statement::new("INSERT INTO t VALUES (1)"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(recorded.request_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let (mock, recorded) = scripted(vec![]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let outcomes = executor(BatchMode::Server)
            .execute_batch(&mut session, &[])
            .await
            .unwrap();

        assert!(outcomes.is_empty());
        assert_eq!(recorded.request_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_rejects_transaction_control() {
        let (mock, recorded) = scripted(vec![]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let err = executor(BatchMode::Server)
            .execute_batch(
                &mut session,
                &[Statement::new("INSERT INTO t VALUES (1)"), Statement::new("COMMIT")],
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Binding(BindingError::TransactionControlInBatch { index: 1 })
        ));
        assert_eq!(recorded.request_count(), 0);
    }

    #[tokio::test]
    async fn test_server_batch_failure_index() {
        let step_ok = json!({"cols": [], "rows": [], "affected_row_count": 1, "last_insert_rowid": null});
        let begin_ok = json!({"cols": [], "rows": [], "affected_row_count": 0, "last_insert_rowid": null});
        let response = json!({
            "baton": "b1",
            "base_url": null,
            "results": [{
                "type": "ok",
                "response": {
                    "type": "batch",
                    "result": {
                        "step_results": [begin_ok.clone(), step_ok, null, null, null, begin_ok],
                        "step_errors": [
                            null,
                            null,
                            {"message": "UNIQUE constraint failed: t.id", "code": "SQLITE_CONSTRAINT"},
                            null,
                            null,
                            null
                        ]
                    }
                }
            }]
        });
        let (mock, recorded) = scripted(vec![Ok(to_bytes(response))]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let err = executor(BatchMode::Server)
            .execute_batch(&mut session, &inserts())
            .await
            .unwrap_err();

        match err {
            ClientError::Batch { failed_index, source } => {
                assert_eq!(failed_index, 1);
                assert_eq!(source.kind(), ErrorKind::Statement);
            }
            other => panic!("expected a batch error, got {:?}", other),
        }

        let body = recorded.body(0);
        assert_eq!(body["requests"][0]["type"], "batch");
        let steps = body["requests"][0]["batch"]["steps"].as_array().unwrap().len();
        assert_eq!(steps, 6);
    }

    #[tokio::test]
    async fn test_emulated_batch_stops_at_failure() {
        let (mock, recorded) = scripted(vec![
            Ok(to_bytes(ok_execute(Some("b1")))), // BEGIN
            Ok(to_bytes(ok_execute(Some("b2")))), // statement 0
            Ok(to_bytes(error_result(Some("b3"), "UNIQUE constraint failed"))), // statement 1
            Ok(to_bytes(ok_execute(Some("b4")))), // ROLLBACK
        ]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let err = executor(BatchMode::Emulated)
            .execute_batch(&mut session, &inserts())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Batch { failed_index: 1, .. }));
        assert_eq!(recorded.request_count(), 4);
        assert_eq!(recorded.body(0)["requests"][0]["stmt"]["sql"], "BEGIN");
        assert_eq!(recorded.body(3)["requests"][0]["stmt"]["sql"], "ROLLBACK");
        assert_eq!(recorded.body(3)["baton"], "b3");
        // The third statement never ran
        let sent: Vec<String> = (0..4)
            .map(|i| recorded.body(i)["requests"][0]["stmt"]["sql"].as_str().unwrap().to_string())
            .collect();
        assert!(!sent.contains(&"INSERT INTO t VALUES (2)".to_string()));
    }

    #[tokio::test]
    async fn test_emulated_batch_commits() {
        let (mock, recorded) = scripted(vec![
            Ok(to_bytes(ok_execute(Some("b1")))),
            Ok(to_bytes(ok_execute(Some("b2")))),
            Ok(to_bytes(ok_execute(Some("b3")))),
        ]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let outcomes = executor(BatchMode::Emulated)
            .execute_batch(&mut session, &[Statement::new("INSERT INTO t VALUES (1)")])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].rows_affected(), 1);
        assert_eq!(recorded.body(2)["requests"][0]["stmt"]["sql"], "COMMIT");
    }

    #[tokio::test]
    async fn test_emulated_commit_failure_reports_len() {
        let (mock, _) = scripted(vec![
            Ok(to_bytes(ok_execute(Some("b1")))),
            Ok(to_bytes(ok_execute(Some("b2")))),
            Ok(to_bytes(error_result(Some("b3"), "FOREIGN KEY constraint failed"))),
            Ok(to_bytes(ok_execute(Some("b4")))),
        ]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let err = executor(BatchMode::Emulated)
            .execute_batch(&mut session, &[Statement::new("INSERT INTO t VALUES (1)")])
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Batch { failed_index: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_deadline_spans_all_statements() {
        let mut session = Session::new(endpoint(), Box::new(SlowTransport));
        let exec = Executor::new(Duration::from_millis(500), BatchMode::Emulated);
        let start = Instant::now();

        // BEGIN and statement 0 take 300ms each, so statement 0 misses the deadline
        let err = exec.execute_batch(&mut session, &inserts()).await.unwrap_err();

        match err {
            ClientError::Batch { failed_index, source } => {
                assert_eq!(failed_index, 0);
                assert_eq!(source.kind(), ErrorKind::Timeout);
            }
            other => panic!("expected a batch error, got {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_millis(600));
        assert!(session.baton().is_none());
    }

    #[tokio::test]
    async fn test_emulated_begin_failure_is_not_blamed_on_a_statement() {
        let (mock, recorded) = scripted(vec![Ok(to_bytes(error_result(None, "database is locked")))]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let err = executor(BatchMode::Emulated)
            .execute_batch(&mut session, &inserts())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Statement);
        assert_eq!(recorded.request_count(), 1);
    }

    #[tokio::test]
    async fn test_auto_batch_falls_back_to_emulation() {
        let (mock, recorded) = scripted(vec![
            Err(TransportError::Http {
                status: 500,
                body: "not implemented".to_string(),
            }),
            Ok(to_bytes(ok_execute(Some("b1")))), // BEGIN
            Ok(to_bytes(ok_execute(Some("b2")))),
            Ok(to_bytes(ok_execute(Some("b3")))), // COMMIT
            Ok(to_bytes(ok_execute(Some("b4")))), // BEGIN of the second batch
            Ok(to_bytes(ok_execute(Some("b5")))),
            Ok(to_bytes(ok_execute(Some("b6")))), // COMMIT
        ]);
        let mut session = Session::new(endpoint(), Box::new(mock));
        let exec = executor(BatchMode::Auto);
        let batch = [Statement::new("INSERT INTO t VALUES (1)")];

        let outcomes = exec.execute_batch(&mut session, &batch).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(session.server_batches(), Some(false));
        assert_eq!(recorded.body(0)["requests"][0]["type"], "batch");
        assert_eq!(recorded.body(1)["requests"][0]["stmt"]["sql"], "BEGIN");
        assert_eq!(recorded.body(3)["requests"][0]["stmt"]["sql"], "COMMIT");

        // The rejection is remembered
        exec.execute_batch(&mut session, &batch).await.unwrap();
        assert_eq!(recorded.request_count(), 7);
        assert_eq!(recorded.body(4)["requests"][0]["stmt"]["sql"], "BEGIN");
    }

    #[tokio::test]
    async fn test_auto_batch_does_not_fall_back_after_reset() {
        let (mock, recorded) = scripted(vec![Err(TransportError::Reset("connection reset by peer".to_string()))]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let err = executor(BatchMode::Auto)
            .execute_batch(&mut session, &inserts())
            .await
            .unwrap_err();

        // The batch may have committed before the reset
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(recorded.request_count(), 1);
        assert_eq!(session.server_batches(), None);
    }

    #[tokio::test]
    async fn test_describe() {
        let response = json!({
            "baton": "b1",
            "base_url": null,
            "results": [{
                "type": "ok",
                "response": {
                    "type": "describe",
                    "result": {
                        "params": [{"name": ":id"}, {"name": null}],
                        "cols": [{"name": "name", "decltype": "TEXT"}],
                        "is_explain": false,
                        "is_readonly": true
                    }
                }
            }]
        });
        let (mock, _) = scripted(vec![Ok(to_bytes(response))]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let description = executor(BatchMode::Server)
            .describe(&mut session, "SELECT name FROM t WHERE id = :id AND x = ?")
            .await
            .unwrap();

        assert_eq!(description.params, vec![Some(":id".to_string()), None]);
        assert_eq!(description.columns[0].decltype.as_deref(), Some("TEXT"));
        assert!(description.is_readonly);
    }

    #[tokio::test]
    async fn test_is_autocommit_and_script() {
        let (mock, recorded) = scripted(vec![
            Ok(to_bytes(json!({
                "baton": "b1",
                "base_url": null,
                "results": [{"type": "ok", "response": {"type": "sequence"}}]
            }))),
            Ok(to_bytes(json!({
                "baton": "b2",
                "base_url": null,
                "results": [{"type": "ok", "response": {"type": "get_autocommit", "is_autocommit": true}}]
            }))),
        ]);
        let mut session = Session::new(endpoint(), Box::new(mock));
        let exec = executor(BatchMode::Server);

        exec.execute_script(&mut session, "CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1);")
            .await
            .unwrap();
        assert!(exec.is_autocommit(&mut session).await.unwrap());

        assert_eq!(recorded.body(0)["requests"][0]["type"], "sequence");
        assert_eq!(recorded.body(1)["requests"][0]["type"], "get_autocommit");
        assert_eq!(recorded.body(1)["baton"], "b1");
    }

    #[tokio::test]
    async fn test_mismatched_response_type() {
        let (mock, _) = scripted(vec![Ok(to_bytes(json!({
            "baton": "b1",
            "base_url": null,
            "results": [{"type": "ok", "response": {"type": "sequence"}}]
        })))]);
        let mut session = Session::new(endpoint(), Box::new(mock));

        let err = executor(BatchMode::Server)
            .execute(&mut session, &Statement::new("SELECT 1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
