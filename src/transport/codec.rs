//! Conversion between client types and Hrana messages.
//!
//! Encoding turns [`Statement`]s into wire statements and request bodies;
//! decoding turns response bodies into [`ExecutionOutcome`]s. Decoding is
//! all-or-nothing: a payload that is malformed anywhere produces a
//! [`ProtocolError`], never a partially filled result.

use bytes::Bytes;

use super::messages::{
    Batch, BatchCond, BatchResult, BatchStep, Col, CursorEntry, CursorResponse, NamedArg,
    PipelineRequest, PipelineResponse, Stmt, StmtResult, StreamRequest, StreamResponse,
    StreamResult, WireError, WireValue,
};
use crate::error::{ClientError, ProtocolError};
use crate::query::results::{AffectedRows, Column, ExecutionOutcome, QueryStats, ResultSet};
use crate::query::statement::{Parameters, Statement};
use crate::types::Value;

/// Encode a statement for the wire.
pub fn encode_stmt(statement: &Statement) -> Stmt {
    let (args, named_args) = match statement.parameters() {
        Parameters::None => (Vec::new(), Vec::new()),
        Parameters::Positional(values) => (
            values.iter().cloned().map(WireValue::from).collect(),
            Vec::new(),
        ),
        Parameters::Named(values) => (
            Vec::new(),
            values
                .iter()
                .map(|(name, value)| NamedArg {
                    name: name.clone(),
                    value: WireValue::from(value.clone()),
                })
                .collect(),
        ),
    };

    Stmt {
        sql: statement.sql().to_string(),
        args,
        named_args,
        want_rows: statement.want_rows(),
    }
}

/// Wrap statements in `BEGIN` / `COMMIT`, each step guarded by the success
/// of the one before it, with a `ROLLBACK` step that runs if the commit
/// did not succeed.
///
/// Step layout: `0` is `BEGIN`, `1..=n` are the statements, `n + 1` is
/// `COMMIT` and `n + 2` is `ROLLBACK`.
pub fn transactional_batch(stmts: Vec<Stmt>) -> Batch {
    let count = stmts.len() as u32;
    let mut steps = Vec::with_capacity(stmts.len() + 3);

    steps.push(BatchStep {
        condition: None,
        stmt: Stmt::plain("BEGIN", false),
    });
    for (i, stmt) in stmts.into_iter().enumerate() {
        steps.push(BatchStep {
            condition: Some(BatchCond::Ok { step: i as u32 }),
            stmt,
        });
    }
    steps.push(BatchStep {
        condition: Some(BatchCond::Ok { step: count }),
        stmt: Stmt::plain("COMMIT", false),
    });
    steps.push(BatchStep {
        condition: Some(BatchCond::Not {
            cond: Box::new(BatchCond::Ok { step: count + 1 }),
        }),
        stmt: Stmt::plain("ROLLBACK", false),
    });

    Batch { steps }
}

/// A batch of a single unconditional step, as used by cursors.
pub fn single_step_batch(stmt: Stmt) -> Batch {
    Batch {
        steps: vec![BatchStep {
            condition: None,
            stmt,
        }],
    }
}

/// Serialize a pipeline request body.
pub fn encode_pipeline(request: &PipelineRequest) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(request)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Parse a pipeline response body, checking it answers every request.
pub fn decode_pipeline(body: &[u8], expected_results: usize) -> Result<PipelineResponse, ProtocolError> {
    let response: PipelineResponse = serde_json::from_slice(body)?;
    if response.results.len() != expected_results {
        return Err(ProtocolError::UnexpectedResponse(format!(
            "expected {} results, got {}",
            expected_results,
            response.results.len()
        )));
    }
    Ok(response)
}

/// Serialize any request body (cursor requests included).
pub fn encode_json<T: serde::Serialize>(body: &T) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Parse the header line of a cursor response.
pub fn decode_cursor_header(line: &[u8]) -> Result<CursorResponse, ProtocolError> {
    Ok(serde_json::from_slice(line)?)
}

/// Parse one entry line of a cursor response.
pub fn decode_cursor_entry(line: &[u8]) -> Result<CursorEntry, ProtocolError> {
    Ok(serde_json::from_slice(line)?)
}

/// Unwrap a stream result, checking it answers a request of type `expected`.
///
/// Error results are classified with [`ClientError::from_server`].
pub fn expect_response(result: StreamResult, expected: &'static str) -> Result<StreamResponse, ClientError> {
    match result {
        StreamResult::Ok { response } if response.kind() == expected => Ok(response),
        StreamResult::Ok { response } => Err(ProtocolError::UnexpectedResponse(format!(
            "expected a '{}' response, got '{}'",
            expected,
            response.kind()
        ))
        .into()),
        StreamResult::Error { error } => Err(server_error(error)),
    }
}

/// Classify an error reported by the server.
pub fn server_error(error: WireError) -> ClientError {
    ClientError::from_server(error.code, error.message)
}

/// Convert wire columns, keeping names and declared types verbatim.
pub fn decode_columns(cols: Vec<Col>) -> Vec<Column> {
    cols.into_iter()
        .map(|c| Column::new(c.name.unwrap_or_default(), c.decltype))
        .collect()
}

/// Convert one wire row, checking it has one value per column.
pub fn decode_row(row: usize, values: Vec<WireValue>, expected: usize) -> Result<Vec<Value>, ProtocolError> {
    if values.len() != expected {
        return Err(ProtocolError::RowArity {
            row,
            expected,
            actual: values.len(),
        });
    }
    Ok(values.into_iter().map(Value::from).collect())
}

/// Convert a statement result into an outcome.
///
/// Results with at least one column become [`ExecutionOutcome::Rows`];
/// everything else is an [`ExecutionOutcome::Affected`] summary.
pub fn decode_stmt_result(result: StmtResult) -> Result<ExecutionOutcome, ProtocolError> {
    let stats = QueryStats {
        rows_read: result.rows_read,
        rows_written: result.rows_written,
        query_duration_ms: result.query_duration_ms,
    };

    if result.cols.is_empty() {
        if let Some(row) = result.rows.iter().position(|r| !r.is_empty()) {
            return Err(ProtocolError::RowArity {
                row,
                expected: 0,
                actual: result.rows[row].len(),
            });
        }
        return Ok(ExecutionOutcome::Affected(AffectedRows {
            rows_affected: result.affected_row_count,
            last_insert_id: result.last_insert_rowid,
            stats,
        }));
    }

    let columns = decode_columns(result.cols);
    let expected = columns.len();
    let rows = result
        .rows
        .into_iter()
        .enumerate()
        .map(|(i, values)| decode_row(i, values, expected))
        .collect::<Result<Vec<_>, _>>()?;

    let result_set = ResultSet::new(columns, rows)?
        .with_summary(result.affected_row_count, result.last_insert_rowid)
        .with_stats(stats);
    Ok(ExecutionOutcome::Rows(result_set))
}

/// Decode the result of a [`transactional_batch`] of `count` statements.
///
/// The first failing statement is reported as
/// [`ClientError::Batch`] with its index; a failed `COMMIT` is reported at
/// index `count`. A failed `BEGIN` is returned as the server reported it,
/// since no statement of the batch ran.
pub fn decode_transactional_batch(result: BatchResult, count: usize) -> Result<Vec<ExecutionOutcome>, ClientError> {
    let steps = count + 3;
    if result.step_results.len() != steps || result.step_errors.len() != steps {
        return Err(ProtocolError::UnexpectedResponse(format!(
            "batch of {} steps answered with {} results and {} errors",
            steps,
            result.step_results.len(),
            result.step_errors.len()
        ))
        .into());
    }

    let mut results = result.step_results.into_iter();
    let mut errors = result.step_errors.into_iter();

    // BEGIN
    results.next();
    if let Some(Some(error)) = errors.next() {
        return Err(server_error(error));
    }

    let mut outcomes = Vec::with_capacity(count);
    for index in 0..count {
        let step_result = results.next().flatten();
        let step_error = errors.next().flatten();
        match (step_result, step_error) {
            (_, Some(error)) => return Err(batch_failure(index, server_error(error))),
            (Some(result), None) => outcomes.push(decode_stmt_result(result)?),
            (None, None) => {
                return Err(batch_failure(
                    index,
                    ProtocolError::UnexpectedResponse(format!("batch step {} did not run", index + 1)).into(),
                ))
            }
        }
    }

    let commit_result = results.next().flatten();
    let commit_error = errors.next().flatten();
    match (commit_result, commit_error) {
        (_, Some(error)) => Err(batch_failure(count, server_error(error))),
        (Some(_), None) => Ok(outcomes),
        (None, None) => Err(batch_failure(
            count,
            ProtocolError::UnexpectedResponse("COMMIT did not run".to_string()).into(),
        )),
    }
}

/// Wrap an error as the failure of batch statement `failed_index`.
pub fn batch_failure(failed_index: usize, source: ClientError) -> ClientError {
    ClientError::Batch {
        failed_index,
        source: Box::new(source),
    }
}

/// Build a single-request pipeline body.
pub fn pipeline(baton: Option<String>, request: StreamRequest) -> PipelineRequest {
    PipelineRequest {
        baton,
        requests: vec![request],
    }
}
