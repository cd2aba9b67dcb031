//! Streamed query results.
//!
//! A cursor response is newline-delimited JSON: a header naming the stream,
//! then one entry per line (`step_begin`, `row`..., `step_end`, or an error
//! entry). [`RowStream`] decodes entries as rows are requested instead of
//! buffering the whole result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;

use crate::error::{ClientError, ProtocolError};
use crate::query::results::{Column, ResultSet, Row};
use crate::transport::codec;
use crate::transport::messages::CursorEntry;
use crate::transport::ByteStream;

/// Splits a chunked body into lines.
struct LineReader {
    stream: ByteStream,
    buffer: BytesMut,
    exhausted: bool,
}

impl LineReader {
    fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
            exhausted: false,
        }
    }

    /// Next non-empty line, or `None` at the end of the body.
    async fn next_line(&mut self) -> Result<Option<BytesMut>, ClientError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let mut line = self.buffer.split_to(pos + 1);
                line.truncate(pos);
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.exhausted {
                if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    self.buffer.clear();
                    return Ok(None);
                }
                let line = self.buffer.split();
                return Ok(Some(line));
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e.into()),
                None => self.exhausted = true,
            }
        }
    }
}

/// Rows of one statement, decoded as they are read.
///
/// The stream is tied to the connection that opened it: once the
/// connection is closed, [`RowStream::next`] fails with
/// [`ClientError::ResultSetInvalidated`].
pub struct RowStream {
    reader: LineReader,
    columns: Arc<[Column]>,
    connection_closed: Arc<AtomicBool>,
    read_timeout: Duration,
    rows_read: usize,
    rows_affected: Option<u64>,
    last_insert_id: Option<i64>,
    finished: bool,
}

impl RowStream {
    /// Read the header and the column list from a cursor body.
    pub(crate) async fn open(
        stream: ByteStream,
        connection_closed: Arc<AtomicBool>,
        read_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut stream = Self {
            reader: LineReader::new(stream),
            columns: Arc::from(Vec::new()),
            connection_closed,
            read_timeout,
            rows_read: 0,
            rows_affected: None,
            last_insert_id: None,
            finished: false,
        };

        let header = stream
            .read_line()
            .await?
            .ok_or_else(|| ProtocolError::Malformed("empty cursor response".to_string()))?;
        codec::decode_cursor_header(&header)?;

        loop {
            match stream.read_entry().await? {
                CursorEntry::StepBegin { cols, .. } => {
                    stream.columns = codec::decode_columns(cols).into();
                    return Ok(stream);
                }
                CursorEntry::StepError { error, .. } | CursorEntry::Error { error } => {
                    return Err(codec::server_error(error));
                }
                CursorEntry::Unknown => continue,
                other => {
                    return Err(ProtocolError::UnexpectedResponse(format!(
                        "cursor entry {:?} before step_begin",
                        other
                    ))
                    .into())
                }
            }
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of rows returned so far.
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Rows changed by the statement, known once the stream is exhausted.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    /// Next row, or `None` after the last one.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ResultSetInvalidated` if the connection was
    /// closed, `ClientError::Statement` if the statement failed partway, and
    /// `ProtocolError::RowArity` for rows that do not match the columns.
    pub async fn next(&mut self) -> Result<Option<Row>, ClientError> {
        if self.connection_closed.load(Ordering::Acquire) {
            return Err(ClientError::ResultSetInvalidated);
        }
        if self.finished {
            return Ok(None);
        }

        loop {
            let entry = match self.read_entry().await {
                Ok(entry) => entry,
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            };
            match entry {
                CursorEntry::Row { row } => {
                    let values = codec::decode_row(self.rows_read, row, self.columns.len())?;
                    self.rows_read += 1;
                    return Ok(Some(Row::new(Arc::clone(&self.columns), values)));
                }
                CursorEntry::StepEnd {
                    affected_row_count,
                    last_insert_rowid,
                } => {
                    self.rows_affected = Some(affected_row_count);
                    self.last_insert_id = last_insert_rowid;
                    self.finished = true;
                    return Ok(None);
                }
                CursorEntry::StepError { error, .. } | CursorEntry::Error { error } => {
                    self.finished = true;
                    return Err(codec::server_error(error));
                }
                CursorEntry::Unknown => continue,
                CursorEntry::StepBegin { .. } => {
                    self.finished = true;
                    return Err(ProtocolError::UnexpectedResponse(
                        "second step_begin in a single-statement cursor".to_string(),
                    )
                    .into());
                }
            }
        }
    }

    /// Read the remaining rows into a buffered result.
    pub async fn collect(mut self) -> Result<ResultSet, ClientError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row.into_values());
        }
        let result = ResultSet::new(self.columns.to_vec(), rows)?
            .with_summary(self.rows_affected.unwrap_or(0), self.last_insert_id);
        Ok(result)
    }

    async fn read_entry(&mut self) -> Result<CursorEntry, ClientError> {
        let line = self.read_line().await?.ok_or_else(|| {
            ProtocolError::Malformed("cursor response ended before the statement finished".to_string())
        })?;
        Ok(codec::decode_cursor_entry(&line)?)
    }

    async fn read_line(&mut self) -> Result<Option<BytesMut>, ClientError> {
        match tokio::time::timeout(self.read_timeout, self.reader.next_line()).await {
            Ok(line) => line,
            Err(_) => {
                log::warn!("[CURSOR] No data within {:?}", self.read_timeout);
                Err(ClientError::Timeout {
                    timeout_ms: self.read_timeout.as_millis() as u64,
                    outcome_unknown: true,
                })
            }
        }
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns.len())
            .field("rows_read", &self.rows_read)
            .field("finished", &self.finished)
            .finish()
    }
}
