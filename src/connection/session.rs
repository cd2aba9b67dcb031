//! Session management for a Hrana stream.
//!
//! A [`Session`] owns one transport channel and the stream identity (the
//! baton) the server handed out on the previous response. It is the only
//! place that knows whether the stream is still usable, and it moves
//! through an explicit state machine:
//!
//! ```text
//! Idle -> Connecting -> Ready -> (InFlight -> Ready)* -> Disconnected -> Connecting ...
//!                                                   \-> Closed (terminal)
//! ```
//!
//! Whenever the stream may be out of step with the server (channel lost,
//! request abandoned mid-flight, stream expired, undecodable response) the
//! baton is dropped and the session becomes `Disconnected`. The next
//! request then opens a fresh stream with exactly one reconnect attempt.

use bytes::Bytes;

use crate::connection::params::Endpoint;
use crate::error::{ClientError, ConnectionError, ProtocolError, TransportError};
use crate::transport::codec;
use crate::transport::messages::{Batch, CursorRequest, PipelineRequest, StreamRequest, StreamResult};
use crate::transport::{ByteStream, TransportProtocol};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, never connected
    Idle,
    /// Setting up the channel
    Connecting,
    /// Channel ready, no request outstanding
    Ready,
    /// A request has been handed to the channel
    InFlight,
    /// Channel or stream lost; the next request reconnects
    Disconnected,
    /// Session is closed
    Closed,
}

impl SessionState {
    /// Check if the session is active.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Ready | SessionState::InFlight)
    }
}

/// One logical connection to the server.
pub struct Session {
    endpoint: Endpoint,
    transport: Box<dyn TransportProtocol>,
    state: SessionState,
    /// Stream identity for the next request
    baton: Option<String>,
    /// Stream-specific base URL returned by the server
    base_url: Option<String>,
    /// Incremented every time the stream is discarded
    generation: u64,
    request_count: u64,
    /// Whether the server evaluates `batch` requests, once learned
    server_batches: Option<bool>,
}

impl Session {
    /// Create a session. No I/O happens until the first request.
    pub fn new(endpoint: Endpoint, transport: Box<dyn TransportProtocol>) -> Self {
        Self {
            endpoint,
            transport,
            state: SessionState::Idle,
            baton: None,
            base_url: None,
            generation: 0,
            request_count: 0,
            server_batches: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Baton of the current stream, if one is open.
    pub fn baton(&self) -> Option<&str> {
        self.baton.as_deref()
    }

    /// Identifies the current stream; changes whenever the stream is
    /// discarded.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Whether the server evaluates `batch` requests; `None` until a batch
    /// has been attempted.
    pub fn server_batches(&self) -> Option<bool> {
        self.server_batches
    }

    pub(crate) fn set_server_batches(&mut self, supported: bool) {
        if self.server_batches != Some(supported) {
            log::debug!(
                "[SESSION] {} {} batch requests",
                self.endpoint,
                if supported { "supports" } else { "does not support" }
            );
        }
        self.server_batches = Some(supported);
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Whether a request was handed to the channel and never answered.
    pub fn is_in_flight(&self) -> bool {
        self.state == SessionState::InFlight
    }

    /// Discard the stream so that no later request can reuse it.
    pub fn invalidate_stream(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.baton.is_some() {
            log::debug!("[SESSION] Discarding stream on {}", self.endpoint);
        }
        self.baton = None;
        self.base_url = None;
        self.generation += 1;
        self.state = SessionState::Disconnected;
    }

    /// Bring the channel to `Ready`, reconnecting once if needed.
    async fn ensure_ready(&mut self) -> Result<(), ClientError> {
        match self.state {
            SessionState::Ready => return Ok(()),
            SessionState::Closed => return Err(ConnectionError::Closed.into()),
            SessionState::InFlight | SessionState::Connecting => {
                log::warn!(
                    "[SESSION] Previous request on {} was abandoned, opening a new stream",
                    self.endpoint
                );
                self.invalidate_stream();
            }
            SessionState::Idle | SessionState::Disconnected => {}
        }

        if self.state == SessionState::Disconnected {
            log::debug!("[SESSION] Reconnecting to {}", self.endpoint);
        }
        self.state = SessionState::Connecting;
        match self.transport.connect(&self.endpoint).await {
            Ok(()) => {
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                log::debug!("[SESSION] Connect to {} failed: {}", self.endpoint, e);
                self.state = SessionState::Disconnected;
                Err(e.into())
            }
        }
    }

    /// Send requests on the current stream and return one result per
    /// request.
    ///
    /// Errors reported by the server for individual requests are returned
    /// as results, not as `Err`; only stream-level failures are errors.
    pub async fn send(&mut self, requests: Vec<StreamRequest>) -> Result<Vec<StreamResult>, ClientError> {
        self.ensure_ready().await?;

        let expected = requests.len();
        let body = codec::encode_pipeline(&PipelineRequest {
            baton: self.baton.clone(),
            requests,
        })?;
        let url = self.endpoint.pipeline_url(self.base_url.as_deref());

        let bytes = self.exchange(&url, body).await?;

        let response = match codec::decode_pipeline(&bytes, expected) {
            Ok(response) => response,
            Err(e) => {
                // The server may have advanced the stream; we cannot follow it.
                self.invalidate_stream();
                return Err(e.into());
            }
        };

        self.baton = response.baton;
        if response.base_url.is_some() {
            self.base_url = response.base_url;
        }
        if self.baton.is_none() {
            // Stream closed by the server; the next request opens a new one.
            self.base_url = None;
            self.generation += 1;
        }

        let stream_lost = response.results.iter().any(|r| match r {
            StreamResult::Error { error } => ClientError::is_stream_lost_code(error.code.as_deref()),
            StreamResult::Ok { .. } => false,
        });
        if stream_lost {
            self.invalidate_stream();
        }

        Ok(response.results)
    }

    /// Send a single request.
    pub async fn send_one(&mut self, request: StreamRequest) -> Result<StreamResult, ClientError> {
        let mut results = self.send(vec![request]).await?;
        results
            .pop()
            .ok_or_else(|| ProtocolError::UnexpectedResponse("empty pipeline response".to_string()).into())
    }

    /// Open a cursor over `batch` on a fresh stream.
    ///
    /// The current stream is left untouched, so the session can keep
    /// serving requests while the cursor is being read.
    pub async fn open_cursor(&mut self, batch: Batch) -> Result<ByteStream, ClientError> {
        self.ensure_ready().await?;

        let body = codec::encode_json(&CursorRequest { baton: None, batch })?;
        let url = self.endpoint.cursor_url(None);

        self.state = SessionState::InFlight;
        self.request_count += 1;
        match self.transport.open_cursor(&url, body).await {
            Ok(stream) => {
                self.state = SessionState::Ready;
                Ok(stream)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn exchange(&mut self, url: &str, body: Bytes) -> Result<Bytes, ClientError> {
        self.state = SessionState::InFlight;
        self.request_count += 1;
        log::trace!(
            "[SESSION] Request #{} to {} (stream open: {})",
            self.request_count,
            url,
            self.baton.is_some()
        );

        match self.transport.round_trip(url, body).await {
            Ok(bytes) => {
                self.state = SessionState::Ready;
                Ok(bytes)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, error: TransportError) -> ClientError {
        log::debug!("[SESSION] Request to {} failed: {}", self.endpoint, error);
        // Any failure leaves the server-side stream in an unknown state.
        self.invalidate_stream();
        error.into()
    }

    /// Close the session.
    ///
    /// Sends a best-effort `close` for the open stream, releases the channel
    /// and moves to `Closed`. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        if self.baton.is_some() && self.state == SessionState::Ready {
            if let Err(e) = self.send_one(StreamRequest::Close {}).await {
                log::debug!("[SESSION] Ignoring error while closing stream: {}", e);
            }
        }

        if let Err(e) = self.transport.close().await {
            log::debug!("[SESSION] Ignoring error while releasing channel: {}", e);
        }

        self.baton = None;
        self.base_url = None;
        self.state = SessionState::Closed;
        log::debug!("[SESSION] Closed session to {}", self.endpoint);
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("has_baton", &self.baton.is_some())
            .field("generation", &self.generation)
            .field("request_count", &self.request_count)
            .finish()
    }
}
