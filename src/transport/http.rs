//! HTTP transport implementation.
//!
//! Requests are `POST`ed as JSON with `reqwest`. Each request is
//! self-contained, so "connecting" builds the HTTP client (and its
//! connection pool) without touching the network; an unreachable server
//! shows up on the first request as [`TransportError::Connect`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;

use super::protocol::{ByteStream, TransportProtocol};
use crate::connection::auth::AuthToken;
use crate::connection::params::Endpoint;
use crate::error::TransportError;

/// Default limit for establishing a TCP/TLS connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP transport implementation.
pub struct HttpTransport {
    /// HTTP client (None if not connected)
    client: Option<reqwest::Client>,
    /// Token attached to every request
    auth_token: Option<AuthToken>,
    connect_timeout: Duration,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new() -> Self {
        Self {
            client: None,
            auth_token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the limit for establishing a connection.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Post a body and return the response once the status is known.
    async fn post(&self, url: &str, body: Bytes) -> Result<reqwest::Response, TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::Closed)?;

        let mut request = client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(body);
        if let Some(token) = &self.auth_token {
            request = token.apply(request);
        }

        let start = std::time::Instant::now();
        let response = request.send().await?;
        let status = response.status();
        log::trace!(
            "[HTTP] POST {} -> {} in {:?}",
            url,
            status,
            start.elapsed()
        );

        if status == StatusCode::GATEWAY_TIMEOUT {
            log::debug!("[HTTP] POST {} timed out at a gateway", url);
            return Err(TransportError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }
        if !status.is_success() {
            let body = response.text().await.map_err(|e| {
                log::debug!("[HTTP] POST {} failed with status {}, body unreadable: {}", url, status, e);
                TransportError::Reset(format!("HTTP {} with an unreadable body: {}", status.as_u16(), e))
            })?;
            log::debug!("[HTTP] POST {} failed with status {}: {}", url, status, body);
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportProtocol for HttpTransport {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("hrana-client/", env!("CARGO_PKG_VERSION")));
        if endpoint.use_tls() {
            builder = builder.https_only(true);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        log::debug!("[HTTP] Channel ready for {}", endpoint);
        self.client = Some(client);
        self.auth_token = endpoint.auth_token().cloned();
        Ok(())
    }

    async fn round_trip(&mut self, url: &str, body: Bytes) -> Result<Bytes, TransportError> {
        let response = self.post(url, body).await?;
        Ok(response.bytes().await?)
    }

    async fn open_cursor(&mut self, url: &str, body: Bytes) -> Result<ByteStream, TransportError> {
        let response = self.post(url, body).await?;
        Ok(response
            .bytes_stream()
            .map_err(TransportError::from)
            .boxed())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.client.take().is_some() {
            log::debug!("[HTTP] Channel released");
        }
        self.auth_token = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }
}
