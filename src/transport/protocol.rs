//! Transport protocol abstraction trait.
//!
//! This module defines the `TransportProtocol` trait that abstracts the
//! channel requests travel over. The session layer only ever hands it
//! encoded bodies and gets encoded bodies back, so tests can replace the
//! network with a mock.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::connection::params::Endpoint;
use crate::error::TransportError;

/// Body of a streamed response, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Transport protocol trait for server communication.
///
/// Implementations must report failures that happened before anything was
/// sent as [`TransportError::Connect`]; everything else is assumed to have
/// possibly reached the server.
#[async_trait]
pub trait TransportProtocol: Send + Sync {
    /// Prepare a channel to the endpoint.
    ///
    /// Calling `connect` on a connected transport replaces its channel.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the channel cannot be set up.
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// Send one request body to `url` and return the response body.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` for non-success statuses, with the
    /// response body attached.
    async fn round_trip(&mut self, url: &str, body: Bytes) -> Result<Bytes, TransportError>;

    /// Send one request body to `url` and return the response body as a
    /// stream of chunks.
    async fn open_cursor(&mut self, url: &str, body: Bytes) -> Result<ByteStream, TransportError>;

    /// Release the channel.
    ///
    /// Closing an already closed transport is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the transport has a channel.
    fn is_connected(&self) -> bool;
}
