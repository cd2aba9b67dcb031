//! Transport layer for Hrana over HTTP.
//!
//! # Architecture
//!
//! The transport layer is organized into:
//! - `protocol` - Transport protocol trait definition
//! - `messages` - Hrana message types
//! - `codec` - Conversion between client types and messages
//! - `http` - reqwest-based transport implementation
//!
//! # Example
//!
//! ```no_run
//! use hrana_client::connection::Endpoint;
//! use hrana_client::transport::{codec, messages::StreamRequest, HttpTransport, TransportProtocol};
//! use hrana_client::Statement;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = Endpoint::parse("http://127.0.0.1:8080", None)?;
//! let mut transport = HttpTransport::new();
//! transport.connect(&endpoint).await?;
//!
//! let stmt = codec::encode_stmt(&Statement::new("SELECT 1"));
//! let body = codec::encode_pipeline(&codec::pipeline(None, StreamRequest::Execute { stmt }))?;
//! let response = transport.round_trip(&endpoint.pipeline_url(None), body).await?;
//! let response = codec::decode_pipeline(&response, 1)?;
//! println!("baton: {:?}", response.baton);
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub(crate) mod deserialize;
pub mod http;
pub mod messages;
pub mod protocol;

// Re-export commonly used types
pub use http::HttpTransport;
pub use protocol::{ByteStream, TransportProtocol};
