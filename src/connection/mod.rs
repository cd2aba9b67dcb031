//! Connection management for Hrana servers.
//!
//! This module provides endpoint parsing, client configuration,
//! authentication and the session state machine.
//!
//! # Example
//!
//! ```no_run
//! # use hrana_client::connection::{BatchMode, ClientConfig};
//! # use std::str::FromStr;
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Using the builder
//! let config = ClientConfig::builder()
//!     .url("http://127.0.0.1:8080")
//!     .auth_token("secret")
//!     .timeout(std::time::Duration::from_secs(10))
//!     .batch_mode(BatchMode::Auto)
//!     .build()?;
//!
//! // Or parse from a URL
//! let config = ClientConfig::from_str("libsql://db.example.com?authToken=secret")?;
//! let endpoint = config.endpoint()?;
//! assert!(endpoint.use_tls());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod params;
pub mod session;

pub use auth::AuthToken;
pub use params::{BatchMode, ClientConfig, ClientConfigBuilder, Endpoint};
pub use session::{Session, SessionState};
