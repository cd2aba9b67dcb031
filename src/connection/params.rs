//! Client configuration and endpoint parsing.
//!
//! A [`ClientConfig`] can be built in code, deserialized from JSON
//! (`{"url": ..., "authToken": ..., "timeoutMs": ..., "batchMode": ...}`)
//! or read from the environment. It is validated into an [`Endpoint`]
//! before any connection is opened.
//!
//! Supported URL schemes:
//!
//! | scheme     | transport                                   |
//! |------------|---------------------------------------------|
//! | `http`     | plaintext HTTP                              |
//! | `https`    | HTTP over TLS                               |
//! | `libsql`   | HTTP over TLS, plaintext with `?tls=0`      |
//!
//! `ws` and `wss` select the WebSocket flavour of the protocol, which this
//! client does not implement.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::auth::AuthToken;
use crate::error::ConnectionError;

/// Default deadline for one request, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Environment variable holding the server URL.
pub const ENV_URL: &str = "LIBSQL_URL";
/// Environment variable holding the bearer token.
pub const ENV_AUTH_TOKEN: &str = "LIBSQL_AUTH_TOKEN";
/// Environment variable holding the request timeout in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "LIBSQL_TIMEOUT_MS";

/// How `execute_batch` gets its all-or-nothing behaviour.
///
/// `Emulated` is the default because it only needs `execute` requests,
/// which every Hrana server answers. Some servers fail a `batch` request
/// by dropping the connection, and a dropped connection says nothing about
/// whether the batch ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchMode {
    /// One `batch` request with conditional steps, evaluated by the server
    Server,
    /// `BEGIN`, each statement and `COMMIT` as separate requests on one stream
    #[default]
    Emulated,
    /// `Server` until the server rejects a `batch` request, `Emulated` from
    /// then on
    Auto,
}

impl FromStr for BatchMode {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(BatchMode::Server),
            "emulated" => Ok(BatchMode::Emulated),
            "auto" => Ok(BatchMode::Auto),
            other => Err(ConnectionError::InvalidParameter {
                parameter: "batchMode".to_string(),
                message: format!("expected 'server', 'emulated' or 'auto', got '{}'", other),
            }),
        }
    }
}

/// Validated server address.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Scheme, host, port and path prefix, without a trailing slash
    base_url: String,
    use_tls: bool,
    auth_token: Option<AuthToken>,
}

impl Endpoint {
    /// Parse a server URL.
    ///
    /// `auth_token` takes precedence over an `authToken` query parameter.
    pub fn parse(url: &str, auth_token: Option<String>) -> Result<Self, ConnectionError> {
        let raw = url.trim();
        let parsed = Url::parse(raw).map_err(|e| ConnectionError::InvalidEndpoint {
            url: raw.to_string(),
            message: e.to_string(),
        })?;

        let mut url_token = None;
        let mut tls_param = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "authToken" => url_token = Some(value.into_owned()),
                "tls" => tls_param = Some(parse_tls(&value)?),
                other => {
                    return Err(ConnectionError::InvalidParameter {
                        parameter: other.to_string(),
                        message: "unknown URL query parameter".to_string(),
                    })
                }
            }
        }

        let use_tls = match parsed.scheme() {
            "http" => tls_flag_matches(false, tls_param)?,
            "https" => tls_flag_matches(true, tls_param)?,
            "libsql" => tls_param.unwrap_or(true),
            scheme => return Err(ConnectionError::UnsupportedScheme(scheme.to_string())),
        };

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => {
                return Err(ConnectionError::InvalidEndpoint {
                    url: raw.to_string(),
                    message: "missing host".to_string(),
                })
            }
        };

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(ConnectionError::InvalidEndpoint {
                url: raw.to_string(),
                message: "credentials in the URL are not supported, use authToken".to_string(),
            });
        }

        let scheme = if use_tls { "https" } else { "http" };
        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let path = parsed.path().trim_end_matches('/');
        let base_url = format!("{}://{}{}", scheme, authority, path);

        Ok(Self {
            base_url,
            use_tls,
            auth_token: AuthToken::from_optional(auth_token.or(url_token)),
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    pub fn auth_token(&self) -> Option<&AuthToken> {
        self.auth_token.as_ref()
    }

    /// URL of the pipeline endpoint, relative to `base` if the server
    /// redirected the stream, else to this endpoint.
    pub fn pipeline_url(&self, base: Option<&str>) -> String {
        join(base.unwrap_or(&self.base_url), "v2/pipeline")
    }

    /// URL of the cursor endpoint.
    pub fn cursor_url(&self, base: Option<&str>) -> String {
        join(base.unwrap_or(&self.base_url), "v3/cursor")
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("use_tls", &self.use_tls)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url)
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

fn parse_tls(value: &str) -> Result<bool, ConnectionError> {
    match value {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(ConnectionError::InvalidParameter {
            parameter: "tls".to_string(),
            message: format!("expected '0' or '1', got '{}'", other),
        }),
    }
}

fn tls_flag_matches(scheme_tls: bool, tls_param: Option<bool>) -> Result<bool, ConnectionError> {
    match tls_param {
        Some(requested) if requested != scheme_tls => Err(ConnectionError::InvalidParameter {
            parameter: "tls".to_string(),
            message: "the 'tls' parameter is only allowed with libsql: URLs".to_string(),
        }),
        _ => Ok(scheme_tls),
    }
}

/// Client configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientConfig {
    /// Server URL
    pub url: String,
    /// Bearer token, if the server requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Deadline for one request, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub batch_mode: BatchMode,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ClientConfig {
    /// Configuration for `url` with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            batch_mode: BatchMode::default(),
        }
    }

    /// Create a new ClientConfigBuilder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Parse a JSON configuration object.
    pub fn from_json(json: &str) -> Result<Self, ConnectionError> {
        let config: ClientConfig =
            serde_json::from_str(json).map_err(|e| ConnectionError::InvalidParameter {
                parameter: "config".to_string(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Read `LIBSQL_URL`, `LIBSQL_AUTH_TOKEN` and `LIBSQL_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConnectionError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConnectionError> {
        let url = lookup(ENV_URL).ok_or_else(|| ConnectionError::InvalidParameter {
            parameter: ENV_URL.to_string(),
            message: "environment variable is not set".to_string(),
        })?;

        let mut builder = ClientConfigBuilder::new().url(&url);
        if let Some(token) = lookup(ENV_AUTH_TOKEN) {
            builder = builder.auth_token(&token);
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_MS) {
            let timeout_ms = timeout
                .trim()
                .parse()
                .map_err(|_| ConnectionError::InvalidParameter {
                    parameter: ENV_TIMEOUT_MS.to_string(),
                    message: format!("invalid timeout value: {}", timeout),
                })?;
            builder = builder.timeout_ms(timeout_ms);
        }
        builder.build()
    }

    /// Check the settings and parse the endpoint.
    pub fn validate(&self) -> Result<Endpoint, ConnectionError> {
        if self.timeout_ms == 0 {
            return Err(ConnectionError::InvalidParameter {
                parameter: "timeoutMs".to_string(),
                message: "timeout must be greater than 0".to_string(),
            });
        }
        self.endpoint()
    }

    /// Parse the endpoint.
    pub fn endpoint(&self) -> Result<Endpoint, ConnectionError> {
        Endpoint::parse(&self.url, self.auth_token.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl FromStr for ClientConfig {
    type Err = ConnectionError;

    /// Configuration from a bare URL.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClientConfigBuilder::new().url(s).build()
    }
}

// Prevent the token from being displayed in debug output
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The query string may carry `authToken`
        let url = match self.url.split_once('?') {
            Some((base, _)) => format!("{}?<redacted>", base),
            None => self.url.clone(),
        };
        f.debug_struct("ClientConfig")
            .field("url", &url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("batch_mode", &self.batch_mode)
            .finish()
    }
}

/// Builder for constructing ClientConfig with validation.
#[derive(Clone, Default)]
pub struct ClientConfigBuilder {
    url: Option<String>,
    auth_token: Option<String>,
    timeout_ms: Option<u64>,
    batch_mode: Option<BatchMode>,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server URL.
    pub fn url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    /// Set the bearer token.
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    /// Set the request deadline in milliseconds.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the request deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = Some(mode);
        self
    }

    /// Build the ClientConfig with validation.
    pub fn build(self) -> Result<ClientConfig, ConnectionError> {
        let url = self.url.ok_or_else(|| ConnectionError::InvalidParameter {
            parameter: "url".to_string(),
            message: "URL is required".to_string(),
        })?;

        let config = ClientConfig {
            url,
            auth_token: self.auth_token,
            timeout_ms: self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            batch_mode: self.batch_mode.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for ClientConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfigBuilder")
            .field("url", &self.url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("batch_mode", &self.batch_mode)
            .finish()
    }
}
