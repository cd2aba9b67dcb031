//! Bearer token handling.
//!
//! The token is attached as `Authorization: Bearer <token>` to every request
//! and is never printed: both `Debug` and `Display` redact it.

use std::fmt;
use std::sync::Arc;

/// Bearer token for the server.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    token: Arc<SecureString>,
}

impl AuthToken {
    /// Wrap a token. Surrounding whitespace is removed.
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            token: Arc::new(SecureString::new(token.trim().to_string())),
        }
    }

    /// Wrap a token, treating `None` and blank strings as "no token".
    pub fn from_optional(token: Option<String>) -> Option<Self> {
        token
            .filter(|t| !t.trim().is_empty())
            .map(AuthToken::new)
    }

    /// Get the token (for internal use only).
    pub(crate) fn secret(&self) -> &str {
        self.token.as_str()
    }

    /// Value of the `Authorization` header.
    pub(crate) fn header_value(&self) -> String {
        format!("Bearer {}", self.secret())
    }

    /// Attach the `Authorization` header to a request.
    pub(crate) fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(self.secret())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// String that zeros its buffer on drop and never displays its contents.
#[derive(PartialEq, Eq)]
struct SecureString {
    data: String,
}

impl SecureString {
    fn new(data: String) -> Self {
        Self { data }
    }

    fn as_str(&self) -> &str {
        &self.data
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.data).into_bytes();
        for byte in bytes.iter_mut() {
            *byte = 0;
        }
    }
}
