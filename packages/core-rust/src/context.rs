use std::collections::HashMap;

/// Per-request transport facts: tracing identity, caller address, and the
/// credential-bearing headers auth strategies read.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request identifier (propagated as `x-request-id`).
    pub request_id: String,
    /// Caller address as seen by the transport, if known.
    pub client_ip: Option<String>,
    /// Lower-cased header name -> value. Only the first value of a repeated
    /// header is kept.
    pub headers: HashMap<String, String>,
}

impl RequestContext {
    pub const AUTHORIZATION: &'static str = "authorization";
    pub const APP_ID: &'static str = "x-app-id";
    pub const TIMESTAMP: &'static str = "x-timestamp";
    pub const NONCE: &'static str = "x-nonce";
    pub const SIGNATURE: &'static str = "x-signature";

    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The token of an `Authorization: Bearer <token>` header.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header(Self::AUTHORIZATION)?;
        let (scheme, token) = value.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
            Some(token.trim())
        } else {
            None
        }
    }
}
