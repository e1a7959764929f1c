//! Operation model and request-level error taxonomy.

use std::fmt;
use std::time::Duration;

use http::StatusCode;
use serde_json::{Map, Value};
use switchyard_core::{AuthConfig, Identifier, RateLimitConfig, ResourceKind};

use super::auth::AuthError;
use super::handler::{AdaptedHandler, Handler, ResolveError};

// ---------------------------------------------------------------------------
// OperationSpec
// ---------------------------------------------------------------------------

/// Declarative description of one operation, authored alongside its resource.
///
/// Consumed by the engine when the runtime [`Operation`] is built.
pub struct OperationSpec {
    pub action: String,
    pub enable_audit: bool,
    /// Zero means "use the engine default".
    pub timeout: Duration,
    /// Public operations skip authentication entirely.
    pub public: bool,
    /// Permission the caller must hold, if any.
    pub perm_token: Option<String>,
    /// Overrides the resource-level auth config.
    pub auth: Option<AuthConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    pub meta: Map<String, Value>,
    pub handler: Handler,
}

impl OperationSpec {
    #[must_use]
    pub fn new(action: impl Into<String>, handler: Handler) -> Self {
        Self {
            action: action.into(),
            enable_audit: false,
            timeout: Duration::ZERO,
            public: false,
            perm_token: None,
            auth: None,
            rate_limit: None,
            meta: Map::new(),
            handler,
        }
    }

    #[must_use]
    pub fn audit(mut self) -> Self {
        self.enable_audit = true;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    #[must_use]
    pub fn perm_token(mut self, token: impl Into<String>) -> Self {
        self.perm_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSpec")
            .field("action", &self.action)
            .field("enable_audit", &self.enable_audit)
            .field("timeout", &self.timeout)
            .field("public", &self.public)
            .field("perm_token", &self.perm_token)
            .field("auth", &self.auth)
            .field("rate_limit", &self.rate_limit)
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Runtime, fully merged, routable unit. Immutable once built; replaced only
/// by remove + register.
#[derive(Clone)]
pub struct Operation {
    pub identifier: Identifier,
    pub kind: ResourceKind,
    pub enable_audit: bool,
    /// Always positive after policy merge.
    pub timeout: Duration,
    /// Always populated after policy merge; `none` for public operations.
    pub auth: AuthConfig,
    /// `Some` only when the limit is enabled.
    pub rate_limit: Option<RateLimitConfig>,
    pub perm_token: Option<String>,
    pub handler: AdaptedHandler,
    /// Registered after startup (plugin loading, business events).
    pub dynamic: bool,
    pub meta: Map<String, Value>,
}

impl Operation {
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.auth.requires_auth()
    }

    #[must_use]
    pub fn has_rate_limit(&self) -> bool {
        self.rate_limit.as_ref().is_some_and(RateLimitConfig::is_enabled)
    }

    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("identifier", &self.identifier)
            .field("kind", &self.kind)
            .field("enable_audit", &self.enable_audit)
            .field("timeout", &self.timeout)
            .field("auth", &self.auth)
            .field("rate_limit", &self.rate_limit)
            .field("perm_token", &self.perm_token)
            .field("dynamic", &self.dynamic)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structured class of a request-level failure. The transport maps it to a
/// status code and envelope code without looking at messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ClientFault,
    Unauthenticated,
    Forbidden,
    NotFound,
    Throttled,
    Timeout,
    Cancelled,
    Unavailable,
    Business,
    Internal,
}

impl ErrorKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientFault => "client_fault",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Throttled => "throttled",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Unavailable => "unavailable",
            Self::Business => "business",
            Self::Internal => "internal",
        }
    }

    /// Envelope code. Business errors carry their own code instead.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ClientFault => 1000,
            Self::Unauthenticated => 1001,
            Self::Forbidden => 1002,
            Self::NotFound => 1003,
            Self::Throttled => 1004,
            Self::Timeout => 1005,
            Self::Cancelled => 1006,
            Self::Unavailable => 1007,
            Self::Business => 2000,
            Self::Internal => 1999,
        }
    }

    /// HTTP status. Business errors are successful transports of a failed
    /// outcome and answer 200.
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::ClientFault => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Throttled => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Business => StatusCode::OK,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors returned while dispatching a request.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("operation not found: {identifier}")]
    NotFound { identifier: Identifier },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("authentication failed: {0}")]
    Unauthenticated(#[from] AuthError),
    #[error("permission denied: {perm_token}")]
    Forbidden { perm_token: String },
    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("request cancelled")]
    Cancelled,
    #[error("{message}")]
    Business { code: i32, message: String },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// Business failure with an application-defined code.
    #[must_use]
    pub fn business(code: i32, message: impl Into<String>) -> Self {
        Self::Business {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidRequest(_) => ErrorKind::ClientFault,
            Self::Resolve(err) => match err {
                ResolveError::Cancelled => ErrorKind::Cancelled,
                ResolveError::Unresolvable { .. } | ResolveError::TypeMismatch { .. } => {
                    ErrorKind::Internal
                }
                _ => ErrorKind::ClientFault,
            },
            Self::Unauthenticated(err) => {
                if err.is_configuration() {
                    ErrorKind::Internal
                } else {
                    ErrorKind::Unauthenticated
                }
            }
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::RateLimited { .. } => ErrorKind::Throttled,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Overloaded | Self::ShuttingDown => ErrorKind::Unavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Business { .. } => ErrorKind::Business,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Envelope code for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Business { code, .. } => *code,
            other => other.kind().code(),
        }
    }

    /// Message safe to return to callers. Internal details stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
