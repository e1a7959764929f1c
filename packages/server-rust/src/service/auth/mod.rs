//! Pluggable authentication strategies.
//!
//! - [`NoneStrategy`]: anonymous access.
//! - [`bearer::BearerStrategy`]: HS256 JWT in `Authorization: Bearer`.
//! - [`signature::SignatureStrategy`]: HMAC-SHA256 request signing for
//!   machine-to-machine callers.
//!
//! Strategies are looked up by name from the operation's merged
//! [`AuthConfig`]; an unknown name is rejected at registration time.

pub mod bearer;
pub mod permission;
pub mod signature;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use switchyard_core::{AuthConfig, Identifier, Principal, RequestContext};

pub use bearer::{BearerConfig, BearerStrategy};
pub use permission::{PermissionChecker, RolePermissionChecker};
pub use signature::{AppSecretStore, SignatureConfig, SignatureStrategy, StaticAppSecretStore};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Authentication failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("missing {expected}")]
    MissingCredentials { expected: &'static str },
    #[error("malformed {header} header: {message}")]
    MalformedHeader {
        header: &'static str,
        message: String,
    },
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    Expired,
    #[error("principal holds none of the accepted roles")]
    RoleNotAllowed,
    #[error("unknown app: {app_id}")]
    UnknownApp { app_id: String },
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("timestamp outside the accepted window of {max_skew_secs}s")]
    TimestampSkew { max_skew_secs: u64 },
    #[error("nonce already used")]
    ReplayedNonce,
    #[error("unknown auth strategy: {name}")]
    UnknownStrategy { name: String },
    #[error("auth strategy misconfigured: {0}")]
    Misconfigured(String),
}

impl AuthError {
    /// `true` when the failure is the server's fault rather than the
    /// caller's.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownStrategy { .. } | Self::Misconfigured(_))
    }
}

// ---------------------------------------------------------------------------
// AuthStrategy
// ---------------------------------------------------------------------------

/// What a strategy is allowed to inspect.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    pub identifier: &'a Identifier,
    pub request: &'a RequestContext,
}

/// Authentication strategy, selected by name.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Name referenced by `AuthConfig::strategy`.
    fn name(&self) -> &str;

    /// Verifies the caller and returns its principal.
    ///
    /// `options` are the operation's `AuthConfig::options`.
    async fn authenticate(
        &self,
        req: &AuthRequest<'_>,
        options: &Map<String, Value>,
    ) -> Result<Principal, AuthError>;
}

/// The `none` strategy: everyone is anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneStrategy;

#[async_trait]
impl AuthStrategy for NoneStrategy {
    fn name(&self) -> &str {
        AuthConfig::NONE
    }

    async fn authenticate(
        &self,
        _req: &AuthRequest<'_>,
        _options: &Map<String, Value>,
    ) -> Result<Principal, AuthError> {
        Ok(Principal::anonymous())
    }
}

// ---------------------------------------------------------------------------
// AuthStrategyRegistry
// ---------------------------------------------------------------------------

/// Name-keyed registry of auth strategies. Always contains `none`.
pub struct AuthStrategyRegistry {
    strategies: DashMap<String, Arc<dyn AuthStrategy>>,
}

impl AuthStrategyRegistry {
    /// Creates a registry holding only [`NoneStrategy`].
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            strategies: DashMap::new(),
        };
        registry.register(Arc::new(NoneStrategy));
        registry
    }

    /// Registers a strategy, replacing any previous one with the same name.
    pub fn register(&self, strategy: Arc<dyn AuthStrategy>) {
        let name = strategy.name().to_string();
        if self.strategies.insert(name.clone(), strategy).is_some() {
            tracing::warn!(strategy = %name, "auth strategy replaced");
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthStrategy>> {
        self.strategies.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Runs the strategy named by `config`. Configurations that do not
    /// require auth short-circuit to the anonymous principal.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnknownStrategy` if the strategy is not
    /// registered, or whatever the strategy rejects the caller with.
    pub async fn authenticate(
        &self,
        config: &AuthConfig,
        req: &AuthRequest<'_>,
    ) -> Result<Principal, AuthError> {
        if !config.requires_auth() {
            return Ok(Principal::anonymous());
        }
        let strategy = self
            .get(&config.strategy)
            .ok_or_else(|| AuthError::UnknownStrategy {
                name: config.strategy.clone(),
            })?;
        strategy.authenticate(req, &config.options).await
    }
}

impl Default for AuthStrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuthStrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

/// Reads a string array option, e.g. `roles: ["admin", "ops"]`.
pub(crate) fn string_list(options: &Map<String, Value>, key: &str) -> Vec<String> {
    options
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use switchyard_core::PrincipalKind;

    use super::*;

    struct FixedStrategy;

    #[async_trait]
    impl AuthStrategy for FixedStrategy {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn authenticate(
            &self,
            _req: &AuthRequest<'_>,
            _options: &Map<String, Value>,
        ) -> Result<Principal, AuthError> {
            Ok(Principal::new(PrincipalKind::System, "svc", "Service"))
        }
    }

    fn request() -> (Identifier, RequestContext) {
        (Identifier::new("user", "get", "v1"), RequestContext::new("r"))
    }

    #[tokio::test]
    async fn none_is_always_present() {
        let registry = AuthStrategyRegistry::new();
        assert!(registry.contains("none"));
        let (id, rc) = request();
        let req = AuthRequest { identifier: &id, request: &rc };
        let principal = registry.authenticate(&AuthConfig::none(), &req).await.unwrap();
        assert!(principal.is_anonymous());
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let registry = AuthStrategyRegistry::new();
        registry.register(Arc::new(FixedStrategy));
        assert_eq!(registry.names(), ["fixed", "none"]);

        let (id, rc) = request();
        let req = AuthRequest { identifier: &id, request: &rc };
        let principal = registry
            .authenticate(&AuthConfig::new("fixed"), &req)
            .await
            .unwrap();
        assert_eq!(principal.id, "svc");
    }

    #[tokio::test]
    async fn unknown_strategy_is_a_configuration_error() {
        let registry = AuthStrategyRegistry::new();
        let (id, rc) = request();
        let req = AuthRequest { identifier: &id, request: &rc };
        let err = registry
            .authenticate(&AuthConfig::new("kerberos"), &req)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn string_list_ignores_non_strings() {
        let options = serde_json::json!({"roles": ["a", 1, "b"]});
        let roles = string_list(options.as_object().unwrap(), "roles");
        assert_eq!(roles, ["a", "b"]);
    }
}
