//! Authentication middleware for dispatches.
//!
//! Runs the operation's auth strategy, stores the resulting principal on the
//! call context, then checks the operation's permission token.

use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tower::{Layer, Service};

use super::Invocation;
use crate::service::auth::{AuthRequest, AuthStrategyRegistry, PermissionChecker};
use crate::service::handler::HandlerFuture;
use crate::service::operation::OperationError;

// ---------------------------------------------------------------------------
// AuthLayer
// ---------------------------------------------------------------------------

/// Tower layer that authenticates and authorizes each call.
#[derive(Clone)]
pub struct AuthLayer {
    strategies: Arc<AuthStrategyRegistry>,
    permissions: Arc<dyn PermissionChecker>,
}

impl AuthLayer {
    #[must_use]
    pub fn new(
        strategies: Arc<AuthStrategyRegistry>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            strategies,
            permissions,
        }
    }
}

impl std::fmt::Debug for AuthLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthLayer")
            .field("strategies", &self.strategies)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            strategies: Arc::clone(&self.strategies),
            permissions: Arc::clone(&self.permissions),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthService
// ---------------------------------------------------------------------------

/// Service wrapper that rejects unauthenticated or unauthorized calls.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    strategies: Arc<AuthStrategyRegistry>,
    permissions: Arc<dyn PermissionChecker>,
}

impl<S> Service<Invocation> for AuthService<S>
where
    S: Service<Invocation, Response = Value, Error = OperationError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = OperationError;
    type Future = HandlerFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, inv: Invocation) -> Self::Future {
        // Take the service that was driven to readiness; leave a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let strategies = Arc::clone(&self.strategies);
        let permissions = Arc::clone(&self.permissions);

        Box::pin(async move {
            let operation = Arc::clone(&inv.operation);

            if operation.requires_auth() {
                let req = AuthRequest {
                    identifier: &operation.identifier,
                    request: inv.ctx.request(),
                };
                match strategies.authenticate(&operation.auth, &req).await {
                    Ok(principal) => inv.ctx.set_principal(principal),
                    Err(err) => {
                        tracing::warn!(
                            identifier = %operation.identifier,
                            strategy = %operation.auth.strategy,
                            error = %err,
                            "authentication failed"
                        );
                        return Err(OperationError::Unauthenticated(err));
                    }
                }
            }

            if let Some(perm_token) = &operation.perm_token {
                let principal = inv.ctx.principal();
                if !permissions.check(&principal, perm_token) {
                    tracing::warn!(
                        identifier = %operation.identifier,
                        principal = %principal.id,
                        perm_token = %perm_token,
                        "permission denied"
                    );
                    return Err(OperationError::Forbidden {
                        perm_token: perm_token.clone(),
                    });
                }
            }

            inner.call(inv).await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Map;
    use switchyard_core::{AuthConfig, Principal, PrincipalKind, RequestContext};
    use tower::ServiceExt;

    use super::*;
    use crate::service::auth::{AuthError, AuthStrategy, RolePermissionChecker};
    use crate::service::handler::{CallContext, Handler};
    use crate::service::middleware::test_support::{invocation, invocation_with, operation};
    use crate::service::middleware::HandlerService;

    /// Accepts `x-user: <id>` and grants the roles listed in `x-roles`.
    struct HeaderStrategy;

    #[async_trait]
    impl AuthStrategy for HeaderStrategy {
        fn name(&self) -> &str {
            "header"
        }

        async fn authenticate(
            &self,
            req: &AuthRequest<'_>,
            _options: &Map<String, Value>,
        ) -> Result<Principal, AuthError> {
            let id = req.request.header("x-user").ok_or(AuthError::MissingCredentials {
                expected: "x-user header",
            })?;
            let roles = req
                .request
                .header("x-roles")
                .map(|r| r.split(',').map(str::to_string).collect::<Vec<_>>())
                .unwrap_or_default();
            Ok(Principal::new(PrincipalKind::User, id, id).with_roles(roles))
        }
    }

    fn layer() -> AuthLayer {
        let strategies = AuthStrategyRegistry::new();
        strategies.register(Arc::new(HeaderStrategy));
        AuthLayer::new(Arc::new(strategies), Arc::new(RolePermissionChecker::default()))
    }

    fn whoami() -> Handler {
        Handler::raw(|ctx: CallContext| async move {
            Ok::<_, OperationError>(ctx.principal().id.clone())
        })
    }

    #[tokio::test]
    async fn none_strategy_passes_anonymously() {
        let resp = layer()
            .layer(HandlerService)
            .oneshot(invocation(operation(whoami())))
            .await
            .unwrap();
        assert_eq!(resp, serde_json::json!("anonymous"));
    }

    #[tokio::test]
    async fn authenticated_principal_reaches_the_handler() {
        let mut op = operation(whoami());
        op.auth = AuthConfig::new("header");
        let rc = RequestContext::new("r").with_header("x-user", "u7");
        let resp = layer()
            .layer(HandlerService)
            .oneshot(invocation_with(op, rc))
            .await
            .unwrap();
        assert_eq!(resp, serde_json::json!("u7"));
    }

    #[tokio::test]
    async fn missing_credentials_are_rejected() {
        let mut op = operation(whoami());
        op.auth = AuthConfig::new("header");
        let err = layer()
            .layer(HandlerService)
            .oneshot(invocation(op))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn perm_token_requires_a_grant() {
        let mut op = operation(whoami());
        op.auth = AuthConfig::new("header");
        op.perm_token = Some("user:delete".into());

        let denied = RequestContext::new("r").with_header("x-user", "u1");
        let err = layer()
            .layer(HandlerService)
            .oneshot(invocation_with(op.clone(), denied))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Forbidden { .. }));

        let granted = RequestContext::new("r")
            .with_header("x-user", "u2")
            .with_header("x-roles", "viewer,user:delete");
        let resp = layer()
            .layer(HandlerService)
            .oneshot(invocation_with(op, granted))
            .await
            .unwrap();
        assert_eq!(resp, serde_json::json!("u2"));
    }
}
