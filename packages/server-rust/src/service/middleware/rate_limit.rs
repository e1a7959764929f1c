//! Rate-limit middleware for dispatches.
//!
//! Consults the [`RateLimiter`] for operations with an enabled limit and
//! rejects over-limit calls with `OperationError::RateLimited`.

use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tower::{Layer, Service};

use super::Invocation;
use crate::service::handler::HandlerFuture;
use crate::service::operation::OperationError;
use crate::service::rate_limit::{rate_limit_key, Decision, RateLimiter};

/// Tower layer that applies per-operation rate limits.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitLayer {
    #[must_use]
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl std::fmt::Debug for RateLimitLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

/// Service wrapper that throttles calls per operation and caller.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<dyn RateLimiter>,
}

impl<S> Service<Invocation> for RateLimitService<S>
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
        let Some(config) = inv
            .operation
            .rate_limit
            .clone()
            .filter(|config| config.is_enabled())
        else {
            return Box::pin(self.inner.call(inv));
        };

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = Arc::clone(&self.limiter);

        Box::pin(async move {
            let principal = inv.ctx.principal();
            let key = rate_limit_key(
                &config,
                &inv.operation.identifier,
                &principal,
                inv.ctx.request(),
            );
            if let Decision::Denied { retry_after } = limiter.acquire(&key, &config).await {
                let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                tracing::debug!(key = %key, retry_after_ms, "rate limited");
                return Err(OperationError::RateLimited { retry_after_ms });
            }
            inner.call(inv).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use switchyard_core::{RateLimitConfig, RequestContext};
    use tower::ServiceExt;

    use super::*;
    use crate::service::handler::Handler;
    use crate::service::middleware::test_support::{invocation_with, operation};
    use crate::service::middleware::HandlerService;
    use crate::service::rate_limit::MemoryRateLimiter;

    fn ok_handler() -> Handler {
        Handler::from_fn(|| async { Ok::<_, OperationError>(true) })
    }

    #[tokio::test]
    async fn throttles_after_max_calls() {
        let layer = RateLimitLayer::new(Arc::new(MemoryRateLimiter::new()));
        let mut op = operation(ok_handler());
        op.rate_limit = Some(RateLimitConfig::new(2, Duration::from_secs(60)));

        let from = |ip: &str| RequestContext::new("r").with_client_ip(ip);
        for _ in 0..2 {
            layer
                .layer(HandlerService)
                .oneshot(invocation_with(op.clone(), from("10.0.0.1")))
                .await
                .unwrap();
        }
        let err = layer
            .layer(HandlerService)
            .oneshot(invocation_with(op.clone(), from("10.0.0.1")))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::RateLimited { .. }));

        // Another anonymous caller has its own window.
        layer
            .layer(HandlerService)
            .oneshot(invocation_with(op, from("10.0.0.2")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unlimited_operations_skip_the_limiter() {
        let layer = RateLimitLayer::new(Arc::new(MemoryRateLimiter::new()));
        let op = operation(ok_handler());
        for _ in 0..10 {
            layer
                .layer(HandlerService)
                .oneshot(invocation_with(op.clone(), RequestContext::new("r")))
                .await
                .unwrap();
        }
    }
}
