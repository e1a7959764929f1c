//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use serde_json::Value;
use tower::{Service, ServiceBuilder, ServiceExt};

use super::audit::AuditLayer;
use super::auth::AuthLayer;
use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::rate_limit::RateLimitLayer;
use super::timeout::TimeoutLayer;
use super::{HandlerService, Invocation};
use crate::service::audit::AuditPublisher;
use crate::service::auth::{AuthStrategyRegistry, PermissionChecker};
use crate::service::handler::HandlerFuture;
use crate::service::operation::OperationError;
use crate::service::rate_limit::RateLimiter;

/// Shared state of the dispatch pipeline.
///
/// The layers only hold `Arc`s, so a fresh service stack is assembled per
/// call and no lock is needed around a shared, mutable `Service`.
#[derive(Debug, Clone)]
pub struct DispatchPipeline {
    load_shed: LoadShedLayer,
    audit: AuditLayer,
    auth: AuthLayer,
    rate_limit: RateLimitLayer,
}

impl DispatchPipeline {
    #[must_use]
    pub fn new(
        max_concurrent_operations: u32,
        strategies: Arc<AuthStrategyRegistry>,
        permissions: Arc<dyn PermissionChecker>,
        limiter: Arc<dyn RateLimiter>,
        audit: Arc<dyn AuditPublisher>,
    ) -> Self {
        Self {
            load_shed: LoadShedLayer::new(max_concurrent_operations),
            audit: AuditLayer::new(audit),
            auth: AuthLayer::new(strategies, permissions),
            rate_limit: RateLimitLayer::new(limiter),
        }
    }

    /// Build the service stack around [`HandlerService`].
    ///
    /// Layer order (outermost to innermost):
    /// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
    /// 2. `MetricsLayer` -- span, counters, latency for everything below
    /// 3. `AuditLayer` -- report the final outcome, including auth failures
    /// 4. `AuthLayer` -- authenticate, then check the permission token
    /// 5. `RateLimitLayer` -- throttle per caller once the caller is known
    /// 6. `TimeoutLayer` -- bound parameter resolution plus the handler
    #[must_use]
    pub fn service(
        &self,
    ) -> impl Service<Invocation, Response = Value, Error = OperationError, Future = HandlerFuture>
           + Send
           + 'static {
        ServiceBuilder::new()
            .layer(self.load_shed.clone())
            .layer(MetricsLayer)
            .layer(self.audit.clone())
            .layer(self.auth.clone())
            .layer(self.rate_limit.clone())
            .layer(TimeoutLayer)
            .service(HandlerService)
    }

    /// Runs one call through the full stack.
    ///
    /// # Errors
    ///
    /// Returns whatever layer or handler rejected the call.
    pub async fn dispatch(&self, inv: Invocation) -> Result<Value, OperationError> {
        self.service().oneshot(inv).await
    }

    /// Calls currently inside the pipeline.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.load_shed.in_flight()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
