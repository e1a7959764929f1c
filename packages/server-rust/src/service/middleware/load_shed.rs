//! Load-shedding middleware for dispatches.
//!
//! Rejects calls when the concurrent count exceeds
//! `max_concurrent_operations` with `OperationError::Overloaded`.

use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::Semaphore;
use tower::{Layer, Service};

use super::Invocation;
use crate::service::handler::HandlerFuture;
use crate::service::operation::OperationError;

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer that limits concurrent dispatches via a semaphore.
///
/// When all permits are taken, incoming calls are rejected immediately
/// with `OperationError::Overloaded` rather than queued.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl LoadShedLayer {
    /// Create a new `LoadShedLayer` with the given concurrency limit.
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        let max_concurrent = max_concurrent as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Number of calls currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: self.semaphore.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces a concurrency limit via semaphore-based backpressure.
#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> Service<Invocation> for LoadShedService<S>
where
    S: Service<Invocation, Response = Value, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = OperationError;
    type Future = HandlerFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, inv: Invocation) -> Self::Future {
        // Try to acquire a permit without waiting. If none available, reject.
        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            tracing::warn!(identifier = %inv.operation.identifier, "dispatch shed: overloaded");
            return Box::pin(async { Err(OperationError::Overloaded) });
        };

        let fut = self.inner.call(inv);
        Box::pin(async move {
            // Hold the permit for the duration of the call.
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tower::ServiceExt;

    use super::*;
    use crate::service::middleware::test_support::{invocation, operation, sleeping};
    use crate::service::middleware::HandlerService;

    #[tokio::test]
    async fn allows_calls_under_limit() {
        let layer = LoadShedLayer::new(10);
        let svc = layer.layer(HandlerService);
        let inv = invocation(operation(sleeping(Duration::from_millis(1))));
        let resp = svc.oneshot(inv).await.unwrap();
        assert_eq!(resp, serde_json::json!("done"));
        assert_eq!(layer.in_flight(), 0);
    }

    #[tokio::test]
    async fn rejects_when_overloaded() {
        let layer = LoadShedLayer::new(1);
        let mut svc = layer.layer(HandlerService);

        // First call acquires the single permit.
        let _ = ServiceExt::ready(&mut svc).await.unwrap();
        let _in_flight = tokio::spawn({
            let fut = svc.call(invocation(operation(sleeping(Duration::from_millis(500)))));
            async move { fut.await }
        });

        // Give the spawned task time to start.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(layer.in_flight(), 1);

        // Second call should be rejected immediately.
        let err = svc
            .call(invocation(operation(sleeping(Duration::ZERO))))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Overloaded));
    }
}
