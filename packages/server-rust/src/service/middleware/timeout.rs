//! Timeout middleware for dispatches.
//!
//! Rejects calls that exceed their operation's timeout with
//! `OperationError::Timeout` and cancels the call's token so parameter
//! resolution and cooperative handlers stop early.

use std::task::{Context, Poll};

use serde_json::Value;
use tower::{Layer, Service};

use super::Invocation;
use crate::service::handler::HandlerFuture;
use crate::service::operation::OperationError;

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps services with per-operation timeout enforcement.
///
/// The timeout is read from each call's `Operation::timeout`, so different
/// operations can have different limits.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces per-operation timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Invocation> for TimeoutService<S>
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
        let duration = inv.operation.timeout;
        let timeout_ms = inv.operation.timeout_ms();
        let token = inv.ctx.cancellation().clone();
        let fut = self.inner.call(inv);
        Box::pin(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(OperationError::Cancelled),
                outcome = tokio::time::timeout(duration, fut) => match outcome {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        token.cancel();
                        Err(OperationError::Timeout { timeout_ms })
                    }
                },
            }
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
    async fn completes_within_timeout() {
        let mut op = operation(sleeping(Duration::from_millis(10)));
        op.timeout = Duration::from_secs(1);
        let resp = TimeoutLayer
            .layer(HandlerService)
            .oneshot(invocation(op))
            .await
            .unwrap();
        assert_eq!(resp, serde_json::json!("done"));
    }

    #[tokio::test]
    async fn exceeds_timeout_returns_error_and_cancels() {
        let mut op = operation(sleeping(Duration::from_millis(200)));
        op.timeout = Duration::from_millis(50);
        let inv = invocation(op);
        let token = inv.ctx.cancellation().clone();

        let err = TimeoutLayer.layer(HandlerService).oneshot(inv).await.unwrap_err();
        assert!(matches!(err, OperationError::Timeout { timeout_ms: 50 }));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_calls_fail_fast() {
        let inv = invocation(operation(sleeping(Duration::from_secs(10))));
        inv.ctx.cancellation().cancel();
        let err = TimeoutLayer.layer(HandlerService).oneshot(inv).await.unwrap_err();
        assert!(matches!(err, OperationError::Cancelled));
    }
}
