//! Metrics middleware for dispatches.
//!
//! Wraps each call in an `operation` tracing span and records
//! `switchyard_operations_total` and `switchyard_operation_duration_seconds`
//! through the `metrics` facade. Without an installed recorder the metric
//! calls are no-ops.

use std::task::{Context, Poll};
use std::time::Instant;

use serde_json::Value;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::Invocation;
use crate::service::handler::HandlerFuture;
use crate::service::operation::OperationError;

pub const OPERATIONS_TOTAL: &str = "switchyard_operations_total";
pub const OPERATION_DURATION_SECONDS: &str = "switchyard_operation_duration_seconds";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments dispatches with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records call duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Invocation> for MetricsService<S>
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
        let identifier = inv.operation.identifier.clone();
        let request_id = inv.ctx.request().request_id.clone();

        let span = info_span!(
            "operation",
            resource = %identifier.resource,
            action = %identifier.action,
            version = %identifier.version,
            request_id = %request_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(inv);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(err) => err.kind().as_str(),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    OPERATIONS_TOTAL,
                    "resource" => identifier.resource.clone(),
                    "action" => identifier.action.clone(),
                    "version" => identifier.version.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!(
                    OPERATION_DURATION_SECONDS,
                    "resource" => identifier.resource,
                    "action" => identifier.action,
                    "version" => identifier.version
                )
                .record(elapsed.as_secs_f64());

                tracing::debug!(duration_ms, outcome, "operation complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
