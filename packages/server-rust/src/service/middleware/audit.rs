//! Audit middleware: emits an [`AuditEvent`] after every call of an
//! operation with `enable_audit`, whether it succeeded or failed.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use switchyard_core::Response;
use tower::{Layer, Service};

use super::Invocation;
use crate::service::audit::{AuditEvent, AuditPublisher};
use crate::service::handler::HandlerFuture;
use crate::service::operation::OperationError;

/// Tower layer that publishes audit events.
#[derive(Clone)]
pub struct AuditLayer {
    publisher: Arc<dyn AuditPublisher>,
}

impl AuditLayer {
    #[must_use]
    pub fn new(publisher: Arc<dyn AuditPublisher>) -> Self {
        Self { publisher }
    }
}

impl std::fmt::Debug for AuditLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for AuditLayer {
    type Service = AuditService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditService {
            inner,
            publisher: Arc::clone(&self.publisher),
        }
    }
}

/// Service wrapper that reports audited calls once they finish.
#[derive(Clone)]
pub struct AuditService<S> {
    inner: S,
    publisher: Arc<dyn AuditPublisher>,
}

impl<S> Service<Invocation> for AuditService<S>
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
        if !inv.operation.enable_audit {
            return Box::pin(self.inner.call(inv));
        }

        let operation = Arc::clone(&inv.operation);
        let ctx = inv.ctx.clone();
        let publisher = Arc::clone(&self.publisher);
        let fut = self.inner.call(inv);

        Box::pin(async move {
            let start = Instant::now();
            let result = fut.await;

            let (code, message) = match &result {
                Ok(_) => (Response::CODE_SUCCESS, Response::MESSAGE_SUCCESS.to_string()),
                Err(err) => (err.code(), err.public_message()),
            };
            // The principal slot is shared, so this sees what the auth layer set.
            let principal = ctx.principal();
            publisher.publish(AuditEvent {
                identifier: operation.identifier.clone(),
                principal_id: principal.id.clone(),
                principal_kind: principal.kind,
                request_id: ctx.request().request_id.clone(),
                client_ip: ctx.request().client_ip.clone(),
                params: ctx.params().clone(),
                meta: ctx.meta().clone(),
                code,
                message,
                elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                timestamp_ms: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                    .unwrap_or_default(),
            });

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use crate::service::audit::ChannelAuditPublisher;
    use crate::service::handler::Handler;
    use crate::service::middleware::test_support::{invocation, operation};
    use crate::service::middleware::HandlerService;

    #[tokio::test]
    async fn audited_operations_emit_on_success_and_failure() {
        let (publisher, mut rx) = ChannelAuditPublisher::new(8);
        let layer = AuditLayer::new(Arc::new(publisher));

        let mut ok = operation(Handler::from_fn(|| async { Ok::<_, OperationError>(1) }));
        ok.enable_audit = true;
        layer.layer(HandlerService).oneshot(invocation(ok)).await.unwrap();

        let mut failing = operation(Handler::from_fn(|| async {
            Err::<(), _>(OperationError::business(4100, "quota exceeded"))
        }));
        failing.enable_audit = true;
        layer
            .layer(HandlerService)
            .oneshot(invocation(failing))
            .await
            .unwrap_err();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.code, 0);
        assert_eq!(first.principal_id, "anonymous");
        assert_eq!(first.request_id, "req-1");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.code, 4100);
        assert_eq!(second.message, "quota exceeded");
    }

    #[tokio::test]
    async fn unaudited_operations_are_silent() {
        let (publisher, mut rx) = ChannelAuditPublisher::new(8);
        let layer = AuditLayer::new(Arc::new(publisher));
        let op = operation(Handler::from_fn(|| async { Ok::<_, OperationError>(1) }));
        layer.layer(HandlerService).oneshot(invocation(op)).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
