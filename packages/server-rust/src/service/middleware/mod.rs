//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`load_shed`]: Semaphore-based concurrency limiting
//! - [`metrics`]: Per-operation tracing span, counters and latency histogram
//! - [`audit`]: Audit events for operations with `enable_audit`
//! - [`auth`]: Strategy dispatch and permission-token checks
//! - [`rate_limit`]: Per-operation rate limits
//! - [`timeout`]: Per-operation timeout with cancellation
//! - [`pipeline`]: Composes all layers around [`HandlerService`]

pub mod audit;
pub mod auth;
pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod timeout;

use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tower::Service;

use super::handler::{CallContext, HandlerFuture};
use super::operation::{Operation, OperationError};

pub use audit::AuditLayer;
pub use auth::AuthLayer;
pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::DispatchPipeline;
pub use rate_limit::RateLimitLayer;
pub use timeout::TimeoutLayer;

/// One call travelling through the pipeline.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub operation: Arc<Operation>,
    pub ctx: CallContext,
}

/// Innermost service: runs the operation's adapted handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerService;

impl Service<Invocation> for HandlerService {
    type Response = Value;
    type Error = OperationError;
    type Future = HandlerFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, inv: Invocation) -> Self::Future {
        (inv.operation.handler)(inv.ctx)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use serde_json::Map;
    use switchyard_core::{AuthConfig, Identifier, RequestContext, ResourceKind};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::service::handler::{FactoryContext, Handler, HandlerAdapter, ResolverSet};

    /// Operation with no auth, a 5s timeout, and the given handler.
    pub(crate) fn operation(handler: Handler) -> Operation {
        let identifier = Identifier::new("test", "run", "v1");
        let factory_ctx = FactoryContext {
            identifier: identifier.clone(),
            kind: ResourceKind::Rpc,
        };
        Operation {
            identifier,
            kind: ResourceKind::Rpc,
            enable_audit: false,
            timeout: Duration::from_secs(5),
            auth: AuthConfig::none(),
            rate_limit: None,
            perm_token: None,
            handler: HandlerAdapter::adapt(handler, &factory_ctx, &ResolverSet::new())
                .expect("test handler adapts"),
            dynamic: false,
            meta: Map::new(),
        }
    }

    /// Handler that sleeps, then answers `"done"`.
    pub(crate) fn sleeping(delay: Duration) -> Handler {
        Handler::from_fn(move || async move {
            tokio::time::sleep(delay).await;
            Ok::<_, OperationError>("done")
        })
    }

    pub(crate) fn invocation(operation: Operation) -> Invocation {
        invocation_with(operation, RequestContext::new("req-1"))
    }

    pub(crate) fn invocation_with(operation: Operation, request: RequestContext) -> Invocation {
        let ctx = CallContext::new(
            operation.identifier.clone(),
            Map::new(),
            Map::new(),
            request,
            CancellationToken::new(),
        );
        Invocation {
            operation: Arc::new(operation),
            ctx,
        }
    }
}
