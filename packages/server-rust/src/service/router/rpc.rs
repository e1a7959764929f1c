//! RPC router strategy: one `POST` endpoint, the body names the operation.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Router;
use switchyard_core::{Identifier, Request, ResourceKind};

use super::{envelope, request_context, RouteError, RouterStrategy};
use crate::network::AppState;
use crate::service::operation::{Operation, OperationError};

/// Serves every RPC operation behind a single `POST {path}` endpoint.
///
/// The registry already is the lookup table for RPC calls, so `route` and
/// `unroute` have nothing to record.
#[derive(Debug, Clone)]
pub struct RpcRouterStrategy {
    path: String,
}

impl RpcRouterStrategy {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl RouterStrategy for RpcRouterStrategy {
    fn name(&self) -> &str {
        "rpc"
    }

    fn can_handle(&self, kind: ResourceKind) -> bool {
        kind == ResourceKind::Rpc
    }

    fn setup(&self, router: Router<AppState>) -> Router<AppState> {
        router.route(&self.path, post(rpc_handler))
    }

    fn route(&self, _operation: &Operation) -> Result<(), RouteError> {
        Ok(())
    }

    fn unroute(&self, _identifier: &Identifier) {}
}

async fn rpc_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let rc = request_context(&headers);
    let request: Request = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return envelope(Err(OperationError::InvalidRequest(format!(
                "malformed request envelope: {e}"
            ))));
        }
    };

    let identifier = request.identifier(state.engine.default_version());
    let result = state
        .engine
        .dispatch_routed(ResourceKind::Rpc, identifier, request.params, request.meta, rc)
        .await;
    envelope(result)
}
