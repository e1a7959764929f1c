//! Router strategies: bind registered operations to HTTP endpoints.
//!
//! Each [`RouterStrategy`] claims one [`ResourceKind`]. The engine asks the
//! claiming strategy to `route()` every operation it registers and mounts all
//! strategies on the axum router once, at startup.

pub mod rest;
pub mod rpc;

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router};
use serde_json::Value;
use switchyard_core::{Identifier, NamingError, RequestContext, ResourceKind, Response};

use super::operation::{ErrorKind, Operation, OperationError};
use crate::network::AppState;

pub use rest::{RestRouteKey, RestRouterStrategy};
pub use rpc::RpcRouterStrategy;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while selecting a strategy or binding an operation.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no router strategy handles {} resources", kind.as_str())]
    NoStrategy { kind: ResourceKind },
    #[error(
        "{} resources are claimed by several router strategies: {}",
        kind.as_str(),
        strategies.join(", ")
    )]
    Ambiguous {
        kind: ResourceKind,
        strategies: Vec<String>,
    },
    #[error("{method} {path} ({version}) is already bound to {existing}")]
    Conflict {
        method: String,
        path: String,
        version: String,
        existing: Identifier,
    },
    #[error("cannot route {identifier}: {source}")]
    InvalidAction {
        identifier: Identifier,
        #[source]
        source: NamingError,
    },
}

// ---------------------------------------------------------------------------
// RouterStrategy
// ---------------------------------------------------------------------------

/// Binds operations of one resource kind to the HTTP transport.
pub trait RouterStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, kind: ResourceKind) -> bool;

    /// Mounts this strategy's endpoints. Called once when the HTTP router is
    /// assembled; routes added later are picked up without remounting.
    fn setup(&self, router: Router<AppState>) -> Router<AppState>;

    /// Makes `operation` reachable.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Conflict`] when another operation already owns
    /// the endpoint.
    fn route(&self, operation: &Operation) -> Result<(), RouteError>;

    /// Forgets the endpoint of a removed operation. Unknown identifiers are
    /// ignored.
    fn unroute(&self, identifier: &Identifier);
}

/// The configured set of router strategies.
#[derive(Clone, Default)]
pub struct RouterStrategies {
    strategies: Vec<Arc<dyn RouterStrategy>>,
}

impl RouterStrategies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, strategy: Arc<dyn RouterStrategy>) {
        self.strategies.push(strategy);
    }

    /// Returns the single strategy that claims `kind`.
    ///
    /// # Errors
    ///
    /// [`RouteError::NoStrategy`] when nothing claims the kind and
    /// [`RouteError::Ambiguous`] when more than one strategy does.
    pub fn select(&self, kind: ResourceKind) -> Result<Arc<dyn RouterStrategy>, RouteError> {
        let mut matching = self.strategies.iter().filter(|s| s.can_handle(kind));
        let Some(first) = matching.next() else {
            return Err(RouteError::NoStrategy { kind });
        };
        let rest: Vec<_> = matching.collect();
        if rest.is_empty() {
            return Ok(Arc::clone(first));
        }
        let mut strategies = vec![first.name().to_string()];
        strategies.extend(rest.iter().map(|s| s.name().to_string()));
        Err(RouteError::Ambiguous { kind, strategies })
    }

    /// Checks that every resource kind has exactly one strategy.
    ///
    /// # Errors
    ///
    /// Returns the first selection failure.
    pub fn validate(&self) -> Result<(), RouteError> {
        for kind in [ResourceKind::Rpc, ResourceKind::Rest] {
            self.select(kind)?;
        }
        Ok(())
    }

    /// Mounts every strategy on `router`.
    #[must_use]
    pub fn setup(&self, router: Router<AppState>) -> Router<AppState> {
        self.strategies
            .iter()
            .fold(router, |router, strategy| strategy.setup(router))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }
}

impl std::fmt::Debug for RouterStrategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterStrategies")
            .field("strategies", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Transport helpers shared by the strategies
// ---------------------------------------------------------------------------

/// Header carrying the API version of a REST call.
pub const API_VERSION_HEADER: &str = "x-api-version";
/// Header carrying the JSON-encoded `meta` object of a REST call.
pub const META_HEADER: &str = "x-meta";
/// Request id header, set by the HTTP layers when the caller sent none.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Copies the inbound headers into a [`RequestContext`].
///
/// The request id comes from `x-request-id` (set by the HTTP layer) and the
/// client address from the first `x-forwarded-for` hop, else `x-real-ip`.
pub(crate) fn request_context(headers: &HeaderMap) -> RequestContext {
    let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let request_id = value(REQUEST_ID_HEADER)
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
    let mut rc = RequestContext::new(request_id);

    let client_ip = value("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| value("x-real-ip"))
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = client_ip {
        rc = rc.with_client_ip(ip);
    }

    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            rc = rc.with_header(name.as_str(), value);
        }
    }
    rc
}

/// Renders a dispatch outcome as the `{code, message, data}` envelope with
/// the status code of its error class.
pub(crate) fn envelope(result: Result<Value, OperationError>) -> axum::response::Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(Response::ok(data))).into_response(),
        Err(err) => {
            let kind = err.kind();
            if kind == ErrorKind::Internal {
                tracing::error!(error = ?err, "operation failed");
            }
            let body = Response::error(err.code(), err.public_message());
            let mut response = (kind.status(), Json(body)).into_response();
            if let OperationError::RateLimited { retry_after_ms } = err {
                let secs = retry_after_ms.div_ceil(1000).max(1);
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
            }
            response
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pair_covers_both_kinds() {
        let mut strategies = RouterStrategies::new();
        strategies.push(Arc::new(RpcRouterStrategy::new("/api")));
        strategies.push(Arc::new(RestRouterStrategy::new("/api")));
        strategies.validate().unwrap();
        assert_eq!(strategies.select(ResourceKind::Rest).unwrap().name(), "rest");
    }

    #[test]
    fn missing_strategy_is_reported() {
        let mut strategies = RouterStrategies::new();
        strategies.push(Arc::new(RpcRouterStrategy::new("/api")));
        let err = strategies.validate().unwrap_err();
        assert!(matches!(err, RouteError::NoStrategy { kind: ResourceKind::Rest }));
    }

    #[test]
    fn duplicate_claims_are_ambiguous() {
        let mut strategies = RouterStrategies::new();
        strategies.push(Arc::new(RpcRouterStrategy::new("/api")));
        strategies.push(Arc::new(RpcRouterStrategy::new("/rpc")));
        match strategies.select(ResourceKind::Rpc) {
            Err(RouteError::Ambiguous { strategies, .. }) => {
                assert_eq!(strategies, vec!["rpc", "rpc"]);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected ambiguity"),
        }
    }

    #[test]
    fn request_context_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.1.1.1, 10.0.0.1"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));

        let rc = request_context(&headers);
        assert_eq!(rc.request_id, "abc");
        assert_eq!(rc.client_ip.as_deref(), Some("10.1.1.1"));
        assert_eq!(rc.bearer_token(), Some("t"));
    }

    #[test]
    fn request_context_generates_a_request_id() {
        let rc = request_context(&HeaderMap::new());
        assert!(!rc.request_id.is_empty());
        assert!(rc.client_ip.is_none());
    }

    #[test]
    fn envelope_maps_error_classes() {
        let ok = envelope(Ok(serde_json::json!(1)));
        assert_eq!(ok.status(), StatusCode::OK);

        let throttled = envelope(Err(OperationError::RateLimited {
            retry_after_ms: 1500,
        }));
        assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(throttled.headers()["retry-after"], "2");

        let business = envelope(Err(OperationError::business(4100, "nope")));
        assert_eq!(business.status(), StatusCode::OK);
    }
}
