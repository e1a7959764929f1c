//! HTTP layers wrapped around the engine's routes and the health endpoints.
//!
//! Outermost first:
//! 1. `SetRequestId` -- UUID v4 `x-request-id` when the caller sent none;
//!    dispatch reuses it as the request id seen by handlers and audit events
//! 2. `Trace` -- one span per HTTP request
//! 3. `Compression` -- gzip responses
//! 4. `Cors` -- configured origins, every verb a REST operation may bind,
//!    and the headers the auth strategies and routers read
//! 5. `RequestBodyLimit` -- 413 before any dispatch
//! 6. `Timeout` -- transport ceiling above the per-operation timeouts
//! 7. `PropagateRequestId` -- echoes `x-request-id` on the response

use axum::http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::Router;
use switchyard_core::RequestContext;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;
use super::handlers::AppState;
use crate::service::router::{API_VERSION_HEADER, META_HEADER, REQUEST_ID_HEADER};

/// Wraps `router` in the HTTP layers. `Router::layer` makes each call the
/// new outermost layer, so they are applied innermost first.
pub fn with_http_layers(router: Router<AppState>, config: &NetworkConfig) -> Router<AppState> {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    router
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(cors_layer(&config.cors_origins))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

/// `"*"` anywhere in `origins` allows every origin; otherwise unparsable
/// entries are skipped.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| o.parse::<HeaderValue>().ok()))
    };

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            request_id.clone(),
            HeaderName::from_static(API_VERSION_HEADER),
            HeaderName::from_static(META_HEADER),
            HeaderName::from_static(RequestContext::APP_ID),
            HeaderName::from_static(RequestContext::TIMESTAMP),
            HeaderName::from_static(RequestContext::NONCE),
            HeaderName::from_static(RequestContext::SIGNATURE),
        ])
        .expose_headers([request_id, RETRY_AFTER])
}
