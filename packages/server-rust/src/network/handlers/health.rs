//! Health, liveness, and readiness endpoint handlers.
//!
//! These handlers expose server health information for orchestrators
//! (Kubernetes, load balancers) and operational monitoring.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the response body indicates
/// whether the server is actually healthy.
pub async fn health_handler(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();
    let engine = &state.engine;

    Json(json!({
        "state": health.as_str(),
        "accepting": engine.is_accepting(),
        "operations": engine.registry().len(),
        "in_flight": engine.in_flight(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Kubernetes liveness probe -- always returns 200 OK.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe -- returns 200 when ready, 503 otherwise.
///
/// Returns 503 during startup (before `set_ready()` is called), during
/// graceful shutdown (Draining state), and after stop.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ShutdownController;
    use crate::service::{Engine, EngineConfig, Handler, OperationError, OperationSpec, Resource};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use switchyard_core::{AuthConfig, Request, RequestContext};

    fn test_state() -> AppState {
        let config = EngineConfig {
            default_auth: AuthConfig::none(),
            ..EngineConfig::default()
        };
        let engine = Arc::new(Engine::builder(config).build().unwrap());
        AppState {
            shutdown: Arc::new(ShutdownController::new(Arc::clone(&engine))),
            engine,
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn health_handler_returns_json_with_all_fields() {
        let state = test_state();
        state.shutdown.set_ready();

        let response = health_handler(State(state)).await;
        let json = response.0;

        assert_eq!(json["state"], "ready");
        assert_eq!(json["accepting"], true);
        assert_eq!(json["operations"], 0);
        assert_eq!(json["in_flight"], 0);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_handler_reports_starting_state() {
        let state = test_state();
        let response = health_handler(State(state)).await;
        assert_eq!(response.0["state"], "starting");
    }

    #[tokio::test]
    async fn health_handler_reports_draining_state() {
        let state = test_state();
        state.shutdown.set_ready();
        state.shutdown.trigger_shutdown();

        let response = health_handler(State(state)).await;
        assert_eq!(response.0["state"], "draining");
        assert_eq!(response.0["accepting"], false);
    }

    #[tokio::test]
    async fn health_handler_reports_operation_count() {
        let state = test_state();
        let resource = Resource::rpc("sys")
            .operation(OperationSpec::new(
                "ping",
                Handler::from_fn(|| async { Ok::<_, OperationError>("pong") }),
            ))
            .build(state.engine.naming_rules())
            .unwrap();
        state.engine.register_resource(resource).unwrap();

        let response = health_handler(State(state)).await;
        assert_eq!(response.0["operations"], 1);
    }

    #[tokio::test]
    async fn health_handler_reports_engine_in_flight_count() {
        let state = test_state();
        let resource = Resource::rpc("sys")
            .operation(OperationSpec::new(
                "slow",
                Handler::from_fn(|| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, OperationError>("done")
                }),
            ))
            .build(state.engine.naming_rules())
            .unwrap();
        state.engine.register_resource(resource).unwrap();

        let running = {
            let engine = Arc::clone(&state.engine);
            tokio::spawn(async move {
                engine
                    .dispatch(Request::new("sys", "slow"), RequestContext::new("r1"))
                    .await
            })
        };
        while state.engine.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let response = health_handler(State(state.clone())).await;
        assert_eq!(response.0["in_flight"], 1);
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn liveness_handler_always_returns_200() {
        let status = liveness_handler().await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_handler_returns_200_when_ready() {
        let state = test_state();
        state.shutdown.set_ready();

        let status = readiness_handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_handler_returns_503_when_starting() {
        let state = test_state();
        let status = readiness_handler(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readiness_handler_returns_503_when_draining() {
        let state = test_state();
        state.shutdown.set_ready();
        state.shutdown.trigger_shutdown();

        let status = readiness_handler(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
