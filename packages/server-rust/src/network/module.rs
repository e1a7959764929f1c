//! Network module with deferred startup lifecycle.
//!
//! `new()` creates shared state, `start()` binds the TCP listener, and
//! `serve()` starts accepting connections. Resources can be registered on
//! the engine between `start()` and `serve()`; the server reports ready only
//! once `serve()` runs.

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, readiness_handler, AppState};
use super::middleware::with_http_layers;
use super::shutdown::ShutdownController;
use crate::service::Engine;

/// Manages the HTTP server lifecycle around one [`Engine`].
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    engine: Arc<Engine>,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, engine: Arc<Engine>) -> Self {
        let shutdown = Arc::new(ShutdownController::new(Arc::clone(&engine)));
        Self {
            config,
            listener: None,
            engine,
            shutdown,
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- Kubernetes liveness probe
    /// - `GET /health/ready` -- Kubernetes readiness probe
    /// - whatever the engine's router strategies mount (by default
    ///   `POST /api` for RPC and `ANY /api/{*path}` for REST)
    pub fn build_router(&self) -> Router {
        let state = AppState {
            engine: Arc::clone(&self.engine),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
        };

        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler));

        with_http_layers(self.engine.mount(router), &self.config).with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until the shutdown signal fires, then drains
    /// in-flight dispatches for up to `drain_timeout`.
    ///
    /// When the signal fires the engine stops admitting dispatches, so
    /// requests still arriving on open connections get an unavailable
    /// envelope while running calls finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server
    /// hits a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let controller = self.shutdown;
        let drain_timeout = self.config.drain_timeout;

        controller.set_ready();
        info!(
            operations = self.engine.registry().len(),
            "serving HTTP connections"
        );

        let signal = {
            let controller = Arc::clone(&controller);
            async move {
                shutdown.await;
                controller.trigger_shutdown();
            }
        };
        let mut draining = controller.shutdown_receiver();
        let server = axum::serve(listener, router).with_graceful_shutdown(signal);

        tokio::select! {
            result = server.into_future() => result?,
            () = async {
                let signalled = draining.wait_for(|stopping| *stopping).await.is_ok();
                // Closed sender: no deadline, the server decides.
                if !signalled {
                    std::future::pending::<()>().await;
                }
                tokio::time::sleep(drain_timeout).await;
            } => {
                warn!("connections still open after drain timeout");
            }
        }

        controller.trigger_shutdown();
        if controller.wait_for_drain(drain_timeout).await {
            info!("all in-flight dispatches drained");
        } else {
            warn!(
                remaining = controller.in_flight(),
                "drain timeout expired with dispatches still running"
            );
        }
        Ok(())
    }
}
