//! HTTP handler definitions for the Switchyard server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports the health handlers. Operation endpoints are
//! mounted by the engine's router strategies.

pub mod health;

pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::service::Engine;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Registry, strategies, and dispatch pipeline.
    pub engine: Arc<Engine>,
    /// Health state and engine drain.
    pub shutdown: Arc<ShutdownController>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
