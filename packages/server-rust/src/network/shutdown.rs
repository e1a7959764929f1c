//! Graceful shutdown: health state for orchestrators and the engine drain.
//!
//! Triggering shutdown stops the engine from admitting new dispatches; the
//! drain then waits on the engine's own in-flight count, so calls arriving
//! over any router strategy are covered.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::service::Engine;

/// Server health state.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Resources are still being registered.
    Starting,
    /// Every startup resource is registered and the listener is serving.
    Ready,
    /// Shutdown was requested; new dispatches are refused.
    Draining,
    /// The engine has no dispatch left in flight.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Moves one engine through startup, draining, and stop.
pub struct ShutdownController {
    engine: Arc<Engine>,
    shutdown_signal: watch::Sender<bool>,
    health_state: ArcSwap<HealthState>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            engine,
            shutdown_signal: tx,
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Returns a receiver that flips to `true` when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Moves to `Draining`, closes the engine to new dispatches, and signals
    /// all shutdown receivers. Calling it again is a no-op.
    pub fn trigger_shutdown(&self) {
        if *self.shutdown_signal.borrow() {
            return;
        }
        self.health_state.store(Arc::new(HealthState::Draining));
        self.engine.stop_accepting();
        // Receivers may have been dropped.
        self.shutdown_signal.send_replace(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Dispatches still running inside the engine.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.engine.in_flight()
    }

    /// Waits for the engine's in-flight dispatches to finish, up to `timeout`.
    ///
    /// Returns `true` (and moves to `Stopped`) when everything drained,
    /// `false` when the timeout expired first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.engine.in_flight() == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
