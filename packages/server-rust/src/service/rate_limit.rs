//! Per-operation rate limiting.
//!
//! - [`RateLimiter`]: the limiter interface the pipeline consults.
//! - [`MemoryRateLimiter`]: fixed-window counters in a sharded map, swept of
//!   closed windows as calls arrive.
//! - [`rate_limit_key`]: builds the counter key for one call.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use switchyard_core::{Identifier, Principal, RateLimitConfig, RequestContext};
use tokio::time::Instant;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Permits left in the current window after this call.
    Allowed { remaining: u32 },
    /// Time until the current window closes.
    Denied { retry_after: Duration },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Counts calls against a [`RateLimitConfig`].
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consumes one permit for `key`.
    async fn acquire(&self, key: &str, config: &RateLimitConfig) -> Decision;
}

/// Counter key: the configured prefix, the identifier, and the caller
/// (principal id, or client IP for anonymous callers).
#[must_use]
pub fn rate_limit_key(
    config: &RateLimitConfig,
    identifier: &Identifier,
    principal: &Principal,
    request: &RequestContext,
) -> String {
    let caller = if principal.is_anonymous() {
        request.client_ip.as_deref().unwrap_or(Principal::ANONYMOUS_ID)
    } else {
        principal.id.as_str()
    };
    match &config.key {
        Some(prefix) => format!("{prefix}|{identifier}|{caller}"),
        None => format!("{identifier}|{caller}"),
    }
}

// ---------------------------------------------------------------------------
// MemoryRateLimiter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    period: Duration,
    count: u32,
}

/// Sweep interval of [`MemoryRateLimiter::new`].
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// In-process fixed-window limiter.
///
/// Increment-and-check runs under the key's shard lock, so concurrent calls
/// on the same key never over-admit. The first call after each purge
/// interval drops every closed window, so the map only holds keys seen
/// within the last interval plus the longest period.
#[derive(Debug)]
pub struct MemoryRateLimiter {
    windows: DashMap<String, Window>,
    purge_interval: Duration,
    last_purge: Mutex<Instant>,
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }

    #[must_use]
    pub fn with_purge_interval(purge_interval: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            purge_interval,
            last_purge: Mutex::new(Instant::now()),
        }
    }

    /// Purges when the interval has passed. Only one caller sweeps; the
    /// others skip instead of waiting on the lock.
    fn maybe_purge(&self, now: Instant) {
        let Some(mut last) = self.last_purge.try_lock() else {
            return;
        };
        if now.duration_since(*last) < self.purge_interval {
            return;
        }
        *last = now;
        drop(last);

        let purged = self.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "expired rate limit windows purged");
        }
    }

    /// Drops windows that have closed. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.duration_since(window.started) < window.period);
        before.saturating_sub(self.windows.len())
    }

    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn acquire_now(&self, key: &str, config: &RateLimitConfig, now: Instant) -> Decision {
        if !config.is_enabled() {
            return Decision::Allowed {
                remaining: u32::MAX,
            };
        }

        // Before taking the entry: `retain` locks every shard.
        self.maybe_purge(now);

        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            period: config.period,
            count: 0,
        });

        let elapsed = now.duration_since(window.started);
        if elapsed >= window.period || window.period != config.period {
            *window = Window {
                started: now,
                period: config.period,
                count: 0,
            };
        }

        if window.count >= config.max {
            let retry_after = window.period.saturating_sub(now.duration_since(window.started));
            return Decision::Denied { retry_after };
        }
        window.count += 1;
        Decision::Allowed {
            remaining: config.max - window.count,
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn acquire(&self, key: &str, config: &RateLimitConfig) -> Decision {
        self.acquire_now(key, config, Instant::now())
    }
}
