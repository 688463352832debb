//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, instrument, trace};

use super::clock::{Clock, SystemClock};
use super::window::{
    RateLimitWindow, DEFAULT_EXPIRATION_WINDOW_SECS, DEFAULT_KEY_PREFIX, MAX_PERIOD_SECONDS,
};
use crate::error::{MealmatchError, Result};
use crate::store::CounterStore;

/// The outcome of one rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request fits in the window's budget
    pub allowed: bool,
    /// Requests left in the window, never negative
    pub remaining: u64,
    /// Maximum requests in the window
    pub limit: u64,
    /// Epoch second at which the window ends
    pub reset_at: u64,
}

impl Decision {
    /// Build a decision from the value the store returned after incrementing.
    ///
    /// The count is clamped to `limit` before computing `remaining`, so a
    /// caller exactly at the limit and one far over it both see `0`.
    pub fn from_count(count: u64, limit: u64, reset_at: u64) -> Self {
        let current = count.min(limit);

        Self {
            allowed: count <= limit,
            remaining: limit - current,
            limit,
            reset_at,
        }
    }
}

/// Fixed-window rate limiter over a shared [`CounterStore`].
///
/// The limiter holds no counters of its own, so any number of instances
/// across processes can share one store and agree on every decision.
pub struct RateLimiter {
    /// Store holding the per-window counters
    store: Arc<dyn CounterStore>,
    /// Source of wall-clock time for window alignment
    clock: Arc<dyn Clock>,
    /// Prefix of every counter key
    key_prefix: String,
    /// Seconds a counter outlives its window
    expiration_window_secs: u64,
}

impl RateLimiter {
    /// Create a rate limiter over `store` with default settings.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            expiration_window_secs: DEFAULT_EXPIRATION_WINDOW_SECS,
        }
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Prefix counter keys with `prefix` instead of `rate-limit`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Keep counters for `secs` after their window ends.
    pub fn with_expiration_window(mut self, secs: u64) -> Self {
        self.expiration_window_secs = secs;
        self
    }

    /// Check and count one request from `scope` against `route_key`.
    ///
    /// Exceeding the limit is reported through [`Decision::allowed`], not as
    /// an error. Errors are either invalid arguments or an unreachable
    /// store.
    #[instrument(level = "debug", skip(self))]
    pub async fn check(
        &self,
        route_key: &str,
        scope: &str,
        limit: u64,
        period_seconds: u64,
    ) -> Result<Decision> {
        validate(route_key, scope, limit, period_seconds)?;

        let now = self.clock.now_secs();
        let window = RateLimitWindow::at(
            &self.key_prefix,
            route_key,
            scope,
            limit,
            period_seconds,
            now,
        )
        .ok_or_else(|| {
            MealmatchError::InvalidConfiguration(format!(
                "window of {}s at {} ends past the representable range",
                period_seconds, now
            ))
        })?;
        let expire_at = window
            .expires_at(self.expiration_window_secs)
            .ok_or_else(|| {
                MealmatchError::InvalidConfiguration(format!(
                    "expiry {}s after {} exceeds the store's range",
                    self.expiration_window_secs, window.reset_at
                ))
            })?;

        trace!(
            key = %window.counter_key,
            reset_at = window.reset_at,
            expire_at = expire_at,
            "Checking rate limit"
        );

        let count = self
            .store
            .incr_and_expire_at(&window.counter_key, expire_at)
            .await?;

        let decision = Decision::from_count(count, limit, window.reset_at);

        if !decision.allowed {
            debug!(
                route = %route_key,
                scope = %scope,
                count = count,
                limit = limit,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// The grace period applied after each window.
    pub fn expiration_window_secs(&self) -> u64 {
        self.expiration_window_secs
    }
}

fn validate(route_key: &str, scope: &str, limit: u64, period_seconds: u64) -> Result<()> {
    if route_key.is_empty() {
        return Err(MealmatchError::InvalidConfiguration(
            "route key must not be empty".to_string(),
        ));
    }
    if scope.is_empty() {
        return Err(MealmatchError::InvalidConfiguration(
            "scope must not be empty".to_string(),
        ));
    }
    if limit == 0 {
        return Err(MealmatchError::InvalidConfiguration(
            "limit must be positive".to_string(),
        ));
    }
    if period_seconds == 0 {
        return Err(MealmatchError::InvalidConfiguration(
            "period must be positive".to_string(),
        ));
    }
    if period_seconds > MAX_PERIOD_SECONDS {
        return Err(MealmatchError::InvalidConfiguration(format!(
            "period must not exceed {} seconds",
            MAX_PERIOD_SECONDS
        )));
    }
    Ok(())
}
