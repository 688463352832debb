//! Fixed, wall-clock-aligned rate limit windows.

/// Default prefix for counter keys in the shared store.
pub const DEFAULT_KEY_PREFIX: &str = "rate-limit";

/// Default grace period, in seconds, a counter outlives its window.
pub const DEFAULT_EXPIRATION_WINDOW_SECS: u64 = 10;

/// Latest expiry deadline a store accepts, in epoch seconds.
///
/// Redis keeps expiry as signed milliseconds, so deadlines past
/// `i64::MAX / 1000` are rejected by `EXPIREAT`.
pub const MAX_DEADLINE_SECS: u64 = i64::MAX as u64 / 1000;

/// Longest accepted window length, in seconds.
pub const MAX_PERIOD_SECONDS: u64 = MAX_DEADLINE_SECS / 2;

/// One aligned window for a `(route_key, scope)` pair.
///
/// Windows are not persisted; they are derived per request from the
/// current time. Every caller sharing a window agrees on `reset_at`
/// because the boundary is aligned to absolute time rather than to the
/// first request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitWindow {
    /// Identity of the caller
    pub scope: String,
    /// Identity of the protected operation
    pub route_key: String,
    /// Maximum requests in the window
    pub limit: u64,
    /// Window length in seconds
    pub period_seconds: u64,
    /// Epoch second at which this window ends
    pub reset_at: u64,
    /// Key of the shared counter for this window
    pub counter_key: String,
}

impl RateLimitWindow {
    /// Derive the window containing `now` (epoch seconds).
    ///
    /// `period_seconds` must be non-zero; the limiter validates this before
    /// calling. Returns `None` if the window end does not fit in a `u64`.
    pub fn at(
        prefix: &str,
        route_key: &str,
        scope: &str,
        limit: u64,
        period_seconds: u64,
        now: u64,
    ) -> Option<Self> {
        let reset_at = window_reset_at(now, period_seconds)?;

        Some(Self {
            scope: scope.to_string(),
            route_key: route_key.to_string(),
            limit,
            period_seconds,
            reset_at,
            counter_key: counter_key(prefix, route_key, scope, reset_at),
        })
    }

    /// The deadline after which the store may drop this window's counter,
    /// or `None` if it lies past [`MAX_DEADLINE_SECS`].
    pub fn expires_at(&self, grace_secs: u64) -> Option<u64> {
        self.reset_at
            .checked_add(grace_secs)
            .filter(|deadline| *deadline <= MAX_DEADLINE_SECS)
    }
}

/// End of the window containing `now`: `floor(now / period) * period + period`.
pub fn window_reset_at(now: u64, period_seconds: u64) -> Option<u64> {
    ((now / period_seconds) * period_seconds).checked_add(period_seconds)
}

/// Format: "{prefix}/{route_key}/{scope}{reset_at}"
pub fn counter_key(prefix: &str, route_key: &str, scope: &str, reset_at: u64) -> String {
    format!("{}/{}/{}{}", prefix, route_key, scope, reset_at)
}
