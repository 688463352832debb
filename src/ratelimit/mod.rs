//! Rate limiting logic and policies.

mod clock;
mod limiter;
mod rules;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{Decision, RateLimiter};
pub use rules::{
    reload_shared, RateLimitRules, RatePolicy, RouteRule, SharedRules, DEFAULT_LIMIT,
    DEFAULT_PERIOD_SECONDS,
};
pub use window::{
    counter_key, window_reset_at, RateLimitWindow, DEFAULT_EXPIRATION_WINDOW_SECS,
    DEFAULT_KEY_PREFIX, MAX_DEADLINE_SECS, MAX_PERIOD_SECONDS,
};
