//! Rate limit step for the request pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request};
use tracing::{error, warn};

use super::pipeline::{Flow, RequestContext, RequestStep};
use super::response;
use crate::config::FailureMode;
use crate::error::MealmatchError;
use crate::ratelimit::{RateLimiter, SharedRules};

/// Scope used when the caller's address cannot be determined.
pub const UNKNOWN_SCOPE: &str = "unknown";

/// Counts the request against its route's policy and rejects it with 429
/// once the caller's window budget is spent.
pub struct RateLimitStep {
    limiter: Arc<RateLimiter>,
    rules: SharedRules,
    failure_mode: FailureMode,
    trust_forwarded_for: bool,
}

impl RateLimitStep {
    pub fn new(limiter: Arc<RateLimiter>, rules: SharedRules) -> Self {
        Self {
            limiter,
            rules,
            failure_mode: FailureMode::default(),
            trust_forwarded_for: false,
        }
    }

    /// Choose what happens when the counter store is unreachable.
    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Take the scope from `X-Forwarded-For` when the header is present.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

#[async_trait]
impl RequestStep for RateLimitStep {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn on_request(&self, ctx: &mut RequestContext, request: &mut Request) -> Flow {
        let scope = client_scope(request, self.trust_forwarded_for);
        let policy = self.rules.read().policy_for(&ctx.route_key);
        ctx.send_rate_headers = policy.send_headers;

        let result = self
            .limiter
            .check(&ctx.route_key, &scope, policy.limit, policy.period_seconds)
            .await;

        match result {
            Ok(decision) => {
                ctx.decision = Some(decision);
                if decision.allowed {
                    Flow::Continue
                } else {
                    Flow::Respond(response::rate_limited())
                }
            }
            Err(MealmatchError::StoreUnavailable(reason)) => match self.failure_mode {
                FailureMode::Open => {
                    warn!(
                        route = %ctx.route_key,
                        scope = %scope,
                        reason = %reason,
                        "Counter store unavailable, allowing request"
                    );
                    Flow::Continue
                }
                FailureMode::Closed => {
                    error!(
                        route = %ctx.route_key,
                        scope = %scope,
                        reason = %reason,
                        "Counter store unavailable, rejecting request"
                    );
                    Flow::Respond(response::limiter_unavailable())
                }
            },
            Err(e) => {
                error!(route = %ctx.route_key, error = %e, "Rate limit check failed");
                Flow::Respond(response::internal_error())
            }
        }
    }
}

/// The caller identity used to partition rate limits.
///
/// With `trust_forwarded_for`, the left-most `X-Forwarded-For` entry wins;
/// otherwise the peer address of the connection is used.
pub fn client_scope(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        if let Some(addr) = forwarded {
            return addr.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_SCOPE.to_string())
}
