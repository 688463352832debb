//! HTTP surface of the gateway.
//!
//! Each protected route runs its own [`Pipeline`] of request steps before the
//! handler: rate limiting first, then authentication where required.

pub mod auth;
pub mod handlers;
pub mod pipeline;
pub mod rate_limit;
pub mod response;
pub mod server;

pub use auth::{AuthStep, Authenticator, Principal};
pub use pipeline::{Flow, Pipeline, PipelineBuilder, RequestContext, RequestStep};
pub use rate_limit::{client_scope, RateLimitStep};
pub use server::{
    router, spawn_counter_purge, spawn_rules_reload, ApiServer, AppState, BoundApiServer,
    GatewayRouter,
};
