//! HTTP server and route wiring.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, MethodRouter};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::auth::{AuthStep, Authenticator};
use super::handlers;
use super::pipeline::{run_pipeline, Pipeline};
use super::rate_limit::RateLimitStep;
use crate::config::{FailureMode, MealmatchConfig};
use crate::error::{MealmatchError, Result};
use crate::ratelimit::{reload_shared, RateLimiter, SharedRules};
use crate::store::MemoryCounterStore;

/// Route key of the demo rate-limited endpoint.
pub const INDEX_ROUTE: &str = "index";

/// Everything a protected route needs to build its pipeline.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub rules: SharedRules,
    pub failure_mode: FailureMode,
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(limiter: Arc<RateLimiter>, rules: SharedRules) -> Self {
        Self {
            limiter,
            rules,
            failure_mode: FailureMode::default(),
            trust_forwarded_for: false,
        }
    }

    /// Take failure mode and proxy trust from `config`.
    pub fn with_config(mut self, config: &MealmatchConfig) -> Self {
        self.failure_mode = config.rate_limiting.failure_mode;
        self.trust_forwarded_for = config.server.trust_forwarded_for;
        self
    }

    fn rate_limit_step(&self) -> RateLimitStep {
        RateLimitStep::new(self.limiter.clone(), self.rules.clone())
            .with_failure_mode(self.failure_mode)
            .trust_forwarded_for(self.trust_forwarded_for)
    }
}

/// Router builder that puts every protected route behind its own pipeline.
pub struct GatewayRouter {
    state: AppState,
    router: Router,
}

impl GatewayRouter {
    /// Start with the unprotected health endpoint.
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            router: Router::new().route("/health", get(handlers::health)),
        }
    }

    /// Mount `method_router` at `path`, rate limited under `route_key`.
    pub fn protected(self, path: &str, route_key: &str, method_router: MethodRouter) -> Self {
        let pipeline = Pipeline::builder(route_key)
            .step(self.state.rate_limit_step())
            .build();
        self.mount(path, method_router, pipeline)
    }

    /// Mount `method_router` at `path`, rate limited and then authenticated.
    pub fn authenticated(
        self,
        path: &str,
        route_key: &str,
        method_router: MethodRouter,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let pipeline = Pipeline::builder(route_key)
            .step(self.state.rate_limit_step())
            .step(AuthStep::new(authenticator))
            .build();
        self.mount(path, method_router, pipeline)
    }

    fn mount(self, path: &str, method_router: MethodRouter, pipeline: Pipeline) -> Self {
        let method_router = method_router.route_layer(from_fn_with_state(pipeline, run_pipeline));
        Self {
            state: self.state,
            router: self.router.route(path, method_router),
        }
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

/// The gateway's default routes.
pub fn router(state: AppState) -> Router {
    GatewayRouter::new(state)
        .protected("/rate-limited", INDEX_ROUTE, get(handlers::rate_limited))
        .into_router()
}

/// HTTP server for the gateway.
pub struct ApiServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes to serve
    router: Router,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Bind the listener without serving yet.
    pub async fn bind(self) -> Result<BoundApiServer> {
        let listener = TcpListener::bind(self.addr).await?;
        Ok(BoundApiServer {
            listener,
            router: self.router,
        })
    }

    /// Bind, then serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.bind().await?.serve_with_shutdown(signal).await
    }
}

/// An [`ApiServer`] whose listener is bound.
pub struct BoundApiServer {
    listener: TcpListener,
    router: Router,
}

impl BoundApiServer {
    /// The address actually bound, with the real port when `:0` was asked for.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let local_addr = self.local_addr()?;

        info!(addr = %local_addr, "Starting HTTP server");

        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            MealmatchError::Io(e)
        })
    }
}

/// Reload rules from `path` every `interval`.
pub fn spawn_rules_reload(rules: SharedRules, path: PathBuf, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            // Failures are logged inside and the old rules kept.
            let _ = reload_shared(&rules, &path);
        }
    })
}

/// Sweep expired counters from the memory store every `interval`.
pub fn spawn_counter_purge(store: Arc<MemoryCounterStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            store.purge_expired();
        }
    })
}
