use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::info;

use mealmatch::config::MealmatchConfig;
use mealmatch::http::{self, ApiServer, AppState};
use mealmatch::logging;
use mealmatch::ratelimit::{Clock, RateLimitRules, RateLimiter, SystemClock};
use mealmatch::store;

/// Command line arguments; anything set here wins over file and environment.
#[derive(Parser, Debug)]
#[command(name = "mealmatch")]
#[command(about = "Rate-limited HTTP gateway for the meal matchmaking API")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Redis connection URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Log level or filter directive
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = MealmatchConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(redis_url) = args.redis_url {
        config.store.redis_url = redis_url;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    logging::init(&config.logging)?;

    info!("Starting Mealmatch gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        failure_mode = ?config.rate_limiting.failure_mode,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let connected = store::connect(&config.store, clock.clone()).await?;

    let limiter = Arc::new(
        RateLimiter::new(connected.store)
            .with_clock(clock)
            .with_key_prefix(config.rate_limiting.key_prefix.clone())
            .with_expiration_window(config.rate_limiting.expiration_window_secs),
    );
    info!("Rate limiter initialized");

    let rules = match &config.rate_limiting.rules_path {
        Some(path) => RateLimitRules::from_file(path)?,
        None => RateLimitRules::new(),
    }
    .into_shared();

    if let Some(path) = &config.rate_limiting.rules_path {
        http::spawn_rules_reload(
            rules.clone(),
            PathBuf::from(path),
            Duration::from_secs(config.rate_limiting.reload_interval_secs),
        );
    }
    if let Some(memory) = connected.memory {
        http::spawn_counter_purge(
            memory,
            Duration::from_secs(config.store.purge_interval_secs),
        );
    }

    let state = AppState::new(limiter, rules).with_config(&config);
    let server = ApiServer::new(config.server.listen_addr, http::router(state));

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Mealmatch gateway stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
