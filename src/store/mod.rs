//! Shared counter stores.
//!
//! The rate limiter never keeps counters in process memory of its own: it
//! delegates every increment to a [`CounterStore`], which must apply the
//! increment and the expiry deadline as one atomic step. Redis is the
//! production backend; the in-memory store serves single-node deployments
//! and tests.

mod memory;
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::ratelimit::Clock;

pub use self::memory::MemoryCounterStore;
pub use self::redis_store::RedisCounterStore;

/// A process-external counter with atomic increment and expire-at.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one and set its expiry to `expire_at` (epoch
    /// seconds) in the same atomic batch. Returns the incremented value.
    async fn incr_and_expire_at(&self, key: &str, expire_at: u64) -> Result<u64>;
}

/// Which counter store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// How often the in-memory store sweeps expired counters
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_purge_interval() -> u64 {
    60
}

/// A connected store plus the memory handle, if that backend was chosen,
/// so the caller can schedule sweeps.
pub struct ConnectedStore {
    pub store: Arc<dyn CounterStore>,
    pub memory: Option<Arc<MemoryCounterStore>>,
}

/// Connect to the configured backend.
pub async fn connect(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<ConnectedStore> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisCounterStore::connect(&config.redis_url).await?;
            info!(url = %config.redis_url, "Connected to Redis counter store");
            Ok(ConnectedStore {
                store: Arc::new(store),
                memory: None,
            })
        }
        StoreBackend::Memory => {
            let store = Arc::new(MemoryCounterStore::new(clock));
            info!("Using in-memory counter store; counters are not shared across processes");
            Ok(ConnectedStore {
                store: store.clone(),
                memory: Some(store),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, StoreBackend::Redis);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.purge_interval_secs, 60);
    }

    #[test]
    fn test_backend_parses_lowercase() {
        let config: StoreConfig = serde_yaml::from_str("backend: memory").unwrap();
        assert_eq!(config.backend, StoreBackend::Memory);
    }

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..Default::default()
        };
        let connected = connect(&config, Arc::new(ManualClock::new(0))).await.unwrap();
        assert!(connected.memory.is_some());

        let count = connected.store.incr_and_expire_at("k", 10).await.unwrap();
        assert_eq!(count, 1);
    }
}
