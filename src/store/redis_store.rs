//! Redis-backed counter store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{error, trace};

use super::CounterStore;
use crate::error::{MealmatchError, Result};

/// Counter store shared by every gateway process pointed at the same Redis.
///
/// The increment and the expiry are sent as one `MULTI`/`EXEC` pipeline, so
/// no caller can observe a counter that was incremented but never given a
/// deadline.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Open a reconnecting connection to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| MealmatchError::Config(format!("Invalid Redis URL '{}': {}", url, e)))?;
        let connection_manager = client.get_connection_manager().await?;

        Ok(Self::from_connection_manager(connection_manager))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection_manager(connection_manager: ConnectionManager) -> Self {
        Self { connection_manager }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_and_expire_at(&self, key: &str, expire_at: u64) -> Result<u64> {
        let deadline = expire_at_arg(expire_at)?;
        let mut connection_manager = self.connection_manager.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire_at(key, deadline)
            .ignore()
            .query_async(&mut connection_manager)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Counter increment failed");
                MealmatchError::from(e)
            })?;

        trace!(key = %key, count = count, expire_at = expire_at, "Incremented Redis counter");

        Ok(count)
    }
}

/// `EXPIREAT` takes a signed timestamp.
fn expire_at_arg(expire_at: u64) -> Result<i64> {
    i64::try_from(expire_at).map_err(|_| {
        MealmatchError::InvalidConfiguration(format!(
            "expiry deadline {} does not fit EXPIREAT",
            expire_at
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Clock, SystemClock};

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let result = RedisCounterStore::connect("not a redis url").await;
        assert!(matches!(result, Err(MealmatchError::Config(_))));
    }

    #[test]
    fn test_expire_at_arg_never_wraps_negative() {
        assert_eq!(expire_at_arg(1_700_000_040).unwrap(), 1_700_000_040);
        assert_eq!(expire_at_arg(i64::MAX as u64).unwrap(), i64::MAX);
        assert!(matches!(
            expire_at_arg(i64::MAX as u64 + 1),
            Err(MealmatchError::InvalidConfiguration(_))
        ));
        assert!(expire_at_arg(u64::MAX).is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis; set REDIS_URL"]
    async fn test_incr_and_expire_at_round_trip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let store = RedisCounterStore::connect(&url).await.unwrap();

        let key = format!("rate-limit/itest/{}", uuid::Uuid::new_v4());
        let expire_at = SystemClock.now_secs() + 40;

        assert_eq!(store.incr_and_expire_at(&key, expire_at).await.unwrap(), 1);
        assert_eq!(store.incr_and_expire_at(&key, expire_at).await.unwrap(), 2);

        let mut conn = store.connection_manager.clone();
        let ttl: i64 = redis::cmd("TTL").arg(&key).query_async(&mut conn).await.unwrap();
        assert!(ttl > 0 && ttl <= 40, "ttl was {}", ttl);

        let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await.unwrap();
    }
}
