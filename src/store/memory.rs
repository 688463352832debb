//! In-process counter store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::CounterStore;
use crate::error::Result;
use crate::ratelimit::Clock;

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expire_at: u64,
}

/// Counter store that lives inside one process.
///
/// Counters are only shared between tasks of this process, so this backend
/// suits single-node deployments and tests. Expiry follows Redis `EXPIREAT`
/// semantics: an entry whose deadline has passed reads as absent.
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    /// Current value of `key`, or `None` if absent or expired.
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_secs();
        self.counters
            .get(key)
            .filter(|entry| entry.expire_at > now)
            .map(|entry| entry.count)
    }

    /// Expiry deadline of `key`, or `None` if absent or expired.
    pub fn expire_at(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_secs();
        self.counters
            .get(key)
            .filter(|entry| entry.expire_at > now)
            .map(|entry| entry.expire_at)
    }

    /// Drop every expired counter. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_secs();
        let before = self.counters.len();
        self.counters.retain(|_, entry| entry.expire_at > now);
        let removed = before.saturating_sub(self.counters.len());

        if removed > 0 {
            debug!(removed = removed, remaining = self.counters.len(), "Purged expired counters");
        }
        removed
    }

    /// Number of stored counters, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_and_expire_at(&self, key: &str, expire_at: u64) -> Result<u64> {
        let now = self.clock.now_secs();

        // The entry guard holds the shard lock across the increment and the
        // expiry update.
        let count = match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.expire_at <= now {
                    entry.count = 0;
                }
                entry.count += 1;
                entry.expire_at = expire_at;
                let count = entry.count;

                if expire_at <= now {
                    occupied.remove();
                }
                count
            }
            Entry::Vacant(vacant) => {
                if expire_at > now {
                    vacant.insert(CounterEntry {
                        count: 1,
                        expire_at,
                    });
                }
                1
            }
        };

        trace!(key = %key, count = count, expire_at = expire_at, "Incremented memory counter");

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;

    fn store_at(now: u64) -> (Arc<ManualClock>, MemoryCounterStore) {
        let clock = Arc::new(ManualClock::new(now));
        let store = MemoryCounterStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_increment_counts_up() {
        let (_clock, store) = store_at(100);

        assert_eq!(store.incr_and_expire_at("a", 140).await.unwrap(), 1);
        assert_eq!(store.incr_and_expire_at("a", 140).await.unwrap(), 2);
        assert_eq!(store.incr_and_expire_at("b", 140).await.unwrap(), 1);

        assert_eq!(store.get("a"), Some(2));
        assert_eq!(store.expire_at("a"), Some(140));
    }

    #[tokio::test]
    async fn test_expired_counter_restarts() {
        let (clock, store) = store_at(100);

        store.incr_and_expire_at("a", 140).await.unwrap();
        store.incr_and_expire_at("a", 140).await.unwrap();

        clock.set(140);
        assert_eq!(store.get("a"), None);
        assert_eq!(store.incr_and_expire_at("a", 180).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_past_deadline_is_not_retained() {
        let (_clock, store) = store_at(100);

        assert_eq!(store.incr_and_expire_at("a", 90).await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (clock, store) = store_at(100);

        store.incr_and_expire_at("old", 110).await.unwrap();
        store.incr_and_expire_at("new", 200).await.unwrap();
        assert_eq!(store.len(), 2);

        clock.set(150);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("new"), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let (_clock, store) = store_at(100);
        let store = Arc::new(store);

        let tasks = (0..50).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.incr_and_expire_at("shared", 200).await.unwrap() })
        });
        let mut counts: Vec<u64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        counts.sort_unstable();

        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
        assert_eq!(store.get("shared"), Some(50));
    }
}
