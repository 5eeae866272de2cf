use super::{CounterStore, CounterStoreError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Process-local counter store. Counters are not shared between instances.
///
/// Expired windows are dropped on access, at most once per prune interval.
pub struct InMemoryCounterStore {
    counters: DashMap<String, (i64, Instant)>,
    prune_interval: Duration,
    last_pruned: Mutex<Instant>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_prune_interval(DEFAULT_PRUNE_INTERVAL)
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prune_interval(prune_interval: Duration) -> Self {
        Self {
            counters: DashMap::new(),
            prune_interval,
            last_pruned: Mutex::new(Instant::now()),
        }
    }

    /// Stored window keys, including expired ones not yet pruned.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn prune_expired(&self, now: Instant) {
        {
            let mut last_pruned = self.last_pruned.lock();
            if now.duration_since(*last_pruned) < self.prune_interval {
                return;
            }
            *last_pruned = now;
        }
        // No entry guard may be held here
        self.counters.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[async_trait::async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, CounterStoreError> {
        let now = Instant::now();
        self.prune_expired(now);

        let mut entry = self.counters.entry(key.to_string()).or_insert((0, now + ttl));
        let (count, expires_at) = entry.value_mut();
        if *expires_at <= now {
            *count = 0;
            *expires_at = now + ttl;
        }
        *count += 1;
        Ok(*count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increments_and_expires() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.incr_with_expiry("k", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(store.incr_with_expiry("k", Duration::from_secs(60)).await.unwrap(), 2);
        assert_eq!(store.incr_with_expiry("other", Duration::from_secs(60)).await.unwrap(), 1);

        assert_eq!(store.incr_with_expiry("short", Duration::from_millis(10)).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(store.incr_with_expiry("short", Duration::from_millis(10)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_windows_are_pruned() {
        let store = InMemoryCounterStore::with_prune_interval(Duration::ZERO);
        for i in 0..100 {
            store
                .incr_with_expiry(&format!("quota:{i}:gpt-4o:60:0"), Duration::from_millis(10))
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 100);

        tokio::time::sleep(Duration::from_millis(25)).await;
        store.incr_with_expiry("live", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_prune_waits_for_interval() {
        let store = InMemoryCounterStore::with_prune_interval(Duration::from_secs(3600));
        store.incr_with_expiry("a", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.incr_with_expiry("b", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.len(), 2);
    }
}
