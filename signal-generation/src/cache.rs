// Indicator cache
// Per (asset, indicator) readings reused within a TTL

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedReading {
    pub raw_value: f64,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    reading: CachedReading,
    stored: Instant,
}

/// Concurrent TTL cache. Only available readings are stored.
#[derive(Debug)]
pub struct SignalCache {
    entries: DashMap<(String, String), Entry>,
    ttl: Duration,
}

impl SignalCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh reading, if any. Expired entries are dropped on access.
    pub fn get(&self, asset: &str, indicator_id: &str) -> Option<CachedReading> {
        if self.ttl.is_zero() {
            return None;
        }

        let key = (asset.to_string(), indicator_id.to_string());
        let entry = *self.entries.get(&key)?;
        if entry.stored.elapsed() < self.ttl {
            Some(entry.reading)
        } else {
            self.entries.remove(&key);
            None
        }
    }

    pub fn insert(&self, asset: &str, indicator_id: &str, reading: CachedReading) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(
            (asset.to_string(), indicator_id.to_string()),
            Entry {
                reading,
                stored: Instant::now(),
            },
        );
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.stored.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(value: f64) -> CachedReading {
        CachedReading {
            raw_value: value,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_cache_hit_within_ttl() {
        let cache = SignalCache::new(Duration::from_secs(60));
        cache.insert("BTC", "rsi_14", reading(31.0));

        assert_eq!(cache.get("BTC", "rsi_14").map(|r| r.raw_value), Some(31.0));
        assert!(cache.get("ETH", "rsi_14").is_none());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = SignalCache::new(Duration::from_millis(1));
        cache.insert("BTC", "rsi_14", reading(31.0));
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get("BTC", "rsi_14").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = SignalCache::new(Duration::ZERO);
        cache.insert("BTC", "rsi_14", reading(31.0));
        assert!(cache.get("BTC", "rsi_14").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let cache = SignalCache::new(Duration::from_millis(1));
        cache.insert("BTC", "a", reading(1.0));
        cache.insert("BTC", "b", reading(2.0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.purge_expired(), 2);
    }
}
