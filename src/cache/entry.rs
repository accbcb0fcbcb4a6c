use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Persisted cache record for one resource key. `last_fetched` is epoch
/// milliseconds and never moves backward for a given key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    pub last_fetched: i64,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now_ms: i64, stale_time: Duration) -> bool {
        let age = now_ms.saturating_sub(self.last_fetched);
        age < stale_time.as_millis() as i64
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Freshness window: a younger entry short-circuits the network call.
    pub stale_time: Duration,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Base delay, doubled per attempt.
    pub initial_retry_delay: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(30),
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(1),
        }
    }
}

pub(crate) fn storage_key(resource_key: &str) -> String {
    format!("cache:{}", resource_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_window() {
        let entry = CacheEntry {
            data: (),
            last_fetched: 10_000,
        };
        let stale_time = Duration::from_secs(30);
        assert!(entry.is_fresh(10_000, stale_time));
        assert!(entry.is_fresh(39_999, stale_time));
        assert!(!entry.is_fresh(40_000, stale_time));
        // A clock that jumped backward still reads as fresh.
        assert!(entry.is_fresh(5_000, stale_time));
    }
}
