use std::sync::Arc;
use std::time::Duration;

use indexer_common::error::AppError;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;

use crate::bloom::BloomFilter;

const NEGATIVE_SENTINEL: &str = "\0__negative__";

/// TTL policy (informative, applied by callers composing cache keys):
/// event queries over recent block ranges (`to - from < 1000`).
pub const TTL_RECENT_EVENTS: Duration = Duration::from_secs(30);
/// wider event-range queries.
pub const TTL_WIDE_EVENTS: Duration = Duration::from_secs(5 * 60);
/// per-transaction queries (immutable once confirmed).
pub const TTL_TRANSACTION: Duration = Duration::from_secs(60 * 60);
/// aggregate stats queries.
pub const TTL_STATS: Duration = Duration::from_secs(5 * 60);
/// default TTL for negative-result sentinels.
pub const TTL_NEGATIVE: Duration = Duration::from_secs(10);

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Value),
    Miss,
    NegativeHit,
}

/// Keyed read-through cache fronting the event store. The cache is
/// oblivious to query semantics: callers derive keys as
/// `(kind, sha256(canonical_json(query)), version)` and hand them in as
/// opaque strings.
#[derive(Clone)]
pub struct QueryCache {
    redis: ConnectionManager,
    negative_filter: Arc<BloomFilter>,
}

impl QueryCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            negative_filter: Arc::new(BloomFilter::with_defaults()),
        }
    }

    pub async fn get(&mut self, key: &str) -> Result<CacheLookup, AppError> {
        let raw: Option<String> = self.redis.get(key).await?;
        Ok(match raw {
            Some(ref s) if s == NEGATIVE_SENTINEL => CacheLookup::NegativeHit,
            Some(s) => {
                let value = serde_json::from_str(&s)
                    .map_err(|e| AppError::Internal(format!("corrupt cache entry: {e}")))?;
                CacheLookup::Hit(value)
            }
            None => CacheLookup::Miss,
        })
    }

    pub async fn set(&mut self, key: &str, value: &Value, ttl: Duration) -> Result<(), AppError> {
        let payload = serde_json::to_string(value)
            .map_err(|e| AppError::Internal(format!("cache serialization failed: {e}")))?;
        self.redis
            .set_ex::<_, _, ()>(key, payload, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    /// Sets a short-lived negative sentinel for `key`. Writes are gated by
    /// the process-local bloom filter: if the filter already reports this
    /// key as a known-empty query, the redundant redis write is skipped.
    pub async fn mark_empty(&mut self, key: &str, ttl: Duration) -> Result<(), AppError> {
        if self.negative_filter.might_contain(key) {
            return Ok(());
        }
        self.negative_filter.insert(key);
        self.redis
            .set_ex::<_, _, ()>(key, NEGATIVE_SENTINEL, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    /// Removes all entries whose key matches any of the three
    /// contract-scoped patterns. Must complete before the Worker's commit
    /// is observable externally.
    pub async fn invalidate_contract(&mut self, address: &str) -> Result<u64, AppError> {
        let patterns = [
            format!("query:*contract:{address}*"),
            format!("stats:*contract:{address}*"),
            format!("events:*contract:{address}*"),
        ];

        let mut removed = 0u64;
        for pattern in patterns {
            let mut iter: redis::AsyncIter<'_, String> =
                self.redis.scan_match(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            drop(iter);

            if !keys.is_empty() {
                removed += self.redis.del::<_, u64>(keys).await?;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_sentinel_is_distinguishable_from_any_json_value() {
        // The sentinel must never collide with a plausible serialized
        // payload so NegativeHit and Hit can't be confused.
        assert!(serde_json::from_str::<Value>(NEGATIVE_SENTINEL).is_err());
    }
}
