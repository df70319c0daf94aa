use std::time::Duration;

use chrono::Utc;
use indexer_chain::ChainClient;
use indexer_common::error::AppError;
use indexer_common::types::BlockHeader;
use sqlx::PgPool;

/// Outcome of a reorg probe against a single newly-claimed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgOutcome {
    NoReorg,
    ReorgDetected { fork_point: u64 },
}

/// Caches recent `(block_number -> hash)` pairs in `block_cache` and
/// detects chain reorganizations by comparing a newly-claimed block's
/// parent hash against the cached hash for its predecessor.
///
/// Per the resolved design question (see DESIGN.md): `find_fork` does not
/// trust the cache alone — it re-fetches canonical headers from the chain
/// at each candidate depth, so an over-deep rewind still converges even
/// from a conservative starting guess.
pub struct ReorgDetector {
    pool: PgPool,
    cache_depth: u32,
}

impl ReorgDetector {
    pub fn new(pool: PgPool, cache_depth: u32) -> Self {
        Self { pool, cache_depth }
    }

    /// Checks a block the Worker just fetched against the cache, caching it
    /// if no reorg is detected.
    pub async fn check<C: ChainClient>(
        &self,
        client: &C,
        header: &BlockHeader,
        deadline: Duration,
    ) -> Result<ReorgOutcome, AppError> {
        if header.number == 0 {
            self.cache_block(header).await?;
            return Ok(ReorgOutcome::NoReorg);
        }

        let previous = self.cached_hash(header.number - 1).await?;
        match previous {
            None => {
                self.cache_block(header).await?;
                Ok(ReorgOutcome::NoReorg)
            }
            Some(ref prev_hash) if *prev_hash == header.parent_hash => {
                self.cache_block(header).await?;
                Ok(ReorgOutcome::NoReorg)
            }
            Some(_) => {
                tracing::warn!(
                    block = header.number,
                    "parent hash mismatch against cache, probing for fork point"
                );
                let fork_point = self.find_fork(client, header.number, deadline).await?;
                Ok(ReorgOutcome::ReorgDetected { fork_point })
            }
        }
    }

    /// Walks backward from `from - 1`, re-fetching canonical headers to
    /// find the highest block that is still canonical. Returns the block
    /// after it as the fork point. If the walk exhausts the cached window
    /// without finding agreement, returns `min_cached - 1` as a
    /// conservative rewind target.
    async fn find_fork<C: ChainClient>(
        &self,
        client: &C,
        from: u64,
        deadline: Duration,
    ) -> Result<u64, AppError> {
        let min_cached = self.min_cached_block().await?.unwrap_or(0);
        let mut candidate = from.saturating_sub(1);

        loop {
            if let Some(cached_hash) = self.cached_hash(candidate).await?
                && let Ok(canonical) = client.block_header(candidate, deadline).await
                && canonical.hash == cached_hash
            {
                return Ok(candidate + 1);
            }

            if candidate <= min_cached {
                break;
            }
            candidate -= 1;
        }

        Ok(min_cached.saturating_sub(1))
    }

    async fn cached_hash(&self, block_number: u64) -> Result<Option<String>, AppError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT block_hash FROM block_cache WHERE block_number = $1")
                .bind(block_number as i64)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(h,)| h))
    }

    async fn min_cached_block(&self) -> Result<Option<u64>, AppError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT MIN(block_number) FROM block_cache")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(n,)| if n >= 0 { Some(n as u64) } else { None }))
    }

    async fn cache_block(&self, header: &BlockHeader) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO block_cache (block_number, block_hash, parent_hash, timestamp, cached_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (block_number) DO UPDATE SET
                block_hash = EXCLUDED.block_hash,
                parent_hash = EXCLUDED.parent_hash,
                timestamp = EXCLUDED.timestamp,
                cached_at = EXCLUDED.cached_at
            "#,
        )
        .bind(header.number as i64)
        .bind(&header.hash)
        .bind(&header.parent_hash)
        .bind(header.timestamp)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.evict_stale().await
    }

    /// Evicts entries past the configured cache depth or older than 7 days.
    async fn evict_stale(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            DELETE FROM block_cache
            WHERE cached_at < NOW() - INTERVAL '7 days'
               OR block_number < (SELECT MAX(block_number) - $1 FROM block_cache)
            "#,
        )
        .bind(self.cache_depth as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
