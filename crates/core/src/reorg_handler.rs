use chrono::Utc;
use indexer_cache::QueryCache;
use indexer_common::error::AppError;
use indexer_common::types::IndexerStatus;
use sqlx::PgPool;

/// Transactionally rolls back a contract's events and progress below a
/// detected fork point.
pub struct ReorgHandler {
    pool: PgPool,
}

impl ReorgHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Performs the four-step rollback atomically. On commit failure, no
    /// changes are applied.
    pub async fn handle(
        &self,
        contract_address: &str,
        fork_point: u64,
        start_block: i64,
        cache: &mut QueryCache,
    ) -> Result<(), AppError> {
        let new_current_block = (fork_point as i64 - 1).max(start_block);

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM events WHERE contract_address = $1 AND block_number >= $2")
            .bind(contract_address)
            .bind(fork_point as i64)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE contracts SET current_block = $1, updated_at = NOW() WHERE address = $2")
            .bind(new_current_block)
            .bind(contract_address)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE indexer_state
            SET status = $1, last_indexed_block = $2, last_processed_at = $3, updated_at = NOW()
            WHERE contract_address = $4
            "#,
        )
        .bind(IndexerStatus::ReorgRecovery)
        .bind(new_current_block)
        .bind(Utc::now())
        .bind(contract_address)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        cache.invalidate_contract(contract_address).await?;

        tracing::warn!(
            contract = contract_address,
            fork_point,
            new_current_block,
            "reorg rollback committed"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Exercising `handle` requires a live Postgres instance; see
    // `tests/integration.rs` for the `#[sqlx::test]`-backed coverage of the
    // post-reorg consistency invariant (no Event with block_number >= fork_point).
}
