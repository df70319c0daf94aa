use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexer_abi::decode::decode_log;
use indexer_abi::registry::AbiRegistry;
use indexer_chain::ChainClient;
use indexer_common::error::AppError;
use indexer_common::types::BackfillStatus;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Admin-issued historical fill. A specialization of the Worker's tick
/// logic with `confirm_blocks = 0` (historical blocks are already final)
/// and an explicit upper bound, persisting progress in
/// `backfill_jobs.current_block` rather than `contracts`/`indexer_state`.
/// Backfilled events collide harmlessly with live-indexed ones: the
/// `(transaction_hash, log_index)` uniqueness constraint is shared.
pub struct BackfillRunner<C> {
    pool: PgPool,
    chain: Arc<C>,
    batch_size: u64,
    rpc_deadline: Duration,
}

impl<C> BackfillRunner<C>
where
    C: ChainClient + Send + Sync + 'static,
{
    pub fn new(pool: PgPool, chain: Arc<C>, batch_size: u64, rpc_deadline: Duration) -> Self {
        Self {
            pool,
            chain,
            batch_size,
            rpc_deadline,
        }
    }

    /// Creates a new job row in `pending` status and returns its id.
    pub async fn create_job(
        &self,
        contract_address: &str,
        from_block: i64,
        to_block: i64,
    ) -> Result<Uuid, AppError> {
        if from_block > to_block {
            return Err(AppError::InvalidInput(format!(
                "inverted backfill range: {from_block} > {to_block}"
            )));
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO backfill_jobs (id, contract_address, from_block, to_block, current_block, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(contract_address)
        .bind(from_block)
        .bind(to_block)
        .bind(from_block)
        .bind(BackfillStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Runs a previously created job to completion (or cancellation).
    /// Progress at `from_block` is 0% and at `to_block` is 100%, tracked
    /// via `backfill_jobs.current_block`.
    pub async fn run(&self, job_id: Uuid, cancellation: CancellationToken) -> Result<(), AppError> {
        let job = self.load_job(job_id).await?;
        let registry = self.load_registry(&job.contract_address).await?;

        self.set_status(job_id, BackfillStatus::Running, None).await?;

        let mut current = job.current_block;
        while current < job.to_block {
            if cancellation.is_cancelled() {
                self.set_status(job_id, BackfillStatus::Cancelled, None)
                    .await?;
                return Ok(());
            }

            let to = (current + self.batch_size as i64 - 1).min(job.to_block);

            match self.run_batch(&job.contract_address, &registry, current + 1, to).await {
                Ok(()) => {
                    current = to;
                    self.advance(job_id, current).await?;
                }
                Err(e) => {
                    self.set_status(job_id, BackfillStatus::Failed, Some(e.to_string()))
                        .await?;
                    return Err(e);
                }
            }
        }

        self.set_status(job_id, BackfillStatus::Completed, None)
            .await?;
        Ok(())
    }

    async fn run_batch(
        &self,
        contract_address: &str,
        registry: &AbiRegistry,
        from: i64,
        to: i64,
    ) -> Result<(), AppError> {
        let address: alloy::primitives::Address = contract_address
            .parse()
            .map_err(|e| AppError::InvalidInput(format!("stored address malformed: {e}")))?;

        let logs = self
            .chain
            .logs(&[address], from as u64, to as u64, self.rpc_deadline)
            .await?;
        let header = self
            .chain
            .block_header(to as u64, self.rpc_deadline)
            .await?;

        let mut tx = self.pool.begin().await?;
        for log in &logs {
            let Ok(event) = decode_log(registry, log, header.timestamp) else {
                continue;
            };

            sqlx::query(
                r#"
                INSERT INTO events (
                    contract_address, event_name, block_number, block_hash,
                    transaction_hash, transaction_index, log_index, args, timestamp
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (transaction_hash, log_index) DO NOTHING
                "#,
            )
            .bind(contract_address)
            .bind(&event.event_name)
            .bind(event.block_number as i64)
            .bind(&event.block_hash)
            .bind(&event.transaction_hash)
            .bind(event.transaction_index as i32)
            .bind(event.log_index as i32)
            .bind(&event.args)
            .bind(event.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_registry(&self, contract_address: &str) -> Result<AbiRegistry, AppError> {
        let row: (String,) = sqlx::query_as("SELECT abi FROM contracts WHERE address = $1")
            .bind(contract_address)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("contract {contract_address}")))?;
        AbiRegistry::parse(&row.0)
    }

    async fn load_job(&self, job_id: Uuid) -> Result<BackfillJobRow, AppError> {
        sqlx::query_as::<_, BackfillJobRow>(
            "SELECT contract_address, from_block, to_block, current_block FROM backfill_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("backfill job {job_id}")))
    }

    async fn advance(&self, job_id: Uuid, current_block: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE backfill_jobs SET current_block = $1, updated_at = NOW() WHERE id = $2")
            .bind(current_block)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(
        &self,
        job_id: Uuid,
        status: BackfillStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError> {
        let completed_at = matches!(
            status,
            BackfillStatus::Completed | BackfillStatus::Failed | BackfillStatus::Cancelled
        )
        .then(Utc::now);

        sqlx::query(
            r#"
            UPDATE backfill_jobs
            SET status = $1, error_message = $2, completed_at = $3, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(status)
        .bind(error_message)
        .bind(completed_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct BackfillJobRow {
    contract_address: String,
    from_block: i64,
    to_block: i64,
    current_block: i64,
}

/// Progress percentage (0..=100) for a backfill job, per the round-trip law
/// `progress.at(from_block) = 0`, `progress.at(to_block) = 100`.
pub fn progress_percent(from_block: i64, to_block: i64, current_block: i64) -> f64 {
    if to_block <= from_block {
        return 100.0;
    }
    let span = (to_block - from_block) as f64;
    let done = (current_block - from_block) as f64;
    (done / span * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_zero_at_start_and_full_at_end() {
        assert_eq!(progress_percent(100, 200, 100), 0.0);
        assert_eq!(progress_percent(100, 200, 200), 100.0);
        assert_eq!(progress_percent(100, 200, 150), 50.0);
    }
}
