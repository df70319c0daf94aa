use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexer_cache::QueryCache;
use indexer_chain::{ChainClient, HeadMonitor};
use indexer_common::error::AppError;
use indexer_common::types::{
    AddContractRequest, AddContractResponse, Contract, IndexerStatus, IndexerStatusReport,
    ServiceHealth,
};
use sqlx::PgPool;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::reorg::ReorgDetector;
use crate::reorg_handler::ReorgHandler;
use crate::worker::{Worker, WorkerHandle};

struct Managed {
    handle: WorkerHandle,
    join: JoinHandle<()>,
}

/// Tuning shared by every Worker the Supervisor spawns.
#[derive(Debug, Clone, Copy)]
pub struct WorkerTuning {
    pub batch_size: u64,
    pub rpc_deadline: Duration,
    pub tick_interval: Duration,
    pub max_consecutive_errors: u32,
}

/// Owns the set of per-contract Workers, their lifecycle, and boot
/// recovery. Shares a single Chain Client and Query Cache across every
/// Worker it spawns.
pub struct Supervisor<C> {
    pool: PgPool,
    chain: Arc<C>,
    cache: QueryCache,
    reorg_detector: Arc<ReorgDetector>,
    reorg_handler: Arc<ReorgHandler>,
    workers: Mutex<HashMap<String, Managed>>,
    tuning: WorkerTuning,
    cancellation: CancellationToken,
    started_at: Instant,
    /// The process-wide head monitor. Every Worker is handed a clone of
    /// `head_rx` rather than polling the chain client on its own.
    head_monitor: HeadMonitor,
    head_rx: watch::Receiver<u64>,
}

impl<C> Supervisor<C>
where
    C: ChainClient + Send + Sync + 'static,
{
    pub fn new(
        pool: PgPool,
        chain: Arc<C>,
        cache: QueryCache,
        reorg_cache_depth: u32,
        tuning: WorkerTuning,
        head_poll_interval: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        let (head_monitor, head_rx) = HeadMonitor::spawn(
            Arc::clone(&chain),
            head_poll_interval,
            tuning.rpc_deadline,
            cancellation.child_token(),
        );

        Self {
            reorg_detector: Arc::new(ReorgDetector::new(pool.clone(), reorg_cache_depth)),
            reorg_handler: Arc::new(ReorgHandler::new(pool.clone())),
            pool,
            chain,
            cache,
            workers: Mutex::new(HashMap::new()),
            tuning,
            cancellation,
            started_at: Instant::now(),
            head_monitor,
            head_rx,
        }
    }

    /// Loads every contract and spins up a Worker for it. A contract whose
    /// `IndexerState.status` is `reorg_recovery` is simply allowed through
    /// — the Worker's next tick naturally re-indexes forward from where the
    /// rollback left off.
    pub async fn boot_recover(&self) -> Result<(), AppError> {
        let contracts: Vec<Contract> = sqlx::query_as("SELECT * FROM contracts")
            .fetch_all(&self.pool)
            .await?;

        tracing::info!(count = contracts.len(), "recovering contracts at boot");
        for contract in contracts {
            self.spawn_worker(&contract.address).await?;
        }
        Ok(())
    }

    /// Persists a new Contract and seeds its `IndexerState`, then spins up
    /// a Worker. Idempotent: adding the same address twice returns the
    /// existing contract with `is_new = false`.
    pub async fn add_contract(
        &self,
        req: AddContractRequest,
    ) -> Result<AddContractResponse, AppError> {
        if let Some(existing) = self.find_contract(&req.address).await? {
            return Ok(AddContractResponse {
                contract_id: existing.id,
                is_new: false,
            });
        }

        if !(1..=100).contains(&req.confirm_blocks) {
            return Err(AppError::InvalidInput(
                "confirm_blocks must be between 1 and 100".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let (id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO contracts (address, name, abi, start_block, current_block, confirm_blocks, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4, $5, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(&req.address)
        .bind(&req.name)
        .bind(&req.abi)
        .bind(req.start_block)
        .bind(req.confirm_blocks)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO indexer_state (contract_address, last_indexed_block, status, error_count, updated_at)
            VALUES ($1, $2, $3, 0, NOW())
            "#,
        )
        .bind(&req.address)
        .bind(req.start_block)
        .bind(IndexerStatus::Active)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.spawn_worker(&req.address).await?;

        Ok(AddContractResponse {
            contract_id: id,
            is_new: true,
        })
    }

    /// Pauses the Worker, deletes the Contract along with its state,
    /// events, and backfill jobs, then tears down the Worker. `indexer_state`
    /// and `backfill_jobs` cascade via their foreign key, but `events` does
    /// not carry one, so its rows are deleted explicitly here.
    pub async fn remove_contract(&self, address: &str) -> Result<(), AppError> {
        if let Some(managed) = self.workers.lock().await.remove(address) {
            let _ = managed.handle.stop().await;
            managed.join.abort();
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM events WHERE contract_address = $1")
            .bind(address)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM contracts WHERE address = $1")
            .bind(address)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("contract {address}")));
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn pause(&self, address: &str) -> Result<(), AppError> {
        self.set_status(address, IndexerStatus::Paused).await?;
        let handle = self.worker_handle(address).await?;
        handle.pause().await
    }

    pub async fn resume(&self, address: &str) -> Result<(), AppError> {
        self.set_status(address, IndexerStatus::Active).await?;
        let handle = self.worker_handle(address).await?;
        handle.resume().await
    }

    /// Signals every Worker, waits for each to finish its current
    /// transaction up to `timeout`, then returns. Past the deadline,
    /// ongoing transactions are abandoned — they roll back safely at the
    /// database.
    pub async fn shutdown(&self, timeout: Duration) {
        tracing::info!("supervisor shutdown initiated");
        self.cancellation.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().await;
            workers.drain().map(|(_, m)| m.join).collect()
        };

        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            tracing::warn!("shutdown deadline exceeded, abandoning remaining workers");
        }
        tracing::info!("supervisor shutdown complete");
    }

    /// Composite status across Workers, the chain client, and storage.
    pub async fn health(&self) -> IndexerStatusReport {
        let chain_ok = self
            .chain
            .ping(Duration::from_secs(5))
            .await
            .is_ok();
        let storage_ok = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();

        let total_contracts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contracts")
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0);
        let total_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0);
        let last_indexed_block: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(current_block), 0) FROM contracts")
                .fetch_one(&self.pool)
                .await
                .unwrap_or(0);

        let latest = self.head_monitor.current_height();
        let indexer_lag = latest.saturating_sub(last_indexed_block as u64);

        IndexerStatusReport {
            indexer_lag,
            total_contracts: total_contracts as u64,
            total_events: total_events as u64,
            cache_hit_rate: 0.0,
            last_indexed_block: last_indexed_block as u64,
            is_healthy: chain_ok && storage_ok,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            services: vec![
                ServiceHealth {
                    name: "chain".to_string(),
                    healthy: chain_ok,
                    detail: None,
                },
                ServiceHealth {
                    name: "storage".to_string(),
                    healthy: storage_ok,
                    detail: None,
                },
            ],
        }
    }

    async fn spawn_worker(&self, address: &str) -> Result<(), AppError> {
        let (handle, join) = Worker::spawn(
            address.to_string(),
            self.pool.clone(),
            Arc::clone(&self.chain),
            self.head_rx.clone(),
            self.cache.clone(),
            Arc::clone(&self.reorg_detector),
            Arc::clone(&self.reorg_handler),
            self.tuning.batch_size,
            self.tuning.rpc_deadline,
            self.tuning.tick_interval,
            self.tuning.max_consecutive_errors,
            self.cancellation.child_token(),
        )
        .await?;

        self.workers
            .lock()
            .await
            .insert(address.to_string(), Managed { handle, join });
        Ok(())
    }

    async fn worker_handle(&self, address: &str) -> Result<WorkerHandle, AppError> {
        let workers = self.workers.lock().await;
        workers
            .get(address)
            .map(|m| m.handle.clone())
            .ok_or_else(|| AppError::NotFound(format!("contract {address}")))
    }

    async fn set_status(&self, address: &str, status: IndexerStatus) -> Result<(), AppError> {
        let updated = sqlx::query(
            "UPDATE indexer_state SET status = $1, updated_at = NOW() WHERE contract_address = $2",
        )
        .bind(status)
        .bind(address)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("contract {address}")));
        }
        Ok(())
    }

    async fn find_contract(&self, address: &str) -> Result<Option<Contract>, AppError> {
        Ok(sqlx::query_as("SELECT * FROM contracts WHERE address = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?)
    }
}
