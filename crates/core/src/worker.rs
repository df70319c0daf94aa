use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexer_abi::registry::AbiRegistry;
use indexer_abi::decode::decode_log;
use indexer_cache::QueryCache;
use indexer_chain::ChainClient;
use indexer_common::error::AppError;
use indexer_common::types::{Contract, IndexerStatus};
use sqlx::PgPool;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::gate::safe_upper;
use crate::reorg::{ReorgDetector, ReorgOutcome};
use crate::reorg_handler::ReorgHandler;

/// Commands the Supervisor routes into a running Worker's command channel.
/// This is the only way Contract state is ever mutated from outside the
/// Worker's own task — never through a shared `Arc<Mutex<Contract>>`.
#[derive(Debug)]
pub enum WorkerCommand {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Loading,
    Active,
    Paused,
    ReorgRecovery,
    Stopped,
}

/// A handle the Supervisor keeps to address a running Worker.
#[derive(Clone)]
pub struct WorkerHandle {
    pub contract_address: String,
    command_tx: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    pub async fn pause(&self) -> Result<(), AppError> {
        self.send(WorkerCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), AppError> {
        self.send(WorkerCommand::Resume).await
    }

    pub async fn stop(&self) -> Result<(), AppError> {
        self.send(WorkerCommand::Stop).await
    }

    async fn send(&self, cmd: WorkerCommand) -> Result<(), AppError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| AppError::Internal("worker task is no longer running".to_string()))
    }
}

/// Orchestrates one contract's indexing loop: gate, fetch, decode, persist,
/// advance.
pub struct Worker<C> {
    contract_address: String,
    pool: PgPool,
    chain: Arc<C>,
    /// Shared head-height notification channel — the Worker's sole source
    /// of the chain's latest height on each tick. Never queries the chain
    /// client for height directly; the per-tick timer in `run` below is
    /// only a fallback for a coalesced or lost notification, not a second
    /// source of truth.
    head_rx: watch::Receiver<u64>,
    registry: AbiRegistry,
    cache: QueryCache,
    reorg_detector: Arc<ReorgDetector>,
    reorg_handler: Arc<ReorgHandler>,
    batch_size: u64,
    rpc_deadline: Duration,
    max_consecutive_errors: u32,
    phase: Phase,
}

impl<C> Worker<C>
where
    C: ChainClient + Send + Sync + 'static,
{
    /// Loads the contract, parses its ABI, and spawns the tick loop. The
    /// loop runs until cancelled or commanded to `Stop`.
    pub async fn spawn(
        contract_address: String,
        pool: PgPool,
        chain: Arc<C>,
        head_rx: watch::Receiver<u64>,
        cache: QueryCache,
        reorg_detector: Arc<ReorgDetector>,
        reorg_handler: Arc<ReorgHandler>,
        batch_size: u64,
        rpc_deadline: Duration,
        tick_interval: Duration,
        max_consecutive_errors: u32,
        cancellation: CancellationToken,
    ) -> Result<(WorkerHandle, tokio::task::JoinHandle<()>), AppError> {
        let contract: Contract = sqlx::query_as("SELECT * FROM contracts WHERE address = $1")
            .bind(&contract_address)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("contract {contract_address}")))?;

        let registry = AbiRegistry::parse(&contract.abi)?;

        let (command_tx, command_rx) = mpsc::channel(8);

        let mut worker = Worker {
            contract_address: contract_address.clone(),
            pool,
            chain,
            head_rx,
            registry,
            cache,
            reorg_detector,
            reorg_handler,
            batch_size,
            rpc_deadline,
            max_consecutive_errors,
            phase: Phase::Loading,
        };

        let state_status = worker.load_status().await?;
        worker.phase = match state_status {
            IndexerStatus::Paused => Phase::Paused,
            IndexerStatus::Stopped => Phase::Stopped,
            IndexerStatus::ReorgRecovery => Phase::ReorgRecovery,
            IndexerStatus::Active => Phase::Active,
        };

        let join_handle = tokio::spawn(worker.run(command_rx, tick_interval, cancellation));

        Ok((
            WorkerHandle {
                contract_address,
                command_tx,
            },
            join_handle,
        ))
    }

    async fn load_status(&self) -> Result<IndexerStatus, AppError> {
        let row: Option<(IndexerStatus,)> =
            sqlx::query_as("SELECT status FROM indexer_state WHERE contract_address = $1")
                .bind(&self.contract_address)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(s,)| s).unwrap_or(IndexerStatus::Active))
    }

    /// Records a retriable tick failure on `IndexerState`: increments
    /// `error_count` and stores the error message. `error_count` crossing
    /// `max_consecutive_errors` is surfaced as a warning; per-contract
    /// error counts are a user-visible counter, not a circuit — breaking
    /// stays a property of the endpoint, owned by the Endpoint Manager.
    async fn record_error(&self, err: &AppError) -> Result<(), AppError> {
        let row: (i32,) = sqlx::query_as(
            r#"
            UPDATE indexer_state
            SET error_count = error_count + 1, last_error = $1, updated_at = NOW()
            WHERE contract_address = $2
            RETURNING error_count
            "#,
        )
        .bind(err.to_string())
        .bind(&self.contract_address)
        .fetch_one(&self.pool)
        .await?;

        if row.0 as u32 >= self.max_consecutive_errors {
            tracing::warn!(
                contract = %self.contract_address,
                error_count = row.0,
                "contract has crossed the consecutive-error threshold"
            );
        }

        Ok(())
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<WorkerCommand>,
        tick_interval: Duration,
        cancellation: CancellationToken,
    ) {
        loop {
            if self.phase == Phase::Stopped {
                break;
            }

            tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::info!(contract = %self.contract_address, "worker cancelled");
                    break;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(WorkerCommand::Pause) => self.phase = Phase::Paused,
                        Some(WorkerCommand::Resume) => {
                            if self.phase == Phase::Paused {
                                self.phase = Phase::Active;
                            }
                        }
                        Some(WorkerCommand::Stop) | None => {
                            self.phase = Phase::Stopped;
                            break;
                        }
                    }
                }
                changed = self.head_rx.changed() => {
                    if changed.is_err() {
                        tracing::warn!(contract = %self.contract_address, "head notification channel closed");
                        continue;
                    }
                    if self.phase == Phase::Active || self.phase == Phase::ReorgRecovery {
                        self.tick_and_record().await;
                    }
                }
                _ = tokio::time::sleep(tick_interval) => {
                    if self.phase == Phase::Active || self.phase == Phase::ReorgRecovery {
                        self.tick_and_record().await;
                    }
                }
            }
        }
    }

    /// Runs one tick, logging and recording a retriable failure if it fails.
    /// Called both off the head-change notification and the fallback timer,
    /// so a tick never runs twice for the logic of handling its own error.
    async fn tick_and_record(&mut self) {
        if let Err(e) = self.tick().await {
            tracing::error!(
                contract = %self.contract_address,
                error = %e,
                "tick failed"
            );
            if e.is_retriable()
                && let Err(record_err) = self.record_error(&e).await
            {
                tracing::error!(
                    contract = %self.contract_address,
                    error = %record_err,
                    "failed to record tick error on indexer_state"
                );
            }
        }
    }

    /// One iteration of the indexing loop: gate -> fetch -> decode ->
    /// persist -> advance. Idempotent up through the reorg probe; the
    /// persist step is single-shot per tick via transaction.
    async fn tick(&mut self) -> Result<(), AppError> {
        let contract: Contract = sqlx::query_as("SELECT * FROM contracts WHERE address = $1")
            .bind(&self.contract_address)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("contract {}", self.contract_address)))?;

        let latest = *self.head_rx.borrow();
        let upper = safe_upper(latest, contract.confirm_blocks as u32);
        let from = contract.current_block as u64 + 1;

        if from > upper {
            return Ok(());
        }

        let to = upper.min(from + self.batch_size - 1);

        let address: alloy::primitives::Address = contract
            .address
            .parse()
            .map_err(|e| AppError::InvalidInput(format!("stored address malformed: {e}")))?;

        let logs = self
            .chain
            .logs(&[address], from, to, self.rpc_deadline)
            .await?;

        let header = self.chain.block_header(to, self.rpc_deadline).await?;

        match self.reorg_detector.check(&*self.chain, &header, self.rpc_deadline).await? {
            ReorgOutcome::ReorgDetected { fork_point } => {
                self.phase = Phase::ReorgRecovery;
                self.reorg_handler
                    .handle(
                        &self.contract_address,
                        fork_point,
                        contract.start_block,
                        &mut self.cache,
                    )
                    .await?;
                return Ok(());
            }
            ReorgOutcome::NoReorg => {}
        }

        let mut decoded = Vec::with_capacity(logs.len());
        let mut unknown = 0u32;
        for log in &logs {
            match decode_log(&self.registry, log, header.timestamp) {
                Ok(event) => decoded.push(event),
                Err(e) => {
                    unknown += 1;
                    tracing::debug!(
                        contract = %self.contract_address,
                        error = %e,
                        "dropped undecodable log"
                    );
                }
            }
        }
        if unknown > 0 {
            tracing::debug!(contract = %self.contract_address, unknown, "undecodable logs this tick");
        }

        self.persist(&contract, &decoded, to, &header.hash).await?;

        if self.phase == Phase::ReorgRecovery && to > contract.current_block as u64 {
            self.phase = Phase::Active;
        }

        self.cache.invalidate_contract(&self.contract_address).await?;

        Ok(())
    }

    async fn persist(
        &self,
        contract: &Contract,
        events: &[indexer_abi::decode::DecodedEvent],
        to: u64,
        block_hash: &str,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        for event in events {
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
            .bind(&contract.address)
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

        sqlx::query("UPDATE contracts SET current_block = $1, updated_at = NOW() WHERE address = $2")
            .bind(to as i64)
            .bind(&contract.address)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO indexer_state (contract_address, last_indexed_block, last_block_hash, status, error_count, last_error, last_processed_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, NULL, $5, NOW())
            ON CONFLICT (contract_address) DO UPDATE SET
                last_indexed_block = EXCLUDED.last_indexed_block,
                last_block_hash = EXCLUDED.last_block_hash,
                status = EXCLUDED.status,
                error_count = 0,
                last_error = NULL,
                last_processed_at = EXCLUDED.last_processed_at,
                updated_at = NOW()
            "#,
        )
        .bind(&contract.address)
        .bind(to as i64)
        .bind(block_hash)
        .bind(IndexerStatus::Active)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
