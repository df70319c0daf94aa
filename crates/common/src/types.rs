use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a contract's indexing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum IndexerStatus {
    Active,
    Paused,
    Stopped,
    ReorgRecovery,
}

impl std::fmt::Display for IndexerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexerStatus::Active => write!(f, "active"),
            IndexerStatus::Paused => write!(f, "paused"),
            IndexerStatus::Stopped => write!(f, "stopped"),
            IndexerStatus::ReorgRecovery => write!(f, "reorg_recovery"),
        }
    }
}

/// Lifecycle status of a backfill job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum BackfillStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for BackfillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackfillStatus::Pending => write!(f, "pending"),
            BackfillStatus::Running => write!(f, "running"),
            BackfillStatus::Completed => write!(f, "completed"),
            BackfillStatus::Failed => write!(f, "failed"),
            BackfillStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Identity and progress anchor of a monitored contract.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contract {
    pub id: i32,
    pub address: String,
    pub name: String,
    pub abi: String,
    pub start_block: i64,
    pub current_block: i64,
    pub confirm_blocks: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A decoded, persisted event log.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    pub contract_address: String,
    pub event_name: String,
    pub block_number: i64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub transaction_index: i32,
    pub log_index: i32,
    pub args: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Per-contract indexing pointer, exclusively mutated by the owning Worker.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IndexerState {
    pub contract_address: String,
    pub last_indexed_block: i64,
    pub last_block_hash: Option<String>,
    pub status: IndexerStatus,
    pub error_count: i32,
    pub last_error: Option<String>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Cached `block_number -> block_hash` entry used by the Reorg Detector.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockHashCacheEntry {
    pub block_number: i64,
    pub block_hash: String,
    pub parent_hash: String,
    pub timestamp: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
}

/// Admin-issued historical fill over a fixed block range.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BackfillJob {
    pub id: Uuid,
    pub contract_address: String,
    pub from_block: i64,
    pub to_block: i64,
    pub current_block: i64,
    pub status: BackfillStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A decoded block header: the minimal tuple the Chain Client and Reorg
/// Detector agree on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// A raw log as returned by `eth_getLogs`, pre-decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub transaction_index: u32,
    pub log_index: u32,
}

/// Request body for `add_contract`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddContractRequest {
    pub address: String,
    pub name: String,
    pub abi: String,
    pub start_block: i64,
    pub confirm_blocks: i32,
}

/// Response for `add_contract`, honoring the idempotent-add invariant.
#[derive(Debug, Clone, Serialize)]
pub struct AddContractResponse {
    pub contract_id: i32,
    pub is_new: bool,
}

/// Request body for `trigger_backfill`.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerBackfillRequest {
    pub address: String,
    pub from: i64,
    pub to: i64,
}

/// Per-service health used in `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub healthy: bool,
    pub detail: Option<String>,
}

/// Composite status returned by the admin control plane's `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexerStatusReport {
    pub indexer_lag: u64,
    pub total_contracts: u64,
    pub total_events: u64,
    pub cache_hit_rate: f64,
    pub last_indexed_block: u64,
    pub is_healthy: bool,
    pub uptime_seconds: u64,
    pub services: Vec<ServiceHealth>,
}
