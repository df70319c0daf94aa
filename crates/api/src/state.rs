//! Shared application state for the Axum API server.

use std::sync::Arc;
use std::time::Duration;

use indexer_cache::QueryCache;
use indexer_chain::EndpointManager;
use indexer_common::config::AppConfig;
use indexer_core::supervisor::Supervisor;
use sqlx::PgPool;

/// Application state shared across all route handlers via Axum `State`.
///
/// The API binary holds its own `Supervisor`, backed by the same Postgres
/// and RPC endpoints as the indexer binary — it is a second admin/query
/// entrypoint onto the same indexing state, not a separate source of truth.
/// `QueryCache` is cheaply `Clone` (a shared redis connection manager plus an
/// `Arc`-wrapped bloom filter), so each handler gets its own owned copy
/// rather than contending on a lock.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub cache: QueryCache,
    pub chain: Arc<EndpointManager>,
    pub supervisor: Arc<Supervisor<EndpointManager>>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        cache: QueryCache,
        chain: Arc<EndpointManager>,
        supervisor: Arc<Supervisor<EndpointManager>>,
        config: AppConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            chain,
            supervisor,
            config,
        }
    }

    pub fn rpc_deadline(&self) -> Duration {
        Duration::from_secs(10)
    }
}
