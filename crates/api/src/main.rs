//! Admin/query API gateway binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use indexer_cache::QueryCache;
use indexer_chain::EndpointManager;
use indexer_common::config::AppConfig;
use indexer_common::db::create_pool;
use indexer_common::redis_pool::create_redis_pool;
use indexer_core::supervisor::{Supervisor, WorkerTuning};
use tokio_util::sync::CancellationToken;

use indexer_api::routes::create_router;
use indexer_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("indexer_api=debug,tower_http=debug")),
        )
        .init();

    tracing::info!("starting API gateway");

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    let redis = create_redis_pool(&config.redis_url).await?;
    let cache = QueryCache::new(redis);

    let cancellation = CancellationToken::new();

    let chain = Arc::new(EndpointManager::new(
        config.rpc_endpoint.clone(),
        config.rpc_fallbacks.clone(),
        config.max_retries,
        Duration::from_secs(30),
    )?);

    let tuning = WorkerTuning {
        batch_size: config.batch_size,
        rpc_deadline: Duration::from_secs(10),
        tick_interval: Duration::from_millis(config.poll_interval_ms),
        max_consecutive_errors: config.max_retries,
    };

    // The API gateway runs its own Supervisor against the same storage so
    // admin operations (add/remove/pause/resume/backfill) take effect
    // immediately, without a side-channel RPC to the indexer process.
    let supervisor = Arc::new(Supervisor::new(
        pool.clone(),
        Arc::clone(&chain),
        cache.clone(),
        50,
        tuning,
        Duration::from_millis(config.poll_interval_ms),
        cancellation.clone(),
    ));
    supervisor.boot_recover().await?;

    let state = AppState::new(pool, cache, chain, supervisor, config);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!(%addr, "API gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
