use std::sync::Arc;
use std::time::Duration;

use indexer_cache::QueryCache;
use indexer_chain::EndpointManager;
use indexer_common::config::AppConfig;
use indexer_common::{db, redis_pool};
use indexer_core::supervisor::{Supervisor, WorkerTuning};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .json()
        .init();

    tracing::info!("indexer starting");

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("database migrations applied");

    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;
    let cache = QueryCache::new(redis);

    let cancellation = CancellationToken::new();

    let endpoint_manager = Arc::new(EndpointManager::new(
        config.rpc_endpoint.clone(),
        config.rpc_fallbacks.clone(),
        config.max_retries,
        Duration::from_secs(30),
    )?);
    endpoint_manager.spawn_health_probe(
        Duration::from_secs(30),
        Duration::from_secs(5),
        cancellation.child_token(),
    );

    let tuning = WorkerTuning {
        batch_size: config.batch_size,
        rpc_deadline: Duration::from_secs(10),
        tick_interval: Duration::from_millis(config.poll_interval_ms),
        max_consecutive_errors: config.max_retries,
    };

    let supervisor = Arc::new(Supervisor::new(
        pool,
        endpoint_manager,
        cache,
        50,
        tuning,
        Duration::from_millis(config.poll_interval_ms),
        cancellation.clone(),
    ));

    supervisor.boot_recover().await?;
    tracing::info!("boot recovery complete, indexer running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal, stopping gracefully");

    supervisor
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    tracing::info!("indexer stopped");
    Ok(())
}
