use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Primary RPC endpoint.
    pub rpc_endpoint: String,

    /// Ordered fallback RPC endpoints, tried in order after the primary.
    pub rpc_fallbacks: Vec<String>,

    /// PostgreSQL connection string.
    pub database_url: String,

    /// Redis connection string.
    pub redis_url: String,

    /// Head Monitor poll interval in milliseconds (default: 6000).
    pub poll_interval_ms: u64,

    /// Worker per-tick log fetch batch size in blocks (default: 100).
    pub batch_size: u64,

    /// Default confirmation depth for contracts that don't override it.
    pub confirm_blocks: u32,

    /// Maximum attempts for a retried operation (default: 5).
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (default: 500).
    pub retry_delay_ms: u64,

    /// Upper bound on concurrently active per-contract Workers.
    pub max_concurrent_contracts: u32,

    /// Graceful shutdown deadline in seconds (default: 30).
    pub shutdown_timeout_secs: u64,

    /// Default TTL in seconds for positive cache entries (default: 30).
    pub cache_ttl_secs: u64,

    /// TTL in seconds for negative cache sentinels (default: 10).
    pub negative_cache_ttl_secs: u64,

    /// Maximum number of PostgreSQL connections in the pool (default: 20).
    pub db_max_connections: u32,

    /// Log verbosity filter, e.g. "info" or "indexer_core=debug,info".
    pub log_level: String,

    /// Log output format: "json" or "pretty".
    pub log_format: String,
}

impl AppConfig {
    /// Load configuration from environment variables, failing fast on
    /// required values and defaulting the rest.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            rpc_endpoint: std::env::var("RPC_ENDPOINT")
                .map_err(|_| anyhow::anyhow!("RPC_ENDPOINT environment variable is required"))?,
            rpc_fallbacks: std::env::var("RPC_FALLBACKS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            poll_interval_ms: parse_env_or("POLL_INTERVAL", 6_000)?,
            batch_size: parse_env_or("BATCH_SIZE", 100)?,
            confirm_blocks: parse_env_or("CONFIRM_BLOCKS", 6)?,
            max_retries: parse_env_or("MAX_RETRIES", 5)?,
            retry_delay_ms: parse_env_or("RETRY_DELAY", 500)?,
            max_concurrent_contracts: parse_env_or("MAX_CONCURRENT_CONTRACTS", 50)?,
            shutdown_timeout_secs: parse_env_or("SHUTDOWN_TIMEOUT", 30)?,
            cache_ttl_secs: parse_env_or("CACHE_TTL", 30)?,
            negative_cache_ttl_secs: parse_env_or("NEGATIVE_CACHE_TTL", 10)?,
            db_max_connections: parse_env_or("DB_MAX_CONNECTIONS", 20)?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        })
    }
}

fn parse_env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a valid value: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_fallbacks_splits_and_trims() {
        // SAFETY: test-only env mutation, single-threaded within this process's test binary.
        unsafe {
            std::env::set_var("RPC_ENDPOINT", "http://primary");
            std::env::set_var("RPC_FALLBACKS", " http://a , http://b ,,");
            std::env::set_var("DATABASE_URL", "postgres://x");
        }
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.rpc_fallbacks, vec!["http://a", "http://b"]);
        unsafe {
            std::env::remove_var("RPC_ENDPOINT");
            std::env::remove_var("RPC_FALLBACKS");
            std::env::remove_var("DATABASE_URL");
        }
    }
}
