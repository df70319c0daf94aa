use std::future::Future;
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::transports::TransportError;
use chrono::{TimeZone, Utc};
use indexer_common::error::AppError;
use indexer_common::types::{BlockHeader, RawLog};

/// A single-endpoint RPC wrapper. Every operation binds a caller-provided
/// deadline and classifies failures per the error taxonomy, but performs no
/// retries or fallover of its own — that is the Endpoint Manager's job.
pub trait ChainClient: Send + Sync {
    fn latest_height(
        &self,
        deadline: Duration,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn block_header(
        &self,
        number: u64,
        deadline: Duration,
    ) -> impl Future<Output = Result<BlockHeader, AppError>> + Send;

    fn logs(
        &self,
        addresses: &[Address],
        from: u64,
        to: u64,
        deadline: Duration,
    ) -> impl Future<Output = Result<Vec<RawLog>, AppError>> + Send;

    fn chain_id(&self, deadline: Duration) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn ping(&self, deadline: Duration) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// An HTTP JSON-RPC chain client backed by an `alloy` provider.
pub struct HttpChainClient {
    endpoint: String,
    provider: DynProvider,
}

impl HttpChainClient {
    pub fn connect(endpoint: impl Into<String>) -> Result<Self, AppError> {
        let endpoint = endpoint.into();
        let url = endpoint
            .parse()
            .map_err(|e| AppError::InvalidInput(format!("invalid RPC endpoint {endpoint}: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self { endpoint, provider })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn with_deadline<T>(
        &self,
        deadline: Duration,
        fut: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify_rpc_error(&e)),
            Err(_) => Err(AppError::Network(format!(
                "{}: deadline of {:?} exceeded",
                self.endpoint, deadline
            ))),
        }
    }
}

impl ChainClient for HttpChainClient {
    async fn latest_height(&self, deadline: Duration) -> Result<u64, AppError> {
        self.with_deadline(deadline, self.provider.get_block_number())
            .await
    }

    async fn block_header(&self, number: u64, deadline: Duration) -> Result<BlockHeader, AppError> {
        let block = self
            .with_deadline(
                deadline,
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(number)),
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("block {number} not found")))?;

        let timestamp = Utc
            .timestamp_opt(block.header.timestamp as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(BlockHeader {
            number: block.header.number,
            hash: format!("{:#x}", block.header.hash),
            parent_hash: format!("{:#x}", block.header.parent_hash),
            timestamp,
        })
    }

    async fn logs(
        &self,
        addresses: &[Address],
        from: u64,
        to: u64,
        deadline: Duration,
    ) -> Result<Vec<RawLog>, AppError> {
        if from > to {
            return Err(AppError::InvalidInput(format!(
                "inverted block range: {from} > {to}"
            )));
        }

        let mut filter = Filter::new().from_block(from).to_block(to);
        if !addresses.is_empty() {
            filter = filter.address(addresses.to_vec());
        }

        let mut logs = self
            .with_deadline(deadline, self.provider.get_logs(&filter))
            .await?
            .into_iter()
            .map(|log| RawLog {
                address: format!("{:#x}", log.address()),
                topics: log.topics().iter().map(|t| format!("{t:#x}")).collect(),
                data: format!("0x{}", hex::encode(log.data().data.as_ref())),
                block_number: log.block_number.unwrap_or(0),
                block_hash: log
                    .block_hash
                    .map(|h| format!("{h:#x}"))
                    .unwrap_or_default(),
                transaction_hash: log
                    .transaction_hash
                    .map(|h| format!("{h:#x}"))
                    .unwrap_or_default(),
                transaction_index: log.transaction_index.unwrap_or(0) as u32,
                log_index: log.log_index.unwrap_or(0) as u32,
            })
            .collect::<Vec<_>>();

        logs.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(logs)
    }

    async fn chain_id(&self, deadline: Duration) -> Result<u64, AppError> {
        self.with_deadline(deadline, self.provider.get_chain_id())
            .await
    }

    async fn ping(&self, deadline: Duration) -> Result<(), AppError> {
        self.chain_id(deadline).await.map(|_| ())
    }
}

fn classify_rpc_error(err: &TransportError) -> AppError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
    {
        AppError::RateLimit(msg)
    } else if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("refused")
        || lower.contains("reset")
        || lower.contains("broken pipe")
        || lower.contains("eof")
    {
        AppError::Network(msg)
    } else {
        AppError::Permanent(msg)
    }
}
