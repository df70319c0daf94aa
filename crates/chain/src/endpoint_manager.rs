use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy::primitives::Address;
use indexer_common::error::AppError;
use indexer_common::types::{BlockHeader, RawLog};
use indexer_resilience::{BreakerState, CircuitBreaker};
use tokio_util::sync::CancellationToken;

use crate::client::{ChainClient, HttpChainClient};

struct Endpoint {
    client: HttpChainClient,
    breaker: CircuitBreaker,
}

/// Multi-endpoint fallover: one primary plus an ordered list of fallbacks.
///
/// `current` is a read-mostly slot holding the index of the endpoint every
/// caller should observe as "current" for the duration of one call; a
/// background probe flips it back to the primary once the primary recovers.
/// The manager defers all backoff/waiting to the retry harness in
/// `indexer-resilience` — it only decides *which* endpoint to try next.
pub struct EndpointManager {
    endpoints: Vec<Endpoint>,
    current: AtomicUsize,
    max_attempts: usize,
}

impl EndpointManager {
    pub fn new(
        primary: String,
        fallbacks: Vec<String>,
        max_failures: u32,
        reset_timeout: Duration,
    ) -> Result<Self, AppError> {
        let mut endpoints = Vec::with_capacity(1 + fallbacks.len());
        for url in std::iter::once(primary).chain(fallbacks) {
            endpoints.push(Endpoint {
                client: HttpChainClient::connect(url)?,
                breaker: CircuitBreaker::new(max_failures, reset_timeout),
            });
        }

        let max_attempts = endpoints.len();
        Ok(Self {
            endpoints,
            current: AtomicUsize::new(0),
            max_attempts,
        })
    }

    fn current_index(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Candidate indices to try for one call, starting at the current
    /// endpoint and wrapping through the rest in order.
    fn attempt_order(&self) -> Vec<usize> {
        let start = self.current_index();
        (0..self.endpoints.len())
            .map(|i| (start + i) % self.endpoints.len())
            .collect()
    }

    fn switch_to(&self, index: usize) {
        let previous = self.current.swap(index, Ordering::AcqRel);
        if previous != index {
            tracing::warn!(
                from = self.endpoints[previous].client.endpoint(),
                to = self.endpoints[index].client.endpoint(),
                "endpoint manager switching active endpoint"
            );
        }
    }

    /// Spawns the background health probe. Every `interval`, pings the
    /// primary; if it is healthy and not already current, switches back.
    pub fn spawn_health_probe(
        self: &Arc<Self>,
        interval: Duration,
        deadline: Duration,
        cancellation: CancellationToken,
    ) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                if manager.current_index() == 0 {
                    continue;
                }

                let primary = &manager.endpoints[0];
                if primary.breaker.state() == BreakerState::Open {
                    continue;
                }

                match primary.client.ping(deadline).await {
                    Ok(()) => {
                        primary.breaker.record_success();
                        manager.switch_to(0);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "primary still unhealthy");
                    }
                }
            }
        });
    }
}

macro_rules! with_fallover {
    ($self:expr, $deadline:expr, $op:expr) => {{
        let order = $self.attempt_order();
        let mut last_err = AppError::Network("no endpoints configured".to_string());
        let mut attempts = 0;

        for index in order {
            if attempts >= $self.max_attempts {
                break;
            }
            attempts += 1;

            let endpoint = &$self.endpoints[index];
            if !endpoint.breaker.allow() {
                last_err = AppError::BreakerOpen(endpoint.client.endpoint().to_string());
                continue;
            }

            let result = $op(&endpoint.client, $deadline).await;
            match result {
                Ok(value) => {
                    endpoint.breaker.record_success();
                    $self.switch_to(index);
                    return Ok(value);
                }
                Err(e @ (AppError::Network(_) | AppError::RateLimit(_))) => {
                    endpoint.breaker.record_failure();
                    last_err = e;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }};
}

impl ChainClient for EndpointManager {
    async fn latest_height(&self, deadline: Duration) -> Result<u64, AppError> {
        with_fallover!(self, deadline, |c: &HttpChainClient, d| c.latest_height(d))
    }

    async fn block_header(&self, number: u64, deadline: Duration) -> Result<BlockHeader, AppError> {
        with_fallover!(self, deadline, |c: &HttpChainClient, d| c.block_header(
            number, d
        ))
    }

    async fn logs(
        &self,
        addresses: &[Address],
        from: u64,
        to: u64,
        deadline: Duration,
    ) -> Result<Vec<RawLog>, AppError> {
        with_fallover!(self, deadline, |c: &HttpChainClient, d| c.logs(
            addresses, from, to, d
        ))
    }

    async fn chain_id(&self, deadline: Duration) -> Result<u64, AppError> {
        with_fallover!(self, deadline, |c: &HttpChainClient, d| c.chain_id(d))
    }

    async fn ping(&self, deadline: Duration) -> Result<(), AppError> {
        with_fallover!(self, deadline, |c: &HttpChainClient, d| c.ping(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_order_starts_at_current_and_wraps() {
        let manager = EndpointManager::new(
            "http://primary".to_string(),
            vec!["http://fallback-a".to_string(), "http://fallback-b".to_string()],
            5,
            Duration::from_secs(30),
        )
        .unwrap();

        assert_eq!(manager.attempt_order(), vec![0, 1, 2]);
        manager.switch_to(1);
        assert_eq!(manager.attempt_order(), vec![1, 2, 0]);
    }
}
