use std::sync::Arc;
use std::time::Duration;

use indexer_common::error::AppError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::ChainClient;

/// Single-producer loop that polls the chain head at a fixed cadence and
/// emits monotonically increasing "new highest block" notifications.
///
/// The notification channel has capacity 1 by construction
/// (`tokio::sync::watch` is single-slot and always-latest): if a receiver
/// hasn't drained the previous value before the next poll fires, the newer
/// height simply replaces it. Receivers must not assume every height is
/// observed — only that the latest one eventually is — so the owning
/// Worker also polls on its own tick as a fallback.
pub struct HeadMonitor {
    height_tx: watch::Sender<u64>,
}

impl HeadMonitor {
    /// Spawns the polling loop against `client` and returns a monitor
    /// handle plus a receiver for height notifications, seeded at 0.
    pub fn spawn<C>(
        client: Arc<C>,
        poll_interval: Duration,
        rpc_deadline: Duration,
        cancellation: CancellationToken,
    ) -> (Self, watch::Receiver<u64>)
    where
        C: ChainClient + Send + Sync + 'static,
    {
        let (height_tx, height_rx) = watch::channel(0u64);
        let tx = height_tx.clone();

        tokio::spawn(async move {
            let mut last_seen = 0u64;
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        tracing::info!("head monitor cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }

                match client.latest_height(rpc_deadline).await {
                    Ok(height) if height > last_seen => {
                        last_seen = height;
                        // A closed channel means every receiver dropped;
                        // nothing left to notify.
                        if tx.send(height).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => log_poll_error(&e),
                }
            }
        });

        (Self { height_tx }, height_rx)
    }

    /// Current latest known height without waiting for a change.
    pub fn current_height(&self) -> u64 {
        *self.height_tx.borrow()
    }
}

fn log_poll_error(err: &AppError) {
    tracing::warn!(error = %err, "head monitor poll failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct StubClient {
        heights: Vec<u64>,
        call: AtomicU64,
    }

    impl ChainClient for StubClient {
        async fn latest_height(&self, _deadline: Duration) -> Result<u64, AppError> {
            let i = self.call.fetch_add(1, Ordering::SeqCst) as usize;
            Ok(*self.heights.get(i).unwrap_or(self.heights.last().unwrap()))
        }

        async fn block_header(
            &self,
            _number: u64,
            _deadline: Duration,
        ) -> Result<indexer_common::types::BlockHeader, AppError> {
            unimplemented!()
        }

        async fn logs(
            &self,
            _addresses: &[alloy::primitives::Address],
            _from: u64,
            _to: u64,
            _deadline: Duration,
        ) -> Result<Vec<indexer_common::types::RawLog>, AppError> {
            unimplemented!()
        }

        async fn chain_id(&self, _deadline: Duration) -> Result<u64, AppError> {
            unimplemented!()
        }

        async fn ping(&self, _deadline: Duration) -> Result<(), AppError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn emits_monotonically_increasing_heights() {
        let client = Arc::new(StubClient {
            heights: vec![10, 10, 20, 20, 20],
            call: AtomicU64::new(0),
        });
        let (_monitor, mut rx) = HeadMonitor::spawn(
            client,
            Duration::from_millis(5),
            Duration::from_secs(1),
            CancellationToken::new(),
        );

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 10);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 20);
    }
}
