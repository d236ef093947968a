//! Polling loop following the chain head.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::reconciler::TransactionReconciler;
use super::worker::{WorkerConfig, calculate_backoff};

fn next_delay(interval: Duration, max_backoff: Duration, failures: u32) -> Duration {
    if failures == 0 {
        interval
    } else {
        (interval * calculate_backoff(failures)).min(max_backoff)
    }
}

async fn refresh_pending(reconciler: &TransactionReconciler) {
    if let Err(e) = reconciler.refresh_pending().await {
        warn!(error = ?e, "Failed to refresh pending transactions");
    }
}

/// Spawns the watcher. Pending transactions are refreshed once at startup
/// and again after each recovered outage, since blocks seen during the
/// outage may have been missed. The block cursor only moves forward on
/// success.
pub fn spawn_chain_watcher(
    reconciler: Arc<TransactionReconciler>,
    config: &WorkerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let interval = config.watcher_interval;
    let max_backoff = config.max_backoff;

    let handle = tokio::spawn(async move {
        info!(
            network_id = reconciler.network_id(),
            interval_secs = interval.as_secs(),
            "Chain watcher started"
        );
        refresh_pending(&reconciler).await;

        let mut failures: u32 = 0;
        loop {
            let delay = next_delay(interval, max_backoff, failures);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }

            match reconciler.scan_new_blocks().await {
                Ok(_) => {
                    if failures > 0 {
                        info!(failures, "Chain connection recovered");
                        refresh_pending(&reconciler).await;
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(
                        failures,
                        retry_in_secs = next_delay(interval, max_backoff, failures).as_secs(),
                        error = ?e,
                        "Block scan failed"
                    );
                }
            }
        }
        info!("Chain watcher stopped");
    });

    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::{ReconcilerConfig, SenderConfig};
    use crate::app::events::EventBus;
    use crate::app::ledger::TransactionLedgerService;
    use crate::domain::{TransactionDetail, TransactionLedger};
    use crate::test_utils::{MockChainClient, MockStore, MockTokenContract, test_address, test_hash};

    #[test]
    fn test_delay_backs_off_and_caps() {
        let interval = Duration::from_secs(5);
        let cap = Duration::from_secs(60);
        assert_eq!(next_delay(interval, cap, 0), interval);
        assert_eq!(next_delay(interval, cap, 1), Duration::from_secs(10));
        assert_eq!(next_delay(interval, cap, 2), Duration::from_secs(20));
        assert_eq!(next_delay(interval, cap, 5), cap);
    }

    #[tokio::test]
    async fn test_watcher_refreshes_pending_at_startup() {
        let store = Arc::new(MockStore::new());
        let chain = Arc::new(MockChainClient::new());
        let mut tx = TransactionDetail::new(1, &test_address(1));
        tx.hash = Some(test_hash(1));
        tx.nonce = Some(0);
        tx.sent_at = Some(chrono::Utc::now());
        store.upsert(&tx).await.unwrap();
        chain.mine(&test_hash(1), true);

        let ledger = Arc::new(TransactionLedgerService::new(
            store.clone(),
            EventBus::default(),
        ));
        let reconciler = Arc::new(TransactionReconciler::new(
            1,
            ledger,
            store.clone(),
            chain.clone(),
            Arc::new(MockTokenContract::new(&test_address(900))),
            ReconcilerConfig::default(),
            SenderConfig::default(),
        ));
        let config = WorkerConfig {
            watcher_interval: Duration::from_millis(10),
            ..WorkerConfig::default()
        };

        let (handle, shutdown) = spawn_chain_watcher(reconciler, &config);
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(true).unwrap();
        handle.await.unwrap();

        assert!(!store.transaction(&test_hash(1)).unwrap().pending);
        assert!(store.last_watched_block(1).await.unwrap().is_some());
    }
}
