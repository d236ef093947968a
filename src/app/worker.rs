//! Background workers: pending transaction sender and reward status tracker.

use std::env;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::reward::RewardStatusTracker;
use super::sender::PendingTransactionSender;

/// Worker schedule
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub sender_interval: Duration,
    pub watcher_interval: Duration,
    pub tracker_interval: Duration,
    /// Upper bound of the chain watcher backoff
    pub max_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sender_interval: Duration::from_secs(30),
            watcher_interval: Duration::from_secs(5),
            tracker_interval: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            enabled: env::var("ENABLE_BACKGROUND_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.enabled),
            sender_interval: secs("SENDER_INTERVAL_SECS", defaults.sender_interval),
            watcher_interval: secs("WATCHER_INTERVAL_SECS", defaults.watcher_interval),
            tracker_interval: secs("TRACKER_INTERVAL_SECS", defaults.tracker_interval),
            max_backoff: secs("WATCHER_MAX_BACKOFF_SECS", defaults.max_backoff),
        }
    }
}

/// Exponential backoff multiplier, `2^n` with `n` capped at 8
#[must_use]
pub fn calculate_backoff(failures: u32) -> u32 {
    2_u32.pow(failures.min(8))
}

/// Runs `tick` on a fixed interval until the shutdown flag flips.
pub(crate) fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut tick: F,
) -> (JoinHandle<()>, watch::Sender<bool>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        info!(worker = name, interval_secs = interval.as_secs(), "Worker started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!(worker = name, "Worker stopped");
    });
    (handle, shutdown_tx)
}

/// Periodically broadcasts ready transactions.
pub fn spawn_sender_worker(
    sender: Arc<PendingTransactionSender>,
    config: &WorkerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    spawn_periodic("pending_sender", config.sender_interval, move || {
        let sender = Arc::clone(&sender);
        async move {
            if let Err(e) = sender.send_pending_transactions().await {
                error!(error = ?e, "Sending sweep failed");
            }
        }
    })
}

/// Periodically re-derives the status of pending reward periods.
pub fn spawn_status_tracker(
    tracker: Arc<RewardStatusTracker>,
    config: &WorkerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    spawn_periodic("reward_status_tracker", config.tracker_interval, move || {
        let tracker = Arc::clone(&tracker);
        async move {
            if let Err(e) = tracker.verify_pending_periods().await {
                error!(error = ?e, "Reward status verification failed");
            }
        }
    })
}
