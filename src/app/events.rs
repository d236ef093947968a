//! Typed publish/subscribe channels for lifecycle events.

use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{Event, RewardEvent, RewardStore, TransactionEvent, WalletEvent};

const DEFAULT_CAPACITY: usize = 256;

/// One broadcast channel per event category.
///
/// Delivery is at-least-once from a consumer's point of view: a lagging
/// receiver loses events, so handlers recover from stored state.
#[derive(Clone)]
pub struct EventBus {
    transactions: broadcast::Sender<Event<TransactionEvent>>,
    wallets: broadcast::Sender<Event<WalletEvent>>,
    rewards: broadcast::Sender<Event<RewardEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            transactions: broadcast::channel(capacity).0,
            wallets: broadcast::channel(capacity).0,
            rewards: broadcast::channel(capacity).0,
        }
    }

    pub fn publish_transaction(&self, event: TransactionEvent) {
        if self.transactions.send(Event::new(event)).is_err() {
            debug!("No subscriber for transaction event");
        }
    }

    pub fn publish_wallet(&self, event: WalletEvent) {
        if self.wallets.send(Event::new(event)).is_err() {
            debug!("No subscriber for wallet event");
        }
    }

    pub fn publish_reward(&self, event: RewardEvent) {
        if self.rewards.send(Event::new(event)).is_err() {
            debug!("No subscriber for reward event");
        }
    }

    #[must_use]
    pub fn subscribe_transactions(&self) -> broadcast::Receiver<Event<TransactionEvent>> {
        self.transactions.subscribe()
    }

    #[must_use]
    pub fn subscribe_wallets(&self) -> broadcast::Receiver<Event<WalletEvent>> {
        self.wallets.subscribe()
    }

    #[must_use]
    pub fn subscribe_rewards(&self) -> broadcast::Receiver<Event<RewardEvent>> {
        self.rewards.subscribe()
    }
}

/// Spawns the detached storage listeners.
///
/// Currently re-links reward entries when a pending transaction is replaced.
pub fn spawn_event_listeners(
    bus: &EventBus,
    reward_store: Arc<dyn RewardStore>,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let mut events = bus.subscribe_transactions();

    let handle = tokio::spawn(async move {
        info!("Event listeners started");
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        if let TransactionEvent::Replaced { old_hash, new_hash } = &event.payload {
                            match reward_store
                                .replace_reward_transaction_hash(old_hash, new_hash)
                                .await
                            {
                                Ok(rows) => debug!(
                                    event_id = %event.id,
                                    old_hash = %old_hash,
                                    new_hash = %new_hash,
                                    rows,
                                    "Reward entries re-linked"
                                ),
                                Err(e) => error!(
                                    event_id = %event.id,
                                    old_hash = %old_hash,
                                    error = ?e,
                                    "Failed to re-link reward entries"
                                ),
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Event listeners stopped");
    });

    (handle, shutdown_tx)
}
