//! Application layer containing business logic and shared state.

pub mod chain_watcher;
pub mod config;
pub mod events;
pub mod ledger;
pub mod nonce;
pub mod reconciler;
pub mod reward;
pub mod sender;
pub mod service;
pub mod state;
pub mod worker;

pub use chain_watcher::spawn_chain_watcher;
pub use config::{NetworkConfig, ReconcilerConfig, RewardConfig, SenderConfig};
pub use events::{EventBus, spawn_event_listeners};
pub use ledger::TransactionLedgerService;
pub use nonce::NonceManager;
pub use reconciler::{ReconcileOutcome, TransactionReconciler};
pub use service::{AppService, ServiceDependencies};
pub use state::AppState;
pub use worker::{WorkerConfig, spawn_sender_worker, spawn_status_tracker};
