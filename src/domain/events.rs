//! Typed lifecycle events published on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::period::RewardPeriod;
use super::reward::RewardTransaction;
use super::types::{TransactionDetail, Wallet, WalletState};

/// Envelope carried on every channel. Consumers deduplicate on `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T> {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payload: T,
}

impl<T> Event<T> {
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionEvent {
    Created(TransactionDetail),
    Modified(TransactionDetail),
    /// Raw payload broadcast to the network
    Sent(TransactionDetail),
    /// Receipt observed, transaction finalized
    Mined(TransactionDetail),
    /// A pending transaction was re-signed under a new hash
    Replaced { old_hash: String, new_hash: String },
}

impl TransactionEvent {
    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::Created(tx) | Self::Modified(tx) | Self::Sent(tx) | Self::Mined(tx) => {
                tx.hash.as_deref()
            }
            Self::Replaced { new_hash, .. } => Some(new_hash),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletEvent {
    Created(Wallet),
    Modified(Wallet),
    InitializationChanged { address: String, state: WalletState },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewardEvent {
    Sent {
        period: RewardPeriod,
        reward: RewardTransaction,
    },
    PeriodSucceeded {
        period: RewardPeriod,
    },
}
