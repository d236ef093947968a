//! Nonce assignment for outgoing transactions.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::domain::{AppError, ChainClient, TransactionLedger, normalize_address};

type NonceKey = (i64, String);

/// Hands out nonces per (network, sender).
///
/// The next nonce is the highest of the chain's confirmed count, the last
/// nonce of a stored pending transaction plus one, and the last nonce handed
/// out but not yet stored plus one. A reservation only lives in memory until
/// its transaction is stored ([`confirm`](Self::confirm)) or abandoned
/// ([`release`](Self::release)); from then on the ledger alone decides, so a
/// dropped transaction frees its nonce again.
pub struct NonceManager {
    ledger: Arc<dyn TransactionLedger>,
    chain: Arc<dyn ChainClient>,
    reservations: DashMap<NonceKey, Arc<Mutex<BTreeSet<i64>>>>,
}

impl NonceManager {
    #[must_use]
    pub fn new(ledger: Arc<dyn TransactionLedger>, chain: Arc<dyn ChainClient>) -> Self {
        Self {
            ledger,
            chain,
            reservations: DashMap::new(),
        }
    }

    fn slot(&self, key: &NonceKey) -> Arc<Mutex<BTreeSet<i64>>> {
        self.reservations
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(BTreeSet::new())))
            .clone()
    }

    async fn observed_next(&self, network_id: i64, address: &str) -> Result<i64, AppError> {
        let confirmed = self.chain.transaction_count(address).await?;
        let confirmed = i64::try_from(confirmed)
            .map_err(|_| AppError::invalid_field("nonce", "chain nonce out of range"))?;
        let recorded = self
            .ledger
            .max_pending_nonce(network_id, address)
            .await?
            .map_or(0, |nonce| nonce + 1);
        Ok(confirmed.max(recorded))
    }

    fn key(network_id: i64, address: &str) -> Result<NonceKey, AppError> {
        let address = normalize_address(address).ok_or_else(|| {
            AppError::invalid_field("address", format!("'{}' is not an address", address))
        })?;
        Ok((network_id, address))
    }

    fn next_after(observed: i64, in_flight: &BTreeSet<i64>) -> i64 {
        in_flight
            .last()
            .map_or(observed, |last| observed.max(last + 1))
    }

    /// The nonce the next transaction of `address` would get, without reserving it.
    #[instrument(skip(self))]
    pub async fn next_nonce(&self, network_id: i64, address: &str) -> Result<i64, AppError> {
        let key = Self::key(network_id, address)?;
        let slot = self.slot(&key);
        let in_flight = slot.lock().await;
        let observed = self.observed_next(network_id, &key.1).await?;
        Ok(Self::next_after(observed, &in_flight))
    }

    /// Reserves the next nonce. Concurrent callers for the same sender never
    /// receive the same value.
    ///
    /// Chain and ledger are read under the per-sender lock, so a reservation
    /// confirmed meanwhile is always visible in the ledger.
    #[instrument(skip(self))]
    pub async fn reserve(&self, network_id: i64, address: &str) -> Result<i64, AppError> {
        let key = Self::key(network_id, address)?;
        let slot = self.slot(&key);
        let mut in_flight = slot.lock().await;
        let observed = self.observed_next(network_id, &key.1).await?;
        let nonce = Self::next_after(observed, &in_flight);
        in_flight.insert(nonce);
        debug!(nonce, in_flight = in_flight.len(), "Nonce reserved");
        Ok(nonce)
    }

    /// Marks a reservation as stored in the ledger.
    pub async fn confirm(&self, network_id: i64, address: &str, nonce: i64) {
        if self.forget(network_id, address, nonce).await {
            debug!(nonce, "Nonce reservation stored");
        }
    }

    /// Gives back a reservation that was never stored.
    pub async fn release(&self, network_id: i64, address: &str, nonce: i64) {
        if self.forget(network_id, address, nonce).await {
            debug!(nonce, "Nonce reservation released");
        }
    }

    async fn forget(&self, network_id: i64, address: &str, nonce: i64) -> bool {
        let Ok(key) = Self::key(network_id, address) else {
            return false;
        };
        let slot = self.slot(&key);
        slot.lock().await.remove(&nonce)
    }
}
