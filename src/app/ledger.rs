//! Ledger service: validated, normalized persistence of transactions.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::domain::{
    AppError, TransactionDetail, TransactionEvent, TransactionLedger, ValidationError,
    normalize_address, normalize_hash,
};

use super::events::EventBus;

/// Write path of the transaction ledger.
///
/// Every save publishes a lifecycle event; the bus never fails a save.
pub struct TransactionLedgerService {
    ledger: Arc<dyn TransactionLedger>,
    events: EventBus,
}

impl TransactionLedgerService {
    #[must_use]
    pub fn new(ledger: Arc<dyn TransactionLedger>, events: EventBus) -> Self {
        Self { ledger, events }
    }

    #[must_use]
    pub fn inner(&self) -> &Arc<dyn TransactionLedger> {
        &self.ledger
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Validates, normalizes and upserts a transaction.
    #[instrument(skip(self, tx), fields(hash = ?tx.hash, from = %tx.from_address))]
    pub async fn save(&self, mut tx: TransactionDetail) -> Result<TransactionDetail, AppError> {
        validate(&tx)?;
        if tx.created_at.is_none() {
            tx.created_at = Some(Utc::now());
        }
        // Externally signed transactions reach us already broadcast.
        if tx.sent_at.is_none() && tx.raw_transaction.is_none() {
            tx.sent_at = tx.created_at;
        }
        tx.normalize();

        let is_new = tx.id.is_none();
        let stored = self.ledger.upsert(&tx).await?;
        if is_new {
            debug!(id = ?stored.id, "Transaction recorded");
            self.events
                .publish_transaction(TransactionEvent::Created(stored.clone()));
        } else {
            self.events
                .publish_transaction(TransactionEvent::Modified(stored.clone()));
        }
        Ok(stored)
    }

    /// Lookup by hash in any casing. A malformed hash matches nothing.
    #[instrument(skip(self))]
    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<TransactionDetail>, AppError> {
        match normalize_hash(hash) {
            Some(normalized) => self.ledger.find_by_hash(&normalized).await,
            None => Ok(None),
        }
    }

    /// Persists a finalized transaction and drops its stale competitors.
    ///
    /// Returns `None` without publishing anything when the stored row was
    /// already final, so a receipt delivered twice is only applied once.
    /// A dropped candidate on the very same nonce was a replacement of the
    /// mined one; it is announced as replaced by the winner.
    #[instrument(skip(self, tx), fields(hash = ?tx.hash, nonce = ?tx.nonce))]
    pub async fn apply_mined(
        &self,
        mut tx: TransactionDetail,
    ) -> Result<Option<(TransactionDetail, Vec<TransactionDetail>)>, AppError> {
        validate(&tx)?;
        if tx.created_at.is_none() {
            tx.created_at = Some(Utc::now());
        }
        if tx.sent_at.is_none() {
            tx.sent_at = tx.created_at;
        }
        tx.normalize();

        let Some((stored, dropped)) = self.ledger.apply_mined(&tx).await? else {
            debug!("Mined transaction already settled");
            return Ok(None);
        };
        for stale in &dropped {
            info!(
                hash = ?stale.hash,
                nonce = ?stale.nonce,
                winner = ?stored.hash,
                "Pending transaction dropped by a mined nonce"
            );
            self.events
                .publish_transaction(TransactionEvent::Modified(stale.clone()));
            if stale.nonce == stored.nonce
                && let (Some(old_hash), Some(new_hash)) = (&stale.hash, &stored.hash)
            {
                self.events.publish_transaction(TransactionEvent::Replaced {
                    old_hash: old_hash.clone(),
                    new_hash: new_hash.clone(),
                });
            }
        }
        self.events
            .publish_transaction(TransactionEvent::Mined(stored.clone()));
        Ok(Some((stored, dropped)))
    }
}

fn validate(tx: &TransactionDetail) -> Result<(), AppError> {
    if tx.from_address.trim().is_empty() {
        return Err(AppError::Validation(ValidationError::MissingField(
            "from_address".to_string(),
        )));
    }
    if normalize_address(&tx.from_address).is_none() {
        return Err(AppError::invalid_field(
            "from_address",
            format!("'{}' is not an address", tx.from_address),
        ));
    }
    for (field, address) in [
        ("to_address", tx.to_address.as_deref()),
        ("by_address", tx.by_address.as_deref()),
        ("contract_address", tx.contract_address.as_deref()),
    ] {
        if let Some(address) = address
            && normalize_address(address).is_none()
        {
            return Err(AppError::invalid_field(
                field,
                format!("'{}' is not an address", address),
            ));
        }
    }
    if let Some(hash) = tx.hash.as_deref()
        && normalize_hash(hash).is_none()
    {
        return Err(AppError::invalid_field(
            "hash",
            format!("'{}' is not a transaction hash", hash),
        ));
    }
    if tx.value.is_sign_negative() && !tx.value.is_zero() {
        return Err(AppError::invalid_field("value", "negative amount"));
    }
    if tx.contract_amount.is_sign_negative() && !tx.contract_amount.is_zero() {
        return Err(AppError::invalid_field("contract_amount", "negative amount"));
    }
    if tx.nonce.map(|n| n < 0).unwrap_or(false) {
        return Err(AppError::invalid_field("nonce", "negative nonce"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockStore, test_address, test_hash};
    use rust_decimal::Decimal;

    fn service() -> (Arc<MockStore>, TransactionLedgerService, EventBus) {
        let store = Arc::new(MockStore::new());
        let bus = EventBus::default();
        let service = TransactionLedgerService::new(store.clone(), bus.clone());
        (store, service, bus)
    }

    #[tokio::test]
    async fn test_save_sets_timestamps_and_normalizes() {
        let (_, service, bus) = service();
        let mut events = bus.subscribe_transactions();

        let mut tx = TransactionDetail::new(1, &test_address(1).to_uppercase().replace("0X", "0x"));
        tx.hash = Some(test_hash(7).to_uppercase().replace("0X", "0x"));
        tx.to_address = Some(test_address(2));
        let saved = service.save(tx).await.unwrap();

        assert_eq!(saved.from_address, test_address(1));
        assert_eq!(saved.hash.as_deref(), Some(test_hash(7).as_str()));
        assert!(saved.created_at.is_some());
        assert_eq!(saved.sent_at, saved.created_at);
        assert!(matches!(
            events.recv().await.unwrap().payload,
            TransactionEvent::Created(_)
        ));

        let updated = service.save(saved).await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap().payload,
            TransactionEvent::Modified(_)
        ));
        assert!(updated.id.is_some());
    }

    #[tokio::test]
    async fn test_save_keeps_unsent_raw_transaction_unsent() {
        let (_, service, _) = service();
        let mut tx = TransactionDetail::new(1, &test_address(1));
        tx.raw_transaction = Some("0xf86c".to_string());
        tx.nonce = Some(3);
        let saved = service.save(tx).await.unwrap();
        assert!(saved.sent_at.is_none());
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_input_before_persisting() {
        let (store, service, _) = service();

        let mut negative = TransactionDetail::new(1, &test_address(1));
        negative.contract_amount = Decimal::new(-1, 0);
        assert!(matches!(
            service.save(negative).await,
            Err(AppError::Validation(_))
        ));

        let mut bad_hash = TransactionDetail::new(1, &test_address(1));
        bad_hash.hash = Some("0x1234".to_string());
        assert!(matches!(
            service.save(bad_hash).await,
            Err(AppError::Validation(_))
        ));

        assert!(matches!(
            service.save(TransactionDetail::new(1, "")).await,
            Err(AppError::Validation(ValidationError::MissingField(_)))
        ));
        assert!(store.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_mined_candidate_replaces_same_nonce_competitor() {
        let (store, service, bus) = service();
        let mut first = TransactionDetail::new(1, &test_address(1));
        first.hash = Some(test_hash(1));
        first.nonce = Some(4);
        store.upsert(&first).await.unwrap();
        let mut second = first.clone();
        second.hash = Some(test_hash(2));
        let second = store.upsert(&second).await.unwrap();
        let mut events = bus.subscribe_transactions();

        let mut mined = store.transaction(&test_hash(1)).unwrap();
        mined.pending = false;
        mined.succeeded = true;
        let (_, dropped) = service.apply_mined(mined.clone()).await.unwrap().unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id, second.id);

        let mut replaced = None;
        while let Ok(event) = events.try_recv() {
            if let TransactionEvent::Replaced { old_hash, new_hash } = event.payload {
                replaced = Some((old_hash, new_hash));
            }
        }
        assert_eq!(replaced, Some((test_hash(2), test_hash(1))));

        assert!(service.apply_mined(mined).await.unwrap().is_none());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_find_by_hash_ignores_case_and_malformed_input() {
        let (_, service, _) = service();
        let mut tx = TransactionDetail::new(1, &test_address(1));
        tx.hash = Some(test_hash(42));
        service.save(tx).await.unwrap();

        let upper = format!("0X{}", &test_hash(42)[2..].to_uppercase());
        assert!(service.find_by_hash(&upper).await.unwrap().is_some());
        assert!(service.find_by_hash("not-a-hash").await.unwrap().is_none());
        assert!(service.find_by_hash("").await.unwrap().is_none());
    }
}
