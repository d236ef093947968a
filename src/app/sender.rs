//! Broadcasting of signed transactions and their local retry bookkeeping.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AppError, ChainClient, DatabaseError, TokenContract, TransactionDetail, TransactionEvent,
    ValidationError, normalize_hash,
};

use super::config::SenderConfig;
use super::ledger::TransactionLedgerService;

/// Outcome counters of one sending sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sent: usize,
    pub failed: usize,
    /// Held back by the per-sender limits
    pub skipped: usize,
    /// Out of attempts and marked failed
    pub abandoned: usize,
}

pub struct PendingTransactionSender {
    network_id: i64,
    ledger: Arc<TransactionLedgerService>,
    chain: Arc<dyn ChainClient>,
    token: Arc<dyn TokenContract>,
    config: SenderConfig,
}

impl PendingTransactionSender {
    #[must_use]
    pub fn new(
        network_id: i64,
        ledger: Arc<TransactionLedgerService>,
        chain: Arc<dyn ChainClient>,
        token: Arc<dyn TokenContract>,
        config: SenderConfig,
    ) -> Self {
        Self {
            network_id,
            ledger,
            chain,
            token,
            config,
        }
    }

    /// Broadcasts ready transactions in nonce order.
    ///
    /// Unless boosting, at most one transaction per sender goes out per
    /// sweep, and a sender with too many broadcast transactions awaiting a
    /// receipt is skipped.
    #[instrument(skip(self))]
    pub async fn send_pending_transactions(&self) -> Result<SweepReport, AppError> {
        let candidates = self
            .ledger
            .inner()
            .find_transactions_to_send(self.network_id)
            .await?;
        let mut report = SweepReport::default();
        let mut served: HashSet<String> = HashSet::new();
        let mut in_flight: HashMap<String, i64> = HashMap::new();

        for mut tx in candidates {
            if tx.is_sent() {
                continue;
            }
            let sender = tx.from_address.clone();

            if tx.sending_attempts >= self.config.max_attempts {
                warn!(
                    hash = ?tx.hash,
                    attempts = tx.sending_attempts,
                    "Sending attempts exhausted, marking transaction as failed"
                );
                tx.mark_dropped();
                match self.ledger.save(tx).await {
                    Ok(_) => report.abandoned += 1,
                    Err(e) => error!(error = ?e, "Failed to persist abandoned transaction"),
                }
                continue;
            }

            if !self.config.boost && served.contains(&sender) {
                report.skipped += 1;
                continue;
            }

            let count = match in_flight.get(&sender) {
                Some(count) => *count,
                None => {
                    let count = self
                        .ledger
                        .inner()
                        .count_pending_sent(self.network_id, &sender)
                        .await?;
                    in_flight.insert(sender.clone(), count);
                    count
                }
            };
            if count >= self.config.max_parallel_pending {
                debug!(sender = %sender, count, "Too many transactions in flight, skipping sender");
                report.skipped += 1;
                continue;
            }

            served.insert(sender.clone());
            match self.send(tx).await {
                Ok(_) => {
                    report.sent += 1;
                    in_flight.insert(sender, count + 1);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(sender = %sender, error = ?e, "Broadcast failed");
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                abandoned = report.abandoned,
                "Sending sweep complete"
            );
        }
        Ok(report)
    }

    /// Broadcasts one signed, not yet sent transaction.
    ///
    /// The nonce is part of the signed payload and must already be set. A
    /// transient failure leaves the stored row untouched; any other failure
    /// consumes an attempt.
    #[instrument(skip(self, tx), fields(hash = ?tx.hash, nonce = ?tx.nonce))]
    pub async fn send(&self, mut tx: TransactionDetail) -> Result<TransactionDetail, AppError> {
        let raw = tx.raw_transaction.clone().ok_or_else(|| {
            AppError::Validation(ValidationError::MissingField(
                "raw_transaction".to_string(),
            ))
        })?;
        if tx.nonce.is_none() {
            return Err(AppError::Validation(ValidationError::MissingField(
                "nonce".to_string(),
            )));
        }
        if tx.is_sent() {
            return Err(AppError::Consistency(format!(
                "transaction {:?} was already sent",
                tx.hash
            )));
        }

        match self.chain.send_raw_transaction(&raw).await {
            Ok(hash) => {
                let returned = normalize_hash(&hash);
                match (&tx.hash, &returned) {
                    (Some(expected), Some(actual)) if expected != actual => {
                        warn!(expected = %expected, actual = %actual, "Node returned a different hash");
                    }
                    (None, Some(_)) => tx.hash = returned,
                    _ => {}
                }
                tx.sent_at = Some(Utc::now());
                tx.sending_attempts += 1;
                let saved = self.ledger.save(tx).await?;
                info!(attempts = saved.sending_attempts, "Transaction broadcast");
                self.ledger
                    .events()
                    .publish_transaction(TransactionEvent::Sent(saved.clone()));
                Ok(saved)
            }
            Err(e) if e.is_transient() => {
                warn!(error = ?e, "Transient broadcast failure, will retry");
                Err(e)
            }
            Err(e) => {
                tx.sending_attempts += 1;
                warn!(attempts = tx.sending_attempts, error = ?e, "Broadcast rejected");
                self.ledger.save(tx).await?;
                Err(e)
            }
        }
    }

    /// Cancels a pending transaction. A transaction already on the wire
    /// cannot be revoked, so it is only dropped locally.
    #[instrument(skip(self))]
    pub async fn cancel(&self, hash: &str) -> Result<TransactionDetail, AppError> {
        let mut tx = self
            .ledger
            .find_by_hash(hash)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("transaction {}", hash))))?;
        if !tx.pending {
            return Err(AppError::Consistency(format!(
                "transaction {} is already {}",
                hash,
                tx.state()
            )));
        }
        if tx.is_sent() {
            warn!("Transaction already broadcast, dropping it locally only");
        }
        tx.mark_dropped();
        self.ledger.save(tx).await
    }

    /// Re-signs a pending token transaction on the same nonce with a higher
    /// gas price. The previous candidate stays pending until the nonce is
    /// mined and is then dropped by reconciliation.
    #[instrument(skip(self))]
    pub async fn boost(&self, hash: &str) -> Result<TransactionDetail, AppError> {
        let current = self
            .ledger
            .find_by_hash(hash)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("transaction {}", hash))))?;
        if !current.pending || current.raw_transaction.is_none() {
            return Err(AppError::Consistency(format!(
                "transaction {} cannot be replaced",
                hash
            )));
        }
        let old_hash = current.hash.clone().unwrap_or_default();

        let mut replacement = current.clone();
        replacement.id = None;
        replacement.hash = None;
        replacement.raw_transaction = None;
        replacement.created_at = None;
        replacement.sent_at = None;
        replacement.sending_attempts = 0;
        replacement.gas_price = self.bumped_gas_price(current.gas_price).await;

        let signed = match current.contract_method.as_deref() {
            Some("reward") => self.token.reward(replacement).await?,
            Some("transfer") => self.token.transfer(replacement).await?,
            Some("initializeAccount") => self.token.initialize(replacement).await?,
            other => {
                return Err(AppError::NotSupported(format!(
                    "replacing method {:?}",
                    other
                )));
            }
        };
        let saved = self.ledger.save(signed).await?;
        let new_hash = saved.hash.clone().unwrap_or_default();
        info!(old_hash = %old_hash, new_hash = %new_hash, gas_price = saved.gas_price, "Transaction replaced");
        self.ledger
            .events()
            .publish_transaction(TransactionEvent::Replaced { old_hash, new_hash });
        Ok(saved)
    }

    async fn bumped_gas_price(&self, current: i64) -> i64 {
        let bumped = current.saturating_add(current / 10).saturating_add(1);
        match self.chain.gas_price().await {
            Ok(market) => bumped.max(i64::try_from(market).unwrap_or(i64::MAX)),
            Err(e) => {
                debug!(error = ?e, "Market gas price unavailable");
                bumped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::events::EventBus;
    use crate::domain::{TransactionLedger, BlockchainError};
    use crate::test_utils::{
        MockChainClient, MockStore, MockTokenContract, SendFailure, test_address,
    };

    struct Fixture {
        store: Arc<MockStore>,
        chain: Arc<MockChainClient>,
        token: Arc<MockTokenContract>,
        sender: PendingTransactionSender,
    }

    fn fixture(config: SenderConfig) -> Fixture {
        let store = Arc::new(MockStore::new());
        let chain = Arc::new(MockChainClient::new());
        let token = Arc::new(MockTokenContract::new(&test_address(900)));
        let ledger = Arc::new(TransactionLedgerService::new(
            store.clone(),
            EventBus::default(),
        ));
        let sender =
            PendingTransactionSender::new(1, ledger, chain.clone(), token.clone(), config);
        Fixture {
            store,
            chain,
            token,
            sender,
        }
    }

    async fn signed(f: &Fixture, from: u64, nonce: i64) -> TransactionDetail {
        let mut tx = TransactionDetail::new(1, &test_address(from));
        tx.to_address = Some(test_address(7));
        tx.contract_amount = rust_decimal::Decimal::ONE;
        tx.nonce = Some(nonce);
        let built = f.token.reward(tx).await.unwrap();
        let mut stored = f.store.upsert(&built).await.unwrap();
        stored.created_at = Some(Utc::now());
        f.store.upsert(&stored).await.unwrap()
    }

    #[tokio::test]
    async fn test_sweep_sends_one_transaction_per_sender() {
        let f = fixture(SenderConfig::default());
        signed(&f, 1, 0).await;
        signed(&f, 1, 1).await;
        signed(&f, 2, 0).await;

        let report = f.sender.send_pending_transactions().await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(f.chain.broadcasts().len(), 2);

        let sent: Vec<_> = f.store.transactions().into_iter().filter(|t| t.is_sent()).collect();
        assert!(sent.iter().all(|t| t.sending_attempts == 1));
        assert!(sent.iter().any(|t| t.from_address == test_address(1) && t.nonce == Some(0)));
    }

    #[tokio::test]
    async fn test_boost_sends_every_ready_transaction() {
        let f = fixture(SenderConfig {
            boost: true,
            ..SenderConfig::default()
        });
        signed(&f, 1, 0).await;
        signed(&f, 1, 1).await;

        let report = f.sender.send_pending_transactions().await.unwrap();
        assert_eq!(report.sent, 2);
    }

    #[tokio::test]
    async fn test_parallel_limit_holds_sender_back() {
        let f = fixture(SenderConfig {
            boost: true,
            max_parallel_pending: 1,
            ..SenderConfig::default()
        });
        signed(&f, 1, 0).await;
        signed(&f, 1, 1).await;

        let report = f.sender.send_pending_transactions().await.unwrap();
        assert_eq!((report.sent, report.skipped), (1, 1));
    }

    #[tokio::test]
    async fn test_exhausted_attempts_mark_failed() {
        let f = fixture(SenderConfig::default());
        let mut tx = signed(&f, 1, 0).await;
        tx.sending_attempts = 5;
        f.store.upsert(&tx).await.unwrap();

        let report = f.sender.send_pending_transactions().await.unwrap();
        assert_eq!(report.abandoned, 1);
        let stored = f.store.transactions().pop().unwrap();
        assert!(stored.dropped && !stored.pending && !stored.succeeded);
        assert!(f.chain.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_persists_nothing() {
        let f = fixture(SenderConfig::default());
        let tx = signed(&f, 1, 0).await;
        f.chain.fail_sends(Some(SendFailure::Transient));

        let err = f.sender.send(tx).await.unwrap_err();
        assert!(err.is_transient());
        let stored = f.store.transactions().pop().unwrap();
        assert_eq!(stored.sending_attempts, 0);
        assert!(stored.sent_at.is_none());
    }

    #[tokio::test]
    async fn test_rejected_broadcast_consumes_an_attempt() {
        let f = fixture(SenderConfig::default());
        let tx = signed(&f, 1, 0).await;
        f.chain.fail_sends(Some(SendFailure::Rejected));

        let err = f.sender.send(tx).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Blockchain(BlockchainError::TransactionFailed(_))
        ));
        let stored = f.store.transactions().pop().unwrap();
        assert_eq!(stored.sending_attempts, 1);
        assert!(stored.pending);
    }

    #[tokio::test]
    async fn test_send_requires_raw_and_nonce() {
        let f = fixture(SenderConfig::default());
        let tx = TransactionDetail::new(1, &test_address(1));
        assert!(matches!(
            f.sender.send(tx).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_final_transaction_is_rejected() {
        let f = fixture(SenderConfig::default());
        let mut tx = signed(&f, 1, 0).await;
        let hash = tx.hash.clone().unwrap();

        let cancelled = f.sender.cancel(&hash).await.unwrap();
        assert!(cancelled.dropped);

        tx = f.store.transaction(&hash).unwrap();
        assert!(!tx.pending);
        assert!(matches!(
            f.sender.cancel(&hash).await,
            Err(AppError::Consistency(_))
        ));
    }

    #[tokio::test]
    async fn test_boost_resigns_on_same_nonce() {
        let f = fixture(SenderConfig::default());
        let tx = signed(&f, 1, 4).await;
        let old_hash = tx.hash.clone().unwrap();

        let replacement = f.sender.boost(&old_hash).await.unwrap();
        assert_eq!(replacement.nonce, Some(4));
        assert_ne!(replacement.hash.as_deref(), Some(old_hash.as_str()));
        assert!(replacement.gas_price > tx.gas_price);
        assert!(f.store.transaction(&old_hash).unwrap().pending);
    }
}
