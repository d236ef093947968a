//! Reconciliation of locally mirrored transactions against the chain.

use chrono::{Duration, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AppError, ChainClient, ChainTransaction, ETHER_DECIMALS, TokenContract, TransactionDetail,
    TransactionReceipt, WalletEvent, WalletState, WalletStore, from_base_units, normalize_address,
    normalize_hash,
};

use super::config::{ReconcilerConfig, SenderConfig};
use super::ledger::TransactionLedgerService;

/// What reconciling one hash did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Stored state was already final, nothing changed
    AlreadyFinal,
    /// No receipt yet, transaction still valid
    Pending,
    /// Expired unsent-on-chain transaction scheduled for re-broadcast
    Rescheduled,
    Mined { succeeded: bool, dropped: usize },
    /// Abandoned without a receipt
    Dropped,
    /// Mined, but no known wallet is involved
    Ignored,
    /// Neither stored locally nor known to the chain
    Unknown,
}

/// Drives transactions from pending to their final state.
pub struct TransactionReconciler {
    network_id: i64,
    ledger: Arc<TransactionLedgerService>,
    wallets: Arc<dyn WalletStore>,
    chain: Arc<dyn ChainClient>,
    token: Arc<dyn TokenContract>,
    config: ReconcilerConfig,
    sender_config: SenderConfig,
}

impl TransactionReconciler {
    #[must_use]
    pub fn new(
        network_id: i64,
        ledger: Arc<TransactionLedgerService>,
        wallets: Arc<dyn WalletStore>,
        chain: Arc<dyn ChainClient>,
        token: Arc<dyn TokenContract>,
        config: ReconcilerConfig,
        sender_config: SenderConfig,
    ) -> Self {
        Self {
            network_id,
            ledger,
            wallets,
            chain,
            token,
            config,
            sender_config,
        }
    }

    #[must_use]
    pub fn network_id(&self) -> i64 {
        self.network_id
    }

    /// Reconciles one hash, then re-verifies the pending plain-ether
    /// transfers of every wallet touched by a mined contract call.
    #[instrument(skip(self))]
    pub async fn reconcile_hash(&self, hash: &str) -> Result<ReconcileOutcome, AppError> {
        let (outcome, mined) = self.settle(hash, None).await?;
        if let Some(tx) = mined {
            self.verify_ether_transactions(&tx).await;
        }
        Ok(outcome)
    }

    /// Settles a single hash without any follow-up verification.
    async fn settle(
        &self,
        hash: &str,
        known: Option<ChainTransaction>,
    ) -> Result<(ReconcileOutcome, Option<TransactionDetail>), AppError> {
        let hash = normalize_hash(hash).ok_or_else(|| {
            AppError::invalid_field("hash", format!("'{}' is not a transaction hash", hash))
        })?;

        let stored = self.ledger.inner().find_by_hash(&hash).await?;
        if let Some(tx) = &stored
            && !tx.pending
        {
            debug!(hash = %hash, state = %tx.state(), "Transaction already final");
            return Ok((ReconcileOutcome::AlreadyFinal, None));
        }

        let Some(receipt) = self.chain.receipt(&hash).await? else {
            return match stored {
                Some(tx) => Ok((self.check_pending_validity(tx).await?, None)),
                None => Ok((ReconcileOutcome::Unknown, None)),
            };
        };

        let mut tx = match stored {
            Some(tx) => tx,
            None => {
                let chain_tx = match known {
                    Some(chain_tx) => chain_tx,
                    None => match self.chain.transaction(&hash).await? {
                        Some(chain_tx) => chain_tx,
                        None => return Ok((ReconcileOutcome::Unknown, None)),
                    },
                };
                let tx = self.detail_from_chain(&chain_tx)?;
                if !self.involves_known_wallet(&tx).await? {
                    if self.config.log_all_transactions {
                        log_statistics(&tx, receipt.status, "unknown_wallet");
                    }
                    return Ok((ReconcileOutcome::Ignored, None));
                }
                tx
            }
        };

        finalize(&mut tx, &receipt)?;
        let Some((stored, dropped)) = self.ledger.apply_mined(tx).await? else {
            debug!(hash = %hash, "Receipt already applied by a concurrent reconciliation");
            return Ok((ReconcileOutcome::AlreadyFinal, None));
        };
        if self.config.log_all_transactions {
            log_statistics(&stored, stored.succeeded, "mined");
        }
        info!(
            hash = %hash,
            succeeded = stored.succeeded,
            dropped = dropped.len(),
            "Transaction mined"
        );

        if stored.contract_method.as_deref() == Some("initializeAccount") {
            self.apply_initialization(&stored).await?;
        }

        let outcome = ReconcileOutcome::Mined {
            succeeded: stored.succeeded,
            dropped: dropped.len(),
        };
        let follow_up = stored.is_contract_transaction().then_some(stored);
        Ok((outcome, follow_up))
    }

    /// Ether transfers have no contract-event subscription, so they are
    /// re-checked whenever a contract call of one of their wallets is mined.
    async fn verify_ether_transactions(&self, mined: &TransactionDetail) {
        let addresses: BTreeSet<&str> = mined.involved_addresses().collect();
        let mut verified = HashSet::new();
        for address in addresses {
            let pending = match self
                .ledger
                .inner()
                .find_pending_ether_transactions(self.network_id, address)
                .await
            {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(address = %address, error = ?e, "Failed to list pending ether transfers");
                    continue;
                }
            };
            for tx in pending {
                let Some(hash) = tx.hash else { continue };
                if !verified.insert(hash.clone()) {
                    continue;
                }
                match self.settle(&hash, None).await {
                    Ok((outcome, _)) => {
                        debug!(hash = %hash, outcome = ?outcome, "Ether transfer re-verified")
                    }
                    Err(e) => warn!(hash = %hash, error = ?e, "Ether transfer re-verification failed"),
                }
            }
        }
    }

    /// Decides the fate of a pending transaction the chain has no receipt for.
    #[instrument(skip(self, tx), fields(hash = ?tx.hash, nonce = ?tx.nonce))]
    pub async fn check_pending_validity(
        &self,
        mut tx: TransactionDetail,
    ) -> Result<ReconcileOutcome, AppError> {
        let max_age = Duration::days(self.sender_config.pending_max_days);
        if let Some(sent_at) = tx.sent_at
            && Utc::now() - sent_at >= max_age
        {
            if tx.raw_transaction.is_some()
                && tx.sending_attempts < self.sender_config.max_attempts
            {
                info!(attempts = tx.sending_attempts, "Expired transaction rescheduled for sending");
                tx.sent_at = None;
                self.ledger.save(tx).await?;
                return Ok(ReconcileOutcome::Rescheduled);
            }
            warn!(sent_at = %sent_at, "Transaction never mined, marking as failed");
            tx.mark_dropped();
            self.ledger.save(tx).await?;
            return Ok(ReconcileOutcome::Dropped);
        }

        if let Some(nonce) = tx.nonce
            && tx.is_sent()
        {
            let confirmed = self.chain.transaction_count(&tx.from_address).await?;
            if u64::try_from(nonce).map(|n| n < confirmed).unwrap_or(false) {
                info!(confirmed, "Nonce consumed by another transaction, marking as dropped");
                tx.mark_dropped();
                self.ledger.save(tx).await?;
                return Ok(ReconcileOutcome::Dropped);
            }
        }
        Ok(ReconcileOutcome::Pending)
    }

    /// Processes newly mined blocks from the stored cursor, at most one
    /// batch per call. Returns the number of blocks processed.
    #[instrument(skip(self))]
    pub async fn scan_new_blocks(&self) -> Result<u64, AppError> {
        let ledger = self.ledger.inner();
        let head = self.chain.block_number().await?;
        let Some(last) = ledger.last_watched_block(self.network_id).await? else {
            info!(head, "No watched block recorded, starting from chain head");
            ledger.save_last_watched_block(self.network_id, head).await?;
            return Ok(0);
        };
        if last >= head {
            return Ok(0);
        }

        let until = head.min(last + self.config.block_batch_size);
        let pending: HashSet<String> = ledger
            .find_pending_hashes(self.network_id)
            .await?
            .into_iter()
            .collect();

        let mut processed = 0;
        for number in (last + 1)..=until {
            let Some(block) = self.chain.block(number).await? else {
                debug!(number, "Block not available yet");
                break;
            };
            for raw_hash in &block.transaction_hashes {
                let Some(hash) = normalize_hash(raw_hash) else {
                    continue;
                };
                if pending.contains(&hash) {
                    self.reconcile_hash(&hash).await?;
                    continue;
                }
                let Some(chain_tx) = self.chain.transaction(&hash).await? else {
                    continue;
                };
                if !self.targets_token(&chain_tx) {
                    continue;
                }
                if ledger.find_by_hash(&hash).await?.is_some() {
                    continue;
                }
                let (outcome, mined) = self.settle(&hash, Some(chain_tx)).await?;
                if let Some(tx) = mined {
                    self.verify_ether_transactions(&tx).await;
                }
                debug!(hash = %hash, outcome = ?outcome, "Token transaction observed");
            }
            ledger.save_last_watched_block(self.network_id, number).await?;
            processed += 1;
        }

        if processed > 0 {
            debug!(from = last + 1, processed, head, "Blocks scanned");
        }
        Ok(processed)
    }

    /// Re-checks every locally pending transaction by hash. Per-transaction
    /// failures are logged. Returns how many left the pending state.
    #[instrument(skip(self))]
    pub async fn refresh_pending(&self) -> Result<usize, AppError> {
        let hashes = self
            .ledger
            .inner()
            .find_pending_hashes(self.network_id)
            .await?;
        let mut settled = 0;
        for hash in hashes {
            match self.reconcile_hash(&hash).await {
                Ok(ReconcileOutcome::Mined { .. } | ReconcileOutcome::Dropped) => settled += 1,
                Ok(_) => {}
                Err(e) => warn!(hash = %hash, error = ?e, "Failed to refresh pending transaction"),
            }
        }
        if settled > 0 {
            info!(settled, "Pending transactions refreshed");
        }
        Ok(settled)
    }

    fn targets_token(&self, chain_tx: &ChainTransaction) -> bool {
        chain_tx
            .to
            .as_deref()
            .and_then(normalize_address)
            .map(|to| to == self.token.contract_address())
            .unwrap_or(false)
    }

    fn detail_from_chain(&self, chain_tx: &ChainTransaction) -> Result<TransactionDetail, AppError> {
        let mut tx = TransactionDetail::new(self.network_id, &chain_tx.from);
        tx.hash = Some(chain_tx.hash.clone());
        tx.to_address = chain_tx.to.clone();
        tx.nonce = i64::try_from(chain_tx.nonce).ok();
        tx.value = from_base_units(chain_tx.value, ETHER_DECIMALS)?;
        tx.gas_price = i64::try_from(chain_tx.gas_price).unwrap_or(i64::MAX);

        if self.targets_token(chain_tx) {
            tx.contract_address = Some(self.token.contract_address().to_string());
            if let Some(call) = self.token.decode_call(&chain_tx.input) {
                if call.to.is_some() {
                    tx.to_address = call.to;
                }
                tx.by_address = call.from;
                tx.contract_amount = from_base_units(call.amount, self.token.decimals())?;
                tx.admin_operation = call.admin;
                tx.contract_method = Some(call.method);
            }
        }
        tx.normalize();
        Ok(tx)
    }

    async fn involves_known_wallet(&self, tx: &TransactionDetail) -> Result<bool, AppError> {
        for address in tx.involved_addresses() {
            if self.wallets.find_wallet_by_address(address).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn apply_initialization(&self, tx: &TransactionDetail) -> Result<(), AppError> {
        let Some(address) = tx.to_address.clone() else {
            return Ok(());
        };
        let state = if tx.succeeded {
            WalletState::Initialized
        } else {
            WalletState::Modified
        };
        self.wallets
            .update_initialization_state(&address, state)
            .await?;
        info!(address = %address, state = %state, "Wallet initialization settled");
        self.ledger
            .events()
            .publish_wallet(WalletEvent::InitializationChanged { address, state });
        Ok(())
    }
}

fn finalize(tx: &mut TransactionDetail, receipt: &TransactionReceipt) -> Result<(), AppError> {
    let price = receipt
        .effective_gas_price
        .unwrap_or_else(|| u128::try_from(tx.gas_price).unwrap_or(0));
    tx.pending = false;
    tx.succeeded = receipt.status;
    tx.dropped = false;
    tx.gas_used = i64::try_from(receipt.gas_used).unwrap_or(i64::MAX);
    tx.gas_price = i64::try_from(price).unwrap_or(i64::MAX);
    let fee_units = u128::from(receipt.gas_used).saturating_mul(price);
    tx.fee = from_base_units(fee_units, ETHER_DECIMALS)?;
    Ok(())
}

fn log_statistics(tx: &TransactionDetail, succeeded: bool, reason: &str) {
    if !tx.is_contract_transaction() {
        return;
    }
    info!(
        target: "transaction_statistics",
        hash = ?tx.hash,
        method = ?tx.contract_method,
        from = %tx.from_address,
        to = ?tx.to_address,
        by = ?tx.by_address,
        amount = %tx.contract_amount,
        succeeded,
        reason,
        "Contract transaction"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::events::EventBus;
    use crate::domain::{TransactionLedger, Wallet, WalletType};
    use crate::infra::blockchain::abi::{AbiArg, encode_call};
    use crate::test_utils::{MockChainClient, MockStore, MockTokenContract, test_address, test_hash};
    use rust_decimal::Decimal;

    struct Fixture {
        store: Arc<MockStore>,
        chain: Arc<MockChainClient>,
        reconciler: TransactionReconciler,
        bus: EventBus,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MockStore::new());
        let chain = Arc::new(MockChainClient::new());
        let token = Arc::new(MockTokenContract::new(&test_address(900)));
        let bus = EventBus::default();
        let ledger = Arc::new(TransactionLedgerService::new(store.clone(), bus.clone()));
        let reconciler = TransactionReconciler::new(
            1,
            ledger,
            store.clone(),
            chain.clone(),
            token,
            ReconcilerConfig::default(),
            SenderConfig::default(),
        );
        Fixture {
            store,
            chain,
            reconciler,
            bus,
        }
    }

    async fn pending(store: &MockStore, hash: u64, from: u64, nonce: i64) -> TransactionDetail {
        let mut tx = TransactionDetail::new(1, &test_address(from));
        tx.hash = Some(test_hash(hash));
        tx.to_address = Some(test_address(99));
        tx.nonce = Some(nonce);
        tx.sent_at = Some(Utc::now());
        tx.created_at = tx.sent_at;
        store.upsert(&tx).await.unwrap()
    }

    #[tokio::test]
    async fn test_mined_transaction_is_finalized_with_fee() {
        let f = fixture();
        pending(&f.store, 1, 1, 0).await;
        f.chain.mine(&test_hash(1), true);

        let outcome = f.reconciler.reconcile_hash(&test_hash(1)).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Mined {
                succeeded: true,
                dropped: 0
            }
        );
        let stored = f.store.transaction(&test_hash(1)).unwrap();
        assert!(!stored.pending && stored.succeeded);
        assert_eq!(stored.gas_used, 21_000);
        assert_eq!(stored.fee, Decimal::new(21, 6));
    }

    #[tokio::test]
    async fn test_reverted_receipt_marks_failed() {
        let f = fixture();
        pending(&f.store, 1, 1, 0).await;
        f.chain.mine(&test_hash(1), false);

        f.reconciler.reconcile_hash(&test_hash(1)).await.unwrap();
        let stored = f.store.transaction(&test_hash(1)).unwrap();
        assert!(!stored.pending && !stored.succeeded && !stored.dropped);
    }

    #[tokio::test]
    async fn test_redelivery_is_a_no_op() {
        let f = fixture();
        pending(&f.store, 1, 1, 0).await;
        f.chain.mine(&test_hash(1), true);
        f.reconciler.reconcile_hash(&test_hash(1)).await.unwrap();

        let mut events = f.bus.subscribe_transactions();
        let again = f.reconciler.reconcile_hash(&test_hash(1)).await.unwrap();
        assert_eq!(again, ReconcileOutcome::AlreadyFinal);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_wallets_are_ignored() {
        let f = fixture();
        f.chain.add_transaction(ChainTransaction {
            hash: test_hash(5),
            from: test_address(50),
            to: Some(test_address(51)),
            nonce: 0,
            value: 1,
            gas_price: 1,
            input: "0x".to_string(),
            block_number: Some(1),
        });
        f.chain.mine(&test_hash(5), true);

        let outcome = f.reconciler.reconcile_hash(&test_hash(5)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert!(f.store.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_expired_transaction_without_raw_is_dropped() {
        let f = fixture();
        let mut tx = pending(&f.store, 1, 1, 0).await;
        tx.sent_at = Some(Utc::now() - Duration::days(4));
        f.store.upsert(&tx).await.unwrap();

        let outcome = f.reconciler.reconcile_hash(&test_hash(1)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Dropped);
        assert!(f.store.transaction(&test_hash(1)).unwrap().dropped);
    }

    #[tokio::test]
    async fn test_expired_transaction_with_raw_is_rescheduled() {
        let f = fixture();
        let mut tx = pending(&f.store, 1, 1, 0).await;
        tx.sent_at = Some(Utc::now() - Duration::days(4));
        tx.raw_transaction = Some("0xf86c".to_string());
        tx.sending_attempts = 1;
        f.store.upsert(&tx).await.unwrap();

        let outcome = f.reconciler.reconcile_hash(&test_hash(1)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Rescheduled);
        let stored = f.store.transaction(&test_hash(1)).unwrap();
        assert!(stored.pending && stored.sent_at.is_none());
    }

    #[tokio::test]
    async fn test_consumed_nonce_is_dropped() {
        let f = fixture();
        pending(&f.store, 1, 1, 2).await;
        f.chain.set_transaction_count(&test_address(1), 5);

        let outcome = f.reconciler.reconcile_hash(&test_hash(1)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_initialize_account_updates_wallet() {
        let f = fixture();
        f.store
            .add_wallet(Wallet::new(3, WalletType::User, "bob").with_address(&test_address(3)));
        let input = encode_call(
            "initializeAccount(address,uint256)",
            &[AbiArg::Address(&test_address(3)), AbiArg::Uint(10u128.pow(18))],
        )
        .unwrap();
        f.chain.add_transaction(ChainTransaction {
            hash: test_hash(8),
            from: test_address(900_000),
            to: Some(test_address(900)),
            nonce: 1,
            value: 0,
            gas_price: 1,
            input,
            block_number: Some(1),
        });
        f.chain.mine(&test_hash(8), true);
        let mut wallet_events = f.bus.subscribe_wallets();

        f.reconciler.reconcile_hash(&test_hash(8)).await.unwrap();

        let stored = f.store.transaction(&test_hash(8)).unwrap();
        assert_eq!(stored.contract_method.as_deref(), Some("initializeAccount"));
        assert_eq!(stored.contract_amount, Decimal::ONE);
        assert!(stored.admin_operation);
        let wallet = f.store.find_wallet_by_address(&test_address(3)).await.unwrap().unwrap();
        assert_eq!(wallet.initialization_state, WalletState::Initialized);
        assert!(matches!(
            wallet_events.recv().await.unwrap().payload,
            WalletEvent::InitializationChanged {
                state: WalletState::Initialized,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_scan_starts_at_head_then_advances() {
        let f = fixture();
        f.chain.set_height(10);
        assert_eq!(f.reconciler.scan_new_blocks().await.unwrap(), 0);
        assert_eq!(f.store.last_watched_block(1).await.unwrap(), Some(10));

        pending(&f.store, 1, 1, 0).await;
        f.chain.add_block(11, &[]);
        f.chain.add_block(12, &[&test_hash(1)]);
        f.chain.mine(&test_hash(1), true);

        assert_eq!(f.reconciler.scan_new_blocks().await.unwrap(), 2);
        assert_eq!(f.store.last_watched_block(1).await.unwrap(), Some(12));
        assert!(!f.store.transaction(&test_hash(1)).unwrap().pending);
    }

    #[tokio::test]
    async fn test_scan_failure_keeps_cursor() {
        let f = fixture();
        f.store.save_last_watched_block(1, 10).await.unwrap();
        f.chain.add_block(11, &[]);
        f.chain.add_block(12, &[]);
        f.chain.fail_block(12, true);

        assert!(f.reconciler.scan_new_blocks().await.is_err());
        assert_eq!(f.store.last_watched_block(1).await.unwrap(), Some(11));

        f.chain.fail_block(12, false);
        assert_eq!(f.reconciler.scan_new_blocks().await.unwrap(), 1);
        assert_eq!(f.store.last_watched_block(1).await.unwrap(), Some(12));
    }
}
