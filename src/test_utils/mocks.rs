//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha3::{Digest, Keccak256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::{
    AMOUNT_METHODS, AppError, BlockchainError, ChainBlock, ChainClient, ChainTransaction,
    ContractCall, DatabaseError, FlowDirection, Identity, IdentityDirectory, RewardPeriod,
    RewardPlugin, RewardReport, RewardSettings, RewardStatus, RewardStore, RewardTeam,
    TokenContract, TransactionDetail, TransactionLedger, TransactionReceipt, ValidationError,
    Wallet, WalletState, WalletStore, WalletType, to_base_units,
};
use crate::infra::blockchain::abi::{self, AbiArg};
use crate::infra::blockchain::{SignedTransaction, TransactionSigner, UnsignedTransaction};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }

    fn message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| "Mock error".to_string())
    }
}

/// Hash a mock chain assigns to a raw payload
#[must_use]
pub fn mock_hash_of_raw(raw: &str) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(raw.as_bytes())))
}

/// Deterministic `0x`-prefixed address for test identity `n`
#[must_use]
pub fn test_address(n: u64) -> String {
    format!("0x{:040x}", n)
}

/// Deterministic transaction hash for test value `n`
#[must_use]
pub fn test_hash(n: u64) -> String {
    format!("0x{:064x}", n)
}

#[derive(Default)]
struct LedgerState {
    transactions: BTreeMap<i64, TransactionDetail>,
    next_id: i64,
    cursors: HashMap<i64, u64>,
}

#[derive(Default)]
struct RewardState {
    settings: Option<RewardSettings>,
    teams: BTreeMap<i64, RewardTeam>,
    next_team_id: i64,
    periods: Vec<(RewardPeriod, RewardStatus)>,
    hashes: Vec<(RewardPeriod, i64, String)>,
    saved_reports: usize,
}

fn same_period(stored: &RewardPeriod, period: &RewardPeriod) -> bool {
    let median = period.start + (period.end - period.start) / 2;
    stored.period_type == period.period_type && stored.start <= median && stored.end > median
}

/// In-memory ledger, wallet and reward storage
pub struct MockStore {
    ledger: Arc<Mutex<LedgerState>>,
    wallets: Arc<Mutex<HashMap<i64, Wallet>>>,
    rewards: Arc<Mutex<RewardState>>,
    config: MockConfig,
    is_healthy: AtomicBool,
    fail_report_saves: AtomicBool,
}

impl MockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(LedgerState::default())),
            wallets: Arc::new(Mutex::new(HashMap::new())),
            rewards: Arc::new(Mutex::new(RewardState::default())),
            config,
            is_healthy: AtomicBool::new(true),
            fail_report_saves: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Makes `save_report` fail while every other operation keeps working
    pub fn fail_report_saves(&self, fail: bool) {
        self.fail_report_saves.store(fail, Ordering::Relaxed);
    }

    /// Hash linked to `identity_id` in `period`
    pub fn linked_hash(&self, period: &RewardPeriod, identity_id: i64) -> Option<String> {
        self.rewards
            .lock()
            .unwrap()
            .hashes
            .iter()
            .find(|(p, id, _)| *id == identity_id && same_period(p, period))
            .map(|(_, _, hash)| hash.clone())
    }

    pub fn add_wallet(&self, wallet: Wallet) {
        self.wallets
            .lock()
            .unwrap()
            .insert(wallet.identity_id, wallet);
    }

    /// Get all stored transactions, ordered by id
    pub fn transactions(&self) -> Vec<TransactionDetail> {
        self.ledger
            .lock()
            .unwrap()
            .transactions
            .values()
            .cloned()
            .collect()
    }

    pub fn transaction(&self, hash: &str) -> Option<TransactionDetail> {
        self.ledger
            .lock()
            .unwrap()
            .transactions
            .values()
            .find(|tx| tx.hash.as_deref() == Some(hash))
            .cloned()
    }

    pub fn period_status(&self, period: &RewardPeriod) -> Option<RewardStatus> {
        self.rewards
            .lock()
            .unwrap()
            .periods
            .iter()
            .find(|(p, _)| same_period(p, period))
            .map(|(_, s)| *s)
    }

    pub fn saved_reports(&self) -> usize {
        self.rewards.lock().unwrap().saved_reports
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Database(DatabaseError::Query(
                self.config.message(),
            )));
        }
        Ok(())
    }

    fn select<F>(&self, filter: F) -> Vec<TransactionDetail>
    where
        F: Fn(&TransactionDetail) -> bool,
    {
        let mut items: Vec<TransactionDetail> = self
            .ledger
            .lock()
            .unwrap()
            .transactions
            .values()
            .filter(|tx| filter(tx))
            .cloned()
            .collect();
        items.sort_by_key(|tx| (tx.nonce, tx.id));
        items
    }

    fn upsert_locked(
        state: &mut LedgerState,
        tx: &TransactionDetail,
    ) -> Result<TransactionDetail, AppError> {
        if let Some(hash) = tx.hash.as_deref() {
            let clash = state
                .transactions
                .values()
                .any(|other| other.hash.as_deref() == Some(hash) && other.id != tx.id);
            if clash {
                return Err(AppError::Database(DatabaseError::Duplicate(format!(
                    "transaction hash {}",
                    hash
                ))));
            }
        }
        let mut stored = tx.clone();
        match tx.id {
            Some(id) => {
                if !state.transactions.contains_key(&id) {
                    return Err(AppError::Database(DatabaseError::NotFound(format!(
                        "transaction {}",
                        id
                    ))));
                }
            }
            None => {
                state.next_id += 1;
                stored.id = Some(state.next_id);
            }
        }
        if let Some(id) = stored.id {
            state.transactions.insert(id, stored.clone());
        }
        Ok(stored)
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionLedger for MockStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn upsert(&self, tx: &TransactionDetail) -> Result<TransactionDetail, AppError> {
        self.check_should_fail()?;
        let mut state = self.ledger.lock().unwrap();
        Self::upsert_locked(&mut state, tx)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<TransactionDetail>, AppError> {
        self.check_should_fail()?;
        Ok(self.ledger.lock().unwrap().transactions.get(&id).cloned())
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<TransactionDetail>, AppError> {
        self.check_should_fail()?;
        Ok(self.transaction(hash))
    }

    async fn find_pending(&self, network_id: i64) -> Result<Vec<TransactionDetail>, AppError> {
        self.check_should_fail()?;
        Ok(self.select(|tx| tx.network_id == network_id && tx.pending))
    }

    async fn find_by_nonce(
        &self,
        network_id: i64,
        from_address: &str,
        nonce: i64,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        self.check_should_fail()?;
        Ok(self.select(|tx| {
            tx.network_id == network_id && tx.from_address == from_address && tx.nonce == Some(nonce)
        }))
    }

    async fn find_pending_with_same_nonce(
        &self,
        network_id: i64,
        from_address: &str,
        nonce: i64,
        exclude_hash: &str,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        self.check_should_fail()?;
        Ok(self.select(|tx| {
            tx.network_id == network_id
                && tx.pending
                && tx.from_address == from_address
                && tx.nonce == Some(nonce)
                && tx.hash.as_deref() != Some(exclude_hash)
        }))
    }

    async fn find_pending_as_sender_up_to_nonce(
        &self,
        network_id: i64,
        from_address: &str,
        nonce: i64,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        self.check_should_fail()?;
        Ok(self.select(|tx| {
            tx.network_id == network_id
                && tx.pending
                && tx.from_address == from_address
                && tx.nonce.map(|n| n <= nonce).unwrap_or(false)
        }))
    }

    async fn find_pending_ether_transactions(
        &self,
        network_id: i64,
        address: &str,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        self.check_should_fail()?;
        Ok(self.select(|tx| {
            tx.network_id == network_id
                && tx.pending
                && tx.contract_address.is_none()
                && tx.is_sent()
                && (tx.from_address == address || tx.to_address.as_deref() == Some(address))
        }))
    }

    async fn find_transactions_to_send(
        &self,
        network_id: i64,
    ) -> Result<Vec<TransactionDetail>, AppError> {
        self.check_should_fail()?;
        Ok(self.select(|tx| {
            tx.network_id == network_id && tx.pending && tx.raw_transaction.is_some()
        }))
    }

    async fn count_pending_sent(&self, network_id: i64, address: &str) -> Result<i64, AppError> {
        self.check_should_fail()?;
        Ok(self
            .select(|tx| {
                tx.network_id == network_id
                    && tx.pending
                    && tx.from_address == address
                    && tx.is_sent()
                    && tx.raw_transaction.is_some()
            })
            .len() as i64)
    }

    async fn max_pending_nonce(
        &self,
        network_id: i64,
        address: &str,
    ) -> Result<Option<i64>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .select(|tx| tx.network_id == network_id && tx.pending && tx.from_address == address)
            .iter()
            .filter_map(|tx| tx.nonce)
            .max())
    }

    async fn apply_mined(
        &self,
        tx: &TransactionDetail,
    ) -> Result<Option<(TransactionDetail, Vec<TransactionDetail>)>, AppError> {
        self.check_should_fail()?;
        let mut state = self.ledger.lock().unwrap();
        let existing = tx.hash.as_deref().and_then(|hash| {
            state
                .transactions
                .values()
                .find(|other| other.hash.as_deref() == Some(hash))
                .map(|other| (other.id, other.pending))
        });
        let mut tx = tx.clone();
        match existing {
            Some((_, false)) => return Ok(None),
            Some((id, true)) => tx.id = id,
            None => {}
        }
        let stored = Self::upsert_locked(&mut state, &tx)?;
        let mut dropped = Vec::new();
        if let Some(nonce) = stored.nonce {
            for other in state.transactions.values_mut() {
                let stale = other.id != stored.id
                    && other.network_id == stored.network_id
                    && other.pending
                    && other.from_address == stored.from_address
                    && other.nonce.map(|n| n <= nonce).unwrap_or(false);
                if stale {
                    other.mark_dropped();
                    dropped.push(other.clone());
                }
            }
        }
        Ok(Some((stored, dropped)))
    }

    async fn sum_contract_amount(
        &self,
        network_id: i64,
        address: &str,
        direction: FlowDirection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Decimal, AppError> {
        self.check_should_fail()?;
        Ok(self
            .select(|tx| {
                let matches_address = match direction {
                    FlowDirection::Sent => {
                        (tx.from_address == address && tx.by_address.is_none())
                            || tx.by_address.as_deref() == Some(address)
                    }
                    FlowDirection::Received => tx.to_address.as_deref() == Some(address),
                };
                tx.network_id == network_id
                    && matches_address
                    && tx.succeeded
                    && tx
                        .contract_method
                        .as_deref()
                        .map(|m| AMOUNT_METHODS.contains(&m))
                        .unwrap_or(false)
                    && tx.created_at.map(|t| t >= start && t < end).unwrap_or(false)
            })
            .iter()
            .map(|tx| tx.contract_amount)
            .sum())
    }

    async fn last_watched_block(&self, network_id: i64) -> Result<Option<u64>, AppError> {
        self.check_should_fail()?;
        Ok(self.ledger.lock().unwrap().cursors.get(&network_id).copied())
    }

    async fn save_last_watched_block(&self, network_id: i64, block: u64) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.ledger
            .lock()
            .unwrap()
            .cursors
            .insert(network_id, block);
        Ok(())
    }
}

#[async_trait]
impl WalletStore for MockStore {
    async fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>, AppError> {
        self.check_should_fail()?;
        let address = address.to_lowercase();
        Ok(self
            .wallets
            .lock()
            .unwrap()
            .values()
            .find(|w| w.address.as_deref() == Some(address.as_str()))
            .cloned())
    }

    async fn find_wallet_by_identity(&self, identity_id: i64) -> Result<Option<Wallet>, AppError> {
        self.check_should_fail()?;
        Ok(self.wallets.lock().unwrap().get(&identity_id).cloned())
    }

    async fn list_wallets(&self, wallet_type: Option<WalletType>) -> Result<Vec<Wallet>, AppError> {
        self.check_should_fail()?;
        let mut wallets: Vec<Wallet> = self
            .wallets
            .lock()
            .unwrap()
            .values()
            .filter(|w| wallet_type.map(|t| w.wallet_type == t).unwrap_or(true))
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.identity_id);
        Ok(wallets)
    }

    async fn save_wallet(&self, wallet: &Wallet) -> Result<Wallet, AppError> {
        self.check_should_fail()?;
        self.add_wallet(wallet.clone());
        Ok(wallet.clone())
    }

    async fn update_initialization_state(
        &self,
        address: &str,
        state: WalletState,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let address = address.to_lowercase();
        let mut wallets = self.wallets.lock().unwrap();
        for wallet in wallets.values_mut() {
            if wallet.address.as_deref() == Some(address.as_str()) {
                wallet.initialization_state = state;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RewardStore for MockStore {
    async fn load_settings(&self) -> Result<Option<RewardSettings>, AppError> {
        self.check_should_fail()?;
        Ok(self.rewards.lock().unwrap().settings.clone())
    }

    async fn save_settings(&self, settings: &RewardSettings) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.rewards.lock().unwrap().settings = Some(settings.clone());
        Ok(())
    }

    async fn list_teams(&self) -> Result<Vec<RewardTeam>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .rewards
            .lock()
            .unwrap()
            .teams
            .values()
            .filter(|t| !t.deleted)
            .cloned()
            .collect())
    }

    async fn find_team(&self, id: i64) -> Result<Option<RewardTeam>, AppError> {
        self.check_should_fail()?;
        Ok(self.rewards.lock().unwrap().teams.get(&id).cloned())
    }

    async fn save_team(&self, team: &RewardTeam) -> Result<RewardTeam, AppError> {
        self.check_should_fail()?;
        let mut state = self.rewards.lock().unwrap();
        let mut stored = team.clone();
        if stored.id.is_none() {
            state.next_team_id += 1;
            stored.id = Some(state.next_team_id);
        }
        if let Some(id) = stored.id {
            state.teams.insert(id, stored.clone());
        }
        Ok(stored)
    }

    async fn find_period_status(
        &self,
        period: &RewardPeriod,
    ) -> Result<Option<RewardStatus>, AppError> {
        self.check_should_fail()?;
        Ok(self.period_status(period))
    }

    async fn find_periods_by_status(
        &self,
        status: RewardStatus,
    ) -> Result<Vec<RewardPeriod>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .rewards
            .lock()
            .unwrap()
            .periods
            .iter()
            .filter(|(_, s)| *s == status)
            .map(|(p, _)| p.clone())
            .collect())
    }

    async fn reward_transaction_hashes(
        &self,
        period: &RewardPeriod,
    ) -> Result<HashMap<i64, String>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .rewards
            .lock()
            .unwrap()
            .hashes
            .iter()
            .filter(|(p, _, _)| same_period(p, period))
            .map(|(_, id, hash)| (*id, hash.clone()))
            .collect())
    }

    async fn save_report(
        &self,
        report: &RewardReport,
        status: RewardStatus,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        if self.fail_report_saves.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Query(
                "report save failed".to_string(),
            )));
        }
        let mut state = self.rewards.lock().unwrap();
        match state
            .periods
            .iter_mut()
            .find(|(p, _)| same_period(p, &report.period))
        {
            Some(entry) => entry.1 = status,
            None => state.periods.push((report.period.clone(), status)),
        }
        for reward in &report.rewards {
            let Some(hash) = reward.transaction.as_ref().and_then(|tx| tx.hash.clone()) else {
                continue;
            };
            let existing = state.hashes.iter_mut().find(|(p, id, _)| {
                *id == reward.identity_id && same_period(p, &report.period)
            });
            match existing {
                Some(entry) => entry.2 = hash,
                None => state
                    .hashes
                    .push((report.period.clone(), reward.identity_id, hash)),
            }
        }
        state.saved_reports += 1;
        Ok(())
    }

    async fn link_reward_transaction(
        &self,
        period: &RewardPeriod,
        identity_id: i64,
        hash: &str,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut state = self.rewards.lock().unwrap();
        if !state.periods.iter().any(|(p, _)| same_period(p, period)) {
            state.periods.push((period.clone(), RewardStatus::Pending));
        }
        let existing = state
            .hashes
            .iter_mut()
            .find(|(p, id, _)| *id == identity_id && same_period(p, period));
        match existing {
            Some(entry) => entry.2 = hash.to_string(),
            None => state
                .hashes
                .push((period.clone(), identity_id, hash.to_string())),
        }
        Ok(())
    }

    async fn replace_reward_transaction_hash(
        &self,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<u64, AppError> {
        self.check_should_fail()?;
        let mut state = self.rewards.lock().unwrap();
        let mut touched = 0;
        for entry in state.hashes.iter_mut().filter(|(_, _, h)| h == old_hash) {
            entry.2 = new_hash.to_string();
            touched += 1;
        }
        Ok(touched)
    }
}

/// Failure mode of [`MockChainClient::send_raw_transaction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Node unreachable
    Transient,
    /// Node refused the payload
    Rejected,
}

#[derive(Default)]
struct ChainState {
    height: u64,
    blocks: BTreeMap<u64, ChainBlock>,
    transactions: HashMap<String, ChainTransaction>,
    receipts: HashMap<String, TransactionReceipt>,
    counts: HashMap<String, u64>,
    broadcasts: Vec<String>,
    receipt_requests: Vec<String>,
    send_failure: Option<SendFailure>,
    failing_blocks: HashSet<u64>,
}

/// Scriptable chain
pub struct MockChainClient {
    state: Arc<Mutex<ChainState>>,
    config: MockConfig,
    is_healthy: AtomicBool,
}

impl MockChainClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState::default())),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    /// Adds block `number` holding `hashes` and raises the height to it.
    pub fn add_block(&self, number: u64, hashes: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.blocks.insert(
            number,
            ChainBlock {
                number,
                hash: test_hash(1_000_000 + number),
                transaction_hashes: hashes.iter().map(|h| h.to_string()).collect(),
            },
        );
        state.height = state.height.max(number);
    }

    /// Makes fetching block `number` fail until cleared.
    pub fn fail_block(&self, number: u64, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing_blocks.insert(number);
        } else {
            state.failing_blocks.remove(&number);
        }
    }

    pub fn add_transaction(&self, tx: ChainTransaction) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(tx.hash.clone(), tx);
    }

    /// Records a receipt for `hash` in the current head block.
    pub fn mine(&self, hash: &str, success: bool) {
        let mut state = self.state.lock().unwrap();
        let block_number = state.height;
        state.receipts.insert(
            hash.to_string(),
            TransactionReceipt {
                transaction_hash: hash.to_string(),
                block_number,
                status: success,
                gas_used: 21_000,
                effective_gas_price: Some(1_000_000_000),
            },
        );
    }

    pub fn set_transaction_count(&self, address: &str, count: u64) {
        self.state
            .lock()
            .unwrap()
            .counts
            .insert(address.to_lowercase(), count);
    }

    pub fn fail_sends(&self, failure: Option<SendFailure>) {
        self.state.lock().unwrap().send_failure = failure;
    }

    /// Raw payloads broadcast so far
    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    /// Hashes whose receipt was requested, in order
    pub fn receipt_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().receipt_requests.clone()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                self.config.message(),
            )));
        }
        Ok(())
    }
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        self.check_should_fail()?;
        Ok(self.state.lock().unwrap().height)
    }

    async fn block(&self, number: u64) -> Result<Option<ChainBlock>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        if state.failing_blocks.contains(&number) {
            return Err(AppError::Blockchain(BlockchainError::Timeout(format!(
                "block {}",
                number
            ))));
        }
        if number > state.height {
            return Ok(None);
        }
        Ok(Some(state.blocks.get(&number).cloned().unwrap_or(ChainBlock {
            number,
            hash: test_hash(1_000_000 + number),
            transaction_hashes: Vec::new(),
        })))
    }

    async fn transaction(&self, hash: &str) -> Result<Option<ChainTransaction>, AppError> {
        self.check_should_fail()?;
        Ok(self.state.lock().unwrap().transactions.get(hash).cloned())
    }

    async fn receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        state.receipt_requests.push(hash.to_string());
        Ok(state.receipts.get(hash).cloned())
    }

    async fn transaction_count(&self, address: &str) -> Result<u64, AppError> {
        self.check_should_fail()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .counts
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or(0))
    }

    async fn send_raw_transaction(&self, raw: &str) -> Result<String, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        match state.send_failure {
            Some(SendFailure::Transient) => Err(AppError::Blockchain(BlockchainError::Timeout(
                "send timed out".to_string(),
            ))),
            Some(SendFailure::Rejected) => Err(AppError::Blockchain(
                BlockchainError::TransactionFailed("execution reverted".to_string()),
            )),
            None => {
                state.broadcasts.push(raw.to_string());
                Ok(mock_hash_of_raw(raw))
            }
        }
    }

    async fn gas_price(&self) -> Result<u128, AppError> {
        self.check_should_fail()?;
        Ok(1_000_000_000)
    }
}

#[derive(Default)]
struct TokenState {
    balances: HashMap<String, Decimal>,
    admin_levels: HashMap<String, u8>,
    disapproved: HashSet<String>,
    initialized: HashSet<String>,
    built: Vec<TransactionDetail>,
}

/// Token contract that signs with mock hashes. Every account is approved
/// unless [`MockTokenContract::disapprove`] was called for it.
pub struct MockTokenContract {
    address: String,
    decimals: u32,
    state: Arc<Mutex<TokenState>>,
    counter: AtomicU64,
    config: MockConfig,
}

impl MockTokenContract {
    #[must_use]
    pub fn new(address: &str) -> Self {
        Self::with_config(address, MockConfig::success())
    }

    #[must_use]
    pub fn with_config(address: &str, config: MockConfig) -> Self {
        Self {
            address: address.to_lowercase(),
            decimals: 18,
            state: Arc::new(Mutex::new(TokenState::default())),
            counter: AtomicU64::new(0),
            config,
        }
    }

    pub fn set_balance(&self, address: &str, balance: Decimal) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(address.to_lowercase(), balance);
    }

    pub fn set_admin_level(&self, address: &str, level: u8) {
        self.state
            .lock()
            .unwrap()
            .admin_levels
            .insert(address.to_lowercase(), level);
    }

    pub fn disapprove(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .disapproved
            .insert(address.to_lowercase());
    }

    /// Transactions built so far
    pub fn built(&self) -> Vec<TransactionDetail> {
        self.state.lock().unwrap().built.clone()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Blockchain(BlockchainError::TransactionFailed(
                self.config.message(),
            )));
        }
        Ok(())
    }

    fn sign(
        &self,
        mut tx: TransactionDetail,
        method: &str,
        data: String,
    ) -> Result<TransactionDetail, AppError> {
        self.check_should_fail()?;
        let nonce = tx.nonce.ok_or_else(|| {
            AppError::Validation(ValidationError::MissingField("nonce".to_string()))
        })?;
        let serial = self.counter.fetch_add(1, Ordering::SeqCst);
        let raw = format!("{}{:016x}{:016x}", data, nonce, serial);
        tx.hash = Some(mock_hash_of_raw(&raw));
        tx.raw_transaction = Some(raw);
        tx.contract_address = Some(self.address.clone());
        tx.contract_method = Some(method.to_string());
        if tx.gas_price <= 0 {
            tx.gas_price = 1_000_000_000;
        }
        tx.pending = true;
        tx.sent_at = None;
        self.state.lock().unwrap().built.push(tx.clone());
        Ok(tx)
    }

    fn call_data(&self, signature: &str, tx: &TransactionDetail) -> Result<String, AppError> {
        let to = tx.to_address.as_deref().ok_or_else(|| {
            AppError::Validation(ValidationError::MissingField("to_address".to_string()))
        })?;
        if signature.ends_with("(address)") {
            return abi::encode_call(signature, &[AbiArg::Address(to)]);
        }
        let units = to_base_units(tx.contract_amount, self.decimals)?;
        abi::encode_call(signature, &[AbiArg::Address(to), AbiArg::Uint(units)])
    }
}

#[async_trait]
impl TokenContract for MockTokenContract {
    fn contract_address(&self) -> &str {
        &self.address
    }

    fn decimals(&self) -> u32 {
        self.decimals
    }

    fn decode_call(&self, input: &str) -> Option<ContractCall> {
        abi::decode_call(input)
    }

    async fn balance_of(&self, address: &str) -> Result<Decimal, AppError> {
        self.check_should_fail()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn admin_level(&self, address: &str) -> Result<u8, AppError> {
        self.check_should_fail()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .admin_levels
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or(0))
    }

    async fn is_approved_account(&self, address: &str) -> Result<bool, AppError> {
        self.check_should_fail()?;
        Ok(!self
            .state
            .lock()
            .unwrap()
            .disapproved
            .contains(&address.to_lowercase()))
    }

    async fn is_initialized_account(&self, address: &str) -> Result<bool, AppError> {
        self.check_should_fail()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .initialized
            .contains(&address.to_lowercase()))
    }

    async fn reward(&self, tx: TransactionDetail) -> Result<TransactionDetail, AppError> {
        let to = tx.to_address.clone().unwrap_or_default();
        if !self.is_approved_account(&to).await? {
            return Err(AppError::Blockchain(BlockchainError::AccountNotApproved(to)));
        }
        let data = self.call_data("reward(address,uint256)", &tx)?;
        self.sign(tx, "reward", data)
    }

    async fn transfer(&self, tx: TransactionDetail) -> Result<TransactionDetail, AppError> {
        let data = self.call_data("transfer(address,uint256)", &tx)?;
        self.sign(tx, "transfer", data)
    }

    async fn initialize(&self, mut tx: TransactionDetail) -> Result<TransactionDetail, AppError> {
        let data = self.call_data("initializeAccount(address,uint256)", &tx)?;
        tx.admin_operation = true;
        self.sign(tx, "initializeAccount", data)
    }

    async fn approve_account(
        &self,
        mut tx: TransactionDetail,
    ) -> Result<TransactionDetail, AppError> {
        let data = self.call_data("approveAccount(address)", &tx)?;
        tx.admin_operation = true;
        self.sign(tx, "approveAccount", data)
    }

    async fn disapprove_account(
        &self,
        mut tx: TransactionDetail,
    ) -> Result<TransactionDetail, AppError> {
        let data = self.call_data("disapproveAccount(address)", &tx)?;
        tx.admin_operation = true;
        self.sign(tx, "disapproveAccount", data)
    }
}

/// Identity directory backed by a map
pub struct MockIdentityDirectory {
    identities: Arc<Mutex<BTreeMap<i64, Identity>>>,
    memberships: Arc<Mutex<HashSet<(String, String)>>>,
    config: MockConfig,
}

impl MockIdentityDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            identities: Arc::new(Mutex::new(BTreeMap::new())),
            memberships: Arc::new(Mutex::new(HashSet::new())),
            config,
        }
    }

    pub fn add_identity(&self, id: i64, identity_type: WalletType, remote_id: &str) {
        self.identities.lock().unwrap().insert(
            id,
            Identity {
                id,
                identity_type,
                remote_id: remote_id.to_string(),
                display_name: remote_id.to_string(),
                deleted: false,
            },
        );
    }

    pub fn add_member(&self, username: &str, group: &str) {
        self.memberships
            .lock()
            .unwrap()
            .insert((username.to_string(), group.to_string()));
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::ExternalService(
                crate::domain::ExternalServiceError::Unavailable(self.config.message()),
            ));
        }
        Ok(())
    }
}

impl Default for MockIdentityDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityDirectory for MockIdentityDirectory {
    async fn identity(
        &self,
        identity_type: WalletType,
        remote_id: &str,
    ) -> Result<Option<Identity>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .identities
            .lock()
            .unwrap()
            .values()
            .find(|i| i.identity_type == identity_type && i.remote_id == remote_id)
            .cloned())
    }

    async fn identity_by_id(&self, id: i64) -> Result<Option<Identity>, AppError> {
        self.check_should_fail()?;
        Ok(self.identities.lock().unwrap().get(&id).cloned())
    }

    async fn is_member_of(&self, username: &str, group: &str) -> Result<bool, AppError> {
        self.check_should_fail()?;
        Ok(self
            .memberships
            .lock()
            .unwrap()
            .contains(&(username.to_string(), group.to_string())))
    }
}

/// Point source returning a fixed map
pub struct StaticRewardPlugin {
    plugin_id: String,
    points: Arc<Mutex<HashMap<i64, Decimal>>>,
    enabled: AtomicBool,
    calls: AtomicUsize,
}

impl StaticRewardPlugin {
    #[must_use]
    pub fn new(plugin_id: &str, points: impl IntoIterator<Item = (i64, Decimal)>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            points: Arc::new(Mutex::new(points.into_iter().collect())),
            enabled: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_points(&self, identity_id: i64, points: Decimal) {
        self.points.lock().unwrap().insert(identity_id, points);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RewardPlugin for StaticRewardPlugin {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn earned_points(
        &self,
        identity_ids: &[i64],
        _start_seconds: i64,
        _end_seconds: i64,
    ) -> Result<HashMap<i64, Decimal>, AppError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let points = self.points.lock().unwrap();
        Ok(identity_ids
            .iter()
            .filter_map(|id| points.get(id).map(|p| (*id, *p)))
            .collect())
    }
}

/// Signer producing mock hashes over the serialized request
pub struct MockSigner {
    requests: Arc<Mutex<Vec<UnsignedTransaction>>>,
    config: MockConfig,
}

impl MockSigner {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            config,
        }
    }

    pub fn requests(&self) -> Vec<UnsignedTransaction> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, AppError> {
        if self.config.should_fail {
            return Err(AppError::Authorization(self.config.message()));
        }
        self.requests.lock().unwrap().push(tx.clone());
        let payload = serde_json::to_vec(tx).map_err(|e| AppError::Serialization(e.to_string()))?;
        let raw = format!("0x{}", hex::encode(payload));
        Ok(SignedTransaction {
            hash: mock_hash_of_raw(&raw),
            raw,
        })
    }
}
