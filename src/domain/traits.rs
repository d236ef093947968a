//! Domain traits defining contracts for storage, the chain and platform collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::error::AppError;
use super::period::RewardPeriod;
use super::reward::{RewardReport, RewardSettings, RewardStatus, RewardTeam};
use super::types::{
    ChainBlock, ChainTransaction, ContractCall, Identity, TransactionDetail, TransactionReceipt,
    Wallet, WalletState, WalletType,
};

/// Contract methods counted in sent/received token sums
pub const AMOUNT_METHODS: [&str; 4] = ["reward", "initializeAccount", "transfer", "transferFrom"];

/// Direction of a token flow relative to an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    Sent,
    Received,
}

/// Relational mirror of blockchain transactions
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Check storage connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert when `id` is `None`, update otherwise. Returns the stored row.
    async fn upsert(&self, tx: &TransactionDetail) -> Result<TransactionDetail, AppError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<TransactionDetail>, AppError>;

    /// Lookup by already-normalized hash
    async fn find_by_hash(&self, hash: &str) -> Result<Option<TransactionDetail>, AppError>;

    async fn find_pending(&self, network_id: i64) -> Result<Vec<TransactionDetail>, AppError>;

    async fn find_pending_hashes(&self, network_id: i64) -> Result<Vec<String>, AppError> {
        Ok(self
            .find_pending(network_id)
            .await?
            .into_iter()
            .filter_map(|tx| tx.hash)
            .collect())
    }

    /// All transactions occupying a (network, sender, nonce) slot
    async fn find_by_nonce(
        &self,
        network_id: i64,
        from_address: &str,
        nonce: i64,
    ) -> Result<Vec<TransactionDetail>, AppError>;

    /// Pending competitors of `exclude_hash` on the same slot
    async fn find_pending_with_same_nonce(
        &self,
        network_id: i64,
        from_address: &str,
        nonce: i64,
        exclude_hash: &str,
    ) -> Result<Vec<TransactionDetail>, AppError>;

    /// Pending transactions of the sender at or below `nonce`
    async fn find_pending_as_sender_up_to_nonce(
        &self,
        network_id: i64,
        from_address: &str,
        nonce: i64,
    ) -> Result<Vec<TransactionDetail>, AppError>;

    /// Pending plain-ether transfers sent from or to `address`, ordered by nonce
    async fn find_pending_ether_transactions(
        &self,
        network_id: i64,
        address: &str,
    ) -> Result<Vec<TransactionDetail>, AppError>;

    /// Pending transactions carrying a raw payload, ordered by nonce
    async fn find_transactions_to_send(
        &self,
        network_id: i64,
    ) -> Result<Vec<TransactionDetail>, AppError>;

    /// Pending transactions of `address` already broadcast by this service
    async fn count_pending_sent(&self, network_id: i64, address: &str) -> Result<i64, AppError>;

    /// Highest nonce among the sender's pending transactions that carry one
    async fn max_pending_nonce(
        &self,
        network_id: i64,
        address: &str,
    ) -> Result<Option<i64>, AppError>;

    /// Persists a finalized transaction and, in the same unit of work, drops
    /// every other pending transaction of the sender with a nonce at or below
    /// its own. Returns the stored row and the dropped transactions, or `None`
    /// when the stored row was already final and nothing was written.
    async fn apply_mined(
        &self,
        tx: &TransactionDetail,
    ) -> Result<Option<(TransactionDetail, Vec<TransactionDetail>)>, AppError>;

    /// Token amount moved by `address` through `AMOUNT_METHODS` in `[start, end)`
    async fn sum_contract_amount(
        &self,
        network_id: i64,
        address: &str,
        direction: FlowDirection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Decimal, AppError>;

    async fn last_watched_block(&self, network_id: i64) -> Result<Option<u64>, AppError>;

    async fn save_last_watched_block(&self, network_id: i64, block: u64) -> Result<(), AppError>;
}

/// Wallet persistence
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>, AppError>;

    async fn find_wallet_by_identity(&self, identity_id: i64) -> Result<Option<Wallet>, AppError>;

    async fn list_wallets(&self, wallet_type: Option<WalletType>) -> Result<Vec<Wallet>, AppError>;

    async fn save_wallet(&self, wallet: &Wallet) -> Result<Wallet, AppError>;

    async fn update_initialization_state(
        &self,
        address: &str,
        state: WalletState,
    ) -> Result<(), AppError>;
}

/// Reward settings, teams and period reports
#[async_trait]
pub trait RewardStore: Send + Sync {
    async fn load_settings(&self) -> Result<Option<RewardSettings>, AppError>;

    async fn save_settings(&self, settings: &RewardSettings) -> Result<(), AppError>;

    /// Teams not soft-deleted
    async fn list_teams(&self) -> Result<Vec<RewardTeam>, AppError>;

    async fn find_team(&self, id: i64) -> Result<Option<RewardTeam>, AppError>;

    async fn save_team(&self, team: &RewardTeam) -> Result<RewardTeam, AppError>;

    /// Status of the stored period overlapping `period`, if any
    async fn find_period_status(
        &self,
        period: &RewardPeriod,
    ) -> Result<Option<RewardStatus>, AppError>;

    async fn find_periods_by_status(
        &self,
        status: RewardStatus,
    ) -> Result<Vec<RewardPeriod>, AppError>;

    /// Transaction hash linked to each identity's reward in `period`
    async fn reward_transaction_hashes(
        &self,
        period: &RewardPeriod,
    ) -> Result<HashMap<i64, String>, AppError>;

    async fn save_report(&self, report: &RewardReport, status: RewardStatus)
    -> Result<(), AppError>;

    /// Links one identity's reward in `period` to a transaction hash,
    /// creating the period and entry rows when missing.
    async fn link_reward_transaction(
        &self,
        period: &RewardPeriod,
        identity_id: i64,
        hash: &str,
    ) -> Result<(), AppError>;

    /// Re-links reward entries after a transaction replacement. Returns rows touched.
    async fn replace_reward_transaction_hash(
        &self,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<u64, AppError>;
}

/// Read and broadcast access to one blockchain network
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    async fn block_number(&self) -> Result<u64, AppError>;

    async fn block(&self, number: u64) -> Result<Option<ChainBlock>, AppError>;

    async fn transaction(&self, hash: &str) -> Result<Option<ChainTransaction>, AppError>;

    async fn receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>, AppError>;

    /// Confirmed transaction count, i.e. the next nonce the chain accepts
    async fn transaction_count(&self, address: &str) -> Result<u64, AppError>;

    async fn send_raw_transaction(&self, raw: &str) -> Result<String, AppError>;

    async fn gas_price(&self) -> Result<u128, AppError> {
        Err(AppError::NotSupported("gas_price not implemented".to_string()))
    }
}

/// ERC20-like token with administrative operations
#[async_trait]
pub trait TokenContract: Send + Sync {
    fn contract_address(&self) -> &str;

    fn decimals(&self) -> u32;

    /// Decodes call data addressed to the contract
    fn decode_call(&self, input: &str) -> Option<ContractCall>;

    async fn balance_of(&self, address: &str) -> Result<Decimal, AppError>;

    async fn admin_level(&self, address: &str) -> Result<u8, AppError>;

    async fn is_approved_account(&self, address: &str) -> Result<bool, AppError> {
        let _ = address;
        Err(AppError::NotSupported(
            "is_approved_account not implemented".to_string(),
        ))
    }

    async fn is_initialized_account(&self, address: &str) -> Result<bool, AppError> {
        let _ = address;
        Err(AppError::NotSupported(
            "is_initialized_account not implemented".to_string(),
        ))
    }

    /// Builds and signs a reward transfer. The returned transaction carries
    /// its hash and raw payload, ready for broadcast.
    async fn reward(&self, tx: TransactionDetail) -> Result<TransactionDetail, AppError>;

    async fn transfer(&self, tx: TransactionDetail) -> Result<TransactionDetail, AppError>;

    async fn initialize(&self, tx: TransactionDetail) -> Result<TransactionDetail, AppError> {
        let _ = tx;
        Err(AppError::NotSupported("initialize not implemented".to_string()))
    }

    async fn approve_account(&self, tx: TransactionDetail) -> Result<TransactionDetail, AppError> {
        let _ = tx;
        Err(AppError::NotSupported(
            "approve_account not implemented".to_string(),
        ))
    }

    async fn disapprove_account(
        &self,
        tx: TransactionDetail,
    ) -> Result<TransactionDetail, AppError> {
        let _ = tx;
        Err(AppError::NotSupported(
            "disapprove_account not implemented".to_string(),
        ))
    }
}

/// Platform identity lookups. Missing identities resolve to `None`.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn identity(
        &self,
        identity_type: WalletType,
        remote_id: &str,
    ) -> Result<Option<Identity>, AppError>;

    async fn identity_by_id(&self, id: i64) -> Result<Option<Identity>, AppError>;

    async fn is_member_of(&self, username: &str, group: &str) -> Result<bool, AppError>;
}

/// Source of reward points
#[async_trait]
pub trait RewardPlugin: Send + Sync {
    fn plugin_id(&self) -> &str;

    /// Live enablement, authoritative over stored settings
    fn is_enabled(&self) -> bool {
        true
    }

    async fn earned_points(
        &self,
        identity_ids: &[i64],
        start_seconds: i64,
        end_seconds: i64,
    ) -> Result<HashMap<i64, Decimal>, AppError>;
}
