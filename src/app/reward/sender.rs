//! Submission of computed rewards as token transactions.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use crate::app::config::RewardConfig;
use crate::app::events::EventBus;
use crate::app::ledger::TransactionLedgerService;
use crate::app::nonce::NonceManager;
use crate::domain::{
    AppError, BlockchainError, ConfigError, ExternalServiceError, IdentityDirectory, RewardEvent,
    RewardPeriod, RewardTransaction, TokenContract, TransactionDetail, WalletReward, WalletType,
};

use super::engine::RewardEngine;
use super::report::RewardReportService;

/// Minimum admin level allowed to call `reward`
const REWARD_ADMIN_LEVEL: u8 = 2;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RewardSendFailure {
    pub identity_id: i64,
    pub error: String,
}

/// Outcome of one sending batch
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RewardSendResult {
    pub period: RewardPeriod,
    pub sent: Vec<RewardTransaction>,
    pub failures: Vec<RewardSendFailure>,
}

impl RewardSendResult {
    #[must_use]
    pub fn tokens_sent(&self) -> Decimal {
        self.sent.iter().map(|r| r.tokens_sent).sum()
    }
}

pub struct RewardSender {
    network_id: i64,
    engine: Arc<RewardEngine>,
    reports: Arc<RewardReportService>,
    ledger: Arc<TransactionLedgerService>,
    nonces: Arc<NonceManager>,
    token: Arc<dyn TokenContract>,
    identities: Arc<dyn IdentityDirectory>,
    config: RewardConfig,
    events: EventBus,
    /// Serializes batches so two callers never pay the same period at once
    send_lock: Mutex<()>,
}

impl RewardSender {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        network_id: i64,
        engine: Arc<RewardEngine>,
        reports: Arc<RewardReportService>,
        ledger: Arc<TransactionLedgerService>,
        nonces: Arc<NonceManager>,
        token: Arc<dyn TokenContract>,
        identities: Arc<dyn IdentityDirectory>,
        config: RewardConfig,
    ) -> Self {
        let events = ledger.events().clone();
        Self {
            network_id,
            engine,
            reports,
            ledger,
            nonces,
            token,
            identities,
            config,
            events,
            send_lock: Mutex::new(()),
        }
    }

    /// Pays what is still owed for the period containing `anchor`.
    ///
    /// Safe to call again after a partial failure: only entries with no
    /// pending or succeeded transaction and a positive remaining amount
    /// are submitted.
    #[instrument(skip(self), fields(network_id = self.network_id))]
    pub async fn send_rewards(
        &self,
        anchor: NaiveDate,
        issuer: &str,
    ) -> Result<RewardSendResult, AppError> {
        if !self
            .identities
            .is_member_of(issuer, &self.config.rewarding_group)
            .await?
        {
            return Err(AppError::Authorization(format!(
                "{} is not a member of {}",
                issuer, self.config.rewarding_group
            )));
        }

        let _guard = self.send_lock.lock().await;
        let mut report = self.engine.compute_rewards(anchor).await?;
        let period = report.period.clone();
        if !period.has_ended(Utc::now()) {
            return Err(AppError::invalid_field(
                "date",
                format!("reward period ending {} is not over yet", period.end),
            ));
        }

        let mut result = RewardSendResult {
            period: period.clone(),
            sent: Vec::new(),
            failures: Vec::new(),
        };
        if report.rewards.is_empty() {
            info!(start = %period.start, "No rewards for period");
            return Ok(result);
        }

        let pending = report.pending_transaction_count();
        if pending > 0 {
            return Err(AppError::Consistency(format!(
                "{} reward transactions of the period are still pending",
                pending
            )));
        }

        let admin = self.config.admin_address.clone().ok_or_else(|| {
            AppError::Config(ConfigError::NotConfigured("admin wallet address".to_string()))
        })?;
        let level = self.token.admin_level(&admin).await?;
        if level < REWARD_ADMIN_LEVEL {
            return Err(AppError::Blockchain(BlockchainError::InsufficientPrivilege(format!(
                "admin wallet {} has level {}, {} required",
                admin, level, REWARD_ADMIN_LEVEL
            ))));
        }

        let payable: Vec<usize> = report
            .rewards
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_payable())
            .map(|(idx, _)| idx)
            .collect();
        if let Some(negative) = report
            .rewards
            .iter()
            .find(|r| r.tokens_to_send().is_sign_negative() && !r.tokens_to_send().is_zero())
        {
            return Err(AppError::invalid_field(
                "amount",
                format!("identity {} has a negative reward", negative.identity_id),
            ));
        }
        if payable.is_empty() {
            return Err(AppError::invalid_field("rewards", "no rewards to send"));
        }

        let total: Decimal = payable
            .iter()
            .map(|&idx| report.rewards[idx].remaining_tokens_to_send())
            .sum();
        let balance = self.token.balance_of(&admin).await?;
        if balance < total {
            warn!(%balance, %total, "Admin wallet cannot cover rewards");
            return Err(AppError::Blockchain(BlockchainError::InsufficientFunds));
        }

        let issuer_identity_id = self
            .identities
            .identity(WalletType::User, issuer)
            .await?
            .map(|identity| identity.id);

        for idx in payable {
            let reward = &mut report.rewards[idx];
            match self
                .submit(&admin, &period, reward, issuer_identity_id)
                .await
            {
                Ok(tx) => {
                    let sent = RewardTransaction {
                        hash: tx.hash.clone().unwrap_or_default(),
                        receiver_type: Some(reward.wallet.wallet_type),
                        receiver_id: Some(reward.wallet.remote_id.clone()),
                        receiver_identity_id: reward.identity_id,
                        tokens_sent: tx.contract_amount,
                    };
                    reward.transaction = Some(tx);
                    self.events.publish_reward(RewardEvent::Sent {
                        period: period.clone(),
                        reward: sent.clone(),
                    });
                    result.sent.push(sent);
                }
                Err(e) => {
                    error!(identity_id = reward.identity_id, error = ?e, "Failed to send reward");
                    result.failures.push(RewardSendFailure {
                        identity_id: reward.identity_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.reports.save_reward_report(&report).await?;
        info!(
            start = %period.start,
            sent = result.sent.len(),
            failed = result.failures.len(),
            tokens = %result.tokens_sent(),
            "Reward batch submitted"
        );
        Ok(result)
    }

    /// Builds, links and stores one reward transaction.
    ///
    /// The entry is linked to the signed hash before the transaction becomes
    /// visible to the broadcaster. A link to a hash the ledger never stored
    /// reads as unpaid, so a crash at any point can never lead to paying
    /// the entry twice.
    async fn submit(
        &self,
        admin: &str,
        period: &RewardPeriod,
        reward: &WalletReward,
        issuer_identity_id: Option<i64>,
    ) -> Result<TransactionDetail, AppError> {
        let nonce = self.nonces.reserve(self.network_id, admin).await?;
        match self
            .build_and_store(admin, period, reward, issuer_identity_id, nonce)
            .await
        {
            Ok(saved) => {
                self.nonces.confirm(self.network_id, admin, nonce).await;
                Ok(saved)
            }
            Err(e) => {
                self.nonces.release(self.network_id, admin, nonce).await;
                Err(e)
            }
        }
    }

    async fn build_and_store(
        &self,
        admin: &str,
        period: &RewardPeriod,
        reward: &WalletReward,
        issuer_identity_id: Option<i64>,
        nonce: i64,
    ) -> Result<TransactionDetail, AppError> {
        let mut tx = TransactionDetail::new(self.network_id, admin);
        tx.to_address = reward.wallet.address.clone();
        tx.contract_amount = reward.remaining_tokens_to_send();
        tx.nonce = Some(nonce);
        tx.issuer_identity_id = issuer_identity_id;
        tx.label = Some("reward".to_string());
        tx.message = Some(format!(
            "{} reward {} - {}",
            reward.period.period_type,
            reward.period.start.date_naive(),
            reward.period.end.date_naive()
        ));

        let built = self.token.reward(tx).await?;
        let hash = built.hash.clone().ok_or_else(|| {
            AppError::ExternalService(ExternalServiceError::InvalidResponse(
                "signed reward transaction has no hash".to_string(),
            ))
        })?;
        self.reports
            .link_transaction(period, reward.identity_id, &hash)
            .await?;
        self.ledger.save(built).await
    }
}
