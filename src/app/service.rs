//! Application service wiring the reconciliation and reward components.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::{
    AppError, ChainClient, DatabaseError, HealthResponse, HealthStatus, IdentityDirectory,
    RewardReport, RewardSettings, RewardStore, RewardTeam, TokenContract, TransactionDetail,
    TransactionLedger, WalletStore, normalize_hash,
};

use super::config::{ReconcilerConfig, RewardConfig, SenderConfig};
use super::events::EventBus;
use super::ledger::TransactionLedgerService;
use super::nonce::NonceManager;
use super::reconciler::TransactionReconciler;
use super::reward::{
    RewardEngine, RewardReportService, RewardSendResult, RewardSender, RewardSettingsService,
    RewardStatusTracker,
};
use super::sender::PendingTransactionSender;

/// Collaborators of [`AppService`]
pub struct ServiceDependencies {
    pub network_id: i64,
    pub ledger: Arc<dyn TransactionLedger>,
    pub wallets: Arc<dyn WalletStore>,
    pub rewards: Arc<dyn RewardStore>,
    pub chain: Arc<dyn ChainClient>,
    pub token: Arc<dyn TokenContract>,
    pub identities: Arc<dyn IdentityDirectory>,
    pub sender_config: SenderConfig,
    pub reconciler_config: ReconcilerConfig,
    pub reward_config: RewardConfig,
    pub events: EventBus,
}

/// Entry point of the HTTP layer and owner of the background components
pub struct AppService {
    network_id: i64,
    ledger: Arc<TransactionLedgerService>,
    reward_store: Arc<dyn RewardStore>,
    chain: Arc<dyn ChainClient>,
    nonces: Arc<NonceManager>,
    reconciler: Arc<TransactionReconciler>,
    sender: Arc<PendingTransactionSender>,
    settings: Arc<RewardSettingsService>,
    engine: Arc<RewardEngine>,
    rewards: Arc<RewardSender>,
    tracker: Arc<RewardStatusTracker>,
    events: EventBus,
}

impl AppService {
    #[must_use]
    pub fn new(deps: ServiceDependencies) -> Self {
        let ServiceDependencies {
            network_id,
            ledger,
            wallets,
            rewards: reward_store,
            chain,
            token,
            identities,
            sender_config,
            reconciler_config,
            reward_config,
            events,
        } = deps;

        let ledger_service = Arc::new(TransactionLedgerService::new(
            Arc::clone(&ledger),
            events.clone(),
        ));
        let nonces = Arc::new(NonceManager::new(Arc::clone(&ledger), Arc::clone(&chain)));
        let reconciler = Arc::new(TransactionReconciler::new(
            network_id,
            Arc::clone(&ledger_service),
            Arc::clone(&wallets),
            Arc::clone(&chain),
            Arc::clone(&token),
            reconciler_config,
            sender_config.clone(),
        ));
        let sender = Arc::new(PendingTransactionSender::new(
            network_id,
            Arc::clone(&ledger_service),
            Arc::clone(&chain),
            Arc::clone(&token),
            sender_config,
        ));
        let settings = Arc::new(RewardSettingsService::new(
            Arc::clone(&reward_store),
            &reward_config,
        ));
        let engine = Arc::new(RewardEngine::new(
            Arc::clone(&settings),
            wallets,
            ledger,
            Arc::clone(&reward_store),
        ));
        let reports = Arc::new(RewardReportService::new(Arc::clone(&reward_store)));
        let rewards = Arc::new(RewardSender::new(
            network_id,
            Arc::clone(&engine),
            Arc::clone(&reports),
            Arc::clone(&ledger_service),
            Arc::clone(&nonces),
            token,
            identities,
            reward_config,
        ));
        let tracker = Arc::new(RewardStatusTracker::new(
            Arc::clone(&engine),
            reports,
            Arc::clone(&reward_store),
            events.clone(),
        ));

        Self {
            network_id,
            ledger: ledger_service,
            reward_store,
            chain,
            nonces,
            reconciler,
            sender,
            settings,
            engine,
            rewards,
            tracker,
            events,
        }
    }

    #[must_use]
    pub fn network_id(&self) -> i64 {
        self.network_id
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn reconciler(&self) -> Arc<TransactionReconciler> {
        Arc::clone(&self.reconciler)
    }

    #[must_use]
    pub fn sender(&self) -> Arc<PendingTransactionSender> {
        Arc::clone(&self.sender)
    }

    #[must_use]
    pub fn tracker(&self) -> Arc<RewardStatusTracker> {
        Arc::clone(&self.tracker)
    }

    #[must_use]
    pub fn settings(&self) -> Arc<RewardSettingsService> {
        Arc::clone(&self.settings)
    }

    #[must_use]
    pub fn reward_store(&self) -> Arc<dyn RewardStore> {
        Arc::clone(&self.reward_store)
    }

    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.ledger.inner().health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };
        let blockchain_health = match self.chain.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Chain health check failed");
                HealthStatus::Unhealthy
            }
        };
        let mut response = HealthResponse::new(db_health, blockchain_health);
        if db_health == HealthStatus::Healthy {
            response.last_watched_block = self
                .ledger
                .inner()
                .last_watched_block(self.network_id)
                .await
                .ok()
                .flatten();
        }
        response
    }

    #[instrument(skip(self))]
    pub async fn get_transaction(&self, hash: &str) -> Result<TransactionDetail, AppError> {
        let normalized = normalize_hash(hash)
            .ok_or_else(|| AppError::invalid_field("hash", format!("'{}' is not a hash", hash)))?;
        self.ledger
            .find_by_hash(&normalized)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(normalized)))
    }

    /// Drops a pending transaction. One already broadcast is only dropped locally.
    pub async fn cancel_transaction(&self, hash: &str) -> Result<TransactionDetail, AppError> {
        self.sender.cancel(hash).await
    }

    /// Re-signs a pending transaction on its nonce with a higher gas price.
    /// The reward entry it pays follows the replacement.
    pub async fn replace_transaction(&self, hash: &str) -> Result<TransactionDetail, AppError> {
        self.sender.boost(hash).await
    }

    pub async fn next_nonce(&self, address: &str) -> Result<i64, AppError> {
        self.nonces.next_nonce(self.network_id, address).await
    }

    /// Preview of the rewards of the period containing `date`.
    pub async fn compute_rewards(&self, date: NaiveDate) -> Result<RewardReport, AppError> {
        self.engine.compute_rewards(date).await
    }

    pub async fn send_rewards(
        &self,
        date: NaiveDate,
        issuer: &str,
    ) -> Result<RewardSendResult, AppError> {
        self.rewards.send_rewards(date, issuer).await
    }

    pub async fn get_settings(&self) -> RewardSettings {
        self.settings.get_settings().await
    }

    pub async fn save_settings(&self, settings: RewardSettings) -> Result<RewardSettings, AppError> {
        self.settings.save_settings(settings).await
    }

    pub async fn list_teams(&self) -> Result<Vec<RewardTeam>, AppError> {
        self.settings.list_teams().await
    }

    /// Loads stored settings. Called once before serving.
    pub async fn initialize(&self) -> Result<(), AppError> {
        self.settings.reload().await?;
        info!(network_id = self.network_id, "Application service initialized");
        Ok(())
    }
}
