//! Persistence of reward reports and their period status.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::{AppError, RewardPeriod, RewardReport, RewardStatus, RewardStore};

pub struct RewardReportService {
    store: Arc<dyn RewardStore>,
}

impl RewardReportService {
    #[must_use]
    pub fn new(store: Arc<dyn RewardStore>) -> Self {
        Self { store }
    }

    /// Stores the report under the status derived from its transactions.
    /// A period already marked SUCCESS is overwritten with a warning.
    #[instrument(skip(self, report), fields(start = %report.period.start, period_type = %report.period.period_type))]
    pub async fn save_reward_report(&self, report: &RewardReport) -> Result<RewardStatus, AppError> {
        let status = report.derive_status();
        if let Some(RewardStatus::Success) = self.store.find_period_status(&report.period).await? {
            warn!(new_status = %status, "Overwriting a reward period already marked as succeeded");
        }
        self.store.save_report(report, status).await?;
        info!(
            status = %status,
            entries = report.rewards.len(),
            transactions = report.transactions_count(),
            "Reward report saved"
        );
        Ok(status)
    }

    /// Records which transaction pays `identity_id` in `period`.
    #[instrument(skip(self, period), fields(start = %period.start))]
    pub async fn link_transaction(
        &self,
        period: &RewardPeriod,
        identity_id: i64,
        hash: &str,
    ) -> Result<(), AppError> {
        self.store
            .link_reward_transaction(period, identity_id, hash)
            .await
    }
}
