//! Recurring verification of reward periods awaiting their transactions.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::app::events::EventBus;
use crate::domain::{AppError, RewardEvent, RewardStatus, RewardStore};

use super::engine::RewardEngine;
use super::report::RewardReportService;

/// Re-derives period status from stored state only, so concurrent runs
/// converge on the same result.
pub struct RewardStatusTracker {
    engine: Arc<RewardEngine>,
    reports: Arc<RewardReportService>,
    store: Arc<dyn RewardStore>,
    events: EventBus,
}

impl RewardStatusTracker {
    #[must_use]
    pub fn new(
        engine: Arc<RewardEngine>,
        reports: Arc<RewardReportService>,
        store: Arc<dyn RewardStore>,
        events: EventBus,
    ) -> Self {
        Self {
            engine,
            reports,
            store,
            events,
        }
    }

    /// Returns the number of periods that reached SUCCESS.
    #[instrument(skip(self))]
    pub async fn verify_pending_periods(&self) -> Result<usize, AppError> {
        let periods = self.store.find_periods_by_status(RewardStatus::Pending).await?;
        let mut succeeded = 0;
        for period in periods {
            let report = match self.engine.compute_for_period(&period).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(start = %period.start, error = ?e, "Failed to recompute reward period");
                    continue;
                }
            };
            match self.reports.save_reward_report(&report).await {
                Ok(RewardStatus::Success) => {
                    info!(start = %period.start, end = %period.end, "Reward period succeeded");
                    self.events.publish_reward(RewardEvent::PeriodSucceeded { period });
                    succeeded += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(start = %period.start, error = ?e, "Failed to save reward period"),
            }
        }
        Ok(succeeded)
    }
}
