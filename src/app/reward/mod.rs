//! Reward computation, sending and period tracking.

pub mod engine;
pub mod report;
pub mod sender;
pub mod settings;
pub mod tracker;

pub use engine::{RewardEngine, distribute_plugin_rewards};
pub use report::RewardReportService;
pub use sender::{RewardSendFailure, RewardSendResult, RewardSender};
pub use settings::RewardSettingsService;
pub use tracker::RewardStatusTracker;
