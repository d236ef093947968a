//! Reward settings, teams, per-identity rewards and period reports.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::error::{AppError, ValidationError};
use super::period::{RewardPeriod, RewardPeriodType};
use super::traits::IdentityDirectory;
use super::types::{TransactionDetail, Wallet, WalletType};

/// How a plugin or team budget is turned into token amounts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardBudgetType {
    /// Derived from what is left once fixed budgets are served
    #[default]
    Computed,
    /// Constant total
    Fixed,
    /// Constant per eligible member
    FixedPerMember,
    /// Constant per earned point
    FixedPerPoint,
}

impl RewardBudgetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Computed => "COMPUTED",
            Self::Fixed => "FIXED",
            Self::FixedPerMember => "FIXED_PER_MEMBER",
            Self::FixedPerPoint => "FIXED_PER_POINT",
        }
    }
}

impl std::str::FromStr for RewardBudgetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPUTED" => Ok(Self::Computed),
            "FIXED" => Ok(Self::Fixed),
            "FIXED_PER_MEMBER" => Ok(Self::FixedPerMember),
            "FIXED_PER_POINT" => Ok(Self::FixedPerPoint),
            _ => Err(format!("Invalid budget type: {}", s)),
        }
    }
}

impl std::fmt::Display for RewardBudgetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Period-level completion status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardStatus {
    /// Nothing sent yet
    #[default]
    Estimation,
    Pending,
    Success,
    Error,
}

impl RewardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Estimation => "ESTIMATION",
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

impl std::str::FromStr for RewardStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ESTIMATION" => Ok(Self::Estimation),
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Invalid reward status: {}", s)),
        }
    }
}

impl std::fmt::Display for RewardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one identity's reward, from its transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardTransactionStatus {
    Pending,
    Success,
    Failed,
}

/// Settings of one point-source plugin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct RewardPluginSettings {
    pub plugin_id: String,
    /// Overridden on read by the live plugin state
    pub enabled: bool,
    pub budget_type: RewardBudgetType,
    /// Total, per-member or per-point amount depending on `budget_type`
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// Minimum points to be eligible
    #[schema(value_type = String)]
    pub threshold: Decimal,
    pub use_pools: bool,
}

impl RewardPluginSettings {
    #[must_use]
    pub fn new(plugin_id: impl Into<String>, budget_type: RewardBudgetType, amount: Decimal) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            enabled: true,
            budget_type,
            amount,
            threshold: Decimal::ZERO,
            use_pools: false,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.plugin_id.trim().is_empty() {
            return Err(AppError::Validation(ValidationError::MissingField(
                "plugin_id".to_string(),
            )));
        }
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(AppError::invalid_field(
                "amount",
                format!("plugin '{}' has a negative amount", self.plugin_id),
            ));
        }
        if self.threshold.is_sign_negative() && !self.threshold.is_zero() {
            return Err(AppError::invalid_field(
                "threshold",
                format!("plugin '{}' has a negative threshold", self.plugin_id),
            ));
        }
        if self.use_pools && self.budget_type == RewardBudgetType::FixedPerPoint {
            return Err(AppError::invalid_field(
                "use_pools",
                format!(
                    "plugin '{}': pools cannot be used with a per-point budget",
                    self.plugin_id
                ),
            ));
        }
        Ok(())
    }
}

/// Global reward settings snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct RewardSettings {
    pub period_type: RewardPeriodType,
    #[schema(example = "+01:00")]
    pub time_zone: String,
    pub plugin_settings: Vec<RewardPluginSettings>,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            period_type: RewardPeriodType::Month,
            time_zone: "UTC".to_string(),
            plugin_settings: Vec::new(),
        }
    }
}

impl RewardSettings {
    #[must_use]
    pub fn plugin(&self, plugin_id: &str) -> Option<&RewardPluginSettings> {
        self.plugin_settings.iter().find(|p| p.plugin_id == plugin_id)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        super::period::parse_time_zone(&self.time_zone).map_err(|_| {
            AppError::invalid_field("time_zone", format!("unsupported zone '{}'", self.time_zone))
        })?;
        let mut seen = std::collections::HashSet::new();
        for plugin in &self.plugin_settings {
            plugin.validate()?;
            if !seen.insert(plugin.plugin_id.as_str()) {
                return Err(AppError::invalid_field(
                    "plugin_settings",
                    format!("duplicate plugin '{}'", plugin.plugin_id),
                ));
            }
        }
        Ok(())
    }
}

/// A member of a reward team
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct RewardTeamMember {
    pub identity_id: i64,
}

/// A named pool of identities sharing a budget
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate, ToSchema)]
pub struct RewardTeam {
    /// `None` until persisted. Id 0 is reserved for the implicit "no pool" team.
    pub id: Option<i64>,
    #[validate(length(min = 1, max = 250, message = "Team name is required"))]
    pub name: String,
    pub description: Option<String>,
    pub manager_identity_id: Option<i64>,
    pub members: Vec<RewardTeamMember>,
    #[schema(value_type = String)]
    pub budget: Decimal,
    pub reward_type: RewardBudgetType,
    pub disabled: bool,
    pub deleted: bool,
}

impl RewardTeam {
    #[must_use]
    pub fn new(name: impl Into<String>, reward_type: RewardBudgetType, budget: Decimal) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            manager_identity_id: None,
            members: Vec::new(),
            budget,
            reward_type,
            disabled: false,
            deleted: false,
        }
    }

    #[must_use]
    pub fn with_members(mut self, identity_ids: impl IntoIterator<Item = i64>) -> Self {
        self.members = identity_ids
            .into_iter()
            .map(|identity_id| RewardTeamMember { identity_id })
            .collect();
        self
    }

    #[must_use]
    pub fn has_member(&self, identity_id: i64) -> bool {
        self.members.iter().any(|m| m.identity_id == identity_id)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.disabled && !self.deleted
    }

    /// Light reference stored with a reward entry
    #[must_use]
    pub fn to_ref(&self) -> RewardTeamRef {
        RewardTeamRef {
            id: self.id.unwrap_or(0),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct RewardTeamRef {
    pub id: i64,
    pub name: String,
}

/// Contribution of a single plugin to an identity's reward
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WalletPluginReward {
    pub plugin_id: String,
    pub identity_id: i64,
    #[schema(value_type = String)]
    pub points: Decimal,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub pools_used: bool,
}

/// Computed reward of one identity for one period
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WalletReward {
    pub identity_id: i64,
    pub wallet: Wallet,
    pub teams: Vec<RewardTeamRef>,
    pub rewards: Vec<WalletPluginReward>,
    pub transaction: Option<TransactionDetail>,
    pub period: RewardPeriod,
}

impl WalletReward {
    #[must_use]
    pub fn new(wallet: Wallet, period: RewardPeriod) -> Self {
        Self {
            identity_id: wallet.identity_id,
            wallet,
            teams: Vec::new(),
            rewards: Vec::new(),
            transaction: None,
            period,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.wallet.is_eligible_for_reward()
    }

    #[must_use]
    pub fn tokens_to_send(&self) -> Decimal {
        self.rewards.iter().map(|r| r.amount).sum()
    }

    #[must_use]
    pub fn pool_tokens_to_send(&self) -> Decimal {
        self.rewards
            .iter()
            .filter(|r| r.pools_used)
            .map(|r| r.amount)
            .sum()
    }

    /// Amount of the linked transaction once it succeeded.
    #[must_use]
    pub fn tokens_sent(&self) -> Decimal {
        match &self.transaction {
            Some(tx) if !tx.pending && tx.succeeded => tx.contract_amount,
            _ => Decimal::ZERO,
        }
    }

    #[must_use]
    pub fn remaining_tokens_to_send(&self) -> Decimal {
        let remaining = self.tokens_to_send() - self.tokens_sent();
        remaining.max(Decimal::ZERO)
    }

    #[must_use]
    pub fn status(&self) -> Option<RewardTransactionStatus> {
        self.transaction.as_ref().map(|tx| {
            if tx.pending {
                RewardTransactionStatus::Pending
            } else if tx.succeeded {
                RewardTransactionStatus::Success
            } else {
                RewardTransactionStatus::Failed
            }
        })
    }

    #[must_use]
    pub fn pool_name(&self) -> Option<String> {
        if self.teams.is_empty() {
            return None;
        }
        Some(
            self.teams
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// A reward may be (re)submitted when tokens remain owed and no earlier
    /// transaction is still in flight or already paid.
    #[must_use]
    pub fn is_payable(&self) -> bool {
        self.is_enabled()
            && self.remaining_tokens_to_send() > Decimal::ZERO
            && !matches!(
                self.status(),
                Some(RewardTransactionStatus::Pending | RewardTransactionStatus::Success)
            )
    }
}

/// All rewards of one period
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct RewardReport {
    pub period: RewardPeriod,
    /// Sorted by identity id
    pub rewards: Vec<WalletReward>,
}

impl RewardReport {
    #[must_use]
    pub fn new(period: RewardPeriod, mut rewards: Vec<WalletReward>) -> Self {
        rewards.sort_by_key(|r| r.identity_id);
        Self { period, rewards }
    }

    fn count_status(&self, status: RewardTransactionStatus) -> usize {
        self.rewards
            .iter()
            .filter(|r| r.status() == Some(status))
            .count()
    }

    #[must_use]
    pub fn pending_transaction_count(&self) -> usize {
        self.count_status(RewardTransactionStatus::Pending)
    }

    #[must_use]
    pub fn success_transaction_count(&self) -> usize {
        self.count_status(RewardTransactionStatus::Success)
    }

    #[must_use]
    pub fn failed_transaction_count(&self) -> usize {
        self.count_status(RewardTransactionStatus::Failed)
    }

    #[must_use]
    pub fn transactions_count(&self) -> usize {
        self.rewards.iter().filter(|r| r.transaction.is_some()).count()
    }

    /// Entries that actually owe tokens
    #[must_use]
    pub fn valid_rewards_count(&self) -> usize {
        self.rewards
            .iter()
            .filter(|r| r.tokens_to_send() > Decimal::ZERO)
            .count()
    }

    #[must_use]
    pub fn tokens_to_send(&self) -> Decimal {
        self.rewards.iter().map(WalletReward::tokens_to_send).sum()
    }

    #[must_use]
    pub fn tokens_sent(&self) -> Decimal {
        self.rewards.iter().map(WalletReward::tokens_sent).sum()
    }

    #[must_use]
    pub fn remaining_tokens_to_send(&self) -> Decimal {
        self.rewards
            .iter()
            .filter(|r| r.is_enabled())
            .map(WalletReward::remaining_tokens_to_send)
            .sum()
    }

    #[must_use]
    pub fn is_completely_proceeded(&self) -> bool {
        self.transactions_count() > 0
            && self.success_transaction_count() >= self.valid_rewards_count()
    }

    /// Status derived only from the current transaction states.
    #[must_use]
    pub fn derive_status(&self) -> RewardStatus {
        if self.is_completely_proceeded() {
            RewardStatus::Success
        } else if self.pending_transaction_count() > 0 {
            RewardStatus::Pending
        } else if self.failed_transaction_count() > 0 {
            RewardStatus::Error
        } else if self.transactions_count() > 0 {
            RewardStatus::Pending
        } else {
            RewardStatus::Estimation
        }
    }

    #[must_use]
    pub fn reward_of(&self, identity_id: i64) -> Option<&WalletReward> {
        self.rewards
            .binary_search_by_key(&identity_id, |r| r.identity_id)
            .ok()
            .map(|idx| &self.rewards[idx])
    }
}

/// Compact reference to a sent reward, storable as a single string.
///
/// Layout: `hash;receiverType;receiverId;tokensSent;receiverIdentityId`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RewardTransaction {
    pub hash: String,
    pub receiver_type: Option<WalletType>,
    pub receiver_id: Option<String>,
    pub receiver_identity_id: i64,
    #[schema(value_type = String)]
    pub tokens_sent: Decimal,
}

impl PartialEq for RewardTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash.eq_ignore_ascii_case(&other.hash)
    }
}

impl Eq for RewardTransaction {}

impl std::hash::Hash for RewardTransaction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.to_ascii_lowercase().hash(state);
    }
}

impl RewardTransaction {
    /// Parses a stored value. Blank or `null` numbers read as zero.
    pub fn from_stored_value(value: &str) -> Result<Self, AppError> {
        let parts: Vec<&str> = value.split(';').collect();
        let hash = parts.first().map(|h| h.trim()).unwrap_or_default();
        if hash.is_empty() {
            return Err(AppError::invalid_field("hash", "stored reward has no hash"));
        }
        let field = |idx: usize| {
            parts
                .get(idx)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        };
        let receiver_type = match field(1) {
            Some(t) => Some(
                t.to_ascii_lowercase()
                    .parse::<WalletType>()
                    .map_err(|e| AppError::invalid_field("receiver_type", e))?,
            ),
            None => None,
        };
        let tokens_sent = match field(3) {
            Some(t) => t
                .parse::<Decimal>()
                .map_err(|e| AppError::invalid_field("tokens_sent", e.to_string()))?,
            None => Decimal::ZERO,
        };
        let receiver_identity_id = match field(4) {
            Some(id) => id
                .parse::<i64>()
                .map_err(|e| AppError::invalid_field("receiver_identity_id", e.to_string()))?,
            None => 0,
        };
        Ok(Self {
            hash: hash.to_string(),
            receiver_type,
            receiver_id: field(2).map(str::to_string),
            receiver_identity_id,
            tokens_sent,
        })
    }

    /// Serializes with a resolved receiver identity id.
    pub async fn to_stored_value(
        &self,
        directory: &dyn IdentityDirectory,
    ) -> Result<String, AppError> {
        let identity_id = self.resolve_receiver(directory).await?;
        Ok(format!("{};;;{};{}", self.hash, self.tokens_sent, identity_id))
    }

    async fn resolve_receiver(&self, directory: &dyn IdentityDirectory) -> Result<i64, AppError> {
        if self.receiver_identity_id > 0 {
            return match directory.identity_by_id(self.receiver_identity_id).await? {
                Some(identity) => Ok(identity.id),
                None => Err(AppError::invalid_field(
                    "receiver_identity_id",
                    format!("identity {} not found", self.receiver_identity_id),
                )),
            };
        }
        let receiver_type = self.receiver_type.ok_or_else(|| {
            AppError::Validation(ValidationError::MissingField("receiver_type".to_string()))
        })?;
        let receiver_id = self.receiver_id.as_deref().ok_or_else(|| {
            AppError::Validation(ValidationError::MissingField("receiver_id".to_string()))
        })?;
        directory
            .identity(receiver_type, receiver_id)
            .await?
            .map(|identity| identity.id)
            .ok_or_else(|| {
                AppError::invalid_field(
                    "receiver_id",
                    format!("identity {}/{} not found", receiver_type, receiver_id),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn period() -> RewardPeriod {
        RewardPeriod {
            period_type: RewardPeriodType::Month,
            time_zone: "+00:00".to_string(),
            start: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap(),
        }
    }

    fn reward(identity_id: i64, amount: i64) -> WalletReward {
        let wallet = Wallet::new(identity_id, WalletType::User, format!("user{}", identity_id))
            .with_address(&format!("0x{:040x}", identity_id));
        let mut reward = WalletReward::new(wallet, period());
        reward.rewards.push(WalletPluginReward {
            plugin_id: "gamification".to_string(),
            identity_id,
            points: Decimal::from(10),
            amount: Decimal::from(amount),
            pools_used: false,
        });
        reward
    }

    fn tx(amount: i64, pending: bool, succeeded: bool) -> TransactionDetail {
        let mut tx = TransactionDetail::new(1, "0xadmin");
        tx.contract_amount = Decimal::from(amount);
        tx.pending = pending;
        tx.succeeded = succeeded;
        tx
    }

    #[test]
    fn test_plugin_settings_reject_pools_with_per_point_budget() {
        let mut settings =
            RewardPluginSettings::new("kudos", RewardBudgetType::FixedPerPoint, Decimal::ONE);
        assert!(settings.validate().is_ok());
        settings.use_pools = true;
        assert!(matches!(
            settings.validate(),
            Err(AppError::Validation(ValidationError::InvalidField { .. }))
        ));
    }

    #[test]
    fn test_plugin_settings_reject_negative_amount() {
        let settings =
            RewardPluginSettings::new("kudos", RewardBudgetType::Fixed, Decimal::from(-5));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_reject_duplicate_plugins_and_bad_zone() {
        let mut settings = RewardSettings::default();
        settings.plugin_settings = vec![
            RewardPluginSettings::new("a", RewardBudgetType::Fixed, Decimal::ONE),
            RewardPluginSettings::new("a", RewardBudgetType::Fixed, Decimal::ONE),
        ];
        assert!(settings.validate().is_err());

        let settings = RewardSettings {
            time_zone: "Mars/Olympus".to_string(),
            ..RewardSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_wallet_reward_amounts_and_status() {
        let mut r = reward(1, 40);
        r.rewards.push(WalletPluginReward {
            plugin_id: "kudos".to_string(),
            identity_id: 1,
            points: Decimal::from(3),
            amount: Decimal::from(2),
            pools_used: true,
        });
        assert_eq!(r.tokens_to_send(), Decimal::from(42));
        assert_eq!(r.pool_tokens_to_send(), Decimal::from(2));
        assert_eq!(r.status(), None);
        assert!(r.is_payable());

        r.transaction = Some(tx(42, true, false));
        assert_eq!(r.status(), Some(RewardTransactionStatus::Pending));
        assert_eq!(r.tokens_sent(), Decimal::ZERO);
        assert!(!r.is_payable());

        r.transaction = Some(tx(42, false, true));
        assert_eq!(r.status(), Some(RewardTransactionStatus::Success));
        assert_eq!(r.remaining_tokens_to_send(), Decimal::ZERO);
        assert!(!r.is_payable());

        r.transaction = Some(tx(42, false, false));
        assert_eq!(r.status(), Some(RewardTransactionStatus::Failed));
        assert_eq!(r.remaining_tokens_to_send(), Decimal::from(42));
        assert!(r.is_payable());
    }

    #[test]
    fn test_pool_name_joins_teams() {
        let mut r = reward(1, 1);
        assert_eq!(r.pool_name(), None);
        r.teams = vec![
            RewardTeamRef { id: 1, name: "core".into() },
            RewardTeamRef { id: 2, name: "docs".into() },
        ];
        assert_eq!(r.pool_name().as_deref(), Some("core,docs"));
    }

    #[test]
    fn test_report_status_derivation() {
        let report = RewardReport::new(period(), vec![reward(2, 10), reward(1, 5)]);
        assert_eq!(report.rewards[0].identity_id, 1);
        assert_eq!(report.derive_status(), RewardStatus::Estimation);
        assert_eq!(report.remaining_tokens_to_send(), Decimal::from(15));

        let mut rewards = report.rewards.clone();
        rewards[0].transaction = Some(tx(5, false, true));
        rewards[1].transaction = Some(tx(10, true, false));
        let report = RewardReport::new(period(), rewards.clone());
        assert_eq!(report.derive_status(), RewardStatus::Pending);
        assert!(!report.is_completely_proceeded());
        assert_eq!(report.tokens_sent(), Decimal::from(5));

        rewards[1].transaction = Some(tx(10, false, false));
        let report = RewardReport::new(period(), rewards.clone());
        assert_eq!(report.derive_status(), RewardStatus::Error);

        rewards[1].transaction = Some(tx(10, false, true));
        let report = RewardReport::new(period(), rewards);
        assert!(report.is_completely_proceeded());
        assert_eq!(report.derive_status(), RewardStatus::Success);
        assert_eq!(report.remaining_tokens_to_send(), Decimal::ZERO);
        assert!(report.reward_of(2).is_some());
        assert!(report.reward_of(3).is_none());
    }

    #[test]
    fn test_zero_reward_entries_do_not_block_completion() {
        let mut paid = reward(1, 5);
        paid.transaction = Some(tx(5, false, true));
        let mut zero = reward(2, 0);
        zero.rewards[0].amount = Decimal::ZERO;
        let report = RewardReport::new(period(), vec![paid, zero]);
        assert_eq!(report.valid_rewards_count(), 1);
        assert!(report.is_completely_proceeded());
    }

    #[test]
    fn test_reward_transaction_parsing() {
        let hash = format!("0x{}", "ab".repeat(32));
        let parsed = RewardTransaction::from_stored_value(&format!("{};;;12.5;42", hash)).unwrap();
        assert_eq!(parsed.hash, hash);
        assert_eq!(parsed.tokens_sent, Decimal::from_str("12.5").unwrap());
        assert_eq!(parsed.receiver_identity_id, 42);
        assert!(parsed.receiver_type.is_none());

        let legacy = RewardTransaction::from_stored_value(&format!("{};user;root;;null", hash)).unwrap();
        assert_eq!(legacy.receiver_type, Some(WalletType::User));
        assert_eq!(legacy.receiver_id.as_deref(), Some("root"));
        assert_eq!(legacy.tokens_sent, Decimal::ZERO);
        assert_eq!(legacy.receiver_identity_id, 0);

        assert!(RewardTransaction::from_stored_value(";;;1;2").is_err());
    }

    #[test]
    fn test_reward_transaction_equality_ignores_hash_case() {
        let a = RewardTransaction::from_stored_value("0xABC;;;1;2").unwrap();
        let b = RewardTransaction::from_stored_value("0xabc;;;3;4").unwrap();
        assert_eq!(a, b);
    }
}
