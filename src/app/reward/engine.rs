//! Reward computation: point aggregation and budget allocation.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::domain::{
    AppError, RewardBudgetType, RewardPeriod, RewardPluginSettings, RewardReport, RewardStore,
    RewardTeam, TransactionDetail, TransactionLedger, WalletPluginReward, WalletReward,
    WalletStore, WalletType, normalize_hash, parse_time_zone,
};

use super::settings::RewardSettingsService;

/// Scale reward amounts are truncated to
const AMOUNT_SCALE: u32 = 18;

/// Builds reward reports. Never touches the chain.
pub struct RewardEngine {
    settings: Arc<RewardSettingsService>,
    wallets: Arc<dyn WalletStore>,
    ledger: Arc<dyn TransactionLedger>,
    store: Arc<dyn RewardStore>,
}

impl RewardEngine {
    #[must_use]
    pub fn new(
        settings: Arc<RewardSettingsService>,
        wallets: Arc<dyn WalletStore>,
        ledger: Arc<dyn TransactionLedger>,
        store: Arc<dyn RewardStore>,
    ) -> Self {
        Self {
            settings,
            wallets,
            ledger,
            store,
        }
    }

    /// Period of the configured type containing local midnight of `anchor`.
    pub async fn period_of(&self, anchor: NaiveDate) -> Result<RewardPeriod, AppError> {
        let settings = self.settings.get_settings().await;
        let tz = parse_time_zone(&settings.time_zone)?;
        Ok(tz.period_of(settings.period_type, tz.midnight_of(anchor)))
    }

    /// Computes the rewards of the period containing `anchor`.
    #[instrument(skip(self))]
    pub async fn compute_rewards(&self, anchor: NaiveDate) -> Result<RewardReport, AppError> {
        let period = self.period_of(anchor).await?;
        self.compute_for_period(&period).await
    }

    /// Computes the rewards of `period` and links each identity's stored
    /// reward transaction.
    #[instrument(skip(self), fields(start = %period.start, end = %period.end))]
    pub async fn compute_for_period(&self, period: &RewardPeriod) -> Result<RewardReport, AppError> {
        let settings = self.settings.get_settings().await;

        let wallets: BTreeMap<i64, _> = self
            .wallets
            .list_wallets(None)
            .await?
            .into_iter()
            .filter(|w| w.wallet_type != WalletType::Admin && w.address.is_some())
            .map(|w| (w.identity_id, w))
            .collect();
        let identity_ids: Vec<i64> = wallets.keys().copied().collect();
        let eligible: HashSet<i64> = wallets
            .values()
            .filter(|w| w.is_eligible_for_reward())
            .map(|w| w.identity_id)
            .collect();
        let mut teams = self.settings.list_teams().await?;
        teams.retain(RewardTeam::is_active);

        let mut contributions: BTreeMap<i64, Vec<WalletPluginReward>> = BTreeMap::new();
        for plugin in self.settings.plugins().await {
            let Some(plugin_settings) = settings.plugin(plugin.plugin_id()) else {
                debug!(plugin = %plugin.plugin_id(), "Plugin has no reward settings");
                continue;
            };
            if !plugin_settings.enabled || identity_ids.is_empty() {
                continue;
            }
            let points: BTreeMap<i64, Decimal> = plugin
                .earned_points(&identity_ids, period.start_seconds(), period.end_seconds())
                .await?
                .into_iter()
                .filter(|(id, _)| wallets.contains_key(id))
                .collect();
            for reward in distribute_plugin_rewards(plugin_settings, &points, &eligible, &teams)? {
                contributions.entry(reward.identity_id).or_default().push(reward);
            }
        }

        let hashes = self.store.reward_transaction_hashes(period).await?;
        let mut rewards = Vec::new();
        for (identity_id, wallet) in wallets {
            let plugin_rewards = contributions.remove(&identity_id).unwrap_or_default();
            let linked = hashes.get(&identity_id).and_then(|h| normalize_hash(h));
            if plugin_rewards.is_empty() && linked.is_none() {
                continue;
            }
            let mut reward = WalletReward::new(wallet, period.clone());
            reward.rewards = plugin_rewards;
            reward.teams = teams
                .iter()
                .filter(|t| t.has_member(identity_id))
                .map(RewardTeam::to_ref)
                .collect();
            if let Some(hash) = linked {
                reward.transaction = self.linked_transaction(&hash).await?;
            }
            rewards.push(reward);
        }

        let report = RewardReport::new(period.clone(), rewards);
        info!(
            entries = report.rewards.len(),
            tokens_to_send = %report.tokens_to_send(),
            tokens_sent = %report.tokens_sent(),
            "Rewards computed"
        );
        Ok(report)
    }

    /// Stored transaction behind a reward link. A candidate dropped because
    /// another transaction to the same receiver was mined on its nonce
    /// resolves to that transaction.
    async fn linked_transaction(&self, hash: &str) -> Result<Option<TransactionDetail>, AppError> {
        let Some(tx) = self.ledger.find_by_hash(hash).await? else {
            return Ok(None);
        };
        let Some(nonce) = tx.nonce.filter(|_| tx.dropped) else {
            return Ok(Some(tx));
        };
        let winner = self
            .ledger
            .find_by_nonce(tx.network_id, &tx.from_address, nonce)
            .await?
            .into_iter()
            .find(|other| {
                !other.pending
                    && !other.dropped
                    && other.to_address == tx.to_address
                    && other.contract_method == tx.contract_method
            });
        if let Some(winner) = &winner {
            debug!(linked = %hash, mined = ?winner.hash, "Reward paid by a same-nonce candidate");
        }
        Ok(Some(winner.unwrap_or(tx)))
    }
}

fn mul(a: Decimal, b: Decimal) -> Result<Decimal, AppError> {
    a.checked_mul(b)
        .ok_or_else(|| AppError::invalid_field("amount", "reward amount overflow"))
}

/// `points * budget / total_points`, truncated so shares never exceed the budget.
fn share(points: Decimal, budget: Decimal, total_points: Decimal) -> Result<Decimal, AppError> {
    if budget <= Decimal::ZERO || total_points <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    let scaled = mul(points, budget)?;
    let value = scaled
        .checked_div(total_points)
        .ok_or_else(|| AppError::invalid_field("amount", "reward amount overflow"))?;
    Ok(value
        .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
        .normalize())
}

/// A team as used by one distribution: members restricted to eligible
/// identities with points.
struct Pool {
    budget_type: RewardBudgetType,
    budget: Decimal,
    members: Vec<(i64, Decimal)>,
}

impl Pool {
    fn points(&self) -> Decimal {
        self.members.iter().map(|(_, p)| *p).sum()
    }

    fn fixed_budget(&self) -> Result<Option<Decimal>, AppError> {
        match self.budget_type {
            RewardBudgetType::Fixed => Ok(Some(self.budget)),
            RewardBudgetType::FixedPerMember => {
                Ok(Some(mul(self.budget, Decimal::from(self.members.len()))?))
            }
            _ => Ok(None),
        }
    }
}

/// Groups eligible identities by team. Each identity belongs to the first
/// team (ascending id) listing it; identities in no team form the
/// synthetic "no pool" team.
fn build_pools(
    eligible_points: &BTreeMap<i64, Decimal>,
    teams: &[RewardTeam],
) -> (Vec<Pool>, Vec<(i64, Decimal)>) {
    let mut sorted: Vec<&RewardTeam> = teams.iter().filter(|t| t.is_active()).collect();
    sorted.sort_by_key(|t| t.id);

    let mut assigned = HashSet::new();
    let mut pools = Vec::new();
    for team in sorted {
        let members: Vec<(i64, Decimal)> = eligible_points
            .iter()
            .filter(|(id, _)| team.has_member(**id) && !assigned.contains(*id))
            .map(|(id, p)| (*id, *p))
            .collect();
        if members.is_empty() {
            continue;
        }
        assigned.extend(members.iter().map(|(id, _)| *id));
        pools.push(Pool {
            budget_type: team.reward_type,
            budget: team.budget,
            members,
        });
    }
    let unassigned = eligible_points
        .iter()
        .filter(|(id, _)| !assigned.contains(*id))
        .map(|(id, p)| (*id, *p))
        .collect();
    (pools, unassigned)
}

fn plugin_reward(
    plugin_id: &str,
    identity_id: i64,
    points: Decimal,
    amount: Decimal,
    pools_used: bool,
) -> WalletPluginReward {
    WalletPluginReward {
        plugin_id: plugin_id.to_string(),
        identity_id,
        points,
        amount,
        pools_used,
    }
}

/// Allocates one plugin's budget over its point map.
///
/// Identities below the threshold, with zero points or with an ineligible
/// wallet get no share but are still listed with amount 0 when their points
/// are positive. The result is ordered by identity id.
pub fn distribute_plugin_rewards(
    settings: &RewardPluginSettings,
    points: &BTreeMap<i64, Decimal>,
    eligible: &HashSet<i64>,
    teams: &[RewardTeam],
) -> Result<Vec<WalletPluginReward>, AppError> {
    let plugin_id = settings.plugin_id.as_str();
    let mut results: BTreeMap<i64, WalletPluginReward> = BTreeMap::new();
    let mut eligible_points: BTreeMap<i64, Decimal> = BTreeMap::new();

    for (&identity_id, &p) in points {
        if p.is_sign_negative() && !p.is_zero() {
            return Err(AppError::invalid_field(
                "points",
                format!("plugin '{}' reported negative points for {}", plugin_id, identity_id),
            ));
        }
        if p.is_zero() || p < settings.threshold || !eligible.contains(&identity_id) {
            if p > Decimal::ZERO {
                results.insert(
                    identity_id,
                    plugin_reward(plugin_id, identity_id, p, Decimal::ZERO, settings.use_pools),
                );
            }
            continue;
        }
        eligible_points.insert(identity_id, p);
    }

    let amounts: BTreeMap<i64, (Decimal, bool)> = match settings.budget_type {
        RewardBudgetType::FixedPerPoint => eligible_points
            .iter()
            .map(|(id, p)| Ok((*id, (mul(*p, settings.amount)?, false))))
            .collect::<Result<_, AppError>>()?,
        RewardBudgetType::Computed => team_budgets_distribution(&eligible_points, teams)?,
        RewardBudgetType::Fixed | RewardBudgetType::FixedPerMember => {
            let total = if settings.budget_type == RewardBudgetType::Fixed {
                settings.amount
            } else {
                mul(settings.amount, Decimal::from(eligible_points.len()))?
            };
            if total <= Decimal::ZERO {
                BTreeMap::new()
            } else if settings.use_pools {
                pools_distribution(total, &eligible_points, teams)?
            } else {
                let total_points: Decimal = eligible_points.values().copied().sum();
                eligible_points
                    .iter()
                    .map(|(id, p)| Ok((*id, (share(*p, total, total_points)?, false))))
                    .collect::<Result<_, AppError>>()?
            }
        }
    };

    for (identity_id, p) in eligible_points {
        let (amount, pools_used) = amounts
            .get(&identity_id)
            .copied()
            .unwrap_or((Decimal::ZERO, settings.use_pools));
        results.insert(
            identity_id,
            plugin_reward(plugin_id, identity_id, p, amount, pools_used),
        );
    }
    Ok(results.into_values().collect())
}

/// Splits `total` over team pools: fixed teams take their budget first,
/// computed teams (including "no pool") share the remainder per member.
fn pools_distribution(
    total: Decimal,
    eligible_points: &BTreeMap<i64, Decimal>,
    teams: &[RewardTeam],
) -> Result<BTreeMap<i64, (Decimal, bool)>, AppError> {
    let (mut pools, unassigned) = build_pools(eligible_points, teams);
    if !unassigned.is_empty() {
        pools.push(Pool {
            budget_type: RewardBudgetType::Computed,
            budget: Decimal::ZERO,
            members: unassigned,
        });
    }

    let mut fixed_total = Decimal::ZERO;
    let mut computed_members = 0usize;
    for pool in &pools {
        match pool.fixed_budget()? {
            Some(budget) => fixed_total += budget,
            None => computed_members += pool.members.len(),
        }
    }
    if fixed_total >= total {
        return Err(AppError::invalid_field(
            "budget",
            format!(
                "fixed team budgets ({}) reach the plugin total ({})",
                fixed_total, total
            ),
        ));
    }
    let remaining = total - fixed_total;

    let mut amounts = BTreeMap::new();
    for pool in &pools {
        let budget = match pool.fixed_budget()? {
            Some(budget) => budget,
            None => share(
                Decimal::from(pool.members.len()),
                remaining,
                Decimal::from(computed_members),
            )?,
        };
        let team_points = pool.points();
        for (id, p) in &pool.members {
            amounts.insert(*id, (share(*p, budget, team_points)?, true));
        }
    }
    Ok(amounts)
}

/// COMPUTED plugin budget: each team's own budget is split among its
/// members by points. Identities in no team receive nothing.
fn team_budgets_distribution(
    eligible_points: &BTreeMap<i64, Decimal>,
    teams: &[RewardTeam],
) -> Result<BTreeMap<i64, (Decimal, bool)>, AppError> {
    let (pools, _) = build_pools(eligible_points, teams);
    let mut amounts = BTreeMap::new();
    for pool in &pools {
        let budget = pool.fixed_budget()?.unwrap_or(pool.budget);
        let team_points = pool.points();
        for (id, p) in &pool.members {
            amounts.insert(*id, (share(*p, budget, team_points)?, true));
        }
    }
    Ok(amounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn points(entries: &[(i64, Decimal)]) -> BTreeMap<i64, Decimal> {
        entries.iter().copied().collect()
    }

    fn all(ids: impl IntoIterator<Item = i64>) -> HashSet<i64> {
        ids.into_iter().collect()
    }

    fn team(id: i64, reward_type: RewardBudgetType, budget: Decimal, members: &[i64]) -> RewardTeam {
        let mut team = RewardTeam::new(format!("team-{}", id), reward_type, budget)
            .with_members(members.iter().copied());
        team.id = Some(id);
        team
    }

    fn amount_of(rewards: &[WalletPluginReward], id: i64) -> Decimal {
        rewards
            .iter()
            .find(|r| r.identity_id == id)
            .map(|r| r.amount)
            .unwrap_or_default()
    }

    #[test]
    fn test_fixed_budget_is_proportional_to_points() {
        let settings = RewardPluginSettings::new("kudos", RewardBudgetType::Fixed, dec!(5490));
        let map: BTreeMap<i64, Decimal> = (1..=60).map(|i| (i, Decimal::from(i))).collect();
        let rewards = distribute_plugin_rewards(&settings, &map, &all(1..=60), &[]).unwrap();

        assert_eq!(rewards.len(), 60);
        assert_eq!(amount_of(&rewards, 1), dec!(3));
        assert_eq!(amount_of(&rewards, 60), dec!(180));
        let total: Decimal = rewards.iter().map(|r| r.amount).sum();
        assert_eq!(total, dec!(5490));
    }

    #[test]
    fn test_fixed_per_member_scales_with_eligible_count() {
        let settings = RewardPluginSettings::new("kudos", RewardBudgetType::FixedPerMember, dec!(10));
        let map = points(&[(1, dec!(1)), (2, dec!(3))]);
        let rewards = distribute_plugin_rewards(&settings, &map, &all([1, 2]), &[]).unwrap();
        assert_eq!(amount_of(&rewards, 1), dec!(5));
        assert_eq!(amount_of(&rewards, 2), dec!(15));
    }

    #[test]
    fn test_fixed_per_point_multiplies_rate() {
        let settings = RewardPluginSettings::new("gamification", RewardBudgetType::FixedPerPoint, dec!(0.5));
        let map = points(&[(1, dec!(7)), (2, dec!(20))]);
        let rewards = distribute_plugin_rewards(&settings, &map, &all([1, 2]), &[]).unwrap();
        assert_eq!(amount_of(&rewards, 1), dec!(3.5));
        assert_eq!(amount_of(&rewards, 2), dec!(10));
        assert!(rewards.iter().all(|r| !r.pools_used));
    }

    #[test]
    fn test_threshold_and_ineligible_wallets_get_zero() {
        let mut settings = RewardPluginSettings::new("kudos", RewardBudgetType::Fixed, dec!(100));
        settings.threshold = dec!(5);
        let map = points(&[(1, dec!(4)), (2, dec!(10)), (3, dec!(10)), (4, dec!(0))]);
        let rewards = distribute_plugin_rewards(&settings, &map, &all([1, 2]), &[]).unwrap();

        assert_eq!(rewards.len(), 3);
        assert_eq!(amount_of(&rewards, 1), Decimal::ZERO);
        assert_eq!(amount_of(&rewards, 2), dec!(100));
        assert_eq!(amount_of(&rewards, 3), Decimal::ZERO);
        assert!(rewards.iter().all(|r| r.identity_id != 4));
    }

    #[test]
    fn test_negative_points_are_rejected() {
        let settings = RewardPluginSettings::new("kudos", RewardBudgetType::Fixed, dec!(100));
        let map = points(&[(1, dec!(-1))]);
        assert!(matches!(
            distribute_plugin_rewards(&settings, &map, &all([1]), &[]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_pools_split_fixed_then_computed() {
        let mut settings = RewardPluginSettings::new("kudos", RewardBudgetType::Fixed, dec!(1000));
        settings.use_pools = true;
        let teams = vec![
            team(1, RewardBudgetType::Fixed, dec!(400), &[1, 2]),
            team(2, RewardBudgetType::Computed, Decimal::ZERO, &[3]),
        ];
        let map = points(&[(1, dec!(1)), (2, dec!(3)), (3, dec!(5)), (4, dec!(5))]);
        let rewards =
            distribute_plugin_rewards(&settings, &map, &all([1, 2, 3, 4]), &teams).unwrap();

        // fixed team: 400 split 1:3
        assert_eq!(amount_of(&rewards, 1), dec!(100));
        assert_eq!(amount_of(&rewards, 2), dec!(300));
        // 600 left for two computed members: team 2 and "no pool"
        assert_eq!(amount_of(&rewards, 3), dec!(300));
        assert_eq!(amount_of(&rewards, 4), dec!(300));
        assert!(rewards.iter().all(|r| r.pools_used));
    }

    #[test]
    fn test_fixed_team_budgets_exceeding_total_are_rejected() {
        let mut settings = RewardPluginSettings::new("kudos", RewardBudgetType::Fixed, dec!(100));
        settings.use_pools = true;
        let teams = vec![team(1, RewardBudgetType::FixedPerMember, dec!(60), &[1, 2])];
        let map = points(&[(1, dec!(1)), (2, dec!(1))]);
        assert!(matches!(
            distribute_plugin_rewards(&settings, &map, &all([1, 2]), &teams),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_computed_budget_uses_team_budgets() {
        let settings = RewardPluginSettings::new("kudos", RewardBudgetType::Computed, Decimal::ZERO);
        let teams = vec![
            team(1, RewardBudgetType::Fixed, dec!(90), &[1, 2]),
            team(2, RewardBudgetType::FixedPerMember, dec!(10), &[3]),
        ];
        let map = points(&[(1, dec!(1)), (2, dec!(2)), (3, dec!(4)), (4, dec!(4))]);
        let rewards = distribute_plugin_rewards(&settings, &map, &all([1, 2, 3, 4]), &teams).unwrap();

        assert_eq!(amount_of(&rewards, 1), dec!(30));
        assert_eq!(amount_of(&rewards, 2), dec!(60));
        assert_eq!(amount_of(&rewards, 3), dec!(10));
        assert_eq!(amount_of(&rewards, 4), Decimal::ZERO);
    }

    #[test]
    fn test_distribution_is_deterministic() {
        let settings = RewardPluginSettings::new("kudos", RewardBudgetType::Fixed, dec!(1000));
        let map: BTreeMap<i64, Decimal> = (1..=7).map(|i| (i * 13, Decimal::from(i * 3 + 1))).collect();
        let ids = all(map.keys().copied());
        let first = distribute_plugin_rewards(&settings, &map, &ids, &[]).unwrap();
        let second = distribute_plugin_rewards(&settings, &map, &ids, &[]).unwrap();
        assert_eq!(first, second);
        let total: Decimal = first.iter().map(|r| r.amount).sum();
        assert!(total <= dec!(1000));
    }
}
