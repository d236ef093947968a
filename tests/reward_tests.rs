//! Reward computation and payment scenarios through the application service.

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use wallet_reward_reconciler::app::{
    AppService, EventBus, ReconcilerConfig, RewardConfig, SenderConfig, ServiceDependencies,
    spawn_event_listeners,
};
use wallet_reward_reconciler::domain::{
    AppError, RewardBudgetType, RewardEvent, RewardPeriod, RewardPeriodType, RewardPluginSettings,
    RewardSettings, RewardStatus, RewardStore, RewardTimeZone, TransactionLedger, Wallet,
    WalletType, parse_time_zone,
};
use wallet_reward_reconciler::test_utils::{
    MockChainClient, MockIdentityDirectory, MockStore, MockTokenContract, StaticRewardPlugin,
    test_address,
};

const ISSUER: &str = "root";
const ADMIN: u64 = 500;

struct Harness {
    store: Arc<MockStore>,
    chain: Arc<MockChainClient>,
    token: Arc<MockTokenContract>,
    plugin: Arc<StaticRewardPlugin>,
    events: EventBus,
    service: AppService,
}

fn july() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
}

async fn harness(
    identities: u64,
    budget_type: RewardBudgetType,
    amount: Decimal,
) -> Harness {
    let store = Arc::new(MockStore::new());
    for id in 1..=identities {
        store.add_wallet(
            Wallet::new(id as i64, WalletType::User, format!("user{}", id))
                .with_address(&test_address(id)),
        );
    }
    let chain = Arc::new(MockChainClient::new());
    let token = Arc::new(MockTokenContract::new(&test_address(900)));
    token.set_admin_level(&test_address(ADMIN), 2);
    token.set_balance(&test_address(ADMIN), dec!(1000000));
    let directory = Arc::new(MockIdentityDirectory::new());
    directory.add_identity(1000, WalletType::User, ISSUER);
    directory.add_member(ISSUER, "/platform/rewarding");

    let events = EventBus::default();
    let service = AppService::new(ServiceDependencies {
        network_id: 1,
        ledger: store.clone(),
        wallets: store.clone(),
        rewards: store.clone(),
        chain: chain.clone(),
        token: token.clone(),
        identities: directory,
        sender_config: SenderConfig::default(),
        reconciler_config: ReconcilerConfig::default(),
        reward_config: RewardConfig::default().with_admin(&test_address(ADMIN)),
        events: events.clone(),
    });

    let plugin = Arc::new(StaticRewardPlugin::new(
        "kudos",
        (1..=identities).map(|id| (id as i64, Decimal::from(id))),
    ));
    service.settings().register_plugin(plugin.clone()).await;
    service
        .save_settings(RewardSettings {
            plugin_settings: vec![RewardPluginSettings::new("kudos", budget_type, amount)],
            ..RewardSettings::default()
        })
        .await
        .unwrap();

    Harness {
        store,
        chain,
        token,
        plugin,
        events,
        service,
    }
}

/// Broadcasts every built transaction and mines it with `success`.
async fn settle_all(h: &Harness, success: bool) {
    h.service
        .sender()
        .send_pending_transactions()
        .await
        .unwrap();
    let mut transactions = h.store.transactions();
    transactions.sort_by_key(|tx| tx.nonce);
    for tx in transactions {
        if let Some(hash) = tx.hash.as_deref()
            && tx.pending
        {
            h.chain.mine(hash, success);
            h.service.reconciler().reconcile_hash(hash).await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_fixed_budget_shared_by_points() {
    let h = harness(60, RewardBudgetType::Fixed, dec!(5490)).await;

    let report = h.service.compute_rewards(july()).await.unwrap();

    assert_eq!(report.period.start, Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
    assert_eq!(report.period.end, Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap());
    assert_eq!(report.rewards.len(), 60);
    // 5490 / (1 + .. + 60) = 3 tokens per point
    assert_eq!(report.reward_of(1).unwrap().tokens_to_send(), dec!(3));
    assert_eq!(report.reward_of(60).unwrap().tokens_to_send(), dec!(180));
    assert_eq!(report.tokens_to_send(), dec!(5490));
    assert_eq!(report.valid_rewards_count(), 60);
    assert_eq!(h.plugin.calls(), 1);
}

#[tokio::test]
async fn test_paid_period_owes_nothing_more() {
    let h = harness(3, RewardBudgetType::FixedPerMember, dec!(10)).await;

    let first = h.service.send_rewards(july(), ISSUER).await.unwrap();
    assert_eq!(first.sent.len(), 3);
    assert_eq!(first.tokens_sent(), dec!(30));
    settle_all(&h, true).await;

    assert_eq!(h.service.tracker().verify_pending_periods().await.unwrap(), 1);
    assert_eq!(
        h.store.period_status(&first.period),
        Some(RewardStatus::Success)
    );

    let report = h.service.compute_rewards(july()).await.unwrap();
    for reward in &report.rewards {
        assert_eq!(reward.remaining_tokens_to_send(), Decimal::ZERO);
        assert_eq!(reward.tokens_sent(), reward.tokens_to_send());
    }
    let again = h.service.send_rewards(july(), ISSUER).await;
    assert!(matches!(again, Err(AppError::Validation(_))));
    assert_eq!(h.token.built().len(), 3);
}

#[tokio::test]
async fn test_failed_rewards_are_retried_once() {
    let h = harness(2, RewardBudgetType::Fixed, dec!(30)).await;
    h.service.send_rewards(july(), ISSUER).await.unwrap();
    settle_all(&h, false).await;

    assert_eq!(h.service.tracker().verify_pending_periods().await.unwrap(), 0);
    let report = h.service.compute_rewards(july()).await.unwrap();
    assert_eq!(report.failed_transaction_count(), 2);
    assert_eq!(report.remaining_tokens_to_send(), dec!(30));

    let retry = h.service.send_rewards(july(), ISSUER).await.unwrap();
    assert_eq!(retry.sent.len(), 2);
    settle_all(&h, true).await;

    let report = h.service.compute_rewards(july()).await.unwrap();
    let paid: Decimal = h
        .store
        .transactions()
        .iter()
        .filter(|tx| tx.succeeded)
        .map(|tx| tx.contract_amount)
        .sum();
    assert_eq!(paid, report.tokens_to_send());
    assert_eq!(report.derive_status(), RewardStatus::Success);
}

#[tokio::test]
async fn test_partial_batch_failure_is_recovered_by_resending() {
    let h = harness(3, RewardBudgetType::FixedPerMember, dec!(10)).await;
    h.token.disapprove(&test_address(2));

    let result = h.service.send_rewards(july(), ISSUER).await.unwrap();
    assert_eq!(result.sent.len(), 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].identity_id, 2);

    settle_all(&h, true).await;
    let report = h.service.compute_rewards(july()).await.unwrap();
    assert_eq!(report.reward_of(2).unwrap().remaining_tokens_to_send(), dec!(10));
    assert_eq!(report.remaining_tokens_to_send(), dec!(10));
}

#[tokio::test]
async fn test_replaced_transaction_is_relinked() {
    let h = harness(1, RewardBudgetType::Fixed, dec!(7)).await;
    let (listener, shutdown) = spawn_event_listeners(&h.events, h.service.reward_store());
    let mut rewards = h.events.subscribe_rewards();

    let result = h.service.send_rewards(july(), ISSUER).await.unwrap();
    let old_hash = result.sent[0].hash.clone();
    assert!(matches!(
        rewards.recv().await.unwrap().payload,
        RewardEvent::Sent { .. }
    ));

    let replacement = h.service.replace_transaction(&old_hash).await.unwrap();
    let new_hash = replacement.hash.clone().unwrap();

    let mut linked = None;
    for _ in 0..50 {
        let hashes = h
            .service
            .reward_store()
            .reward_transaction_hashes(&result.period)
            .await
            .unwrap();
        if hashes.get(&1) == Some(&new_hash) {
            linked = Some(new_hash.clone());
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(linked.as_deref(), Some(new_hash.as_str()));

    shutdown.send(true).unwrap();
    listener.await.unwrap();

    h.service.sender().send_pending_transactions().await.unwrap();
    h.chain.mine(&new_hash, true);
    h.service.reconciler().reconcile_hash(&new_hash).await.unwrap();
    assert!(h.store.transaction(&old_hash).unwrap().dropped);

    assert_eq!(h.service.tracker().verify_pending_periods().await.unwrap(), 1);
    let pending = h.store.find_pending(1).await.unwrap();
    assert!(pending.is_empty());
}

/// Waits for the event listener to link identity 1 of `period` to `hash`.
async fn wait_for_link(h: &Harness, period: &RewardPeriod, hash: &str) -> bool {
    for _ in 0..50 {
        let hashes = h
            .service
            .reward_store()
            .reward_transaction_hashes(period)
            .await
            .unwrap();
        if hashes.get(&1).map(String::as_str) == Some(hash) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_original_candidate_mined_after_replacement() {
    let h = harness(1, RewardBudgetType::Fixed, dec!(7)).await;
    let (listener, shutdown) = spawn_event_listeners(&h.events, h.service.reward_store());

    let result = h.service.send_rewards(july(), ISSUER).await.unwrap();
    let old_hash = result.sent[0].hash.clone();
    h.service.sender().send_pending_transactions().await.unwrap();

    let replacement = h.service.replace_transaction(&old_hash).await.unwrap();
    let new_hash = replacement.hash.clone().unwrap();
    assert!(wait_for_link(&h, &result.period, &new_hash).await);

    h.chain.mine(&old_hash, true);
    h.service.reconciler().reconcile_hash(&old_hash).await.unwrap();
    assert!(h.store.transaction(&new_hash).unwrap().dropped);
    assert!(h.store.transaction(&old_hash).unwrap().succeeded);

    // the dropped replacement must not make the reward payable again
    let report = h.service.compute_rewards(july()).await.unwrap();
    assert!(!report.reward_of(1).unwrap().is_payable());
    assert!(wait_for_link(&h, &result.period, &old_hash).await);

    shutdown.send(true).unwrap();
    listener.await.unwrap();

    assert_eq!(h.service.tracker().verify_pending_periods().await.unwrap(), 1);
    let again = h.service.send_rewards(july(), ISSUER).await;
    assert!(matches!(again, Err(AppError::Validation(_))));
    assert_eq!(h.token.built().len(), 2);
}

#[tokio::test]
async fn test_quarter_period_in_configured_zone() {
    let offset = FixedOffset::east_opt(2 * 3600).unwrap();
    let zone = parse_time_zone("+02:00").unwrap();
    assert_eq!(zone, RewardTimeZone::Fixed(offset));
    let instant = offset
        .with_ymd_and_hms(2024, 5, 15, 12, 0, 0)
        .unwrap()
        .with_timezone(&Utc);

    let period = zone.period_of(RewardPeriodType::Quarter, instant);

    assert_eq!(period.start, offset.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
    assert_eq!(period.end, offset.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
    assert!(period.contains(instant));
    assert!(!period.contains(period.end));
}
