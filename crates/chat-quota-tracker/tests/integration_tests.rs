use chat_quota_tracker::*;
use chrono::{Duration, Utc};
use std::sync::Arc;

fn record(user_id: &str, tier: Tier, count: u32, reset_days_ago: i64) -> UsageRecord {
    let catalog = TierCatalog::standard();
    UsageRecord {
        user_id: user_id.to_string(),
        tier,
        message_count: count,
        message_limit: catalog.allowance(tier),
        last_reset: Utc::now() - Duration::days(reset_days_ago),
    }
}

async fn tracker_with(records: Vec<UsageRecord>) -> (Arc<InMemoryStorage>, UsageTracker) {
    let storage = Arc::new(InMemoryStorage::new());
    for r in records {
        storage.put_user(r).await;
    }
    let tracker = UsageTracker::new(storage.clone(), Arc::new(TierCatalog::standard()));
    (storage, tracker)
}

#[tokio::test]
async fn test_within_period_under_limit() {
    let (_, tracker) = tracker_with(vec![record("alice", Tier::Starter, 400, 3)]).await;

    let check = tracker.check_usage("alice").await.unwrap();
    assert!(check.allowed);
    assert_eq!(check.remaining, Allowance::Limited(600));
    assert!(!check.reset);
}

#[tokio::test]
async fn test_at_or_over_limit_is_denied() {
    let (_, tracker) = tracker_with(vec![
        record("at", Tier::Free, 50, 1),
        record("over", Tier::Free, 75, 1),
    ])
    .await;

    for user in ["at", "over"] {
        let check = tracker.check_usage(user).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.remaining, Allowance::Limited(0));
    }
}

#[tokio::test]
async fn test_expired_period_resets_on_check() {
    let (storage, tracker) = tracker_with(vec![record("bob", Tier::Pro, 5000, 30)]).await;

    let check = tracker.check_usage("bob").await.unwrap();
    assert!(check.allowed);
    assert!(check.reset);
    assert_eq!(check.remaining, Allowance::Limited(5000));

    let stored = storage.get_user("bob").await.unwrap();
    assert_eq!(stored.message_count, 0);
    assert!(Utc::now() - stored.last_reset < Duration::minutes(1));

    // Second check lands inside the fresh period
    let check = tracker.check_usage("bob").await.unwrap();
    assert!(!check.reset);
}

#[tokio::test]
async fn test_unlimited_tier_never_blocks() {
    let (_, tracker) = tracker_with(vec![record("corp", Tier::Enterprise, 1_000_000, 2)]).await;

    let check = tracker.check_usage("corp").await.unwrap();
    assert!(check.allowed);
    assert_eq!(check.remaining, Allowance::Unlimited);

    let consumed = tracker.try_consume("corp").await.unwrap();
    assert!(consumed.allowed);
    assert_eq!(consumed.remaining, Allowance::Unlimited);
}

#[tokio::test]
async fn test_starter_example_sequence() {
    let (storage, tracker) = tracker_with(vec![record("dana", Tier::Starter, 999, 5)]).await;

    let check = tracker.check_usage("dana").await.unwrap();
    assert!(check.allowed);
    assert_eq!(check.remaining, Allowance::Limited(1));

    tracker.increment_usage("dana").await.unwrap();
    assert_eq!(storage.get_user("dana").await.unwrap().message_count, 1000);

    let check = tracker.check_usage("dana").await.unwrap();
    assert!(!check.allowed);
    assert_eq!(check.remaining, Allowance::Limited(0));
}

#[tokio::test]
async fn test_update_tier_resets_counters() {
    let (_, tracker) = tracker_with(vec![record("erin", Tier::Free, 42, 12)]).await;

    let updated = tracker.update_tier("erin", Tier::Pro).await.unwrap();
    assert_eq!(updated.tier, Tier::Pro);
    assert_eq!(updated.message_count, 0);
    assert_eq!(updated.message_limit, Allowance::Limited(5000));
    assert!(Utc::now() - updated.last_reset < Duration::minutes(1));

    // Downgrades are not policed either
    let downgraded = tracker.update_tier("erin", Tier::Free).await.unwrap();
    assert_eq!(downgraded.message_limit, Allowance::Limited(50));
    assert_eq!(downgraded.message_count, 0);
}

#[tokio::test]
async fn test_usage_summary() {
    let (_, tracker) = tracker_with(vec![
        record("frank", Tier::Starter, 250, 4),
        record("gina", Tier::Free, 80, 4),
        record("hank", Tier::Enterprise, 900, 4),
    ])
    .await;

    let summary = tracker.usage_summary("frank").await.unwrap();
    assert_eq!(summary.tier_name, "Starter");
    assert_eq!(summary.message_count, 250);
    assert_eq!(summary.message_limit, Allowance::Limited(1000));
    assert_eq!(summary.remaining, Allowance::Limited(750));
    assert_eq!(summary.percent_used, 25);
    assert!(summary.features.iter().any(|f| f == "Text-to-speech"));
    assert_eq!(summary.period_ends_at, summary.last_reset + Duration::days(30));

    let over = tracker.usage_summary("gina").await.unwrap();
    assert_eq!(over.percent_used, 100);
    assert_eq!(over.remaining, Allowance::Limited(0));

    let unlimited = tracker.usage_summary("hank").await.unwrap();
    assert_eq!(unlimited.percent_used, 0);
    assert_eq!(unlimited.remaining, Allowance::Unlimited);
}

#[tokio::test]
async fn test_user_not_found() {
    let (_, tracker) = tracker_with(vec![]).await;

    assert!(matches!(
        tracker.check_usage("ghost").await,
        Err(UsageError::UserNotFound(_))
    ));
    assert!(matches!(
        tracker.usage_summary("ghost").await,
        Err(UsageError::UserNotFound(_))
    ));
    assert!(matches!(
        tracker.increment_usage("ghost").await,
        Err(UsageError::UserNotFound(_))
    ));
    assert!(matches!(
        tracker.try_consume("ghost").await,
        Err(UsageError::UserNotFound(_))
    ));
    assert!(matches!(
        tracker.update_tier("ghost", Tier::Pro).await,
        Err(UsageError::UserNotFound(_))
    ));
}

#[tokio::test]
async fn test_register_user_is_idempotent() {
    let (_, tracker) = tracker_with(vec![]).await;

    let created = tracker.register_user("ivy", None).await.unwrap();
    assert_eq!(created.tier, Tier::Free);
    assert_eq!(created.message_limit, Allowance::Limited(50));
    assert_eq!(created.message_count, 0);

    tracker.increment_usage("ivy").await.unwrap();

    // Re-registering with another tier leaves the record alone
    let again = tracker.register_user("ivy", Some(Tier::Pro)).await.unwrap();
    assert_eq!(again.tier, Tier::Free);
    assert_eq!(again.message_count, 1);
}

#[tokio::test]
async fn test_try_consume_stops_at_limit() {
    let (storage, tracker) = tracker_with(vec![record("jack", Tier::Free, 48, 1)]).await;

    let first = tracker.try_consume("jack").await.unwrap();
    assert!(first.allowed);
    assert_eq!(first.remaining, Allowance::Limited(1));

    let second = tracker.try_consume("jack").await.unwrap();
    assert!(second.allowed);
    assert_eq!(second.remaining, Allowance::Limited(0));

    let third = tracker.try_consume("jack").await.unwrap();
    assert!(!third.allowed);
    assert_eq!(storage.get_user("jack").await.unwrap().message_count, 50);
}

#[tokio::test]
async fn test_try_consume_resets_expired_period() {
    let (storage, tracker) = tracker_with(vec![record("kim", Tier::Free, 50, 45)]).await;

    let check = tracker.try_consume("kim").await.unwrap();
    assert!(check.allowed);
    assert!(check.reset);
    assert_eq!(check.remaining, Allowance::Limited(49));
    assert_eq!(storage.get_user("kim").await.unwrap().message_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumption_never_exceeds_limit() {
    let (storage, tracker) = tracker_with(vec![record("lee", Tier::Free, 40, 1)]).await;
    let tracker = Arc::new(tracker);

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.try_consume("lee").await.unwrap().allowed })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }

    assert_eq!(allowed, 10);
    assert_eq!(storage.get_user("lee").await.unwrap().message_count, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_reset_once() {
    let (storage, tracker) = tracker_with(vec![record("max", Tier::Starter, 1000, 40)]).await;
    let tracker = Arc::new(tracker);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.check_usage("max").await.unwrap() })
        })
        .collect();

    let mut resets = 0;
    for handle in handles {
        let check = handle.await.unwrap();
        // Losers of the reset race re-read the fresh period
        assert!(check.allowed);
        assert_eq!(check.remaining, Allowance::Limited(1000));
        if check.reset {
            resets += 1;
        }
    }

    assert_eq!(resets, 1);
    assert_eq!(storage.get_user("max").await.unwrap().message_count, 0);
}
