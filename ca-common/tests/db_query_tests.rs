//! Query round trips against a temporary database

use ca_common::db::*;
use ca_common::time::now;
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use sqlx::SqlitePool;

async fn setup() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("ca.db")).await.unwrap();
    (dir, pool)
}

fn new_user(telegram_id: i64) -> NewUser {
    NewUser {
        telegram_id,
        first_name: Some("Ann".to_string()),
        last_name: None,
        username: Some(format!("user{}", telegram_id)),
        language_code: Some("ru".to_string()),
        registration_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        profile_data: json!({"source": "test"}),
    }
}

fn new_event(user_id: i64, kind: EventType, minutes_ago: i64) -> NewEvent {
    NewEvent {
        user_id,
        product_id: None,
        event_type: kind,
        event_timestamp: now() - Duration::minutes(minutes_ago),
        properties: json!({}),
    }
}

#[tokio::test]
async fn test_user_round_trip() {
    let (_dir, pool) = setup().await;

    let id = insert_user(&pool, &new_user(42)).await.unwrap();
    let user = get_user(&pool, id).await.unwrap().unwrap();

    assert_eq!(user.telegram_id, 42);
    assert_eq!(user.username.as_deref(), Some("user42"));
    assert_eq!(user.profile_data["source"], "test");
    assert_eq!(
        user.registration_date,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    );
    assert!(get_user(&pool, id + 100).await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_telegram_id_rejected() {
    let (_dir, pool) = setup().await;
    insert_user(&pool, &new_user(7)).await.unwrap();
    assert!(insert_user(&pool, &new_user(7)).await.is_err());
}

#[tokio::test]
async fn test_list_users_limit() {
    let (_dir, pool) = setup().await;
    for tg in 1..=5 {
        insert_user(&pool, &new_user(tg)).await.unwrap();
    }

    assert_eq!(list_users(&pool, None).await.unwrap().len(), 5);
    assert_eq!(list_user_ids(&pool, Some(2)).await.unwrap(), vec![1, 2]);
    assert_eq!(count_users(&pool).await.unwrap(), 5);
}

#[tokio::test]
async fn test_events_grouped_and_ordered() {
    let (_dir, pool) = setup().await;
    let a = insert_user(&pool, &new_user(1)).await.unwrap();
    let b = insert_user(&pool, &new_user(2)).await.unwrap();

    let inserted = insert_events_batch(
        &pool,
        &[
            new_event(a, EventType::Purchase, 10),
            new_event(a, EventType::View, 60),
            new_event(b, EventType::Other("share".to_string()), 5),
        ],
    )
    .await
    .unwrap();
    assert_eq!(inserted, 3);
    assert_eq!(count_events(&pool).await.unwrap(), 3);

    let events = events_for_user(&pool, a).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::View);
    assert_eq!(events[1].event_type, EventType::Purchase);

    let grouped = events_for_users(&pool, &[a, b, 999]).await.unwrap();
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[&b][0].event_type.as_str(), "share");

    assert!(has_events_since(&pool, a, now() - Duration::minutes(30)).await.unwrap());
    assert!(!has_events_since(&pool, a, now()).await.unwrap());
}

#[tokio::test]
async fn test_load_activity_skips_unknown_users() {
    let (_dir, pool) = setup().await;
    let a = insert_user(&pool, &new_user(1)).await.unwrap();
    insert_user(&pool, &new_user(2)).await.unwrap();
    insert_event(&pool, &new_event(a, EventType::View, 1)).await.unwrap();

    let all = load_all_activity(&pool, None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].events.len(), 1);
    assert!(all[1].events.is_empty());

    let some = load_activity_for(&pool, &[a, 404]).await.unwrap();
    assert_eq!(some.len(), 1);
    assert!(load_activity(&pool, 404).await.unwrap().is_none());
}

#[tokio::test]
async fn test_metrics_upsert_and_staleness() {
    let (_dir, pool) = setup().await;
    let a = insert_user(&pool, &new_user(1)).await.unwrap();
    let b = insert_user(&pool, &new_user(2)).await.unwrap();
    let idle = insert_user(&pool, &new_user(3)).await.unwrap();
    insert_event(&pool, &new_event(a, EventType::View, 10)).await.unwrap();
    insert_event(&pool, &new_event(b, EventType::View, 10)).await.unwrap();
    insert_event(&pool, &new_event(idle, EventType::View, 60 * 24 * 90)).await.unwrap();

    let fresh = UserMetrics {
        user_id: a,
        segment_id: Some(1),
        segment_name: Some("Active buyers".to_string()),
        purchase_probability_30d: Some(0.9),
        churn_probability: Some(0.1),
        lifetime_value: Some(120.0),
        last_updated: now(),
    };
    upsert_user_metrics(&pool, &fresh).await.unwrap();

    let stale_before = now() - Duration::hours(24);
    let active_since = now() - Duration::days(30);
    let due = users_needing_update(&pool, stale_before, active_since, 100).await.unwrap();
    assert_eq!(due, vec![b]);

    let updated = UserMetrics {
        purchase_probability_30d: Some(0.3),
        ..fresh.clone()
    };
    upsert_user_metrics(&pool, &updated).await.unwrap();
    let stored = get_user_metrics(&pool, a).await.unwrap().unwrap();
    assert_eq!(stored.purchase_probability_30d, Some(0.3));

    let buckets = probability_buckets(&pool).await.unwrap();
    assert_eq!(buckets.total_users_with_predictions, 1);
    assert_eq!(buckets.low_probability_users, 1);
    assert_eq!(buckets.high_probability_users, 0);
}

#[tokio::test]
async fn test_model_runs_most_recent_first() {
    let (_dir, pool) = setup().await;
    record_model_run(&pool, "v1", "manual", 100, &json!({"f1": 0.5}))
        .await
        .unwrap();
    record_model_run(&pool, "v2", "scheduled", 120, &json!({"f1": 0.6}))
        .await
        .unwrap();

    let runs = recent_model_runs(&pool, 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].model_version, "v2");
    assert_eq!(runs[0].trigger_kind, "scheduled");
    assert_eq!(runs[1].metrics["f1"], 0.5);
}

#[tokio::test]
async fn test_batch_inserts_and_clear() {
    let (_dir, pool) = setup().await;

    let ids = insert_users_batch(&pool, &[new_user(1), new_user(2), new_user(3)])
        .await
        .unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let product_ids = insert_products_batch(
        &pool,
        &[NewProduct {
            name: "Lamp".to_string(),
            category: "Home".to_string(),
            price: 12.5,
            description: None,
            attributes: json!({}),
        }],
    )
    .await
    .unwrap();
    assert_eq!(count_products(&pool).await.unwrap(), 1);

    insert_event(
        &pool,
        &NewEvent {
            product_id: Some(product_ids[0]),
            ..new_event(ids[0], EventType::View, 5)
        },
    )
    .await
    .unwrap();
    set_setting(&pool, "kept", "yes").await.unwrap();

    clear_data(&pool).await.unwrap();
    assert_eq!(count_users(&pool).await.unwrap(), 0);
    assert_eq!(count_products(&pool).await.unwrap(), 0);
    assert_eq!(count_events(&pool).await.unwrap(), 0);
    assert_eq!(get_setting(&pool, "kept").await.unwrap().as_deref(), Some("yes"));
}

#[tokio::test]
async fn test_user_batch_is_all_or_nothing() {
    let (_dir, pool) = setup().await;
    assert!(insert_users_batch(&pool, &[new_user(9), new_user(9)]).await.is_err());
    assert_eq!(count_users(&pool).await.unwrap(), 0);
}
