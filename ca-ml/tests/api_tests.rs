//! Integration tests for ca-ml API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use ca_common::config::RootFolder;
use ca_common::db::{init_database, insert_events_batch, insert_user, EventType, NewEvent, NewUser};
use ca_common::time::now;
use ca_ml::models::{ModelStore, SharedModels};
use ca_ml::scheduler::Scheduler;
use ca_ml::AppState;
use chrono::Duration;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::util::ServiceExt;

struct TestApp {
    _dir: tempfile::TempDir,
    app: Router,
    pool: SqlitePool,
    root: RootFolder,
    scheduler: Arc<Scheduler>,
}

/// Test helper: temporary root folder with an initialised database
async fn create_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let root = RootFolder::new(dir.path());
    root.ensure_directories().unwrap();

    let pool = init_database(&root.database_path()).await.unwrap();
    let store = ModelStore::new(&root);
    let models: SharedModels = Arc::new(RwLock::new(None));
    let scheduler = Scheduler::new(pool.clone(), store.clone(), models.clone())
        .await
        .unwrap();

    let state = AppState::new(pool.clone(), store, models, scheduler.clone());
    TestApp {
        _dir: dir,
        app: ca_ml::build_router(state),
        pool,
        root,
        scheduler,
    }
}

/// Seed 16 long-standing users with varied behaviour plus 2 newcomers
///
/// Returns the ids of all inserted users.
async fn seed_users(pool: &SqlitePool) -> Vec<i64> {
    let now = now();
    let mut ids = Vec::new();

    for i in 0..18i64 {
        let registered = if i < 16 {
            now - Duration::days(90)
        } else {
            now - Duration::days(5)
        };
        let user_id = insert_user(
            pool,
            &NewUser {
                telegram_id: 1000 + i,
                first_name: Some(format!("User {}", i)),
                last_name: (i % 2 == 0).then(|| "Tester".to_string()),
                username: (i % 3 != 0).then(|| format!("user{}", i)),
                language_code: Some("en".to_string()),
                registration_date: registered,
                profile_data: json!({}),
            },
        )
        .await
        .unwrap();
        ids.push(user_id);

        let event = |kind: EventType, days_ago: i64, properties: Value| NewEvent {
            user_id,
            product_id: None,
            event_type: kind,
            event_timestamp: now - Duration::days(days_ago) - Duration::minutes(i),
            properties,
        };

        let mut events = Vec::new();
        if i >= 16 {
            events.push(event(EventType::BotCommand, 4, json!({"command": "/start"})));
            events.push(event(EventType::View, 1, json!({})));
            insert_events_batch(pool, &events).await.unwrap();
            continue;
        }
        match i % 4 {
            // Steady buyers, active before and after the 30 day cutoff
            0 => {
                for d in [70, 50, 40, 20, 10, 2] {
                    events.push(event(EventType::View, d, json!({})));
                    events.push(event(EventType::AddToCart, d, json!({})));
                    events.push(event(EventType::Purchase, d, json!({"amount": 40.0 + i as f64})));
                }
            }
            // Browsers still around
            1 => {
                for d in [60, 45, 35, 15, 3] {
                    events.push(event(EventType::View, d, json!({})));
                    events.push(event(EventType::Click, d, json!({})));
                }
            }
            // Lapsed: activity only long ago
            2 => {
                for d in [85, 80, 75] {
                    events.push(event(EventType::View, d, json!({})));
                    events.push(event(EventType::BotCommand, d, json!({"command": "/start"})));
                }
            }
            // Single early purchase then a recent visit
            _ => {
                events.push(event(EventType::Purchase, 65, json!({"amount": 15.0})));
                events.push(event(EventType::View, 6, json!({})));
            }
        }
        insert_events_batch(pool, &events).await.unwrap();
    }

    ids
}

/// Test helper: extract JSON from response body
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, extract_json(response.into_body()).await)
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, extract_json(response.into_body()).await)
}

fn assert_bad_request(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::BAD_REQUEST, "unexpected body: {}", body);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"].is_string());
}

async fn train(app: &Router) -> Value {
    let (status, body) = send_json(app, "POST", "/api/models/train", json!({"n_clusters": 3})).await;
    assert_eq!(status, StatusCode::OK, "training failed: {}", body);
    body
}

#[tokio::test]
async fn test_health_endpoint() {
    let t = create_test_app().await;

    let (status, body) = get(&t.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "ca-ml");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["models_trained"], false);

    let (status, body) = get(&t.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn test_predictions_require_trained_model() {
    let t = create_test_app().await;
    let ids = seed_users(&t.pool).await;

    let (status, body) = get(&t.app, &format!("/api/predict/purchase/{}", ids[0])).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "MODEL_NOT_TRAINED");

    let (status, _) = get(&t.app, "/api/segmentation/segments").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = get(&t.app, "/api/models/info").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_train_rejects_bad_options() {
    let t = create_test_app().await;
    seed_users(&t.pool).await;

    let (status, _) = send_json(&t.app, "POST", "/api/models/train", json!({"n_clusters": 1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&t.app, "POST", "/api/models/train", json!({"n_clusters": "four"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_train_with_too_few_users() {
    let t = create_test_app().await;

    let (status, body) = send_json(&t.app, "POST", "/api/models/train", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_DATA");
}

#[tokio::test]
async fn test_train_then_predict() {
    let t = create_test_app().await;
    let ids = seed_users(&t.pool).await;

    let report = train(&t.app).await;
    assert_eq!(report["segmentation_samples"], 18);
    assert_eq!(report["supervised_samples"], 16);
    assert!(t.root.models_dir().join("model_bundle.json").exists());

    let (status, body) = get(&t.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models_trained"], true);

    let (status, body) = get(&t.app, &format!("/api/predict/purchase/{}", ids[0])).await;
    assert_eq!(status, StatusCode::OK);
    let p = body["purchase_probability"].as_f64().unwrap();
    assert!((0.0..=100.0).contains(&p));
    assert_eq!(body["recommendations"].as_array().unwrap().len(), 3);
    assert_eq!(body["horizon_days"], 30);
    assert_eq!(body["model_version"], report["model_version"]);

    let (status, body) = get(&t.app, &format!("/api/predict/churn/{}", ids[2])).await;
    assert_eq!(status, StatusCode::OK);
    assert!(["high", "medium", "low"].contains(&body["risk_level"].as_str().unwrap()));

    let (status, body) = get(&t.app, &format!("/api/predict/segment/{}", ids[1])).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["segment_id"].as_u64().unwrap() < 3);

    let (status, body) = get(&t.app, "/api/models/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["segmentation"]["n_clusters"], 3);
    assert_eq!(body["feature_names"].as_array().unwrap().len(), 31);

    let (status, body) = get(&t.app, "/api/models/runs").await;
    assert_eq!(status, StatusCode::OK);
    let runs = body.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["trigger_kind"], "api");
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let t = create_test_app().await;
    seed_users(&t.pool).await;
    train(&t.app).await;

    let (status, body) = get(&t.app, "/api/predict/purchase/99999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = get(&t.app, "/api/segmentation/users/99999/segment").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_predictions() {
    let t = create_test_app().await;
    let ids = seed_users(&t.pool).await;
    train(&t.app).await;

    let (status, _) = send_json(&t.app, "POST", "/api/predict/batch", json!({"user_ids": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let too_many: Vec<i64> = (1..=1001).collect();
    let (status, _) = send_json(&t.app, "POST", "/api/predict/batch", json!({"user_ids": too_many})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/predict/batch",
        json!({"user_ids": [ids[0], ids[1], ids[0], 424242]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["predictions"].as_array().unwrap().len(), 2);
    assert_eq!(body["not_found"], json!([424242]));
}

#[tokio::test]
async fn test_segmentation_endpoints() {
    let t = create_test_app().await;
    let ids = seed_users(&t.pool).await;
    train(&t.app).await;

    let (status, body) = get(&t.app, "/api/segmentation/segments").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_users"], 18);
    let segments = body["segments"].as_array().unwrap();
    assert_eq!(segments.len(), 3);
    let sizes: u64 = segments.iter().map(|s| s["size"].as_u64().unwrap()).sum();
    assert_eq!(sizes, 18);

    let (status, body) = get(&t.app, "/api/segmentation/stats").await;
    assert_eq!(status, StatusCode::OK);
    let total_pct: f64 = body["segments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["percentage"].as_f64().unwrap())
        .sum();
    assert!((total_pct - 100.0).abs() < 1e-6);

    let (status, body) = get(&t.app, &format!("/api/segmentation/users/{}/segment", ids[0])).await;
    assert_eq!(status, StatusCode::OK);
    let segment_id = body["segment_id"].as_u64().unwrap();
    assert!(body["user_features"]["purchase_count"].as_u64().unwrap() > 0);

    let (status, body) = get(
        &t.app,
        &format!("/api/segmentation/segments/{}/users?limit=1&offset=0", segment_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], 1);
    assert_eq!(body["users"].as_array().unwrap().len(), 1);
    let total = body["total_users"].as_u64().unwrap();
    assert_eq!(body["has_more"], total > 1);

    let (status, _) = get(&t.app, "/api/segmentation/segments/0/users?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&t.app, "/api/segmentation/segments/0/users?limit=1001").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&t.app, "/api/segmentation/segments/7/users").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_optimize_segmentation() {
    let t = create_test_app().await;

    // Needs at least 10 users
    let (status, _) = send_json(&t.app, "POST", "/api/segmentation/optimize", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    seed_users(&t.pool).await;
    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/segmentation/optimize",
        json!({"min_k": 2, "max_k": 4}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 3);
    let best = body["best_n_clusters"].as_u64().unwrap();
    assert!((2..=4).contains(&best));
}

#[tokio::test]
async fn test_scheduler_config_update() {
    let t = create_test_app().await;

    let (status, body) = get(&t.app, "/api/scheduler/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retraining_time"], "02:00");
    assert_eq!(body["min_users_for_retraining"], 100);

    let (status, body) = send_json(
        &t.app,
        "PUT",
        "/api/scheduler/config",
        json!({"retraining_frequency": "weekly", "min_users_for_retraining": 5}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retraining_frequency"], "weekly");
    assert_eq!(body["min_users_for_retraining"], 5);
    // Untouched fields keep their values
    assert_eq!(body["prediction_update_time"], "03:00");

    let (status, _) = send_json(
        &t.app,
        "PUT",
        "/api/scheduler/config",
        json!({"retraining_time": "25:00"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Persisted in settings
    let stored = ca_common::db::get_setting(&t.pool, "scheduler_config")
        .await
        .unwrap()
        .unwrap();
    let stored: Value = serde_json::from_str(&stored).unwrap();
    assert_eq!(stored["retraining_frequency"], "weekly");
}

#[tokio::test]
async fn test_scheduler_manual_jobs() {
    let t = create_test_app().await;
    seed_users(&t.pool).await;

    // No model yet
    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/scheduler/trigger",
        json!({"job": "update_predictions"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");

    // 18 users is below the default minimum of 100
    let (_, body) = send_json(&t.app, "POST", "/api/scheduler/trigger", json!({"job": "retrain"})).await;
    assert_eq!(body["status"], "skipped");

    send_json(
        &t.app,
        "PUT",
        "/api/scheduler/config",
        json!({"min_users_for_retraining": 10, "n_clusters": 3}),
    )
    .await;
    let (_, body) = send_json(&t.app, "POST", "/api/scheduler/trigger", json!({"job": "retrain"})).await;
    assert_eq!(body["status"], "success", "retrain failed: {}", body);
    assert_eq!(body["trigger"], "manual");
    // Cluster count chosen by silhouette over 2..=8
    assert_eq!(body["details"]["auto_optimized"], true);
    let k = body["details"]["n_clusters"].as_u64().unwrap();
    assert!((2..=8).contains(&k));
    assert_eq!(body["details"]["n_segments"], k);

    let (_, body) = send_json(
        &t.app,
        "POST",
        "/api/scheduler/trigger",
        json!({"job": "update_predictions"}),
    )
    .await;
    assert_eq!(body["status"], "success");
    // Users 2, 6, 10, 14 have been idle for 75 days
    assert_eq!(body["details"]["candidates"], 14);
    assert_eq!(body["details"]["updated"], 14);

    let (status, body) = get(&t.app, "/api/predictions/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_users_with_predictions"], 14);

    let (_, body) = get(&t.app, "/api/scheduler/status").await;
    assert_eq!(body["running"], false);
    assert_eq!(body["recent_jobs"].as_array().unwrap().len(), 4);
    assert_eq!(body["recent_jobs"][0]["job"], "update_predictions");

    let (status, body) = send_json(&t.app, "POST", "/api/scheduler/trigger", json!({"job": "nope"})).await;
    assert_bad_request(status, &body);
}

#[tokio::test]
async fn test_retrain_without_auto_optimize_uses_configured_clusters() {
    let t = create_test_app().await;
    seed_users(&t.pool).await;

    send_json(
        &t.app,
        "PUT",
        "/api/scheduler/config",
        json!({"min_users_for_retraining": 10, "n_clusters": 3, "auto_optimize_params": false}),
    )
    .await;
    let (_, body) = send_json(&t.app, "POST", "/api/scheduler/trigger", json!({"job": "retrain"})).await;
    assert_eq!(body["status"], "success", "retrain failed: {}", body);
    assert_eq!(body["details"]["auto_optimized"], false);
    assert_eq!(body["details"]["n_clusters"], 3);
    assert_eq!(body["details"]["n_segments"], 3);
}

#[tokio::test]
async fn test_jobs_conflict_while_one_is_running() {
    let t = create_test_app().await;
    seed_users(&t.pool).await;

    let guard = t.scheduler.try_begin_job().unwrap();

    let (status, body) = send_json(&t.app, "POST", "/api/scheduler/trigger", json!({"job": "retrain"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, body) = send_json(&t.app, "POST", "/api/models/train", json!({"n_clusters": 3})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (_, body) = get(&t.app, "/api/scheduler/status").await;
    assert_eq!(body["job_in_progress"], true);
    assert!(body["recent_jobs"].as_array().unwrap().is_empty());

    drop(guard);
    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/scheduler/trigger",
        json!({"job": "update_predictions"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");
}

#[tokio::test]
async fn test_concurrent_config_updates_are_all_kept() {
    let t = create_test_app().await;

    let updates = [
        json!({"min_users_for_retraining": 7}),
        json!({"n_clusters": 6}),
        json!({"prediction_batch_size": 50}),
        json!({"retraining_time": "04:30"}),
        json!({"active_window_days": 14}),
        json!({"auto_optimize_params": false}),
    ];
    let handles: Vec<_> = updates
        .into_iter()
        .map(|update| {
            let scheduler = t.scheduler.clone();
            tokio::spawn(async move {
                let update = serde_json::from_value(update).unwrap();
                scheduler.update_config(update).await.unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let config = t.scheduler.config().await;
    assert_eq!(config.min_users_for_retraining, 7);
    assert_eq!(config.n_clusters, 6);
    assert_eq!(config.prediction_batch_size, 50);
    assert_eq!(config.retraining_time, "04:30");
    assert_eq!(config.active_window_days, 14);
    assert!(!config.auto_optimize_params);

    let stored = ca_common::db::get_setting(&t.pool, "scheduler_config")
        .await
        .unwrap()
        .unwrap();
    let stored: Value = serde_json::from_str(&stored).unwrap();
    assert_eq!(stored["n_clusters"], 6);
    assert_eq!(stored["active_window_days"], 14);
}

#[tokio::test]
async fn test_malformed_input_uses_error_envelope() {
    let t = create_test_app().await;
    seed_users(&t.pool).await;
    train(&t.app).await;

    let (status, body) = send_json(
        &t.app,
        "PUT",
        "/api/scheduler/config",
        json!({"retraining_frequency": "monthly"}),
    )
    .await;
    assert_bad_request(status, &body);

    let (status, body) = send_json(&t.app, "PUT", "/api/scheduler/config", json!({"bogus": 1})).await;
    assert_bad_request(status, &body);

    let (status, body) = send_json(&t.app, "POST", "/api/predict/batch", json!({"user_ids": "x"})).await;
    assert_bad_request(status, &body);

    let (status, body) = send_json(&t.app, "POST", "/api/segmentation/optimize", json!({"min_k": "two"})).await;
    assert_bad_request(status, &body);

    let (status, body) = get(&t.app, "/api/segmentation/segments/0/users?limit=abc").await;
    assert_bad_request(status, &body);

    let (status, body) = get(&t.app, "/api/models/runs?limit=abc").await;
    assert_bad_request(status, &body);

    let (status, body) = get(&t.app, "/api/predict/purchase/abc").await;
    assert_bad_request(status, &body);

    let (status, body) = get(&t.app, "/api/segmentation/users/abc/segment").await;
    assert_bad_request(status, &body);

    // Body that is not JSON at all
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/scheduler/trigger")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = extract_json(response.into_body()).await;
    assert_bad_request(status, &body);
}

#[tokio::test]
async fn test_scheduler_start_stop() {
    let t = create_test_app().await;

    let (_, body) = send_json(&t.app, "POST", "/api/scheduler/start", json!({})).await;
    assert_eq!(body, json!({"running": true, "changed": true}));

    let (_, body) = send_json(&t.app, "POST", "/api/scheduler/start", json!({})).await;
    assert_eq!(body["changed"], false);

    let (_, body) = send_json(&t.app, "POST", "/api/scheduler/stop", json!({})).await;
    assert_eq!(body, json!({"running": false, "changed": true}));
}
