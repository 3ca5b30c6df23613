//! Database initialization

use ca_common::db::init::{connect_with_retry, init_database, SCHEMA_VERSION};
use std::time::{Duration, Instant};
use ca_common::db::{get_or_init_setting, get_setting, set_setting};

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sub").join("ca.db");

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ca.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(&pool2.unwrap())
        .await
        .unwrap();
    assert_eq!(versions, 1);
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("ca.db")).await.unwrap();

    for table in [
        "schema_version",
        "settings",
        "users",
        "products",
        "events",
        "user_metrics",
        "model_runs",
    ] {
        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(exists, 1, "table {} missing", table);
    }

    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}

#[tokio::test]
async fn test_settings_default_written_back() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("ca.db")).await.unwrap();

    assert_eq!(get_setting(&pool, "missing").await.unwrap(), None);

    let value = get_or_init_setting(&pool, "retrain_hour", "2").await.unwrap();
    assert_eq!(value, "2");
    assert_eq!(get_setting(&pool, "retrain_hour").await.unwrap().as_deref(), Some("2"));

    set_setting(&pool, "retrain_hour", "5").await.unwrap();
    let value = get_or_init_setting(&pool, "retrain_hour", "2").await.unwrap();
    assert_eq!(value, "5");
}

#[tokio::test]
async fn test_connect_gives_up_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    // Parent directory never exists, so every attempt fails
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("missing").join("ca.db").display());

    let started = Instant::now();
    let result = connect_with_retry(&url).await;

    assert!(
        matches!(result, Err(ca_common::Error::Database(_))),
        "expected a database error, got {:?}",
        result.as_ref().map(|_| ())
    );
    // Four waits of 100, 200, 400 and 800 ms separate the five attempts
    assert!(
        started.elapsed() >= Duration::from_millis(1400),
        "gave up too early: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_connect_recovers_on_retry() {
    let dir = tempfile::tempdir().unwrap();
    let parent = dir.path().join("late");
    let url = format!("sqlite://{}?mode=rwc", parent.join("ca.db").display());

    let creator = tokio::spawn({
        let parent = parent.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            std::fs::create_dir_all(parent).unwrap();
        }
    });

    let pool = connect_with_retry(&url).await;
    creator.await.unwrap();
    let pool = pool.expect("connection should succeed once the directory exists");

    let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
    assert_eq!(one, 1);
}
