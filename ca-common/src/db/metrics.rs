//! Per-user metric queries

use crate::db::UserMetrics;
use crate::time::{from_db, to_db};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

fn metrics_from_row(row: &SqliteRow) -> Result<UserMetrics> {
    Ok(UserMetrics {
        user_id: row.try_get("user_id")?,
        segment_id: row.try_get("segment_id")?,
        segment_name: row.try_get("segment_name")?,
        purchase_probability_30d: row.try_get("purchase_probability_30d")?,
        churn_probability: row.try_get("churn_probability")?,
        lifetime_value: row.try_get("lifetime_value")?,
        last_updated: from_db(&row.try_get::<String, _>("last_updated")?)?,
    })
}

/// Insert or replace the metrics row of one user
pub async fn upsert_user_metrics(pool: &SqlitePool, metrics: &UserMetrics) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_metrics (user_id, segment_id, segment_name, purchase_probability_30d,
                                  churn_probability, lifetime_value, last_updated)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            segment_id = excluded.segment_id,
            segment_name = excluded.segment_name,
            purchase_probability_30d = excluded.purchase_probability_30d,
            churn_probability = excluded.churn_probability,
            lifetime_value = excluded.lifetime_value,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(metrics.user_id)
    .bind(metrics.segment_id)
    .bind(&metrics.segment_name)
    .bind(metrics.purchase_probability_30d)
    .bind(metrics.churn_probability)
    .bind(metrics.lifetime_value)
    .bind(to_db(metrics.last_updated))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_user_metrics(pool: &SqlitePool, user_id: i64) -> Result<Option<UserMetrics>> {
    let row = sqlx::query(
        r#"
        SELECT user_id, segment_id, segment_name, purchase_probability_30d,
               churn_probability, lifetime_value, last_updated
        FROM user_metrics WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(metrics_from_row).transpose()
}

/// Users whose scores are missing or stale and who were active recently
///
/// A user qualifies when the metrics row is absent, older than
/// `stale_before`, or has no purchase probability, AND the user has at least
/// one event at or after `active_since`.
pub async fn users_needing_update(
    pool: &SqlitePool,
    stale_before: DateTime<Utc>,
    active_since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT u.user_id
        FROM users u
        LEFT JOIN user_metrics um ON um.user_id = u.user_id
        WHERE (
            um.user_id IS NULL
            OR um.last_updated < ?
            OR um.purchase_probability_30d IS NULL
        )
        AND EXISTS (
            SELECT 1 FROM events e
            WHERE e.user_id = u.user_id AND e.event_timestamp >= ?
        )
        ORDER BY u.user_id
        LIMIT ?
        "#,
    )
    .bind(to_db(stale_before))
    .bind(to_db(active_since))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Distribution of stored purchase probabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbabilityBuckets {
    pub total_users_with_predictions: i64,
    /// probability > 0.8
    pub high_probability_users: i64,
    /// 0.5 <= probability <= 0.8
    pub medium_probability_users: i64,
    /// probability < 0.5
    pub low_probability_users: i64,
    pub avg_purchase_probability: Option<f64>,
    pub avg_churn_probability: Option<f64>,
}

pub async fn probability_buckets(pool: &SqlitePool) -> Result<ProbabilityBuckets> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(CASE WHEN purchase_probability_30d > 0.8 THEN 1 END) AS high,
            COUNT(CASE WHEN purchase_probability_30d BETWEEN 0.5 AND 0.8 THEN 1 END) AS medium,
            COUNT(CASE WHEN purchase_probability_30d < 0.5 THEN 1 END) AS low,
            AVG(purchase_probability_30d) AS avg_purchase,
            AVG(churn_probability) AS avg_churn
        FROM user_metrics
        WHERE purchase_probability_30d IS NOT NULL
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(ProbabilityBuckets {
        total_users_with_predictions: row.try_get("total")?,
        high_probability_users: row.try_get("high")?,
        medium_probability_users: row.try_get("medium")?,
        low_probability_users: row.try_get("low")?,
        avg_purchase_probability: row.try_get("avg_purchase")?,
        avg_churn_probability: row.try_get("avg_churn")?,
    })
}
