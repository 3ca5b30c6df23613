//! Model run history

use crate::db::{parse_json_column, ModelRun};
use crate::time::{from_db, now, to_db};
use crate::Result;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

/// Record a completed training run, returning its id
pub async fn record_model_run(
    pool: &SqlitePool,
    model_version: &str,
    trigger_kind: &str,
    samples: i64,
    metrics: &Value,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO model_runs (model_version, trigger_kind, samples, metrics, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(model_version)
    .bind(trigger_kind)
    .bind(samples)
    .bind(metrics.to_string())
    .bind(to_db(now()))
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Most recent runs first
pub async fn recent_model_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<ModelRun>> {
    let rows = sqlx::query(
        r#"
        SELECT run_id, model_version, trigger_kind, samples, metrics, created_at
        FROM model_runs
        ORDER BY run_id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(ModelRun {
                run_id: row.try_get("run_id")?,
                model_version: row.try_get("model_version")?,
                trigger_kind: row.try_get("trigger_kind")?,
                samples: row.try_get("samples")?,
                metrics: parse_json_column(row.try_get("metrics")?)?,
                created_at: from_db(&row.try_get::<String, _>("created_at")?)?,
            })
        })
        .collect()
}
