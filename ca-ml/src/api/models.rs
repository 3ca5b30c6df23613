//! Model training and inspection endpoints

use crate::models::TrainedClassifier;
use crate::scheduler::{train_and_publish, JobKind, JobOutcome, JobStatus, TriggerKind};
use crate::training::{TrainOptions, TrainingReport};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    routing::{get, post},
    Json, Router,
};
use ca_common::db::{recent_model_runs, ModelRun};
use ca_common::time::now;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// POST /api/models/train
///
/// All body fields are optional; an empty body trains with defaults.
pub async fn train(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<TrainingReport>> {
    let options: TrainOptions = if body.iter().all(u8::is_ascii_whitespace) {
        TrainOptions::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid training options: {}", e)))?
    };
    options.validate()?;

    let _guard = state
        .scheduler
        .try_begin_job()
        .ok_or_else(|| ApiError::Conflict("Another model job is running".to_string()))?;

    let started_at = now();
    let backup = state.scheduler.config().await.backup_previous_model;
    info!("Training requested via API: {:?}", options);

    let result = train_and_publish(
        &state.db,
        &state.store,
        &state.models,
        options,
        backup,
        TriggerKind::Api,
    )
    .await;

    let (status, message, details) = match &result {
        Ok(report) => (
            JobStatus::Success,
            format!("Trained {}", report.model_version),
            report.run_metrics(),
        ),
        Err(e) => (JobStatus::Failed, e.to_string(), Value::Null),
    };
    state
        .scheduler
        .record(JobOutcome {
            job: JobKind::Retrain,
            trigger: TriggerKind::Api,
            status,
            started_at,
            finished_at: now(),
            message,
            details,
        })
        .await;

    Ok(Json(result?))
}

#[derive(Debug, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// GET /api/models/info
pub async fn info(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let bundle = state.current_models().await?;

    let importance = |classifier: &TrainedClassifier| -> Vec<FeatureImportance> {
        bundle
            .feature_importance(classifier)
            .into_iter()
            .take(10)
            .map(|(feature, importance)| FeatureImportance { feature, importance })
            .collect()
    };

    Ok(Json(json!({
        "model_version": bundle.model_version,
        "trained_at": bundle.trained_at,
        "horizon_days": bundle.horizon_days,
        "feature_names": bundle.feature_names,
        "segmentation": {
            "n_clusters": bundle.kmeans.k(),
            "inertia": bundle.kmeans.inertia,
            "silhouette_score": bundle.silhouette_score,
            "samples": bundle.segmentation_samples,
            "segments": bundle.segments,
        },
        "purchase_prediction": {
            "metrics": bundle.purchase.metrics,
            "positive_rate": bundle.purchase.positive_rate,
            "train_samples": bundle.purchase.train_samples,
            "test_samples": bundle.purchase.test_samples,
            "feature_importance": importance(&bundle.purchase),
        },
        "churn_prediction": {
            "metrics": bundle.churn.metrics,
            "positive_rate": bundle.churn.positive_rate,
            "train_samples": bundle.churn.train_samples,
            "test_samples": bundle.churn.test_samples,
            "feature_importance": importance(&bundle.churn),
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_runs_limit")]
    pub limit: i64,
}

fn default_runs_limit() -> i64 {
    20
}

/// GET /api/models/runs
pub async fn runs(
    State(state): State<AppState>,
    query: Result<Query<RunsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ModelRun>>> {
    let Query(query) = query?;
    if !(1..=200).contains(&query.limit) {
        return Err(ApiError::BadRequest(
            "limit must be between 1 and 200".to_string(),
        ));
    }
    Ok(Json(recent_model_runs(&state.db, query.limit).await?))
}

/// Build model routes
pub fn model_routes() -> Router<AppState> {
    Router::new()
        .route("/api/models/train", post(train))
        .route("/api/models/info", get(info))
        .route("/api/models/runs", get(runs))
}
