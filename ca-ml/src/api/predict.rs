//! Per-user prediction endpoints

use crate::models::ModelBundle;
use crate::scoring::{
    as_percent, churn_key_features, churn_risk_level, purchase_key_features,
    purchase_recommendations, score_snapshot, RiskLevel,
};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    routing::{get, post},
    Json, Router,
};
use ca_common::db::{load_activity, load_activity_for, probability_buckets, ProbabilityBuckets};
use ca_common::features::UserSnapshot;
use ca_common::time::now;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub const MAX_BATCH_SIZE: usize = 1000;

async fn user_snapshot(state: &AppState, user_id: i64) -> ApiResult<UserSnapshot> {
    let activity = load_activity(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", user_id)))?;
    Ok(UserSnapshot::extract(&activity, now()))
}

/// Models first, so an untrained service answers 409 even for unknown users
pub(crate) async fn bundle_and_snapshot(
    state: &AppState,
    user_id: i64,
) -> ApiResult<(Arc<ModelBundle>, UserSnapshot)> {
    let bundle = state.current_models().await?;
    let snapshot = user_snapshot(state, user_id).await?;
    Ok((bundle, snapshot))
}

#[derive(Debug, Serialize)]
pub struct PurchasePrediction {
    pub user_id: i64,
    /// Percent, one decimal
    pub purchase_probability: f64,
    pub horizon_days: i64,
    pub recommendations: Vec<&'static str>,
    pub key_features: Value,
    pub model_version: String,
    pub predicted_at: DateTime<Utc>,
}

/// GET /api/predict/purchase/:user_id
pub async fn predict_purchase(
    State(state): State<AppState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<PurchasePrediction>> {
    let Path(user_id) = user_id?;
    let (bundle, snapshot) = bundle_and_snapshot(&state, user_id).await?;
    let probability = bundle.purchase_probability(&snapshot.vector);

    Ok(Json(PurchasePrediction {
        user_id,
        purchase_probability: as_percent(probability),
        horizon_days: bundle.horizon_days,
        recommendations: purchase_recommendations(probability).to_vec(),
        key_features: purchase_key_features(&snapshot),
        model_version: bundle.model_version.clone(),
        predicted_at: now(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ChurnPrediction {
    pub user_id: i64,
    /// Percent, one decimal
    pub churn_probability: f64,
    pub risk_level: RiskLevel,
    pub key_features: Value,
    pub model_version: String,
    pub predicted_at: DateTime<Utc>,
}

/// GET /api/predict/churn/:user_id
pub async fn predict_churn(
    State(state): State<AppState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<ChurnPrediction>> {
    let Path(user_id) = user_id?;
    let (bundle, snapshot) = bundle_and_snapshot(&state, user_id).await?;
    let probability = bundle.churn_probability(&snapshot.vector);

    Ok(Json(ChurnPrediction {
        user_id,
        churn_probability: as_percent(probability),
        risk_level: churn_risk_level(probability),
        key_features: churn_key_features(&snapshot),
        model_version: bundle.model_version.clone(),
        predicted_at: now(),
    }))
}

#[derive(Debug, Serialize)]
pub struct SegmentPrediction {
    pub user_id: i64,
    pub segment_id: usize,
    pub segment_name: String,
    pub model_version: String,
}

/// GET /api/predict/segment/:user_id
pub async fn predict_segment(
    State(state): State<AppState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<SegmentPrediction>> {
    let Path(user_id) = user_id?;
    let (bundle, snapshot) = bundle_and_snapshot(&state, user_id).await?;
    let segment_id = bundle.segment_of(&snapshot.vector);

    Ok(Json(SegmentPrediction {
        user_id,
        segment_id,
        segment_name: bundle.segment_name(segment_id),
        model_version: bundle.model_version.clone(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct BatchPrediction {
    pub user_id: i64,
    pub purchase_probability: f64,
    pub churn_probability: f64,
    pub churn_risk: RiskLevel,
    pub segment_id: usize,
    pub segment_name: String,
    pub lifetime_value: f64,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub model_version: String,
    pub total_requested: usize,
    pub predictions: Vec<BatchPrediction>,
    pub not_found: Vec<i64>,
}

/// POST /api/predict/batch
pub async fn predict_batch(
    State(state): State<AppState>,
    request: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<BatchResponse>> {
    let Json(request) = request?;
    if request.user_ids.is_empty() || request.user_ids.len() > MAX_BATCH_SIZE {
        return Err(ApiError::BadRequest(format!(
            "user_ids must contain between 1 and {} ids",
            MAX_BATCH_SIZE
        )));
    }
    let bundle = state.current_models().await?;

    let mut seen = HashSet::new();
    let unique: Vec<i64> = request
        .user_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();

    let activities = load_activity_for(&state.db, &unique).await?;
    let found: HashSet<i64> = activities.iter().map(|a| a.user_id()).collect();
    let as_of = now();

    let predictions = activities
        .iter()
        .map(|activity| {
            let score = score_snapshot(&bundle, &UserSnapshot::extract(activity, as_of));
            BatchPrediction {
                user_id: score.user_id,
                purchase_probability: as_percent(score.purchase_probability),
                churn_probability: as_percent(score.churn_probability),
                churn_risk: score.churn_risk,
                segment_id: score.segment_id,
                segment_name: score.segment_name,
                lifetime_value: score.lifetime_value,
            }
        })
        .collect();

    Ok(Json(BatchResponse {
        model_version: bundle.model_version.clone(),
        total_requested: request.user_ids.len(),
        predictions,
        not_found: unique.into_iter().filter(|id| !found.contains(id)).collect(),
    }))
}

/// GET /api/predictions/stats
pub async fn prediction_stats(
    State(state): State<AppState>,
) -> ApiResult<Json<ProbabilityBuckets>> {
    Ok(Json(probability_buckets(&state.db).await?))
}

/// Build prediction routes
pub fn predict_routes() -> Router<AppState> {
    Router::new()
        .route("/api/predict/purchase/:user_id", get(predict_purchase))
        .route("/api/predict/churn/:user_id", get(predict_churn))
        .route("/api/predict/segment/:user_id", get(predict_segment))
        .route("/api/predict/batch", post(predict_batch))
        .route("/api/predictions/stats", get(prediction_stats))
}
