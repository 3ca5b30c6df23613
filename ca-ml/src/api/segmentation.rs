//! Segmentation endpoints
//!
//! Segment membership is computed live from current activity with the
//! loaded k-means model, so it always reflects the latest events.

use super::predict::bundle_and_snapshot;
use crate::models::{profile_segments, ModelBundle, SegmentProfile};
use crate::pagination::PageQuery;
use crate::training::{optimize_from_database, OptimizationReport};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    routing::{get, post},
    Json, Router,
};
use ca_common::db::load_all_activity;
use ca_common::features::UserSnapshot;
use ca_common::time::now;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Every user's snapshot and live segment
async fn assign_all(
    state: &AppState,
    bundle: Arc<ModelBundle>,
) -> ApiResult<(Vec<UserSnapshot>, Vec<usize>)> {
    let activities = load_all_activity(&state.db, None).await?;
    let as_of = now();

    let assigned = tokio::task::spawn_blocking(move || {
        let snapshots: Vec<UserSnapshot> = activities
            .iter()
            .map(|a| UserSnapshot::extract(a, as_of))
            .collect();
        let labels = snapshots
            .iter()
            .map(|s| bundle.segment_of(&s.vector))
            .collect();
        (snapshots, labels)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Segment assignment failed: {}", e)))?;

    Ok(assigned)
}

/// Live profiles, named after the trained segments
fn live_profiles(bundle: &ModelBundle, snapshots: &[UserSnapshot], labels: &[usize]) -> Vec<SegmentProfile> {
    let mut profiles = profile_segments(snapshots, labels, bundle.kmeans.k());
    for profile in &mut profiles {
        profile.name = bundle.segment_name(profile.segment_id);
    }
    profiles
}

#[derive(Debug, Serialize)]
pub struct SegmentsResponse {
    pub model_version: String,
    pub total_users: usize,
    pub segments: Vec<SegmentProfile>,
}

/// GET /api/segmentation/segments
pub async fn list_segments(State(state): State<AppState>) -> ApiResult<Json<SegmentsResponse>> {
    let bundle = state.current_models().await?;
    let (snapshots, labels) = assign_all(&state, bundle.clone()).await?;

    Ok(Json(SegmentsResponse {
        model_version: bundle.model_version.clone(),
        total_users: snapshots.len(),
        segments: live_profiles(&bundle, &snapshots, &labels),
    }))
}

/// GET /api/segmentation/users/:user_id/segment
pub async fn user_segment(
    State(state): State<AppState>,
    user_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(user_id) = user_id?;
    let (bundle, snapshot) = bundle_and_snapshot(&state, user_id).await?;
    let segment_id = bundle.segment_of(&snapshot.vector);
    let trained = bundle.segments.iter().find(|s| s.segment_id == segment_id);

    Ok(Json(json!({
        "user_id": user_id,
        "segment_id": segment_id,
        "segment_name": bundle.segment_name(segment_id),
        "segment_characteristics": trained.map(|s| &s.characteristics),
        "user_features": {
            "days_since_registration": snapshot.profile.days_since_registration,
            "days_since_last_activity": snapshot.profile.days_since_last_activity,
            "total_events": snapshot.profile.total_events,
            "events_last_30_days": snapshot.window.last_30_days.events,
            "purchase_count": snapshot.profile.purchase_count,
            "total_spent": snapshot.profile.total_spent,
        },
        "model_version": bundle.model_version,
    })))
}

#[derive(Debug, Serialize)]
pub struct SegmentMember {
    pub user_id: i64,
    pub telegram_id: i64,
    pub days_since_last_activity: i64,
    pub total_events: usize,
    pub purchase_count: usize,
    pub total_spent: f64,
}

#[derive(Debug, Serialize)]
pub struct SegmentUsersResponse {
    pub segment_id: usize,
    pub segment_name: String,
    pub total_users: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
    pub users: Vec<SegmentMember>,
}

/// GET /api/segmentation/segments/:segment_id/users
pub async fn segment_users(
    State(state): State<AppState>,
    segment_id: Result<Path<usize>, PathRejection>,
    page: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<SegmentUsersResponse>> {
    let Path(segment_id) = segment_id?;
    let Query(page) = page?;
    page.validate()?;
    let bundle = state.current_models().await?;
    if segment_id >= bundle.kmeans.k() {
        return Err(ApiError::NotFound(format!("Segment {} not found", segment_id)));
    }

    let (snapshots, labels) = assign_all(&state, bundle.clone()).await?;
    let members: Vec<&UserSnapshot> = snapshots
        .iter()
        .zip(&labels)
        .filter(|(_, &label)| label == segment_id)
        .map(|(s, _)| s)
        .collect();

    let window = page.page(members.len());
    let users = members[window.offset.min(window.end)..window.end]
        .iter()
        .map(|s| SegmentMember {
            user_id: s.profile.user_id,
            telegram_id: s.profile.telegram_id,
            days_since_last_activity: s.profile.days_since_last_activity,
            total_events: s.profile.total_events,
            purchase_count: s.profile.purchase_count,
            total_spent: s.profile.total_spent,
        })
        .collect();

    Ok(Json(SegmentUsersResponse {
        segment_id,
        segment_name: bundle.segment_name(segment_id),
        total_users: members.len(),
        limit: window.limit,
        offset: window.offset,
        has_more: window.has_more,
        users,
    }))
}

#[derive(Debug, Serialize)]
pub struct SegmentCount {
    pub segment_id: usize,
    pub name: String,
    pub count: usize,
    pub percentage: f64,
}

/// GET /api/segmentation/stats
pub async fn segment_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let bundle = state.current_models().await?;
    let (snapshots, labels) = assign_all(&state, bundle.clone()).await?;

    let k = bundle.kmeans.k();
    let mut counts = vec![0usize; k];
    for &label in &labels {
        counts[label] += 1;
    }
    let total = labels.len();
    let segments: Vec<SegmentCount> = counts
        .into_iter()
        .enumerate()
        .map(|(segment_id, count)| SegmentCount {
            segment_id,
            name: bundle.segment_name(segment_id),
            count,
            percentage: if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            },
        })
        .collect();

    Ok(Json(json!({
        "model_version": bundle.model_version,
        "total_users": snapshots.len(),
        "segments": segments,
    })))
}

#[derive(Debug, Deserialize)]
pub struct OptimizeRequest {
    pub limit: Option<i64>,
    #[serde(default = "default_min_k")]
    pub min_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

fn default_min_k() -> usize {
    2
}

fn default_max_k() -> usize {
    8
}

/// POST /api/segmentation/optimize
pub async fn optimize(
    State(state): State<AppState>,
    request: Result<Json<OptimizeRequest>, JsonRejection>,
) -> ApiResult<Json<OptimizationReport>> {
    let Json(request) = request?;
    if request.min_k < 2 || request.max_k < request.min_k {
        return Err(ApiError::BadRequest(
            "Require 2 <= min_k <= max_k".to_string(),
        ));
    }
    if request.limit.is_some_and(|l| l < 1) {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }

    let report =
        optimize_from_database(&state.db, request.limit, request.min_k, request.max_k).await?;

    Ok(Json(report))
}

/// Build segmentation routes
pub fn segmentation_routes() -> Router<AppState> {
    Router::new()
        .route("/api/segmentation/segments", get(list_segments))
        .route("/api/segmentation/users/:user_id/segment", get(user_segment))
        .route("/api/segmentation/segments/:segment_id/users", get(segment_users))
        .route("/api/segmentation/stats", get(segment_stats))
        .route("/api/segmentation/optimize", post(optimize))
}
