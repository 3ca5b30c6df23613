//! Scheduler control endpoints

use crate::scheduler::{JobKind, JobOutcome, SchedulerConfig, SchedulerConfigUpdate, SchedulerStatus, TriggerKind};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// GET /api/scheduler/status
pub async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

/// GET /api/scheduler/config
pub async fn get_config(State(state): State<AppState>) -> Json<SchedulerConfig> {
    Json(state.scheduler.config().await)
}

/// PUT /api/scheduler/config
pub async fn update_config(
    State(state): State<AppState>,
    update: Result<Json<SchedulerConfigUpdate>, JsonRejection>,
) -> ApiResult<Json<SchedulerConfig>> {
    let Json(update) = update?;
    let config = state.scheduler.update_config(update).await?;
    Ok(Json(config))
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub job: JobKind,
}

/// POST /api/scheduler/trigger
///
/// Runs the job inline and returns its outcome.
pub async fn trigger_job(
    State(state): State<AppState>,
    request: Result<Json<TriggerRequest>, JsonRejection>,
) -> ApiResult<Json<JobOutcome>> {
    let Json(request) = request?;
    info!("Manual trigger: {:?}", request.job);
    state
        .scheduler
        .run_job(request.job, TriggerKind::Manual)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::Conflict("Another job is already running".to_string()))
}

#[derive(Debug, Serialize)]
pub struct RunningResponse {
    pub running: bool,
    /// False when the loop was already in the requested state
    pub changed: bool,
}

/// POST /api/scheduler/start
pub async fn start_scheduler(State(state): State<AppState>) -> Json<RunningResponse> {
    let changed = state.scheduler.start();
    Json(RunningResponse {
        running: state.scheduler.is_running(),
        changed,
    })
}

/// POST /api/scheduler/stop
pub async fn stop_scheduler(State(state): State<AppState>) -> Json<RunningResponse> {
    let changed = state.scheduler.stop();
    Json(RunningResponse {
        running: state.scheduler.is_running(),
        changed,
    })
}

/// Build scheduler routes
pub fn scheduler_routes() -> Router<AppState> {
    Router::new()
        .route("/api/scheduler/status", get(scheduler_status))
        .route("/api/scheduler/config", get(get_config).put(update_config))
        .route("/api/scheduler/trigger", post(trigger_job))
        .route("/api/scheduler/start", post(start_scheduler))
        .route("/api/scheduler/stop", post(stop_scheduler))
}
