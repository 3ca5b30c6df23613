//! ca-ml library interface
//!
//! Exposes the router, models and scheduler for the binary and for
//! integration tests.

pub mod api;
pub mod error;
pub mod models;
pub mod pagination;
pub mod scheduler;
pub mod scoring;
pub mod training;

pub use crate::error::{ApiError, ApiResult};

use crate::models::{ModelBundle, ModelStore, SharedModels};
use crate::scheduler::Scheduler;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// On-disk model bundle location
    pub store: ModelStore,
    /// Currently loaded models, swapped atomically after training
    pub models: SharedModels,
    pub scheduler: Arc<Scheduler>,
    /// Service startup timestamp
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        store: ModelStore,
        models: SharedModels,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            db,
            store,
            models,
            scheduler,
            startup_time: Utc::now(),
        }
    }

    /// The live bundle, or `ModelNotTrained`
    pub async fn current_models(&self) -> ApiResult<Arc<ModelBundle>> {
        self.models
            .read()
            .await
            .clone()
            .ok_or(ApiError::ModelNotTrained)
    }

    pub async fn models_trained(&self) -> bool {
        self.models.read().await.is_some()
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::model_routes())
        .merge(api::predict_routes())
        .merge(api::segmentation_routes())
        .merge(api::scheduler_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
