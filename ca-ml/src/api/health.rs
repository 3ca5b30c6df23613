//! Service info and health check endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub models_trained: bool,
    pub database: String,
    pub uptime_seconds: i64,
    pub timestamp: DateTime<Utc>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "connected",
        Err(_) => "unavailable",
    };
    let now = Utc::now();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "ca-ml".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        models_trained: state.models_trained().await,
        database: database.to_string(),
        uptime_seconds: (now - state.startup_time).num_seconds(),
        timestamp: now,
    })
}

/// GET /
pub async fn service_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "Customer Analyzer ML Service",
        "module": "ca-ml",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "models_trained": state.models_trained().await,
        "endpoints": {
            "health": "/health",
            "models": "/api/models",
            "predictions": "/api/predict",
            "prediction_stats": "/api/predictions/stats",
            "segmentation": "/api/segmentation",
            "scheduler": "/api/scheduler",
        },
    }))
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health_check))
}
