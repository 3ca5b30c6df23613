//! HTTP API handlers for ca-ml

pub mod health;
pub mod models;
pub mod predict;
pub mod scheduler;
pub mod segmentation;

pub use health::health_routes;
pub use models::model_routes;
pub use predict::predict_routes;
pub use scheduler::scheduler_routes;
pub use segmentation::segmentation_routes;
