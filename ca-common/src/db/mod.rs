//! Database models and queries

pub mod activity;
pub mod events;
pub mod init;
pub mod metrics;
pub mod models;
pub mod products;
pub mod runs;
pub mod settings;
pub mod users;

pub use activity::*;
pub use events::*;
pub use init::*;
pub use metrics::*;
pub use models::*;
pub use products::*;
pub use runs::*;
pub use settings::*;
pub use users::*;

use serde_json::Value;

/// Decode a JSON TEXT column; blank or NULL becomes an empty object
pub(crate) fn parse_json_column(raw: Option<String>) -> crate::Result<Value> {
    match raw {
        Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(&text)?),
        _ => Ok(Value::Object(Default::default())),
    }
}
