//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a recorded user event
///
/// Unknown strings round-trip through [`EventType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    View,
    PageView,
    ProductView,
    AddToCart,
    Purchase,
    BotCommand,
    Message,
    CallbackQuery,
    Click,
    Scroll,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::View => "view",
            EventType::PageView => "page_view",
            EventType::ProductView => "product_view",
            EventType::AddToCart => "add_to_cart",
            EventType::Purchase => "purchase",
            EventType::BotCommand => "bot_command",
            EventType::Message => "message",
            EventType::CallbackQuery => "callback_query",
            EventType::Click => "click",
            EventType::Scroll => "scroll",
            EventType::Other(s) => s,
        }
    }

    /// `view`, `page_view` and `product_view` all count as product views
    pub fn is_product_view(&self) -> bool {
        matches!(
            self,
            EventType::View | EventType::PageView | EventType::ProductView
        )
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "view" => EventType::View,
            "page_view" => EventType::PageView,
            "product_view" => EventType::ProductView,
            "add_to_cart" => EventType::AddToCart,
            "purchase" => EventType::Purchase,
            "bot_command" => EventType::BotCommand,
            "message" => EventType::Message,
            "callback_query" => EventType::CallbackQuery,
            "click" => EventType::Click,
            "scroll" => EventType::Scroll,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        EventType::from(s.as_str())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub telegram_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
    pub registration_date: DateTime<Utc>,
    pub profile_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub telegram_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
    pub registration_date: DateTime<Utc>,
    #[serde(default = "empty_object")]
    pub profile_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub product_id: i64,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub description: Option<String>,
    pub attributes: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub category: String,
    pub price: f64,
    pub description: Option<String>,
    #[serde(default = "empty_object")]
    pub attributes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: i64,
    pub user_id: i64,
    pub product_id: Option<i64>,
    pub event_type: EventType,
    pub event_timestamp: DateTime<Utc>,
    pub properties: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub user_id: i64,
    pub product_id: Option<i64>,
    pub event_type: EventType,
    pub event_timestamp: DateTime<Utc>,
    #[serde(default = "empty_object")]
    pub properties: Value,
}

/// Per-user scores written by the prediction updater
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetrics {
    pub user_id: i64,
    pub segment_id: Option<i64>,
    pub segment_name: Option<String>,
    pub purchase_probability_30d: Option<f64>,
    pub churn_probability: Option<f64>,
    pub lifetime_value: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

/// One completed training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRun {
    pub run_id: i64,
    pub model_version: String,
    pub trigger_kind: String,
    pub samples: i64,
    pub metrics: Value,
    pub created_at: DateTime<Utc>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_known_strings() {
        assert_eq!(EventType::from("add_to_cart"), EventType::AddToCart);
        assert_eq!(EventType::from("callback_query").as_str(), "callback_query");
    }

    #[test]
    fn test_event_type_preserves_unknown() {
        let t = EventType::from("share");
        assert_eq!(t, EventType::Other("share".to_string()));
        assert_eq!(String::from(t), "share");
    }

    #[test]
    fn test_product_view_aliases() {
        assert!(EventType::View.is_product_view());
        assert!(EventType::PageView.is_product_view());
        assert!(EventType::ProductView.is_product_view());
        assert!(!EventType::Click.is_product_view());
    }

    #[test]
    fn test_event_type_serde_as_plain_string() {
        let json = serde_json::to_string(&EventType::BotCommand).unwrap();
        assert_eq!(json, "\"bot_command\"");
        let back: EventType = serde_json::from_str("\"purchase\"").unwrap();
        assert_eq!(back, EventType::Purchase);
    }
}
