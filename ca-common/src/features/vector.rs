//! Fixed-order numeric model input

use super::{UserFeatures, WindowFeatures};
use serde::{Deserialize, Serialize};

/// Column names of [`FeatureVector::values`], in order
pub const FEATURE_NAMES: [&str; 31] = [
    "days_since_registration",
    "has_username",
    "has_last_name",
    "total_events_log",
    "unique_days_active",
    "avg_events_per_day",
    "days_since_last_activity",
    "bot_commands_count",
    "messages_count",
    "callback_queries_count",
    "unique_commands_count",
    "avg_session_duration",
    "peak_hour",
    "weekend_activity_ratio",
    "purchase_count",
    "total_spent_log",
    "avg_order_value_log",
    "product_views_count",
    "cart_additions_count",
    "events_last_7_days",
    "events_last_30_days",
    "purchases_last_30_days",
    "product_views_last_30_days",
    "cart_additions_last_30_days",
    "activity_drop_7d_vs_14d",
    "activity_drop_14d_vs_30d",
    "activity_drop_30d_vs_60d",
    "engagement_trend",
    "days_since_last_purchase",
    "avg_days_between_purchases",
    "repeat_purchase_ratio",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub user_id: i64,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn from_features(profile: &UserFeatures, window: &WindowFeatures) -> Self {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        let values = vec![
            profile.days_since_registration as f64,
            flag(profile.has_username),
            flag(profile.has_last_name),
            (profile.total_events as f64).ln_1p(),
            profile.unique_days_active as f64,
            profile.avg_events_per_day,
            profile.days_since_last_activity as f64,
            profile.bot_commands_count as f64,
            profile.messages_count as f64,
            profile.callback_queries_count as f64,
            profile.unique_commands_count as f64,
            profile.avg_session_duration,
            profile.peak_hour as f64,
            profile.weekend_activity_ratio,
            profile.purchase_count as f64,
            profile.total_spent.max(0.0).ln_1p(),
            profile.avg_order_value.max(0.0).ln_1p(),
            profile.product_views_count as f64,
            profile.cart_additions_count as f64,
            window.last_7_days.events as f64,
            window.last_30_days.events as f64,
            window.last_30_days.purchases as f64,
            window.last_30_days.product_views as f64,
            window.last_30_days.cart_additions as f64,
            window.activity_drop_7d_vs_14d,
            window.activity_drop_14d_vs_30d,
            window.activity_drop_30d_vs_60d,
            window.engagement_trend,
            window.days_since_last_purchase as f64,
            window.avg_days_between_purchases,
            window.repeat_purchase_ratio,
        ];
        debug_assert_eq!(values.len(), FEATURE_NAMES.len());

        Self {
            user_id: profile.user_id,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
