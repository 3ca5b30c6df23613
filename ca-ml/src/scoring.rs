//! Applying a trained bundle to individual users

use crate::models::ModelBundle;
use ca_common::db::UserMetrics;
use ca_common::features::{UserActivity, UserSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

pub fn churn_risk_level(probability: f64) -> RiskLevel {
    if probability >= 0.7 {
        RiskLevel::High
    } else if probability >= 0.4 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Three suggested actions for a purchase probability tier
pub fn purchase_recommendations(probability: f64) -> [&'static str; 3] {
    if probability > 0.8 {
        [
            "Show premium products",
            "Offer an exclusive deal",
            "Suggest complementary items",
        ]
    } else if probability > 0.6 {
        [
            "Send a personalised offer",
            "Highlight popular products",
            "Remind about items in the cart",
        ]
    } else if probability > 0.4 {
        [
            "Offer a discount",
            "Share customer reviews",
            "Send an engagement campaign",
        ]
    } else {
        [
            "Run a re-engagement campaign",
            "Offer a welcome bonus",
            "Collect feedback on preferences",
        ]
    }
}

/// Probability as a percentage with one decimal
pub fn as_percent(probability: f64) -> f64 {
    (probability * 1000.0).round() / 10.0
}

/// Everything the models say about one user
#[derive(Debug, Clone, Serialize)]
pub struct UserScore {
    pub user_id: i64,
    pub segment_id: usize,
    pub segment_name: String,
    pub purchase_probability: f64,
    pub churn_probability: f64,
    pub churn_risk: RiskLevel,
    pub lifetime_value: f64,
}

impl UserScore {
    pub fn to_metrics(&self, updated_at: DateTime<Utc>) -> UserMetrics {
        UserMetrics {
            user_id: self.user_id,
            segment_id: Some(self.segment_id as i64),
            segment_name: Some(self.segment_name.clone()),
            purchase_probability_30d: Some(self.purchase_probability),
            churn_probability: Some(self.churn_probability),
            lifetime_value: Some(self.lifetime_value),
            last_updated: updated_at,
        }
    }
}

pub fn score_snapshot(bundle: &ModelBundle, snapshot: &UserSnapshot) -> UserScore {
    let purchase_probability = bundle.purchase_probability(&snapshot.vector);
    let churn_probability = bundle.churn_probability(&snapshot.vector);
    let segment_id = bundle.segment_of(&snapshot.vector);

    UserScore {
        user_id: snapshot.user_id(),
        segment_id,
        segment_name: bundle.segment_name(segment_id),
        purchase_probability,
        churn_probability,
        churn_risk: churn_risk_level(churn_probability),
        lifetime_value: snapshot.window.customer_lifetime_value,
    }
}

pub fn score_user(bundle: &ModelBundle, activity: &UserActivity, as_of: DateTime<Utc>) -> UserScore {
    score_snapshot(bundle, &UserSnapshot::extract(activity, as_of))
}

/// Features shown next to a purchase prediction
pub fn purchase_key_features(snapshot: &UserSnapshot) -> Value {
    json!({
        "purchase_count": snapshot.profile.purchase_count,
        "total_spent": snapshot.profile.total_spent,
        "events_last_30_days": snapshot.window.last_30_days.events,
        "cart_additions_last_30_days": snapshot.window.last_30_days.cart_additions,
        "days_since_last_activity": snapshot.profile.days_since_last_activity,
    })
}

/// Features shown next to a churn prediction
pub fn churn_key_features(snapshot: &UserSnapshot) -> Value {
    json!({
        "days_since_last_activity": snapshot.profile.days_since_last_activity,
        "activity_drop_7d_vs_14d": snapshot.window.activity_drop_7d_vs_14d,
        "activity_drop_30d_vs_60d": snapshot.window.activity_drop_30d_vs_60d,
        "engagement_trend": snapshot.window.engagement_trend,
        "days_since_last_purchase": snapshot.window.days_since_last_purchase,
    })
}
