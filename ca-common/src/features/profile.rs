//! Lifetime profile features of one user

use super::{
    active_days, avg_multi_event_session_seconds, group_sessions, purchase_amount, UserActivity,
    NO_ACTIVITY_DAYS,
};
use crate::db::EventType;
use crate::time::days_between;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Hour reported when the user has no events
const DEFAULT_PEAK_HOUR: u32 = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFeatures {
    pub user_id: i64,
    pub telegram_id: i64,

    pub days_since_registration: i64,
    pub has_username: bool,
    pub has_last_name: bool,
    pub language_code: Option<String>,

    pub total_events: usize,
    pub unique_days_active: usize,
    pub avg_events_per_day: f64,
    pub days_since_last_activity: i64,

    pub bot_commands_count: usize,
    pub messages_count: usize,
    pub callback_queries_count: usize,
    pub unique_commands_count: usize,

    /// Seconds
    pub avg_session_duration: f64,
    pub peak_hour: u32,
    pub weekend_activity_ratio: f64,

    pub purchase_count: usize,
    pub total_spent: f64,
    pub avg_order_value: f64,

    pub product_views_count: usize,
    pub cart_additions_count: usize,

    pub as_of: DateTime<Utc>,
}

impl UserFeatures {
    /// Extract profile features from events at or before `as_of`
    pub fn extract(activity: &UserActivity, as_of: DateTime<Utc>) -> Self {
        let user = &activity.user;
        let events: Vec<_> = activity
            .events
            .iter()
            .filter(|e| e.event_timestamp <= as_of)
            .collect();

        let days_since_registration = days_between(user.registration_date, as_of).max(0);
        let total_events = events.len();

        let count = |kind: &EventType| events.iter().filter(|e| &e.event_type == kind).count();

        let avg_events_per_day = if total_events == 0 {
            0.0
        } else if days_since_registration == 0 {
            total_events as f64
        } else {
            total_events as f64 / days_since_registration as f64
        };

        let days_since_last_activity = events
            .last()
            .map(|e| days_between(e.event_timestamp, as_of))
            .unwrap_or(NO_ACTIVITY_DAYS);

        let unique_commands: HashSet<&str> = events
            .iter()
            .filter(|e| e.event_type == EventType::BotCommand)
            .filter_map(|e| e.properties.get("command").and_then(|c| c.as_str()))
            .collect();

        let sessions = group_sessions(events.iter().copied());

        let purchase_count = count(&EventType::Purchase);
        let total_spent: f64 = events.iter().filter_map(|e| purchase_amount(e)).sum();
        let avg_order_value = if purchase_count == 0 {
            0.0
        } else {
            total_spent / purchase_count as f64
        };

        let weekend_events = events
            .iter()
            .filter(|e| matches!(e.event_timestamp.weekday(), Weekday::Sat | Weekday::Sun))
            .count();
        let weekend_activity_ratio = if total_events == 0 {
            0.0
        } else {
            weekend_events as f64 / total_events as f64
        };

        Self {
            user_id: user.user_id,
            telegram_id: user.telegram_id,
            days_since_registration,
            has_username: non_blank(&user.username),
            has_last_name: non_blank(&user.last_name),
            language_code: user.language_code.clone(),
            total_events,
            unique_days_active: active_days(events.iter().copied()).len(),
            avg_events_per_day,
            days_since_last_activity,
            bot_commands_count: count(&EventType::BotCommand),
            messages_count: count(&EventType::Message),
            callback_queries_count: count(&EventType::CallbackQuery),
            unique_commands_count: unique_commands.len(),
            avg_session_duration: avg_multi_event_session_seconds(&sessions),
            peak_hour: peak_hour(events.iter().map(|e| e.event_timestamp.hour())),
            weekend_activity_ratio,
            purchase_count,
            total_spent,
            avg_order_value,
            product_views_count: events.iter().filter(|e| e.event_type.is_product_view()).count(),
            cart_additions_count: count(&EventType::AddToCart),
            as_of,
        }
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Most frequent hour; the earliest hour wins ties
fn peak_hour(hours: impl Iterator<Item = u32>) -> u32 {
    let mut counts = [0usize; 24];
    let mut any = false;
    for hour in hours {
        counts[hour as usize % 24] += 1;
        any = true;
    }
    if !any {
        return DEFAULT_PEAK_HOUR;
    }

    let mut best = 0;
    for hour in 1..24 {
        if counts[hour] > counts[best] {
            best = hour;
        }
    }
    best as u32
}
