//! Time-window features: recent activity, trends, gaps and purchase rhythm

use super::{
    active_days, avg_multi_event_session_seconds, group_sessions, purchase_amount, UserActivity,
    NO_ACTIVITY_DAYS,
};
use crate::db::{Event, EventType};
use crate::time::days_between;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Window lengths in days
pub const WINDOWS: [i64; 4] = [7, 14, 30, 60];

/// Activity counts over one window ending at `as_of`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowCounts {
    pub days: i64,
    pub events: usize,
    pub active_days: usize,
    pub purchases: usize,
    pub product_views: usize,
    pub cart_additions: usize,
    pub bot_commands: usize,
    pub messages: usize,
    pub sessions: usize,
    pub avg_session_duration: f64,
}

impl WindowCounts {
    fn from_events(days: i64, events: &[&Event]) -> Self {
        let count = |kind: EventType| events.iter().filter(|e| e.event_type == kind).count();
        let sessions = group_sessions(events.iter().copied());

        Self {
            days,
            events: events.len(),
            active_days: active_days(events.iter().copied()).len(),
            purchases: count(EventType::Purchase),
            product_views: events.iter().filter(|e| e.event_type.is_product_view()).count(),
            cart_additions: count(EventType::AddToCart),
            bot_commands: count(EventType::BotCommand),
            messages: count(EventType::Message),
            sessions: sessions.len(),
            avg_session_duration: avg_multi_event_session_seconds(&sessions),
        }
    }

    fn rate(&self) -> f64 {
        self.events as f64 / self.days as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFeatures {
    pub last_7_days: WindowCounts,
    pub last_14_days: WindowCounts,
    pub last_30_days: WindowCounts,
    pub last_60_days: WindowCounts,

    pub activity_drop_7d_vs_14d: f64,
    pub activity_drop_14d_vs_30d: f64,
    pub activity_drop_30d_vs_60d: f64,

    pub engagement_trend: f64,
    pub purchase_trend: f64,
    pub session_duration_trend: f64,

    pub avg_days_between_active_days: f64,
    pub max_days_between_active_days: i64,

    pub days_since_last_purchase: i64,
    pub avg_days_between_purchases: f64,
    pub repeat_purchase_ratio: f64,
    pub customer_lifetime_value: f64,
}

impl WindowFeatures {
    /// Extract window features from events at or before `as_of`
    pub fn extract(activity: &UserActivity, as_of: DateTime<Utc>) -> Self {
        let window = |days: i64| {
            let events = activity.events_between(as_of - Duration::days(days), as_of);
            WindowCounts::from_events(days, &events)
        };
        let [w7, w14, w30, w60] = WINDOWS.map(window);

        let history: Vec<&Event> = activity
            .events
            .iter()
            .filter(|e| e.event_timestamp <= as_of)
            .collect();

        let (avg_gap, max_gap) = active_day_gaps(&history);

        let purchases: Vec<&Event> = history
            .iter()
            .copied()
            .filter(|e| e.event_type == EventType::Purchase)
            .collect();

        let days_since_last_purchase = purchases
            .last()
            .map(|e| days_between(e.event_timestamp, as_of))
            .unwrap_or(NO_ACTIVITY_DAYS);

        let avg_days_between_purchases = if purchases.len() < 2 {
            NO_ACTIVITY_DAYS as f64
        } else {
            let gaps: Vec<i64> = purchases
                .windows(2)
                .map(|pair| days_between(pair[0].event_timestamp, pair[1].event_timestamp))
                .collect();
            gaps.iter().sum::<i64>() as f64 / gaps.len() as f64
        };

        let repeat_purchase_ratio = if purchases.len() <= 1 {
            0.0
        } else {
            (purchases.len() - 1) as f64 / purchases.len() as f64
        };

        let total_spent: f64 = purchases.iter().filter_map(|e| purchase_amount(e)).sum();

        Self {
            activity_drop_7d_vs_14d: activity_drop(&w7, &w14),
            activity_drop_14d_vs_30d: activity_drop(&w14, &w30),
            activity_drop_30d_vs_60d: activity_drop(&w30, &w60),
            engagement_trend: trend(w7.events as f64, w14.events as f64),
            purchase_trend: trend(w7.purchases as f64, w14.purchases as f64),
            session_duration_trend: trend(w7.avg_session_duration, w14.avg_session_duration),
            avg_days_between_active_days: avg_gap,
            max_days_between_active_days: max_gap,
            days_since_last_purchase,
            avg_days_between_purchases,
            repeat_purchase_ratio,
            customer_lifetime_value: total_spent + 0.1 * history.len() as f64,
            last_7_days: w7,
            last_14_days: w14,
            last_30_days: w30,
            last_60_days: w60,
        }
    }
}

/// Relative drop of the daily event rate in `short` compared with `long`
fn activity_drop(short: &WindowCounts, long: &WindowCounts) -> f64 {
    if long.events == 0 {
        return 0.0;
    }
    1.0 - short.rate() / long.rate()
}

fn trend(recent: f64, reference: f64) -> f64 {
    if reference == 0.0 {
        0.0
    } else {
        (recent - reference) / reference
    }
}

/// Mean and max day gaps between distinct active dates
fn active_day_gaps(events: &[&Event]) -> (f64, i64) {
    let days = active_days(events.iter().copied());
    if days.len() < 2 {
        return (0.0, 0);
    }
    let gaps: Vec<i64> = days
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_days())
        .collect();
    let max = gaps.iter().copied().max().unwrap_or(0);
    (gaps.iter().sum::<i64>() as f64 / gaps.len() as f64, max)
}
