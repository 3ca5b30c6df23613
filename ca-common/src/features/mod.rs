//! Feature extraction from user activity
//!
//! Every feature is computed relative to an explicit `as_of` instant so the
//! same code serves live scoring (as of now) and point-in-time training
//! snapshots (as of a past cutoff).

mod profile;
mod vector;
mod window;

pub use profile::UserFeatures;
pub use vector::{FeatureVector, FEATURE_NAMES};
pub use window::{WindowCounts, WindowFeatures, WINDOWS};

use crate::db::{Event, EventType, User};
use chrono::{DateTime, NaiveDate, Utc};

/// Maximum gap between consecutive events of one session
pub const SESSION_GAP_SECONDS: i64 = 1800;

/// Sentinel for "never happened" day counts
pub const NO_ACTIVITY_DAYS: i64 = 999;

/// A user with their events ordered oldest first
#[derive(Debug, Clone)]
pub struct UserActivity {
    pub user: User,
    pub events: Vec<Event>,
}

impl UserActivity {
    pub fn new(user: User, mut events: Vec<Event>) -> Self {
        events.sort_by(|a, b| {
            a.event_timestamp
                .cmp(&b.event_timestamp)
                .then(a.event_id.cmp(&b.event_id))
        });
        Self { user, events }
    }

    pub fn user_id(&self) -> i64 {
        self.user.user_id
    }

    /// Copy restricted to events at or before `as_of`
    pub fn snapshot(&self, as_of: DateTime<Utc>) -> UserActivity {
        let events = self
            .events
            .iter()
            .take_while(|e| e.event_timestamp <= as_of)
            .cloned()
            .collect();
        UserActivity {
            user: self.user.clone(),
            events,
        }
    }

    /// Events with `start <= timestamp <= end`
    pub fn events_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_timestamp >= start && e.event_timestamp <= end)
            .collect()
    }

    /// Events strictly after `start` and at or before `end`
    pub fn events_after(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_timestamp > start && e.event_timestamp <= end)
            .collect()
    }
}

/// All features of one user as of one instant
#[derive(Debug, Clone)]
pub struct UserSnapshot {
    pub profile: UserFeatures,
    pub window: WindowFeatures,
    pub vector: FeatureVector,
}

impl UserSnapshot {
    pub fn extract(activity: &UserActivity, as_of: DateTime<Utc>) -> Self {
        let profile = UserFeatures::extract(activity, as_of);
        let window = WindowFeatures::extract(activity, as_of);
        let vector = FeatureVector::from_features(&profile, &window);
        Self {
            profile,
            window,
            vector,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.profile.user_id
    }
}

/// Contiguous run of events separated by at most [`SESSION_GAP_SECONDS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub event_count: usize,
}

impl Session {
    pub fn duration_seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

/// Group time-ordered events into sessions
pub fn group_sessions<'a, I>(events: I) -> Vec<Session>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut sessions: Vec<Session> = Vec::new();

    for event in events {
        let ts = event.event_timestamp;
        match sessions.last_mut() {
            Some(current) if (ts - current.end).num_seconds() <= SESSION_GAP_SECONDS => {
                current.end = ts;
                current.event_count += 1;
            }
            _ => sessions.push(Session {
                start: ts,
                end: ts,
                event_count: 1,
            }),
        }
    }

    sessions
}

/// Mean duration of the sessions that contain at least two events
pub fn avg_multi_event_session_seconds(sessions: &[Session]) -> f64 {
    let multi: Vec<&Session> = sessions.iter().filter(|s| s.event_count > 1).collect();
    if multi.is_empty() {
        return 0.0;
    }
    let total: i64 = multi.iter().map(|s| s.duration_seconds()).sum();
    total as f64 / multi.len() as f64
}

/// Numeric `properties.amount` of a purchase event
pub fn purchase_amount(event: &Event) -> Option<f64> {
    if event.event_type != EventType::Purchase {
        return None;
    }
    event.properties.get("amount").and_then(|v| v.as_f64())
}

/// Distinct UTC calendar days, ascending
pub fn active_days<'a, I>(events: I) -> Vec<NaiveDate>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut days: Vec<NaiveDate> = events
        .into_iter()
        .map(|e| e.event_timestamp.date_naive())
        .collect();
    days.sort_unstable();
    days.dedup();
    days
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_group_sessions_splits_on_gap() {
        let base = at(2024, 5, 1, 10, 0);
        let events = vec![
            event(1, EventType::View, base, json!({})),
            event(2, EventType::Click, base + Duration::minutes(10), json!({})),
            event(3, EventType::View, base + Duration::minutes(40), json!({})),
            // 31 minutes later: new session
            event(4, EventType::View, base + Duration::minutes(71), json!({})),
        ];

        let sessions = group_sessions(&events);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].event_count, 3);
        assert_eq!(sessions[0].duration_seconds(), 40 * 60);
        assert_eq!(sessions[1].event_count, 1);
    }

    #[test]
    fn test_gap_of_exactly_thirty_minutes_stays_in_session() {
        let base = at(2024, 5, 1, 10, 0);
        let events = vec![
            event(1, EventType::View, base, json!({})),
            event(2, EventType::View, base + Duration::minutes(30), json!({})),
        ];
        assert_eq!(group_sessions(&events).len(), 1);
    }

    #[test]
    fn test_avg_session_ignores_single_event_sessions() {
        let base = at(2024, 5, 1, 10, 0);
        let events = vec![
            event(1, EventType::View, base, json!({})),
            event(2, EventType::View, base + Duration::minutes(20), json!({})),
            event(3, EventType::View, base + Duration::hours(5), json!({})),
        ];
        let sessions = group_sessions(&events);
        assert_eq!(avg_multi_event_session_seconds(&sessions), 1200.0);
    }

    #[test]
    fn test_snapshot_drops_later_events() {
        let base = at(2024, 5, 1, 10, 0);
        let activity = UserActivity::new(
            user(base),
            vec![
                event(2, EventType::View, base + Duration::days(3), json!({})),
                event(1, EventType::View, base + Duration::days(1), json!({})),
            ],
        );
        assert_eq!(activity.events[0].event_id, 1);

        let snap = activity.snapshot(base + Duration::days(2));
        assert_eq!(snap.events.len(), 1);
        assert_eq!(snap.events[0].event_id, 1);
    }

    #[test]
    fn test_purchase_amount_only_for_numeric_purchase() {
        let ts = at(2024, 5, 1, 10, 0);
        assert_eq!(
            purchase_amount(&event(1, EventType::Purchase, ts, json!({"amount": 12.5}))),
            Some(12.5)
        );
        assert_eq!(
            purchase_amount(&event(2, EventType::Purchase, ts, json!({"amount": "12"}))),
            None
        );
        assert_eq!(
            purchase_amount(&event(3, EventType::View, ts, json!({"amount": 3}))),
            None
        );
    }
}
