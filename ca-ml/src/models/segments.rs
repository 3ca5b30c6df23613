//! Segment profiles and naming

use ca_common::features::UserSnapshot;
use serde::{Deserialize, Serialize};

pub const DORMANT: &str = "Dormant customers";
pub const VIP: &str = "VIP customers";
pub const NEW: &str = "New customers";
pub const ACTIVE_BUYERS: &str = "Active buyers";
pub const BROWSERS: &str = "Browsers";

/// Average raw features of a segment's members
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentCharacteristics {
    pub avg_days_since_registration: f64,
    pub avg_days_since_last_activity: f64,
    pub avg_total_events: f64,
    pub avg_events_last_30_days: f64,
    pub avg_purchase_count: f64,
    pub avg_total_spent: f64,
    pub avg_order_value: f64,
    pub avg_weekend_activity_ratio: f64,
}

impl SegmentCharacteristics {
    pub fn from_members(members: &[&UserSnapshot]) -> Self {
        if members.is_empty() {
            return Self::default();
        }
        let avg = |f: fn(&UserSnapshot) -> f64| mean(members, f);

        Self {
            avg_days_since_registration: avg(|m| m.profile.days_since_registration as f64),
            avg_days_since_last_activity: avg(|m| m.profile.days_since_last_activity as f64),
            avg_total_events: avg(|m| m.profile.total_events as f64),
            avg_events_last_30_days: avg(|m| m.window.last_30_days.events as f64),
            avg_purchase_count: avg(|m| m.profile.purchase_count as f64),
            avg_total_spent: avg(|m| m.profile.total_spent),
            avg_order_value: avg(|m| m.profile.avg_order_value),
            avg_weekend_activity_ratio: avg(|m| m.profile.weekend_activity_ratio),
        }
    }
}

fn mean(members: &[&UserSnapshot], f: fn(&UserSnapshot) -> f64) -> f64 {
    members.iter().map(|m| f(m)).sum::<f64>() / members.len() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentProfile {
    pub segment_id: usize,
    pub name: String,
    pub size: usize,
    /// Share of users, 0..=100
    pub percentage: f64,
    pub characteristics: SegmentCharacteristics,
}

/// Build one profile per cluster and name them
///
/// `labels[i]` is the cluster of `snapshots[i]`.
pub fn profile_segments(snapshots: &[UserSnapshot], labels: &[usize], k: usize) -> Vec<SegmentProfile> {
    let total = snapshots.len().max(1) as f64;

    let mut profiles: Vec<SegmentProfile> = (0..k)
        .map(|segment_id| {
            let members: Vec<&UserSnapshot> = snapshots
                .iter()
                .zip(labels)
                .filter(|(_, &l)| l == segment_id)
                .map(|(s, _)| s)
                .collect();
            SegmentProfile {
                segment_id,
                name: String::new(),
                size: members.len(),
                percentage: members.len() as f64 / total * 100.0,
                characteristics: SegmentCharacteristics::from_members(&members),
            }
        })
        .collect();

    let names = name_segments(&profiles);
    for (profile, name) in profiles.iter_mut().zip(names) {
        profile.name = name;
    }
    profiles
}

/// Apply the naming rules in order, then de-duplicate with numeric suffixes
///
/// Empty segments are called browsers.
pub fn name_segments(profiles: &[SegmentProfile]) -> Vec<String> {
    let top_spender = profiles
        .iter()
        .filter(|p| p.size > 0)
        .max_by(|a, b| {
            a.characteristics
                .avg_total_spent
                .total_cmp(&b.characteristics.avg_total_spent)
        })
        .map(|p| p.segment_id);

    let base: Vec<&str> = profiles
        .iter()
        .map(|p| {
            let c = &p.characteristics;
            if p.size == 0 {
                BROWSERS
            } else if c.avg_days_since_last_activity > 30.0 {
                DORMANT
            } else if Some(p.segment_id) == top_spender && c.avg_purchase_count >= 1.0 {
                VIP
            } else if c.avg_days_since_registration <= 14.0 {
                NEW
            } else if c.avg_purchase_count >= 1.0 {
                ACTIVE_BUYERS
            } else {
                BROWSERS
            }
        })
        .collect();

    let mut seen: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    base.into_iter()
        .map(|name| {
            let count = seen.entry(name).or_insert(0);
            *count += 1;
            if *count == 1 {
                name.to_string()
            } else {
                format!("{} {}", name, count)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: usize, size: usize, c: SegmentCharacteristics) -> SegmentProfile {
        SegmentProfile {
            segment_id: id,
            name: String::new(),
            size,
            percentage: 0.0,
            characteristics: c,
        }
    }

    fn chars(registered: f64, inactive: f64, purchases: f64, spent: f64) -> SegmentCharacteristics {
        SegmentCharacteristics {
            avg_days_since_registration: registered,
            avg_days_since_last_activity: inactive,
            avg_purchase_count: purchases,
            avg_total_spent: spent,
            ..Default::default()
        }
    }

    #[test]
    fn test_rule_order() {
        let profiles = vec![
            profile(0, 10, chars(200.0, 90.0, 3.0, 900.0)),
            profile(1, 10, chars(200.0, 2.0, 4.0, 500.0)),
            profile(2, 10, chars(5.0, 1.0, 0.0, 0.0)),
            profile(3, 10, chars(100.0, 3.0, 1.5, 100.0)),
            profile(4, 10, chars(100.0, 3.0, 0.2, 10.0)),
        ];
        // Segment 0 spends most but is dormant, so nobody qualifies as VIP
        assert_eq!(
            name_segments(&profiles),
            vec![DORMANT, ACTIVE_BUYERS, NEW, "Active buyers 2", BROWSERS]
        );
    }

    #[test]
    fn test_vip_and_duplicate_suffixes() {
        let profiles = vec![
            profile(0, 5, chars(100.0, 2.0, 5.0, 800.0)),
            profile(1, 5, chars(100.0, 2.0, 0.0, 0.0)),
            profile(2, 5, chars(100.0, 2.0, 0.1, 1.0)),
            profile(3, 0, SegmentCharacteristics::default()),
        ];
        assert_eq!(
            name_segments(&profiles),
            vec![VIP, BROWSERS, "Browsers 2", "Browsers 3"]
        );
    }
}
