//! Policies evaluated by the scanner and dispatcher.
//! All of them are pure: they look only at their own settings and the inputs.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use groupwake_core::config::{GroupWakeConfig, TimeWindowConfig, WhitelistConfig};

/// Allowed local hours, half-open `[start_hour, end_hour)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindowPolicy {
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl TimeWindowPolicy {
    /// Whether outreach may happen during `hour`.
    pub fn allows(&self, hour: u32) -> bool {
        if !self.enabled {
            return true;
        }
        self.start_hour <= hour && hour < self.end_hour
    }
}

impl From<&TimeWindowConfig> for TimeWindowPolicy {
    fn from(config: &TimeWindowConfig) -> Self {
        Self {
            enabled: config.enabled,
            start_hour: config.start_hour,
            end_hour: config.end_hour,
        }
    }
}

/// Which groups may receive outreach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhitelistPolicy {
    pub enabled: bool,
    pub allowed_group_ids: HashSet<String>,
}

impl WhitelistPolicy {
    pub fn allows(&self, group_id: &str) -> bool {
        !self.enabled || self.allowed_group_ids.contains(group_id)
    }
}

impl From<&WhitelistConfig> for WhitelistPolicy {
    fn from(config: &WhitelistConfig) -> Self {
        Self {
            enabled: config.enabled,
            allowed_group_ids: config.group_ids.clone(),
        }
    }
}

/// The immutable rule set shared by scanner and dispatcher.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    pub inactive_time: Duration,
    pub max_response_delay: Duration,
    pub max_consecutive_messages: u32,
    pub scan_interval: Duration,
    pub time_window: TimeWindowPolicy,
    pub whitelist: WhitelistPolicy,
    pub marker: String,
}

impl EscalationPolicy {
    pub fn from_config(config: &GroupWakeConfig) -> Self {
        let escalation = &config.escalation;
        Self {
            inactive_time: Duration::from_secs(escalation.inactive_time_seconds),
            max_response_delay: Duration::from_secs(escalation.max_response_delay_seconds),
            max_consecutive_messages: escalation.max_consecutive_messages,
            scan_interval: Duration::from_secs(escalation.scan_interval_seconds),
            time_window: TimeWindowPolicy::from(&config.time_window),
            whitelist: WhitelistPolicy::from(&config.whitelist),
            marker: config.outreach.marker.clone(),
        }
    }

    /// Whether a group silent since `last_active_at` has crossed the threshold.
    /// A timestamp in the future counts as not yet inactive.
    pub fn is_inactive(&self, last_active_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - last_active_at).to_std() {
            Ok(silence) => silence >= self.inactive_time,
            Err(_) => false,
        }
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::from_config(&GroupWakeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_is_half_open() {
        let window = TimeWindowPolicy { enabled: true, start_hour: 8, end_hour: 23 };
        assert!(!window.allows(7));
        assert!(window.allows(8));
        assert!(window.allows(14));
        assert!(window.allows(22));
        assert!(!window.allows(23));
        assert!(!window.allows(2));
    }

    #[test]
    fn test_disabled_window_allows_everything() {
        let window = TimeWindowPolicy { enabled: false, start_hour: 0, end_hour: 0 };
        assert!((0..24).all(|h| window.allows(h)));
    }

    #[test]
    fn test_whitelist() {
        let mut whitelist = WhitelistPolicy::default();
        assert!(whitelist.allows("anything"));
        whitelist.enabled = true;
        whitelist.allowed_group_ids.insert("g1".into());
        assert!(whitelist.allows("g1"));
        assert!(!whitelist.allows("g2"));
    }

    #[test]
    fn test_inactivity_threshold() {
        let policy = EscalationPolicy::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap();
        assert!(policy.is_inactive(now - chrono::Duration::minutes(121), now));
        assert!(policy.is_inactive(now - chrono::Duration::hours(2), now));
        assert!(!policy.is_inactive(now - chrono::Duration::minutes(119), now));
        assert!(!policy.is_inactive(now + chrono::Duration::minutes(5), now));
    }
}
