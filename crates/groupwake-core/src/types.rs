//! Shared data model: activity records, escalation state, snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Last observed activity for a group.
///
/// Presence in the activity store means "evaluate on the next scan".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupActivityRecord {
    pub last_active_at: DateTime<Utc>,
    /// Conversation handle used to reply into the same thread.
    pub conversation_ref: String,
    /// Platform routing identifier.
    pub channel_ref: String,
}

impl GroupActivityRecord {
    pub fn new(
        last_active_at: DateTime<Utc>,
        conversation_ref: impl Into<String>,
        channel_ref: impl Into<String>,
    ) -> Self {
        Self {
            last_active_at,
            conversation_ref: conversation_ref.into(),
            channel_ref: channel_ref.into(),
        }
    }
}

/// Metadata about the most recent outreach tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierMetadata {
    /// Index into the prompt template table.
    pub tier_index: usize,
    pub time_of_day: TimeOfDay,
    pub sent_at: DateTime<Utc>,
}

/// Escalation progress of one group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationState {
    pub consecutive_count: u32,
    pub tier: Option<TierMetadata>,
}

impl EscalationState {
    pub fn is_terminal(&self, max_consecutive: u32) -> bool {
        self.consecutive_count >= max_consecutive
    }
}

/// Last outreach actually delivered to a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachRecord {
    pub sent_at: DateTime<Utc>,
    pub conversation_ref: String,
    pub channel_ref: String,
}

/// Time-of-day context handed to message generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeOfDay {
    Morning,
    Forenoon,
    Lunch,
    Afternoon,
    Dinner,
    Evening,
    LateNight,
}

impl TimeOfDay {
    /// Bucket a local wall-clock hour.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=7 => TimeOfDay::Morning,
            8..=10 => TimeOfDay::Forenoon,
            11..=12 => TimeOfDay::Lunch,
            13..=16 => TimeOfDay::Afternoon,
            17..=18 => TimeOfDay::Dinner,
            19..=22 => TimeOfDay::Evening,
            _ => TimeOfDay::LateNight,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Forenoon => "forenoon",
            TimeOfDay::Lunch => "lunch",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Dinner => "dinner",
            TimeOfDay::Evening => "evening",
            TimeOfDay::LateNight => "late-night",
        }
    }

    /// Inverse of [`TimeOfDay::label`].
    pub fn from_label(label: &str) -> Option<Self> {
        Some(match label {
            "morning" => TimeOfDay::Morning,
            "forenoon" => TimeOfDay::Forenoon,
            "lunch" => TimeOfDay::Lunch,
            "afternoon" => TimeOfDay::Afternoon,
            "dinner" => TimeOfDay::Dinner,
            "evening" => TimeOfDay::Evening,
            "late-night" => TimeOfDay::LateNight,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Template pool an escalation step draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierBucket {
    /// First outreach after a silence.
    Opening = 0,
    /// Second outreach.
    Mid = 1,
    /// Anything between the second and the final outreach.
    Late = 2,
    /// The last outreach before the group goes terminal.
    Final = 3,
}

/// Where in the escalation sequence a send sits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierContext {
    /// 1-based count this send will commit on success.
    pub count: u32,
    pub max: u32,
    pub bucket: TierBucket,
    pub is_final: bool,
}

/// Kind of outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Initiative,
    Test,
}

/// An inbound message observed in a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub group_id: String,
    pub conversation_ref: String,
    pub channel_ref: String,
    #[serde(default)]
    pub is_bot_generated: bool,
}

impl ActivityEvent {
    pub fn genuine(
        group_id: impl Into<String>,
        conversation_ref: impl Into<String>,
        channel_ref: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            conversation_ref: conversation_ref.into(),
            channel_ref: channel_ref.into(),
            is_bot_generated: false,
        }
    }

    /// Build an event from raw message text, flagging it as bot generated
    /// when the text carries the outreach marker.
    pub fn from_text(
        group_id: impl Into<String>,
        conversation_ref: impl Into<String>,
        channel_ref: impl Into<String>,
        text: &str,
        marker: &str,
    ) -> Self {
        let mut event = Self::genuine(group_id, conversation_ref, channel_ref);
        event.is_bot_generated = !marker.is_empty() && text.contains(marker);
        event
    }
}

/// Everything the persistence gateway saves and restores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub activity: HashMap<String, GroupActivityRecord>,
    pub escalation: HashMap<String, EscalationState>,
    pub last_outreach: HashMap<String, OutreachRecord>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.activity.is_empty() && self.escalation.is_empty() && self.last_outreach.is_empty()
    }

    /// Groups that received outreach and have not replied since.
    pub fn awaiting_reply(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .escalation
            .iter()
            .filter(|(_, state)| state.consecutive_count > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// Operational view of one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupProbe {
    pub group_id: String,
    /// `None` while a dispatch is scheduled/in flight or after going terminal.
    pub last_active_at: Option<DateTime<Utc>>,
    pub consecutive_count: u32,
    pub last_outreach_at: Option<DateTime<Utc>>,
    pub dispatch_pending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_of_day_boundaries() {
        assert_eq!(TimeOfDay::from_hour(5), TimeOfDay::LateNight);
        assert_eq!(TimeOfDay::from_hour(6), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(8), TimeOfDay::Forenoon);
        assert_eq!(TimeOfDay::from_hour(11), TimeOfDay::Lunch);
        assert_eq!(TimeOfDay::from_hour(13), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(17), TimeOfDay::Dinner);
        assert_eq!(TimeOfDay::from_hour(19), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(22), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(23), TimeOfDay::LateNight);
        assert_eq!(TimeOfDay::from_hour(0), TimeOfDay::LateNight);
    }

    #[test]
    fn test_time_of_day_label_roundtrip() {
        for hour in 0..24 {
            let tod = TimeOfDay::from_hour(hour);
            assert_eq!(TimeOfDay::from_label(tod.label()), Some(tod));
        }
        assert_eq!(TimeOfDay::from_label("noon"), None);
    }

    #[test]
    fn test_marker_detection() {
        let bot = ActivityEvent::from_text("g1", "c", "ch", "[SYS_PROMPT] hello there", "[SYS_PROMPT]");
        assert!(bot.is_bot_generated);
        let human = ActivityEvent::from_text("g1", "c", "ch", "hello there", "[SYS_PROMPT]");
        assert!(!human.is_bot_generated);
    }

    #[test]
    fn test_awaiting_reply_derived_from_counts() {
        let mut snapshot = Snapshot::default();
        snapshot.escalation.insert("b".into(), EscalationState { consecutive_count: 2, tier: None });
        snapshot.escalation.insert("a".into(), EscalationState { consecutive_count: 0, tier: None });
        snapshot.escalation.insert("c".into(), EscalationState { consecutive_count: 1, tier: None });
        assert_eq!(snapshot.awaiting_reply(), vec!["b".to_string(), "c".to_string()]);
    }
}
