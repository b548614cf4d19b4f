//! Inbound activity handling and the escalation reset path.

use std::sync::Arc;

use groupwake_core::traits::Clock;
use groupwake_core::types::{ActivityEvent, GroupActivityRecord};

use crate::persistence::PersistenceService;
use crate::store::GroupStore;

/// Result of feeding one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// The bot's own outreach echoed back, or no group id; nothing changed.
    Ignored,
    /// Activity refreshed; the group had no escalation progress.
    Refreshed,
    /// Activity refreshed and the escalation counter reset from `previous`.
    Reset { previous: u32 },
}

/// Applies inbound activity to the stores.
pub struct ActivityTracker {
    groups: Arc<GroupStore>,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<PersistenceService>>,
}

impl ActivityTracker {
    pub fn new(groups: Arc<GroupStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            groups,
            clock,
            persistence: None,
        }
    }

    /// Flush state through `persistence` after every reset.
    pub fn with_persistence(mut self, persistence: Arc<PersistenceService>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Record one inbound message.
    ///
    /// Genuine activity always refreshes the record and zeroes any
    /// escalation progress, including a terminal group.
    pub fn on_activity(&self, event: &ActivityEvent) -> ActivityOutcome {
        if event.group_id.is_empty() {
            tracing::debug!("Ignoring activity without a group id");
            return ActivityOutcome::Ignored;
        }
        if event.is_bot_generated {
            tracing::debug!("Skipping own outreach in group {}", event.group_id);
            return ActivityOutcome::Ignored;
        }

        let now = self.clock.now();
        let outcome = self.groups.with_group(&event.group_id, |entry| {
            entry.activity = Some(GroupActivityRecord::new(
                now,
                event.conversation_ref.clone(),
                event.channel_ref.clone(),
            ));
            entry.activity_epoch += 1;
            entry.pending = None;

            let previous = entry.escalation.consecutive_count;
            if previous > 0 || entry.escalation.tier.is_some() {
                entry.escalation.consecutive_count = 0;
                entry.escalation.tier = None;
                ActivityOutcome::Reset { previous }
            } else {
                ActivityOutcome::Refreshed
            }
        });

        match outcome {
            ActivityOutcome::Reset { previous } => {
                tracing::info!(
                    "💬 Group {} is active again, count reset from {previous} to 0",
                    event.group_id
                );
                if let Some(persistence) = &self.persistence {
                    persistence.request_flush();
                }
            }
            _ => tracing::debug!("Group {} active at {now}", event.group_id),
        }
        outcome
    }
}
