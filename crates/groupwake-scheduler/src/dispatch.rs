//! Escalation dispatcher: the per-group state machine.
//!
//! ```text
//! IDLE ──send ok──▶ TIER_1 ──send ok──▶ … ──send ok──▶ TIER_max = TERMINAL
//!   ▲                                                        │
//!   └──────────────── genuine activity (reset) ◀─────────────┘
//! ```
//!
//! A dispatch claims the group, talks to the outreach sender without holding
//! any lock, then commits. Only a successful send advances the count.

use std::sync::Arc;

use groupwake_core::error::Result;
use groupwake_core::traits::{Clock, OutreachRequest, OutreachSender};
use groupwake_core::types::{
    GroupActivityRecord, MessageType, OutreachRecord, TierBucket, TierContext, TierMetadata,
    TimeOfDay,
};

use crate::persistence::PersistenceService;
use crate::policy::EscalationPolicy;
use crate::prompt;
use crate::store::GroupStore;
use crate::tiers;

/// One scheduled escalation step, captured when the scanner hands off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchJob {
    pub group_id: String,
    pub conversation_ref: String,
    pub channel_ref: String,
    /// Count observed at scheduling time.
    pub expected_count: u32,
    /// Activity epoch observed at scheduling time.
    pub activity_epoch: u64,
}

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Message sent and count committed.
    Sent { count: u32, terminal: bool },
    /// Message sent, but a genuine reply arrived while sending; the reset wins.
    Superseded,
    /// Group left the whitelist while the job was waiting.
    NotWhitelisted,
    /// Count already at the maximum.
    LimitReached { count: u32 },
    /// State moved since scheduling (reply or an earlier dispatch).
    Stale,
    /// Another dispatch for the group is currently sending.
    InFlight,
    /// Generation/delivery failed; nothing was committed.
    Failed(String),
}

/// Claim taken on a group before sending.
struct Claim {
    next_count: u32,
    epoch: u64,
}

/// Drives the escalation state machine for individual groups.
pub struct EscalationDispatcher {
    groups: Arc<GroupStore>,
    policy: Arc<EscalationPolicy>,
    sender: Arc<dyn OutreachSender>,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<PersistenceService>>,
}

impl EscalationDispatcher {
    pub fn new(
        groups: Arc<GroupStore>,
        policy: Arc<EscalationPolicy>,
        sender: Arc<dyn OutreachSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            groups,
            policy,
            sender,
            clock,
            persistence: None,
        }
    }

    /// Flush state through `persistence` after every commit.
    pub fn with_persistence(mut self, persistence: Arc<PersistenceService>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Run one escalation step for `job.group_id`.
    pub async fn dispatch(&self, job: DispatchJob) -> DispatchOutcome {
        let group_id = job.group_id.as_str();
        let max = self.policy.max_consecutive_messages;

        if !self.policy.whitelist.allows(group_id) {
            tracing::info!("🚫 Group {group_id} is no longer whitelisted, cancelling outreach");
            self.release(&job);
            return DispatchOutcome::NotWhitelisted;
        }

        let claim = match self.claim(&job) {
            Ok(claim) => claim,
            Err(outcome) => return outcome,
        };
        let next_count = claim.next_count;
        tracing::info!("📤 Preparing outreach #{next_count} for group {group_id}");

        let bucket = tiers::bucket_for(next_count, max);
        let (tier_index, template) = {
            let mut rng = rand::thread_rng();
            tiers::select_template(bucket, &mut rng)
        };
        let time_of_day = TimeOfDay::from_hour(self.clock.local_hour());
        let tier = TierContext {
            count: next_count,
            max,
            bucket,
            is_final: next_count >= max,
        };
        let extra = prompt::extra_context(&tier, time_of_day);
        let request = OutreachRequest {
            group_id: job.group_id.clone(),
            conversation_ref: job.conversation_ref.clone(),
            channel_ref: job.channel_ref.clone(),
            template: template.to_string(),
            time_of_day,
            tier,
            prompt: prompt::compose(&self.policy.marker, template, Some(time_of_day), Some(&extra)),
            message_type: MessageType::Initiative,
        };

        let result = self.sender.send(request).await;
        let outcome = match result {
            Ok(()) => self.commit(&job, &claim, tier_index, time_of_day),
            Err(e) => {
                tracing::error!("❌ Outreach to group {group_id} failed via {}: {e}", self.sender.name());
                self.groups.with_group(group_id, |entry| {
                    entry.sending = false;
                    entry.pending = None;
                });
                DispatchOutcome::Failed(e.to_string())
            }
        };

        if let DispatchOutcome::Sent { .. } | DispatchOutcome::Superseded = outcome {
            if let Some(persistence) = &self.persistence {
                persistence.request_flush();
            }
        }
        outcome
    }

    /// Check guards and mark the group as sending.
    fn claim(&self, job: &DispatchJob) -> std::result::Result<Claim, DispatchOutcome> {
        let max = self.policy.max_consecutive_messages;
        let group_id = job.group_id.as_str();
        self.groups.with_group(group_id, |entry| {
            if entry.sending {
                tracing::debug!("Group {group_id} already has an outreach in flight");
                return Err(DispatchOutcome::InFlight);
            }
            let current = entry.escalation.consecutive_count;
            let next_count = current.saturating_add(1);
            if next_count > max {
                tracing::info!(
                    "Group {group_id} count {next_count} would exceed max {max}, cancelling"
                );
                entry.pending = None;
                return Err(DispatchOutcome::LimitReached { count: current });
            }
            if entry.activity_epoch != job.activity_epoch || current != job.expected_count {
                tracing::debug!("Group {group_id} changed since scheduling, dropping stale job");
                // A newer epoch means any pending record belongs to a newer job.
                if entry.activity_epoch == job.activity_epoch {
                    entry.pending = None;
                }
                return Err(DispatchOutcome::Stale);
            }
            entry.sending = true;
            Ok(Claim {
                next_count,
                epoch: entry.activity_epoch,
            })
        })
    }

    /// Commit a successful send.
    fn commit(
        &self,
        job: &DispatchJob,
        claim: &Claim,
        tier_index: usize,
        time_of_day: TimeOfDay,
    ) -> DispatchOutcome {
        let max = self.policy.max_consecutive_messages;
        let now = self.clock.now();
        let group_id = job.group_id.as_str();

        self.groups.with_group(group_id, |entry| {
            entry.sending = false;
            entry.pending = None;
            entry.last_outreach = Some(OutreachRecord {
                sent_at: now,
                conversation_ref: job.conversation_ref.clone(),
                channel_ref: job.channel_ref.clone(),
            });

            if entry.activity_epoch != claim.epoch {
                tracing::info!("💬 Group {group_id} replied while outreach was sending, keeping reset");
                return DispatchOutcome::Superseded;
            }

            let count = claim.next_count;
            entry.escalation.consecutive_count = count;
            entry.escalation.tier = Some(TierMetadata {
                tier_index,
                time_of_day,
                sent_at: now,
            });

            let terminal = count >= max;
            if terminal {
                entry.activity = None;
                tracing::info!("🔕 Group {group_id} reached max consecutive outreach ({max}), stopping");
            } else {
                entry.activity = Some(GroupActivityRecord::new(
                    now,
                    job.conversation_ref.clone(),
                    job.channel_ref.clone(),
                ));
                tracing::info!("🔁 Group {group_id} re-armed after outreach #{count}");
            }
            DispatchOutcome::Sent { count, terminal }
        })
    }

    /// Give up a scheduled slot without sending.
    fn release(&self, job: &DispatchJob) {
        self.groups.with_group(&job.group_id, |entry| {
            if entry.activity_epoch == job.activity_epoch {
                entry.pending = None;
            }
        });
    }

    /// Send a one-off test outreach. Never touches escalation state.
    pub async fn send_test(
        &self,
        group_id: &str,
        conversation_ref: &str,
        channel_ref: &str,
    ) -> Result<()> {
        let max = self.policy.max_consecutive_messages;
        let current = self
            .groups
            .read_group(group_id, |entry| entry.escalation.consecutive_count)
            .unwrap_or(0);
        let template = {
            let mut rng = rand::thread_rng();
            tiers::select_template(TierBucket::Opening, &mut rng).1
        };
        let time_of_day = TimeOfDay::from_hour(self.clock.local_hour());
        let request = OutreachRequest {
            group_id: group_id.to_string(),
            conversation_ref: conversation_ref.to_string(),
            channel_ref: channel_ref.to_string(),
            template: template.to_string(),
            time_of_day,
            tier: TierContext {
                count: current,
                max,
                bucket: TierBucket::Opening,
                is_final: false,
            },
            prompt: prompt::compose(&self.policy.marker, template, Some(time_of_day), None),
            message_type: MessageType::Test,
        };
        tracing::info!("🧪 Sending test outreach to group {group_id}");
        self.sender.send(request).await
    }
}
