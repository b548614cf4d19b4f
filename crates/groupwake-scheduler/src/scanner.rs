//! Inactivity scanner: the periodic loop that decides which groups need
//! outreach and hands them to the delay scheduler.
//! Uses tokio::interval so it sleeps between ticks.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, TryLockError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use groupwake_core::error::{GroupWakeError, Result};
use groupwake_core::traits::Clock;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::delay::DelayScheduler;
use crate::dispatch::{DispatchJob, EscalationDispatcher};
use crate::policy::EscalationPolicy;
use crate::store::{GroupStore, SharedEntry};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// The tick fell outside the activity window and did nothing.
    pub window_closed: bool,
    pub evaluated: usize,
    pub scheduled: Vec<String>,
    pub errors: usize,
}

/// Periodic inactivity evaluation.
pub struct InactivityScanner {
    groups: Arc<GroupStore>,
    policy: Arc<EscalationPolicy>,
    clock: Arc<dyn Clock>,
    delays: Arc<DelayScheduler>,
    dispatcher: Arc<EscalationDispatcher>,
    ticks: AtomicU64,
}

impl InactivityScanner {
    pub fn new(
        groups: Arc<GroupStore>,
        policy: Arc<EscalationPolicy>,
        clock: Arc<dyn Clock>,
        delays: Arc<DelayScheduler>,
        dispatcher: Arc<EscalationDispatcher>,
    ) -> Self {
        Self {
            groups,
            policy,
            clock,
            delays,
            dispatcher,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Evaluate every tracked group once.
    pub fn scan_once(&self) -> ScanReport {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let mut report = ScanReport::default();

        let hour = self.clock.local_hour();
        if !self.policy.time_window.allows(hour) {
            tracing::debug!(
                "Hour {hour} outside activity window [{}, {}), skipping scan",
                self.policy.time_window.start_hour,
                self.policy.time_window.end_hour
            );
            report.window_closed = true;
            return report;
        }

        let now = self.clock.now();
        for (group_id, entry) in self.groups.entries() {
            report.evaluated += 1;
            let job = match self.evaluate(&group_id, &entry, now) {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping group {group_id}: {e}");
                    report.errors += 1;
                    continue;
                }
            };
            match self.hand_off(job, now) {
                Ok(delay) => {
                    tracing::info!(
                        "⏳ Group {group_id} inactive, outreach scheduled in {}s",
                        delay.as_secs()
                    );
                    report.scheduled.push(group_id);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Could not schedule outreach for group {group_id}: {e}");
                    report.errors += 1;
                }
            }
        }
        report
    }

    /// Decide whether a group is due. When it is, its activity record moves
    /// to `pending` so no later tick schedules the same silence again.
    fn evaluate(
        &self,
        group_id: &str,
        entry: &SharedEntry,
        now: DateTime<Utc>,
    ) -> Result<Option<DispatchJob>> {
        if !self.policy.whitelist.allows(group_id) {
            return Ok(None);
        }

        let mut guard = match entry.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("Group {group_id} busy, evaluating next tick");
                return Ok(None);
            }
        };

        if guard.dispatch_pending() {
            return Ok(None);
        }
        let count = guard.escalation.consecutive_count;
        if guard.escalation.is_terminal(self.policy.max_consecutive_messages) {
            tracing::debug!(
                "Group {group_id} reached max consecutive outreach {}, skipping",
                self.policy.max_consecutive_messages
            );
            return Ok(None);
        }
        let Some(record) = guard.activity.as_ref() else {
            return Ok(None);
        };
        if record.conversation_ref.is_empty() && record.channel_ref.is_empty() {
            return Err(GroupWakeError::Group {
                group_id: group_id.to_string(),
                reason: "activity record has no conversation or channel reference".into(),
            });
        }
        if !self.policy.is_inactive(record.last_active_at, now) {
            return Ok(None);
        }

        let Some(record) = guard.activity.take() else {
            return Ok(None);
        };
        let job = DispatchJob {
            group_id: group_id.to_string(),
            conversation_ref: record.conversation_ref.clone(),
            channel_ref: record.channel_ref.clone(),
            expected_count: count,
            activity_epoch: guard.activity_epoch,
        };
        guard.pending = Some(record);
        tracing::info!("Group {group_id} at count {count}, preparing outreach");
        Ok(Some(job))
    }

    /// Submit a job to the delay scheduler. On rejection the group goes back
    /// to being monitored.
    fn hand_off(&self, job: DispatchJob, now: DateTime<Utc>) -> Result<Duration> {
        let group_id = job.group_id.clone();
        let task_id = format!("group_initiative_{}_{}", group_id, now.timestamp());
        let dispatcher = self.dispatcher.clone();
        let groups = self.groups.clone();
        let work_group = group_id.clone();

        let work = async move {
            let result = AssertUnwindSafe(dispatcher.dispatch(job)).catch_unwind().await;
            match result {
                Ok(outcome) => tracing::debug!("Dispatch for group {work_group} finished: {outcome:?}"),
                Err(_) => {
                    tracing::error!("❌ Dispatch for group {work_group} panicked");
                    groups.with_group(&work_group, |entry| {
                        entry.sending = false;
                        entry.pending = None;
                    });
                }
            }
        };

        let range = Duration::ZERO..=self.policy.max_response_delay;
        self.delays.schedule(&task_id, range, work).inspect_err(|_| {
            self.groups.with_group(&group_id, |entry| {
                if entry.activity.is_none() {
                    entry.activity = entry.pending.take();
                } else {
                    entry.pending = None;
                }
            });
        })
    }

    /// Tick until shutdown is signalled. Individual tick failures are logged
    /// and the loop keeps going.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Inactivity scanner started (check every {}s, threshold {}s)",
            self.policy.scan_interval.as_secs(),
            self.policy.inactive_time.as_secs()
        );
        let mut interval = tokio::time::interval(self.policy.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match std::panic::catch_unwind(AssertUnwindSafe(|| self.scan_once())) {
                        Ok(report) if !report.scheduled.is_empty() => {
                            tracing::debug!("Scan scheduled outreach for {:?}", report.scheduled);
                        }
                        Ok(_) => {}
                        Err(_) => tracing::error!("❌ Inactivity scan panicked, continuing"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("⏹️ Inactivity scanner stopped");
    }
}
