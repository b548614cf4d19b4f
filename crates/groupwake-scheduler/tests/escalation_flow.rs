//! End-to-end escalation scenarios driven by a manual clock and a recording
//! sender, with zero response delay so dispatches run right away.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use groupwake_core::error::Result;
use groupwake_core::traits::{Clock, ManualClock, OutreachRequest, OutreachSender};
use groupwake_core::types::{ActivityEvent, GroupActivityRecord, TierBucket};
use groupwake_scheduler::{
    ActivityOutcome, ActivityTracker, DelayScheduler, EscalationDispatcher, EscalationPolicy,
    GroupStore, InactivityScanner, JsonSnapshotStore, PersistenceService,
};

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<OutreachRequest>>,
}

impl RecordingSender {
    fn sent(&self) -> Vec<OutreachRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutreachSender for RecordingSender {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, request: OutreachRequest) -> Result<()> {
        self.sent.lock().unwrap().push(request);
        Ok(())
    }
}

struct Harness {
    groups: Arc<GroupStore>,
    clock: Arc<ManualClock>,
    sender: Arc<RecordingSender>,
    delays: Arc<DelayScheduler>,
    scanner: InactivityScanner,
    tracker: ActivityTracker,
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
}

fn harness(policy: EscalationPolicy) -> Harness {
    let groups = Arc::new(GroupStore::new());
    let clock = Arc::new(ManualClock::new(start_time(), 14));
    let sender = Arc::new(RecordingSender::default());
    let policy = Arc::new(policy);
    let delays = Arc::new(DelayScheduler::new());
    let dispatcher = Arc::new(EscalationDispatcher::new(
        groups.clone(),
        policy.clone(),
        sender.clone(),
        clock.clone(),
    ));
    let scanner = InactivityScanner::new(
        groups.clone(),
        policy,
        clock.clone(),
        delays.clone(),
        dispatcher,
    );
    let tracker = ActivityTracker::new(groups.clone(), clock.clone());
    Harness {
        groups,
        clock,
        sender,
        delays,
        scanner,
        tracker,
    }
}

fn immediate_policy() -> EscalationPolicy {
    let mut policy = EscalationPolicy::default();
    policy.max_response_delay = Duration::ZERO;
    policy
}

impl Harness {
    fn active(&self, group_id: &str) {
        self.tracker
            .on_activity(&ActivityEvent::genuine(group_id, "conv-1", "chan-1"));
    }

    fn count(&self, group_id: &str) -> u32 {
        self.groups
            .read_group(group_id, |e| e.escalation.consecutive_count)
            .unwrap_or(0)
    }

    fn last_active(&self, group_id: &str) -> Option<DateTime<Utc>> {
        self.groups
            .read_group(group_id, |e| e.activity.as_ref().map(|r| r.last_active_at))
            .flatten()
    }

    /// Wait for every scheduled dispatch to finish.
    async fn settle(&self) {
        for _ in 0..400 {
            if self.delays.pending() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("scheduled dispatches did not finish");
    }

    /// Advance past the inactivity threshold, scan, and wait for the result.
    async fn silent_round(&self) -> usize {
        self.clock.advance(chrono::Duration::minutes(121));
        let report = self.scanner.scan_once();
        self.settle().await;
        report.scheduled.len()
    }
}

#[tokio::test]
async fn inactive_group_gets_one_outreach_and_is_rearmed() {
    let h = harness(immediate_policy());
    h.active("g1");

    assert_eq!(h.silent_round().await, 1);
    let sent = h.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].tier.count, 1);
    assert_eq!(sent[0].tier.bucket, TierBucket::Opening);
    assert!(sent[0].prompt.starts_with("[SYS_PROMPT]"));
    assert_eq!(h.count("g1"), 1);
    assert_eq!(h.last_active("g1"), Some(h.clock.now()));

    // Re-armed at send time, so an immediate rescan finds nothing to do.
    assert!(h.scanner.scan_once().scheduled.is_empty());
}

#[tokio::test]
async fn escalation_stops_at_the_limit_until_a_reply() {
    let h = harness(immediate_policy());
    h.active("g1");

    for expected in 1..=3 {
        assert_eq!(h.silent_round().await, 1);
        assert_eq!(h.count("g1"), expected);
    }
    let buckets: Vec<TierBucket> = h.sender.sent().iter().map(|r| r.tier.bucket).collect();
    assert_eq!(buckets, vec![TierBucket::Opening, TierBucket::Mid, TierBucket::Final]);
    assert!(h.sender.sent()[2].tier.is_final);
    assert_eq!(h.last_active("g1"), None);

    // Terminal: no amount of silence schedules anything.
    for _ in 0..3 {
        assert_eq!(h.silent_round().await, 0);
    }
    assert_eq!(h.sender.sent().len(), 3);

    h.active("g1");
    assert_eq!(h.count("g1"), 0);
    assert_eq!(h.silent_round().await, 1);
    assert_eq!(h.count("g1"), 1);
}

#[tokio::test]
async fn own_outreach_echo_does_not_reset() {
    let h = harness(immediate_policy());
    h.active("g1");
    h.silent_round().await;
    assert_eq!(h.count("g1"), 1);

    let echo = ActivityEvent::from_text("g1", "conv-1", "chan-1", "[SYS_PROMPT] anyone around?", "[SYS_PROMPT]");
    assert_eq!(h.tracker.on_activity(&echo), ActivityOutcome::Ignored);
    assert_eq!(h.count("g1"), 1);

    let reply = ActivityEvent::from_text("g1", "conv-1", "chan-1", "hi!", "[SYS_PROMPT]");
    assert_eq!(h.tracker.on_activity(&reply), ActivityOutcome::Reset { previous: 1 });
    assert_eq!(h.count("g1"), 0);
}

#[tokio::test]
async fn closed_window_and_whitelist_block_outreach() {
    let mut policy = immediate_policy();
    policy.whitelist.enabled = true;
    policy.whitelist.allowed_group_ids.insert("listed".into());
    let h = harness(policy);
    h.active("listed");
    h.active("unlisted");

    h.clock.set_local_hour(2);
    let before = h.groups.snapshot();
    assert_eq!(h.silent_round().await, 0);
    assert_eq!(h.groups.snapshot().escalation, before.escalation);
    assert!(h.sender.sent().is_empty());

    h.clock.set_local_hour(14);
    assert_eq!(h.silent_round().await, 1);
    let sent = h.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].group_id, "listed");
    assert_eq!(h.count("unlisted"), 0);
}

#[tokio::test]
async fn reply_during_delay_cancels_pending_outreach() {
    let mut policy = EscalationPolicy::default();
    policy.max_response_delay = Duration::from_millis(300);
    let h = harness(policy);
    h.active("g1");
    h.clock.advance(chrono::Duration::minutes(121));

    // The reply lands before the scheduled task gets to run.
    assert_eq!(h.scanner.scan_once().scheduled.len(), 1);
    h.active("g1");
    h.settle().await;

    assert!(h.sender.sent().is_empty());
    assert_eq!(h.count("g1"), 0);
    assert!(h.last_active("g1").is_some());
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("groupwake-flow-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[tokio::test]
async fn progress_survives_restart() {
    let dir = temp_dir("restart");
    let h = harness(immediate_policy());
    h.active("g1");
    h.active("g2");
    h.silent_round().await;
    let sent_at = h.clock.now();
    assert_eq!(h.count("g1"), 1);

    let first = PersistenceService::new(
        Arc::new(JsonSnapshotStore::new(&dir)),
        h.groups.clone(),
        Duration::from_secs(300),
    );
    first.flush().await.unwrap();

    let restored = Arc::new(GroupStore::new());
    let second = PersistenceService::new(
        Arc::new(JsonSnapshotStore::new(&dir)),
        restored.clone(),
        Duration::from_secs(300),
    );
    assert_eq!(second.restore(), 2);
    assert_eq!(restored.snapshot(), h.groups.snapshot());
    let record: Option<GroupActivityRecord> = restored.read_group("g1", |e| e.activity.clone()).flatten();
    assert_eq!(record.map(|r| r.last_active_at), Some(sent_at));
    assert_eq!(restored.read_group("g2", |e| e.escalation.consecutive_count), Some(1));

    let _ = std::fs::remove_dir_all(&dir);
}
