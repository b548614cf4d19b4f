//! GroupWake engine: owns every component and their background loops.
//!
//! ```text
//! on_activity ──▶ ActivityTracker ──▶ GroupStore ◀── PersistenceService (timer / notify)
//!                                        ▲   │
//!                  InactivityScanner ────┘   └──▶ DelayScheduler ──▶ EscalationDispatcher ──▶ OutreachSender
//! ```

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use groupwake_core::config::GroupWakeConfig;
use groupwake_core::error::Result;
use groupwake_core::traits::{Clock, OutreachSender, SnapshotStore};
use groupwake_core::types::{ActivityEvent, GroupProbe};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::activity::{ActivityOutcome, ActivityTracker};
use crate::delay::DelayScheduler;
use crate::dispatch::EscalationDispatcher;
use crate::persistence::PersistenceService;
use crate::policy::EscalationPolicy;
use crate::scanner::InactivityScanner;
use crate::store::GroupStore;

/// The assembled scheduler.
pub struct GroupWakeEngine {
    groups: Arc<GroupStore>,
    policy: Arc<EscalationPolicy>,
    persistence: Arc<PersistenceService>,
    delays: Arc<DelayScheduler>,
    dispatcher: Arc<EscalationDispatcher>,
    scanner: Arc<InactivityScanner>,
    tracker: ActivityTracker,
    shutdown_tx: watch::Sender<bool>,
    scanner_handle: Option<JoinHandle<()>>,
    persistence_handle: Option<JoinHandle<()>>,
}

impl GroupWakeEngine {
    pub fn new(
        config: &GroupWakeConfig,
        sender: Arc<dyn OutreachSender>,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let groups = Arc::new(GroupStore::new());
        let policy = Arc::new(EscalationPolicy::from_config(config));
        let persistence = Arc::new(PersistenceService::new(
            store,
            groups.clone(),
            Duration::from_secs(config.persistence.save_interval_seconds),
        ));
        let delays = Arc::new(DelayScheduler::new());
        let dispatcher = Arc::new(
            EscalationDispatcher::new(groups.clone(), policy.clone(), sender, clock.clone())
                .with_persistence(persistence.clone()),
        );
        let scanner = Arc::new(InactivityScanner::new(
            groups.clone(),
            policy.clone(),
            clock.clone(),
            delays.clone(),
            dispatcher.clone(),
        ));
        let tracker =
            ActivityTracker::new(groups.clone(), clock).with_persistence(persistence.clone());
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            groups,
            policy,
            persistence,
            delays,
            dispatcher,
            scanner,
            tracker,
            shutdown_tx,
            scanner_handle: None,
            persistence_handle: None,
        }
    }

    /// Load the persisted snapshot. Returns the number of groups restored.
    pub fn restore(&self) -> usize {
        self.persistence.restore()
    }

    /// Spawn the scanner and persistence loops. Calling twice is a no-op.
    pub fn start(&mut self) {
        if self.scanner_handle.is_some() {
            tracing::warn!("⚠️ GroupWake engine already started");
            return;
        }
        self.scanner_handle = Some(tokio::spawn(
            self.scanner.clone().run(self.shutdown_tx.subscribe()),
        ));
        self.persistence_handle = Some(tokio::spawn(
            self.persistence.clone().run(self.shutdown_tx.subscribe()),
        ));
        tracing::info!(
            "🚀 GroupWake engine started: {} groups tracked, max {} outreach per silence",
            self.groups.len(),
            self.policy.max_consecutive_messages
        );
    }

    pub fn on_activity(&self, event: &ActivityEvent) -> ActivityOutcome {
        self.tracker.on_activity(event)
    }

    pub fn probe(&self) -> Vec<GroupProbe> {
        self.groups.probe()
    }

    /// Human readable per-group table.
    pub fn format_probe(&self) -> String {
        format_probe_table(&self.probe(), self.policy.max_consecutive_messages)
    }

    /// Manual test outreach. Escalation state is left untouched.
    pub async fn send_test(
        &self,
        group_id: &str,
        conversation_ref: &str,
        channel_ref: &str,
    ) -> Result<()> {
        self.dispatcher
            .send_test(group_id, conversation_ref, channel_ref)
            .await
    }

    /// Write the current state now.
    pub async fn flush(&self) -> Result<()> {
        self.persistence.flush().await
    }

    /// Graceful shutdown: stop the loops, let in-flight dispatches finish,
    /// then write the final snapshot.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("🛑 GroupWake engine shutting down");
        self.shutdown_tx.send_replace(true);

        if let Some(handle) = self.scanner_handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("❌ Scanner task ended abnormally: {e}");
            }
        }
        self.delays.shutdown(true).await;

        let flushed = self.persistence.flush().await;
        if let Some(handle) = self.persistence_handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("❌ Persistence task ended abnormally: {e}");
            }
        }

        let stats = self.delays.stats();
        tracing::info!(
            "📊 Final state: {} groups, {} monitored, {} awaiting reply; {} outreach scheduled, {} ran, {} dropped",
            self.groups.len(),
            self.groups.monitored_count(),
            self.groups.snapshot().awaiting_reply().len(),
            stats.scheduled,
            stats.executed,
            stats.dropped
        );
        tracing::info!(
            "💾 Snapshot saves: {} ok, {} failed",
            self.persistence.save_count(),
            self.persistence.failure_count()
        );
        flushed
    }
}

/// Render probes as an aligned text table.
pub fn format_probe_table(probes: &[GroupProbe], max_consecutive: u32) -> String {
    if probes.is_empty() {
        return "No groups tracked.".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:<26} {:>7} {:<26} {}",
        "GROUP", "LAST ACTIVE", "COUNT", "LAST OUTREACH", "STATE"
    );
    for probe in probes {
        let last_active = probe
            .last_active_at
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_else(|| "-".into());
        let last_outreach = probe
            .last_outreach_at
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_else(|| "-".into());
        let state = if probe.dispatch_pending {
            "scheduled"
        } else if probe.consecutive_count >= max_consecutive {
            "terminal"
        } else if probe.last_active_at.is_some() {
            "monitoring"
        } else {
            "idle"
        };
        let _ = writeln!(
            out,
            "{:<24} {:<26} {:>7} {:<26} {}",
            probe.group_id,
            last_active,
            format!("{}/{}", probe.consecutive_count, max_consecutive),
            last_outreach,
            state
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outreach::LogSender;
    use crate::persistence::JsonSnapshotStore;
    use chrono::{TimeZone, Utc};
    use groupwake_core::traits::ManualClock;
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("groupwake-engine-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn engine(dir: &std::path::Path) -> GroupWakeEngine {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap(),
            14,
        ));
        GroupWakeEngine::new(
            &GroupWakeConfig::default(),
            Arc::new(LogSender),
            Arc::new(JsonSnapshotStore::new(dir)),
            clock,
        )
    }

    #[tokio::test]
    async fn test_shutdown_persists_activity() {
        let dir = temp_dir("persist");
        let mut first = engine(&dir);
        first.restore();
        first.start();
        first.on_activity(&ActivityEvent::genuine("g1", "conv", "chan"));
        first.shutdown().await.unwrap();

        let second = engine(&dir);
        assert_eq!(second.restore(), 1);
        let probes = second.probe();
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].group_id, "g1");
        assert!(probes[0].last_active_at.is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_send_test_leaves_state_alone() {
        let dir = temp_dir("test-send");
        let engine = engine(&dir);
        engine.on_activity(&ActivityEvent::genuine("g1", "conv", "chan"));
        let before = engine.probe();
        engine.send_test("g1", "conv", "chan").await.unwrap();
        assert_eq!(engine.probe(), before);
    }

    #[test]
    fn test_format_probe_table() {
        assert_eq!(format_probe_table(&[], 3), "No groups tracked.");
        let probes = vec![
            GroupProbe {
                group_id: "alpha".into(),
                last_active_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()),
                consecutive_count: 1,
                last_outreach_at: None,
                dispatch_pending: false,
            },
            GroupProbe {
                group_id: "beta".into(),
                last_active_at: None,
                consecutive_count: 3,
                last_outreach_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
                dispatch_pending: false,
            },
        ];
        let table = format_probe_table(&probes, 3);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("alpha"));
        assert!(lines[1].contains("1/3"));
        assert!(lines[1].ends_with("monitoring"));
        assert!(lines[2].contains("2026-03-01T12:00:00Z"));
        assert!(lines[2].ends_with("terminal"));
    }
}
