//! Snapshot persistence: JSON file store plus the flush service.
//!
//! The file is human-readable and written atomically (temp file + rename).
//! Loading is lenient: a broken field degrades to a safe default instead of
//! discarding the whole snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use groupwake_core::error::{GroupWakeError, Result};
use groupwake_core::traits::SnapshotStore;
use groupwake_core::types::{
    EscalationState, GroupActivityRecord, OutreachRecord, Snapshot, TierMetadata, TimeOfDay,
};
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, Notify, watch};

use crate::store::GroupStore;

pub const SNAPSHOT_FILE: &str = "group_dialogue_storage.json";
const SNAPSHOT_VERSION: u64 = 1;

/// File-based snapshot store.
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    /// Create a store writing `group_dialogue_storage.json` inside `dir`.
    pub fn new(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).ok();
        Self {
            path: dir.join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn name(&self) -> &str {
        "json-file"
    }

    fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Ok(Snapshot::default());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&text)?;
        Ok(decode_snapshot(&value, Utc::now()))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&encode_snapshot(snapshot))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(
            "💾 Saved {} groups to {}",
            snapshot.activity.len().max(snapshot.escalation.len()),
            self.path.display()
        );
        Ok(())
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn record_json(ts: &DateTime<Utc>, conversation_ref: &str, channel_ref: &str) -> Value {
    json!({
        "timestamp": format_timestamp(ts),
        "conversation_ref": conversation_ref,
        "channel_ref": channel_ref,
    })
}

/// Serialize a snapshot into its on-disk JSON layout.
pub fn encode_snapshot(snapshot: &Snapshot) -> Value {
    let mut group_records = Map::new();
    for (id, record) in &snapshot.activity {
        group_records.insert(
            id.clone(),
            record_json(&record.last_active_at, &record.conversation_ref, &record.channel_ref),
        );
    }

    let mut last_outreach = Map::new();
    for (id, outreach) in &snapshot.last_outreach {
        last_outreach.insert(
            id.clone(),
            record_json(&outreach.sent_at, &outreach.conversation_ref, &outreach.channel_ref),
        );
    }

    let mut escalation = Map::new();
    for (id, state) in &snapshot.escalation {
        let mut entry = Map::new();
        entry.insert("count".into(), json!(state.consecutive_count));
        if let Some(tier) = &state.tier {
            entry.insert("tier_index".into(), json!(tier.tier_index));
            entry.insert("time_period".into(), json!(tier.time_of_day.label()));
            entry.insert("timestamp".into(), json!(format_timestamp(&tier.sent_at)));
        }
        escalation.insert(id.clone(), Value::Object(entry));
    }

    json!({
        "version": SNAPSHOT_VERSION,
        "group_records": group_records,
        "last_outreach": last_outreach,
        "escalation": escalation,
        "awaiting_reply": snapshot.awaiting_reply(),
    })
}

/// Parse a stored timestamp. RFC 3339 is the native format; naive ISO
/// timestamps are read as local time. Anything else becomes `now`.
pub fn parse_timestamp(value: Option<&Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(text) = value.and_then(Value::as_str) else {
        tracing::warn!("⚠️ Missing timestamp in snapshot, using now");
        return now;
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return ts.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        if let Some(local) = Local.from_local_datetime(&naive).earliest() {
            return local.with_timezone(&Utc);
        }
    }
    tracing::warn!("⚠️ Unparsable timestamp '{text}' in snapshot, using now");
    now
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn objects<'a>(value: &'a Value, key: &str) -> Vec<(&'a String, &'a Map<String, Value>)> {
    let Some(section) = value.get(key) else {
        return Vec::new();
    };
    let Some(map) = section.as_object() else {
        tracing::warn!("⚠️ Snapshot section '{key}' is not an object, ignoring it");
        return Vec::new();
    };
    map.iter()
        .filter_map(|(id, entry)| match entry.as_object() {
            Some(obj) => Some((id, obj)),
            None => {
                tracing::warn!("⚠️ Skipping malformed '{key}' entry for group {id}");
                None
            }
        })
        .collect()
}

/// Decode the on-disk layout, degrading bad fields to defaults.
pub fn decode_snapshot(value: &Value, now: DateTime<Utc>) -> Snapshot {
    let mut snapshot = Snapshot::default();

    for (id, obj) in objects(value, "group_records") {
        snapshot.activity.insert(
            id.clone(),
            GroupActivityRecord {
                last_active_at: parse_timestamp(obj.get("timestamp"), now),
                conversation_ref: string_field(obj, "conversation_ref"),
                channel_ref: string_field(obj, "channel_ref"),
            },
        );
    }

    for (id, obj) in objects(value, "last_outreach") {
        snapshot.last_outreach.insert(
            id.clone(),
            OutreachRecord {
                sent_at: parse_timestamp(obj.get("timestamp"), now),
                conversation_ref: string_field(obj, "conversation_ref"),
                channel_ref: string_field(obj, "channel_ref"),
            },
        );
    }

    for (id, obj) in objects(value, "escalation") {
        let consecutive_count = match obj.get("count").and_then(Value::as_u64) {
            Some(count) => u32::try_from(count).unwrap_or(u32::MAX),
            None => {
                tracing::warn!("⚠️ Group {id} has no valid escalation count, using 0");
                0
            }
        };
        let tier = obj
            .get("tier_index")
            .and_then(Value::as_u64)
            .map(|tier_index| TierMetadata {
                tier_index: tier_index as usize,
                time_of_day: obj
                    .get("time_period")
                    .and_then(Value::as_str)
                    .and_then(TimeOfDay::from_label)
                    .unwrap_or(TimeOfDay::LateNight),
                sent_at: parse_timestamp(obj.get("timestamp"), now),
            });
        snapshot
            .escalation
            .insert(id.clone(), EscalationState { consecutive_count, tier });
    }

    snapshot
}

/// Serializes snapshot writes and drives periodic/eager flushes.
pub struct PersistenceService {
    store: Arc<dyn SnapshotStore>,
    groups: Arc<GroupStore>,
    interval: Duration,
    write_lock: Mutex<()>,
    wake: Notify,
    saves: AtomicU64,
    failures: AtomicU64,
}

impl PersistenceService {
    pub fn new(store: Arc<dyn SnapshotStore>, groups: Arc<GroupStore>, interval: Duration) -> Self {
        Self {
            store,
            groups,
            interval,
            write_lock: Mutex::new(()),
            wake: Notify::new(),
            saves: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Load the saved snapshot into the group store.
    /// A failed load starts cold with empty state.
    pub fn restore(&self) -> usize {
        match self.store.load() {
            Ok(snapshot) => {
                let groups = snapshot.activity.len();
                let escalations = snapshot.escalation.len();
                self.groups.restore(snapshot);
                tracing::info!(
                    "📂 Restored {} monitored groups, {} escalation states from {}",
                    groups,
                    escalations,
                    self.store.name()
                );
                self.groups.len()
            }
            Err(e) => {
                tracing::error!(
                    "❌ Failed to load snapshot from {}: {e}. Starting with empty state.",
                    self.store.name()
                );
                self.groups.restore(Snapshot::default());
                0
            }
        }
    }

    /// Write the current state. Concurrent callers are serialized.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.groups.snapshot();
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|e| GroupWakeError::Persistence(format!("Save task failed: {e}")))
            .and_then(|r| r);
        match &result {
            Ok(()) => {
                self.saves.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("⚠️ Failed to save snapshot: {e}");
            }
        }
        result
    }

    /// Ask the flush loop to save soon. Repeated requests coalesce.
    pub fn request_flush(&self) {
        self.wake.notify_one();
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Flush on the configured interval and whenever a flush is requested,
    /// until shutdown is signalled. The final flush belongs to the owner.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("💾 Persistence loop started (every {}s)", self.interval.as_secs());
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = self.flush().await;
                }
                _ = self.wake.notified() => {
                    let _ = self.flush().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("💾 Persistence loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("groupwake-test-{name}-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    fn sample_snapshot() -> Snapshot {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 15).unwrap()
            + chrono::Duration::microseconds(123_456);
        let mut snapshot = Snapshot::default();
        snapshot
            .activity
            .insert("g1".into(), GroupActivityRecord::new(t, "conv-1", "qq:group:g1"));
        snapshot.escalation.insert(
            "g2".into(),
            EscalationState {
                consecutive_count: 2,
                tier: Some(TierMetadata {
                    tier_index: 5,
                    time_of_day: TimeOfDay::Lunch,
                    sent_at: t,
                }),
            },
        );
        snapshot.last_outreach.insert(
            "g2".into(),
            OutreachRecord {
                sent_at: t,
                conversation_ref: "conv-2".into(),
                channel_ref: "qq:group:g2".into(),
            },
        );
        snapshot
    }

    #[test]
    fn test_file_roundtrip_preserves_subsecond_timestamps() {
        let dir = temp_dir("roundtrip");
        let store = JsonSnapshotStore::new(&dir);
        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(!dir.join("group_dialogue_storage.json.tmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_empty_snapshot() {
        let dir = temp_dir("missing");
        let store = JsonSnapshotStore::new(&dir);
        assert!(store.load().unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_encoded_layout_lists_awaiting_groups() {
        let value = encode_snapshot(&sample_snapshot());
        assert_eq!(value["version"], json!(1));
        assert_eq!(value["awaiting_reply"], json!(["g2"]));
        assert_eq!(value["escalation"]["g2"]["time_period"], json!("lunch"));
    }

    #[test]
    fn test_malformed_fields_degrade_to_defaults() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let value = json!({
            "group_records": {
                "bad-ts": {"timestamp": "yesterday", "conversation_ref": "c"},
                "no-ts": {"channel_ref": "ch"},
                "not-an-object": 42
            },
            "escalation": {
                "bad-count": {"count": "three"},
                "ok": {"count": 1, "tier_index": 2, "time_period": "sometime"}
            },
            "last_outreach": []
        });
        let snapshot = decode_snapshot(&value, now);
        assert_eq!(snapshot.activity.len(), 2);
        assert_eq!(snapshot.activity["bad-ts"].last_active_at, now);
        assert_eq!(snapshot.activity["bad-ts"].channel_ref, "");
        assert_eq!(snapshot.activity["no-ts"].channel_ref, "ch");
        assert_eq!(snapshot.escalation["bad-count"].consecutive_count, 0);
        let ok = &snapshot.escalation["ok"];
        assert_eq!(ok.consecutive_count, 1);
        let tier = ok.tier.as_ref().unwrap();
        assert_eq!(tier.time_of_day, TimeOfDay::LateNight);
        assert_eq!(tier.sent_at, now);
        assert!(snapshot.last_outreach.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = temp_dir("corrupt");
        let store = JsonSnapshotStore::new(&dir);
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(GroupWakeError::Serialization(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_service_restore_falls_back_to_cold_start() {
        let dir = temp_dir("cold");
        let store = JsonSnapshotStore::new(&dir);
        std::fs::write(store.path(), "[[[").unwrap();
        let groups = Arc::new(GroupStore::new());
        groups.entry("stale");
        let service = PersistenceService::new(Arc::new(store), groups.clone(), Duration::from_secs(300));
        assert_eq!(service.restore(), 0);
        assert!(groups.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_concurrent_flushes_leave_valid_file() {
        let dir = temp_dir("flush");
        let store = Arc::new(JsonSnapshotStore::new(&dir));
        let groups = Arc::new(GroupStore::new());
        groups.restore(sample_snapshot());
        let service = Arc::new(PersistenceService::new(
            store.clone(),
            groups,
            Duration::from_secs(300),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move { service.flush().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(service.save_count(), 8);
        assert_eq!(store.load().unwrap(), sample_snapshot());
        std::fs::remove_dir_all(&dir).ok();
    }

    struct ReadOnlyStore;

    impl SnapshotStore for ReadOnlyStore {
        fn name(&self) -> &str {
            "read-only"
        }

        fn load(&self) -> Result<Snapshot> {
            Ok(Snapshot::default())
        }

        fn save(&self, _snapshot: &Snapshot) -> Result<()> {
            Err(GroupWakeError::Persistence("disk is read-only".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_save_keeps_memory_state() {
        let groups = Arc::new(GroupStore::new());
        groups.with_group("g1", |e| e.escalation.consecutive_count = 1);
        let service = PersistenceService::new(Arc::new(ReadOnlyStore), groups.clone(), Duration::from_secs(300));

        assert!(matches!(service.flush().await, Err(GroupWakeError::Persistence(_))));
        assert_eq!(service.failure_count(), 1);
        assert_eq!(service.save_count(), 0);
        assert_eq!(groups.read_group("g1", |e| e.escalation.consecutive_count), Some(1));
    }

    #[tokio::test]
    async fn test_requested_flush_runs_before_interval() {
        let dir = temp_dir("eager");
        let groups = Arc::new(GroupStore::new());
        groups.restore(sample_snapshot());
        let service = Arc::new(PersistenceService::new(
            Arc::new(JsonSnapshotStore::new(&dir)),
            groups,
            Duration::from_secs(3600),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(service.clone().run(rx));

        service.request_flush();
        for _ in 0..100 {
            if service.save_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.save_count(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
