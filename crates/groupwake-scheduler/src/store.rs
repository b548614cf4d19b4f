//! In-memory group state: the activity store and the escalation store.
//!
//! Each group lives behind its own mutex so unrelated groups never contend.
//! The outer map lock is only held long enough to find or insert an entry,
//! and no lock here is ever held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use groupwake_core::types::{
    EscalationState, GroupActivityRecord, GroupProbe, OutreachRecord, Snapshot,
};

/// Everything tracked for one group.
#[derive(Debug, Default, Clone)]
pub struct GroupEntry {
    /// Present = eligible for the next scan.
    pub activity: Option<GroupActivityRecord>,
    pub escalation: EscalationState,
    pub last_outreach: Option<OutreachRecord>,
    /// Bumped on every genuine activity event.
    pub activity_epoch: u64,
    /// Record handed to the delay scheduler, kept until the dispatch settles.
    pub pending: Option<GroupActivityRecord>,
    /// A dispatch is currently talking to the outreach sender.
    pub sending: bool,
}

impl GroupEntry {
    pub fn dispatch_pending(&self) -> bool {
        self.pending.is_some() || self.sending
    }
}

pub type SharedEntry = Arc<Mutex<GroupEntry>>;

/// Lock a group entry, recovering from a poisoned mutex.
pub fn lock_entry(entry: &SharedEntry) -> MutexGuard<'_, GroupEntry> {
    entry.lock().unwrap_or_else(|e| e.into_inner())
}

/// All tracked groups.
#[derive(Debug, Default)]
pub struct GroupStore {
    groups: RwLock<HashMap<String, SharedEntry>>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a group's entry, creating an empty one if needed.
    pub fn entry(&self, group_id: &str) -> SharedEntry {
        if let Some(entry) = self.get(group_id) {
            return entry;
        }
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        groups
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(GroupEntry::default())))
            .clone()
    }

    pub fn get(&self, group_id: &str) -> Option<SharedEntry> {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        groups.get(group_id).cloned()
    }

    /// Run `f` against a group's entry under its lock.
    pub fn with_group<R>(&self, group_id: &str, f: impl FnOnce(&mut GroupEntry) -> R) -> R {
        let entry = self.entry(group_id);
        let mut guard = lock_entry(&entry);
        f(&mut guard)
    }

    /// Read a group without creating it.
    pub fn read_group<R>(&self, group_id: &str, f: impl FnOnce(&GroupEntry) -> R) -> Option<R> {
        let entry = self.get(group_id)?;
        let guard = lock_entry(&entry);
        Some(f(&guard))
    }

    /// Stable, sorted list of entries; later inserts do not affect it.
    pub fn entries(&self) -> Vec<(String, SharedEntry)> {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<(String, SharedEntry)> = groups
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.groups.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of groups currently eligible for scanning.
    pub fn monitored_count(&self) -> usize {
        self.entries()
            .iter()
            .filter(|(_, entry)| lock_entry(entry).activity.is_some())
            .count()
    }

    /// Capture both stores for persistence.
    ///
    /// A group whose dispatch has not settled yet is written with the record
    /// it was scheduled from, so a restart re-evaluates it instead of
    /// dropping it.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for (id, entry) in self.entries() {
            let guard = lock_entry(&entry);
            if let Some(record) = guard.activity.as_ref().or(guard.pending.as_ref()) {
                snapshot.activity.insert(id.clone(), record.clone());
            }
            if guard.escalation.consecutive_count > 0 || guard.escalation.tier.is_some() {
                snapshot.escalation.insert(id.clone(), guard.escalation.clone());
            }
            if let Some(outreach) = &guard.last_outreach {
                snapshot.last_outreach.insert(id, outreach.clone());
            }
        }
        snapshot
    }

    /// Replace in-memory state with a loaded snapshot.
    pub fn restore(&self, snapshot: Snapshot) {
        let Snapshot {
            activity,
            escalation,
            last_outreach,
        } = snapshot;

        let mut rebuilt: HashMap<String, GroupEntry> = HashMap::new();
        for (id, record) in activity {
            rebuilt.entry(id).or_default().activity = Some(record);
        }
        for (id, state) in escalation {
            rebuilt.entry(id).or_default().escalation = state;
        }
        for (id, outreach) in last_outreach {
            rebuilt.entry(id).or_default().last_outreach = Some(outreach);
        }

        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        groups.clear();
        for (id, entry) in rebuilt {
            groups.insert(id, Arc::new(Mutex::new(entry)));
        }
    }

    /// Per-group operational view, sorted by group id.
    pub fn probe(&self) -> Vec<GroupProbe> {
        self.entries()
            .into_iter()
            .map(|(id, entry)| {
                let guard = lock_entry(&entry);
                GroupProbe {
                    group_id: id,
                    last_active_at: guard.activity.as_ref().map(|r| r.last_active_at),
                    consecutive_count: guard.escalation.consecutive_count,
                    last_outreach_at: guard.last_outreach.as_ref().map(|o| o.sent_at),
                    dispatch_pending: guard.dispatch_pending(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use groupwake_core::types::{TierMetadata, TimeOfDay};

    fn record(hour: u32) -> GroupActivityRecord {
        GroupActivityRecord::new(
            Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
            "conv",
            "chan",
        )
    }

    #[test]
    fn test_entry_created_once() {
        let store = GroupStore::new();
        let a = store.entry("g1");
        let b = store.entry("g1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
        assert!(store.read_group("missing", |_| ()).is_none());
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let store = GroupStore::new();
        store.with_group("g1", |g| g.activity = Some(record(10)));
        store.with_group("g2", |g| {
            g.escalation = EscalationState {
                consecutive_count: 3,
                tier: Some(TierMetadata {
                    tier_index: 8,
                    time_of_day: TimeOfDay::Afternoon,
                    sent_at: record(15).last_active_at,
                }),
            };
            g.last_outreach = Some(OutreachRecord {
                sent_at: record(15).last_active_at,
                conversation_ref: "conv".into(),
                channel_ref: "chan".into(),
            });
        });

        let snapshot = store.snapshot();
        let restored = GroupStore::new();
        restored.restore(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(snapshot.awaiting_reply(), vec!["g2".to_string()]);
    }

    #[test]
    fn test_pending_dispatch_is_persisted_as_activity() {
        let store = GroupStore::new();
        store.with_group("g1", |g| g.pending = Some(record(9)));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.activity.get("g1"), Some(&record(9)));

        let probe = store.probe();
        assert_eq!(probe.len(), 1);
        assert!(probe[0].dispatch_pending);
        assert!(probe[0].last_active_at.is_none());
        assert_eq!(store.monitored_count(), 0);
    }

    #[test]
    fn test_entries_are_a_stable_copy() {
        let store = GroupStore::new();
        store.entry("b");
        store.entry("a");
        let entries = store.entries();
        store.entry("c");
        let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
