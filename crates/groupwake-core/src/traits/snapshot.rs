//! Persistence gateway trait.

use crate::error::Result;
use crate::types::Snapshot;

/// Durable storage for the activity and escalation stores.
pub trait SnapshotStore: Send + Sync {
    fn name(&self) -> &str;

    /// Load the last saved snapshot. A missing snapshot is an empty one.
    fn load(&self) -> Result<Snapshot>;

    /// Replace the saved snapshot. Must never leave a partial write behind.
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}
