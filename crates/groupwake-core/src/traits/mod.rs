//! Collaborator boundaries the scheduler depends on.

pub mod clock;
pub mod outreach;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use outreach::{OutreachRequest, OutreachSender};
pub use snapshot::SnapshotStore;
