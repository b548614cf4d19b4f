//! # GroupWake Scheduler
//!
//! Inactivity-escalation scheduler for group chats: notices when a group has
//! gone quiet and sends a bounded series of increasingly reluctant proactive
//! messages, stopping as soon as a human replies.
//!
//! ## Design Principles
//! - No external services, state is a single JSON snapshot
//! - Tokio timers only, idle between scans
//! - Per-group locks, never held across an await
//! - A failed send never advances the escalation counter
//!
//! ## Architecture
//! ```text
//! InactivityScanner (tokio interval, time window + whitelist)
//!   ├── group silent ≥ inactive_time → DelayScheduler (random 0..max delay)
//!   │      └── EscalationDispatcher
//!   │             ├── tier bucket → template → prompt (marker-tagged)
//!   │             ├── OutreachSender (webhook / log)
//!   │             └── commit: count+1, re-arm or go terminal
//!   └── group terminal / scheduled → skipped
//!
//! ActivityTracker
//!   └── genuine message → refresh record, reset count to 0
//!
//! PersistenceService
//!   └── JSON snapshot on timer, on request, and at shutdown
//! ```

pub mod activity;
pub mod delay;
pub mod dispatch;
pub mod engine;
pub mod outreach;
pub mod persistence;
pub mod policy;
pub mod prompt;
pub mod scanner;
pub mod store;
pub mod tiers;

pub use activity::{ActivityOutcome, ActivityTracker};
pub use delay::{DelayScheduler, DelayStatsSnapshot};
pub use dispatch::{DispatchJob, DispatchOutcome, EscalationDispatcher};
pub use engine::GroupWakeEngine;
pub use outreach::{LogSender, WebhookSender, sender_from_config};
pub use persistence::{JsonSnapshotStore, PersistenceService};
pub use policy::{EscalationPolicy, TimeWindowPolicy, WhitelistPolicy};
pub use scanner::{InactivityScanner, ScanReport};
pub use store::GroupStore;
