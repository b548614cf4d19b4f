//! Error types shared by every GroupWake crate.

use thiserror::Error;

/// Unified error type.
#[derive(Debug, Error)]
pub enum GroupWakeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Outreach error: {0}")]
    Outreach(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Group {group_id}: {reason}")]
    Group { group_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, GroupWakeError>;
