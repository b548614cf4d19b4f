//! # GroupWake Core
//!
//! Configuration, error types, the shared data model and the collaborator
//! traits (clock, outreach sender, snapshot store) used by the scheduler.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::GroupWakeConfig;
pub use error::{GroupWakeError, Result};
