//! GroupWake configuration system.
//!
//! Loaded once at startup and shared as an immutable snapshot.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{GroupWakeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupWakeConfig {
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub time_window: TimeWindowConfig,
    #[serde(default)]
    pub whitelist: WhitelistConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub outreach: OutreachConfig,
}

impl GroupWakeConfig {
    /// Load config from the default path (~/.groupwake/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GroupWakeError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GroupWakeError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| GroupWakeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        let window = &self.time_window;
        if window.start_hour > 23 || window.end_hour > 23 {
            return Err(GroupWakeError::Config(format!(
                "time_window hours must be within 0..=23 (got {}..{})",
                window.start_hour, window.end_hour
            )));
        }
        if window.enabled && window.start_hour >= window.end_hour {
            return Err(GroupWakeError::Config(format!(
                "time_window start_hour must be before end_hour (got {}..{}), the window would never open",
                window.start_hour, window.end_hour
            )));
        }
        if self.escalation.max_consecutive_messages == 0 {
            return Err(GroupWakeError::Config(
                "escalation.max_consecutive_messages must be at least 1".into(),
            ));
        }
        if self.escalation.scan_interval_seconds == 0 {
            return Err(GroupWakeError::Config(
                "escalation.scan_interval_seconds must be at least 1".into(),
            ));
        }
        if self.persistence.save_interval_seconds == 0 {
            return Err(GroupWakeError::Config(
                "persistence.save_interval_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the GroupWake home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".groupwake")
    }
}

/// Inactivity and escalation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Silence required before a group becomes eligible.
    #[serde(default = "default_inactive_time")]
    pub inactive_time_seconds: u64,
    /// Upper bound of the random delay between decision and send.
    #[serde(default = "default_max_response_delay")]
    pub max_response_delay_seconds: u64,
    #[serde(default = "default_max_consecutive")]
    pub max_consecutive_messages: u32,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,
}

fn default_inactive_time() -> u64 { 7200 }
fn default_max_response_delay() -> u64 { 3600 }
fn default_max_consecutive() -> u32 { 3 }
fn default_scan_interval() -> u64 { 30 }

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            inactive_time_seconds: default_inactive_time(),
            max_response_delay_seconds: default_max_response_delay(),
            max_consecutive_messages: default_max_consecutive(),
            scan_interval_seconds: default_scan_interval(),
        }
    }
}

/// Local wall-clock hours in which outreach is allowed, half-open `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindowConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
}

fn default_start_hour() -> u32 { 8 }
fn default_end_hour() -> u32 { 23 }

impl Default for TimeWindowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
        }
    }
}

/// Group allowlist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhitelistConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub group_ids: HashSet<String>,
}

/// Snapshot location and flush cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_save_interval")]
    pub save_interval_seconds: u64,
}

fn default_data_dir() -> PathBuf { GroupWakeConfig::home_dir() }
fn default_save_interval() -> u64 { 300 }

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            save_interval_seconds: default_save_interval(),
        }
    }
}

/// Outgoing message settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachConfig {
    /// Tag prefixed to every generated prompt so the bot's own messages
    /// are never mistaken for genuine activity.
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Generation/delivery endpoint. Empty means log-only.
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_marker() -> String { "[SYS_PROMPT]".into() }
fn default_timeout() -> u64 { 30 }

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            webhook_url: String::new(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn bool_true() -> bool { true }
