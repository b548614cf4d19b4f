//! # GroupWake: inactivity-escalation host
//!
//! Runs the scheduler against an activity feed on stdin and an outreach
//! webhook (or a log-only dry run).
//!
//! Usage:
//!   groupwake run                          # Read JSON-line activity from stdin
//!   groupwake run --config ./gw.toml -v    # Custom config, debug logging
//!   groupwake status                       # Print the persisted per-group table
//!   groupwake test-send --group 12345      # One manual test outreach

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use groupwake_core::GroupWakeConfig;
use groupwake_core::traits::{Clock, OutreachSender, SnapshotStore, SystemClock};
use groupwake_core::types::ActivityEvent;
use groupwake_scheduler::engine::format_probe_table;
use groupwake_scheduler::{GroupStore, GroupWakeEngine, JsonSnapshotStore, sender_from_config};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "groupwake",
    version,
    about = "⏰ GroupWake: wakes up quiet group chats, politely"
)]
struct Cli {
    /// Config file (default: ~/.groupwake/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, reading activity events as JSON lines from stdin
    Run,
    /// Print the persisted state of every tracked group
    Status,
    /// Send one test outreach through the configured sender
    TestSend {
        /// Target group id
        #[arg(long)]
        group: String,
        /// Conversation reference
        #[arg(long, default_value = "")]
        conversation: String,
        /// Channel reference (defaults to the group id)
        #[arg(long)]
        channel: Option<String>,
    },
}

/// One line of the stdin activity feed.
#[derive(Debug, Deserialize)]
struct InboundLine {
    group_id: String,
    #[serde(default)]
    conversation_ref: String,
    #[serde(default)]
    channel_ref: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    is_bot_generated: bool,
}

impl InboundLine {
    fn into_event(self, marker: &str) -> ActivityEvent {
        let mut event = match &self.text {
            Some(text) => ActivityEvent::from_text(
                self.group_id,
                self.conversation_ref,
                self.channel_ref,
                text,
                marker,
            ),
            None => ActivityEvent::genuine(self.group_id, self.conversation_ref, self.channel_ref),
        };
        event.is_bot_generated |= self.is_bot_generated;
        event
    }
}

fn expand_path(p: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).to_string())
}

fn load_config(path: Option<&str>) -> Result<GroupWakeConfig> {
    let mut config = match path {
        Some(p) => {
            let path = expand_path(Path::new(p));
            GroupWakeConfig::load_from(&path)
                .with_context(|| format!("loading config from {}", path.display()))?
        }
        None => GroupWakeConfig::load().context("loading default config")?,
    };
    config.persistence.data_dir = expand_path(&config.persistence.data_dir);
    Ok(config)
}

fn build_engine(config: &GroupWakeConfig) -> GroupWakeEngine {
    let sender: Arc<dyn OutreachSender> = Arc::from(sender_from_config(&config.outreach));
    let store: Arc<dyn SnapshotStore> =
        Arc::new(JsonSnapshotStore::new(&config.persistence.data_dir));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    GroupWakeEngine::new(config, sender, store, clock)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "groupwake=debug,groupwake_scheduler=debug,groupwake_core=debug"
    } else {
        "groupwake=info,groupwake_scheduler=info,groupwake_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Status => status(&config),
        Command::TestSend {
            group,
            conversation,
            channel,
        } => {
            let engine = build_engine(&config);
            engine.restore();
            let channel = channel.unwrap_or_else(|| group.clone());
            engine
                .send_test(&group, &conversation, &channel)
                .await
                .map_err(|e| anyhow::anyhow!("test outreach failed: {e}"))?;
            println!("✅ Test outreach sent to group {group}");
            Ok(())
        }
    }
}

async fn run(config: GroupWakeConfig) -> Result<()> {
    let marker = config.outreach.marker.clone();
    let mut engine = build_engine(&config);
    let restored = engine.restore();

    println!("⏰ GroupWake v{}", env!("CARGO_PKG_VERSION"));
    println!("   📂 Data Dir:    {}", config.persistence.data_dir.display());
    println!("   👥 Groups:      {restored} restored");
    println!(
        "   ⏱️  Inactivity:  {}s, up to {} outreach, delay 0..{}s",
        config.escalation.inactive_time_seconds,
        config.escalation.max_consecutive_messages,
        config.escalation.max_response_delay_seconds
    );
    if config.time_window.enabled {
        println!(
            "   🕗 Window:      {:02}:00-{:02}:00",
            config.time_window.start_hour, config.time_window.end_hour
        );
    }
    println!();

    engine.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<InboundLine>(line) {
                            Ok(inbound) => {
                                engine.on_activity(&inbound.into_event(&marker));
                            }
                            Err(e) => tracing::warn!("⚠️ Ignoring malformed activity line: {e}"),
                        }
                    }
                    Ok(None) => {
                        tracing::info!("📭 Activity feed closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("❌ Failed to read activity feed: {e}");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("🛑 Interrupted");
                break;
            }
        }
    }

    engine
        .shutdown()
        .await
        .map_err(|e| anyhow::anyhow!("final save failed: {e}"))?;
    print!("{}", engine.format_probe());
    Ok(())
}

fn status(config: &GroupWakeConfig) -> Result<()> {
    let store = JsonSnapshotStore::new(&config.persistence.data_dir);
    let snapshot = store
        .load()
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", store.path().display()))?;
    let groups = GroupStore::new();
    groups.restore(snapshot);
    println!("📂 {}", store.path().display());
    print!(
        "{}",
        format_probe_table(&groups.probe(), config.escalation.max_consecutive_messages)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_line_marker_detection() {
        let line: InboundLine = serde_json::from_str(
            r#"{"group_id":"g1","conversation_ref":"c","channel_ref":"ch","text":"[SYS_PROMPT] hello"}"#,
        )
        .unwrap();
        assert!(line.into_event("[SYS_PROMPT]").is_bot_generated);

        let line: InboundLine = serde_json::from_str(r#"{"group_id":"g1","text":"hello"}"#).unwrap();
        let event = line.into_event("[SYS_PROMPT]");
        assert!(!event.is_bot_generated);
        assert_eq!(event.conversation_ref, "");
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["groupwake", "test-send", "--group", "42", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::TestSend { group, channel, .. } => {
                assert_eq!(group, "42");
                assert!(channel.is_none());
            }
            _ => panic!("expected test-send"),
        }
    }
}
