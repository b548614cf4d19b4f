//! Outreach senders: hand the composed request to whoever generates and
//! delivers the actual chat message.
//! Supports: HTTP webhook (POST JSON) and a log-only dry run.

use std::time::Duration;

use async_trait::async_trait;
use groupwake_core::config::OutreachConfig;
use groupwake_core::error::{GroupWakeError, Result};
use groupwake_core::traits::{OutreachRequest, OutreachSender};

/// POSTs each outreach request as JSON to a generation/delivery endpoint.
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookSender {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl OutreachSender for WebhookSender {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, request: OutreachRequest) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GroupWakeError::Outreach(format!("Webhook send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("✅ Outreach for group {} delivered to {}", request.group_id, self.url);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(GroupWakeError::Outreach(format!("Webhook error {status}: {body}")))
        }
    }
}

/// Logs outreach instead of sending it.
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait]
impl OutreachSender for LogSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, request: OutreachRequest) -> Result<()> {
        tracing::info!(
            "📢 [dry-run] group {} ({}) tier {}/{} at {}: {}",
            request.group_id,
            request.channel_ref,
            request.tier.count,
            request.tier.max,
            request.time_of_day,
            request.prompt
        );
        Ok(())
    }
}

/// Pick a sender from config: webhook when a URL is set, log-only otherwise.
pub fn sender_from_config(config: &OutreachConfig) -> Box<dyn OutreachSender> {
    if config.webhook_url.is_empty() {
        tracing::warn!("⚠️ No outreach webhook configured, outreach will only be logged");
        Box::new(LogSender)
    } else {
        Box::new(WebhookSender::new(
            &config.webhook_url,
            Duration::from_secs(config.timeout_seconds),
        ))
    }
}
