//! Outreach sender trait: generation and delivery of one outgoing message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{MessageType, TierContext, TimeOfDay};

/// Everything a sender needs to generate and deliver an outreach message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachRequest {
    pub group_id: String,
    pub conversation_ref: String,
    pub channel_ref: String,
    /// The selected prompt template, untagged.
    pub template: String,
    pub time_of_day: TimeOfDay,
    pub tier: TierContext,
    /// Fully composed prompt, starting with the outreach marker.
    pub prompt: String,
    pub message_type: MessageType,
}

/// Generates and delivers an outreach message into a group.
///
/// Implementations must keep the marker carried by `prompt` on anything
/// that echoes back through the inbound feed.
#[async_trait]
pub trait OutreachSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, request: OutreachRequest) -> Result<()>;
}
