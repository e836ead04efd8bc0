use async_trait::async_trait;
use dashmap::DashMap;
use order_flow::{BotReply, ReplySender, Result};
use tracing::info;

/// Stand-in for the chat provider's send API: logs every outbound reply
/// and retains it per user until someone drains it over HTTP.
pub struct BufferedReplySender {
    replies: DashMap<String, Vec<BotReply>>,
}

impl BufferedReplySender {
    pub fn new() -> Self {
        Self {
            replies: DashMap::new(),
        }
    }

    /// Hand out and forget everything queued for a user.
    pub fn drain(&self, user_id: &str) -> Vec<BotReply> {
        self.replies
            .remove(user_id)
            .map(|(_, replies)| replies)
            .unwrap_or_default()
    }
}

impl Default for BufferedReplySender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplySender for BufferedReplySender {
    async fn send(&self, user_id: &str, reply: BotReply) -> Result<()> {
        info!(
            user_id = %user_id,
            kind = reply.kind(),
            body = %reply.body(),
            "outbound reply"
        );
        self.replies
            .entry(user_id.to_string())
            .or_default()
            .push(reply);
        Ok(())
    }
}
