// Discord-specific spam handling - translates engine decisions to Discord actions.

use crate::core::moderation::{ActionSink, Decision, DecisionAction, IncomingMessage};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

/// Convert a gateway message into the engine's view of it.
pub fn incoming_message(msg: &serenity::Message) -> IncomingMessage {
    IncomingMessage {
        message_id: msg.id.get() as i64,
        user_id: msg.author.id.get() as i64,
        channel_id: msg.channel_id.get() as i64,
        guild_id: msg.guild_id.map(|id| id.get() as i64),
        text: msg.content.clone(),
    }
}

fn warning_text(user_id: i64, decision: &Decision) -> String {
    match decision.score() {
        Some(score) => format!(
            "⚠️ <@{}> your message was removed as likely spam (score {:.2}).",
            user_id, score
        ),
        None => format!(
            "⚠️ <@{}> your message was removed by the spam filter ({}).",
            user_id, decision.reason
        ),
    }
}

/// Applies decisions through the Discord HTTP API.
///
/// - Flag: delete the message and post a warning
/// - Suppress: delete the message and time the author out
pub struct DiscordActionSink {
    http: Arc<serenity::Http>,
    timeout: Duration,
}

impl DiscordActionSink {
    pub fn new(http: Arc<serenity::Http>, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    async fn delete(&self, message: &IncomingMessage) {
        let channel_id = serenity::ChannelId::new(message.channel_id as u64);
        let message_id = serenity::MessageId::new(message.message_id as u64);
        if let Err(e) = channel_id.delete_message(&self.http, message_id).await {
            tracing::warn!(
                message_id = message.message_id,
                "Failed to delete spam message: {}",
                e
            );
        }
    }

    async fn time_out_author(&self, message: &IncomingMessage) {
        let Some(guild_id) = message.guild_id else {
            return;
        };

        let timeout_until = match serenity::Timestamp::from_unix_timestamp(
            chrono::Utc::now().timestamp() + self.timeout.as_secs() as i64,
        ) {
            Ok(ts) => ts,
            Err(e) => {
                tracing::error!("Failed to create timeout timestamp: {}", e);
                return;
            }
        };

        if let Err(e) = serenity::GuildId::new(guild_id as u64)
            .edit_member(
                &self.http,
                serenity::UserId::new(message.user_id as u64),
                serenity::EditMember::new().disable_communication_until_datetime(timeout_until),
            )
            .await
        {
            tracing::error!(user_id = message.user_id, "Failed to timeout user: {}", e);
            return;
        }

        let notice = format!(
            "🔇 <@{}> has been timed out for {} minutes for spam.",
            message.user_id,
            self.timeout.as_secs() / 60
        );
        if let Err(e) = serenity::ChannelId::new(message.channel_id as u64)
            .say(&self.http, notice)
            .await
        {
            tracing::warn!("Failed to send timeout notification: {}", e);
        }
    }
}

#[async_trait]
impl ActionSink for DiscordActionSink {
    async fn apply(&self, message: &IncomingMessage, decision: &Decision) {
        match decision.action {
            DecisionAction::Allow => {}
            DecisionAction::Flag => {
                self.delete(message).await;
                let channel_id = serenity::ChannelId::new(message.channel_id as u64);
                if let Err(e) = channel_id
                    .say(&self.http, warning_text(message.user_id, decision))
                    .await
                {
                    tracing::warn!("Failed to send spam warning: {}", e);
                }
            }
            DecisionAction::Suppress => {
                self.delete(message).await;
                self.time_out_author(message).await;
            }
        }
    }
}
