use async_trait::async_trait;
use futures::future::join_all;
use serenity::all::{ChannelId, GetMessages, Http, HttpError, MessageId, UserId};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::outcome::Outcome;
use self::embeds::StatusPayload;

pub mod embeds;

/// How many recent messages are scanned for our previous status posts.
pub const LOOKBACK: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscordError {
    #[error("unknown message")]
    UnknownMessage,
    #[error("unknown channel")]
    UnknownChannel,
    #[error("missing access to the channel")]
    MissingAccess,
    #[error("missing permissions in the channel")]
    MissingPermissions,
    #[error("discord request failed: {0}")]
    Request(String),
}

impl DiscordError {
    /// Maps a Discord JSON error code onto the cases we act on.
    pub fn from_code(code: isize) -> Option<Self> {
        match code {
            10003 => Some(DiscordError::UnknownChannel),
            10008 => Some(DiscordError::UnknownMessage),
            50001 => Some(DiscordError::MissingAccess),
            50013 => Some(DiscordError::MissingPermissions),
            _ => None,
        }
    }

    pub fn is_permission_loss(&self) -> bool {
        matches!(
            self,
            DiscordError::MissingAccess | DiscordError::MissingPermissions
        )
    }

    /// Discord answered that the channel is deleted or hidden from the bot,
    /// as opposed to a request that failed on the way.
    pub fn is_channel_gone(&self) -> bool {
        matches!(
            self,
            DiscordError::UnknownChannel | DiscordError::MissingAccess
        )
    }
}

impl From<serenity::Error> for DiscordError {
    fn from(err: serenity::Error) -> Self {
        if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &err {
            if let Some(known) = DiscordError::from_code(response.error.code) {
                return known;
            }
        }
        DiscordError::Request(err.to_string())
    }
}

/// The channel status is mirrored into. Shared between the set-channel
/// command and the reconciler; the last writer wins.
#[derive(Debug, Clone, Default)]
pub struct TargetChannel(Arc<RwLock<Option<ChannelId>>>);

impl TargetChannel {
    pub fn get(&self) -> Option<ChannelId> {
        *self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, channel: Option<ChannelId>) {
        *self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = channel;
    }

    /// Clears the target only if it still points at `channel`.
    pub fn clear_if(&self, channel: ChannelId) -> bool {
        let mut slot = self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *slot == Some(channel) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

/// Parses a stored channel id; Discord snowflakes are never zero.
pub fn parse_channel_id(raw: &str) -> Option<ChannelId> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(ChannelId::new)
}

/// Message operations the reconciler needs from the chat platform.
#[async_trait]
pub trait StatusChannel: Send + Sync {
    /// Ids of the most recent `limit` messages in `channel` authored by the bot.
    async fn recent_own_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<MessageId>, DiscordError>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId)
        -> Result<(), DiscordError>;

    async fn send(&self, channel: ChannelId, payload: &StatusPayload)
        -> Result<MessageId, DiscordError>;
}

/// Makes the channel show exactly one current status message by deleting
/// our previous posts and sending a fresh one.
pub struct ChannelReconciler {
    transport: Arc<dyn StatusChannel>,
    target: TargetChannel,
}

impl ChannelReconciler {
    pub fn new(transport: Arc<dyn StatusChannel>, target: TargetChannel) -> Self {
        ChannelReconciler { transport, target }
    }

    /// `Done(None)` when there is no channel; `Fatal` when the bot lost
    /// access to it, in which case the shared target is cleared.
    pub async fn reconcile(
        &self,
        channel: Option<ChannelId>,
        payload: &StatusPayload,
    ) -> Outcome<Option<MessageId>, DiscordError> {
        let Some(channel) = channel else {
            debug!("Message update skipped: no target channel");
            return Outcome::Done(None);
        };

        self.cleanup(channel).await;

        match self.transport.send(channel, payload).await {
            Ok(message) => {
                info!("Sent status message {message} ({})", payload.kind);
                Outcome::Done(Some(message))
            }
            Err(e) if e.is_permission_loss() => {
                error!(
                    "Missing permissions (Send Messages / Manage Messages?) in channel {channel}: {e}"
                );
                self.target.clear_if(channel);
                Outcome::Fatal(e)
            }
            Err(e) => {
                warn!("Error sending status message to {channel}: {e}");
                Outcome::Soft(e)
            }
        }
    }

    async fn cleanup(&self, channel: ChannelId) {
        let previous = match self.transport.recent_own_messages(channel, LOOKBACK).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Error listing old status messages in {channel}: {e}");
                return;
            }
        };
        if previous.is_empty() {
            debug!("No old bot messages to clean up");
            return;
        }

        debug!("Deleting {} old status message(s)", previous.len());
        let deletions = previous.into_iter().map(|message| async move {
            match self.transport.delete_message(channel, message).await {
                Ok(()) | Err(DiscordError::UnknownMessage) => {}
                Err(e) => warn!("Failed to delete old message {message}: {e}"),
            }
        });
        join_all(deletions).await;
    }
}

/// `StatusChannel` over serenity's HTTP client.
pub struct SerenityChannel {
    http: Arc<Http>,
    bot_id: OnceCell<UserId>,
}

impl SerenityChannel {
    pub fn new(http: Arc<Http>) -> Self {
        SerenityChannel {
            http,
            bot_id: OnceCell::new(),
        }
    }

    async fn bot_id(&self) -> Result<UserId, DiscordError> {
        self.bot_id
            .get_or_try_init(|| async {
                self.http
                    .get_current_user()
                    .await
                    .map(|user| user.id)
                    .map_err(DiscordError::from)
            })
            .await
            .copied()
    }
}

#[async_trait]
impl StatusChannel for SerenityChannel {
    async fn recent_own_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<MessageId>, DiscordError> {
        let bot_id = self.bot_id().await?;
        let messages = channel
            .messages(&*self.http, GetMessages::new().limit(limit))
            .await?;
        Ok(messages
            .into_iter()
            .filter(|m| m.author.id == bot_id)
            .map(|m| m.id)
            .collect())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), DiscordError> {
        channel.delete_message(&*self.http, message).await?;
        Ok(())
    }

    async fn send(
        &self,
        channel: ChannelId,
        payload: &StatusPayload,
    ) -> Result<MessageId, DiscordError> {
        let message = channel.send_message(&*self.http, payload.to_message()).await?;
        Ok(message.id)
    }
}
