pub mod state;

use poise::serenity_prelude as serenity;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{info, warn};

use crate::{
    config::Config,
    discord::{parse_channel_id, ChannelReconciler, DiscordError, SerenityChannel, TargetChannel},
    lyrics::LrclibClient,
    poll::{Poller, StartOutcome},
    spotify::{client::RspotifyApi, SpotifySession},
    store::{CredentialStore, StatePatch, StoreError},
};

/// What happens to the persisted channel id after looking it up at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredChannel {
    Use,
    Forget,
    /// The lookup failed on the way; the stored id is left alone.
    Keep,
}

impl StoredChannel {
    /// `lookup` is `Ok(is_text_channel)` or the error Discord answered with.
    pub fn from_lookup(lookup: &Result<bool, DiscordError>) -> Self {
        match lookup {
            Ok(true) => StoredChannel::Use,
            Ok(false) => StoredChannel::Forget,
            Err(e) if e.is_channel_gone() => StoredChannel::Forget,
            Err(_) => StoredChannel::Keep,
        }
    }
}

/// Owns every long-lived component; shared with commands through `Arc`.
pub struct App {
    pub store: Arc<CredentialStore>,
    pub session: Arc<SpotifySession>,
    pub target: TargetChannel,
    pub poller: Poller,
    pub lyrics: LrclibClient,
    watcher_started: AtomicBool,
}

impl App {
    pub fn new(config: &Config, store: Arc<CredentialStore>) -> Arc<Self> {
        let api = Arc::new(RspotifyApi::new(config));
        let session = SpotifySession::new(
            api,
            Arc::clone(&store),
            config.callback_addr,
            config.open_browser,
        );

        let http = Arc::new(serenity::Http::new(&config.discord_token));
        let target = TargetChannel::default();
        let reconciler = ChannelReconciler::new(
            Arc::new(SerenityChannel::new(http)),
            target.clone(),
        );
        let poller = Poller::new(
            session.clone(),
            reconciler,
            target.clone(),
            config.poll_interval,
        );

        Arc::new(App {
            store,
            session,
            target,
            poller,
            lyrics: LrclibClient::new(&config.lrclib_url),
            watcher_started: AtomicBool::new(false),
        })
    }

    /// Runs once the gateway session is ready.
    pub async fn on_ready(self: &Arc<Self>, ctx: &serenity::Context) {
        // ── Spotify ──────────────────────────────────────────────────────────
        if self.session.initialize().await {
            info!("Spotify session ready");
        } else {
            warn!("Spotify not authorized yet, waiting for the OAuth callback");
        }

        // ── Target channel ───────────────────────────────────────────────────
        self.resolve_target_channel(ctx).await;

        // ── Polling ──────────────────────────────────────────────────────────
        match self.poller.start_if_needed().await {
            StartOutcome::Started => info!("Status updates running"),
            other => info!("Status updates not started: {other:?}"),
        }
        self.spawn_authorization_watcher();
    }

    /// Loads the persisted channel and makes it live if it is still a text
    /// channel the bot can see. A lookup that fails in transit leaves the
    /// stored id in place.
    pub async fn resolve_target_channel(&self, ctx: &serenity::Context) {
        let Some(stored) = self.store.target_channel_id() else {
            info!("No target channel configured. Use /channelset to set one");
            return;
        };
        let Some(channel_id) = parse_channel_id(&stored) else {
            warn!("Stored channel id {stored} is invalid, clearing it");
            self.forget_target_channel();
            return;
        };

        let lookup = match channel_id.to_channel(ctx).await {
            Ok(serenity::Channel::Guild(channel)) if channel.kind == serenity::ChannelType::Text => {
                info!("Target channel: #{} ({})", channel.name, channel.id);
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) => Err(DiscordError::from(e)),
        };

        match StoredChannel::from_lookup(&lookup) {
            StoredChannel::Use => self.target.set(Some(channel_id)),
            StoredChannel::Forget => {
                match lookup {
                    Err(e) => warn!("Configured channel {channel_id} is unavailable ({e}), clearing it"),
                    Ok(_) => warn!("Configured channel {channel_id} is not a text channel, clearing it"),
                }
                self.forget_target_channel();
            }
            StoredChannel::Keep => {
                if let Err(e) = lookup {
                    warn!(
                        "Could not fetch configured channel {channel_id}: {e}. \
                         Keeping it for the next start; run /channelset to resume now"
                    );
                }
            }
        }
    }

    /// Persists `channel` as the status channel and makes it live.
    pub fn set_target_channel(&self, channel: serenity::ChannelId) -> Result<(), StoreError> {
        self.store
            .save(StatePatch::target_channel(Some(channel.to_string())))?;
        self.target.set(Some(channel));
        Ok(())
    }

    fn forget_target_channel(&self) {
        self.target.set(None);
        if let Err(e) = self.store.save(StatePatch::target_channel(None)) {
            warn!("{e}");
        }
    }

    /// Re-checks polling preconditions whenever the OAuth flow completes.
    fn spawn_authorization_watcher(self: &Arc<Self>) {
        if self.watcher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let app = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                app.session.authorized().notified().await;
                info!("Spotify authorized, checking whether polling can start");
                let started = app.poller.start_if_needed().await;
                info!("Polling after authorization: {started:?}");
            }
        });
    }

    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.poller.stop();
        self.session.stop_listener().await;
    }
}
