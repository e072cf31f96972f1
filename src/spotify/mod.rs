use async_trait::async_trait;
use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, Notify, RwLock},
    time,
};
use tracing::{debug, error, info, warn};

use crate::{
    app::state::PlaybackState,
    outcome::Outcome,
    poll::PlaybackSource,
    store::{CredentialStore, StatePatch},
};
use self::auth::{AuthCompletion, CallbackError, CallbackHandle, CallbackListener};

pub mod auth;
pub mod client;

/// Opaque `state` value sent with every authorization request.
pub const AUTH_STATE: &str = "spotify-status-bot-state";

/// Pause between startup refresh attempts that failed in transit.
pub const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpotifyError {
    #[error("not authenticated with Spotify")]
    NotAuthenticated,
    #[error("access token rejected by Spotify")]
    Unauthorized,
    #[error("credentials rejected by Spotify: {0}")]
    Rejected(String),
    #[error("spotify request failed: {0}")]
    Request(String),
}

/// Token endpoint response for both the code exchange and a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// The slice of the Spotify Web API the session needs.
#[async_trait]
pub trait SpotifyApi: Send + Sync {
    fn authorize_url(&self, state: &str) -> Result<String, SpotifyError>;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, SpotifyError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SpotifyError>;

    /// `Ok(None)` when nothing is playing (HTTP 204 or no item).
    async fn currently_playing(
        &self,
        access_token: &str,
    ) -> Result<Option<PlaybackState>, SpotifyError>;
}

#[derive(Debug, Default)]
struct SessionTokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// Owns the live access token and hides refreshes from callers.
pub struct SpotifySession {
    me: Weak<SpotifySession>,
    api: Arc<dyn SpotifyApi>,
    store: Arc<CredentialStore>,
    tokens: RwLock<SessionTokens>,
    refreshing: Mutex<()>,
    listener: Mutex<Option<CallbackHandle>>,
    callback_addr: SocketAddr,
    open_browser: bool,
    authorized: Notify,
}

impl SpotifySession {
    pub fn new(
        api: Arc<dyn SpotifyApi>,
        store: Arc<CredentialStore>,
        callback_addr: SocketAddr,
        open_browser: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| SpotifySession {
            me: me.clone(),
            api,
            store,
            tokens: RwLock::new(SessionTokens::default()),
            refreshing: Mutex::new(()),
            listener: Mutex::new(None),
            callback_addr,
            open_browser,
            authorized: Notify::new(),
        })
    }

    /// Signalled each time the OAuth flow hands us fresh tokens.
    pub fn authorized(&self) -> &Notify {
        &self.authorized
    }

    pub async fn has_access_token(&self) -> bool {
        self.tokens.read().await.access.is_some()
    }

    async fn access_token(&self) -> Option<String> {
        self.tokens.read().await.access.clone()
    }

    /// Mints an access token from the stored refresh token.
    ///
    /// Returns `false` when no access token could be minted. A rejected or
    /// missing refresh token issues an authorization request; a refresh that
    /// failed in transit keeps the stored token and is retried in the
    /// background, signalling [`Self::authorized`] once it succeeds.
    pub async fn initialize(&self) -> bool {
        let Some(refresh) = self.store.refresh_token() else {
            warn!("No Spotify refresh token found");
            self.request_authorization().await;
            return false;
        };

        info!("Found refresh token, refreshing access token");
        self.tokens.write().await.refresh = Some(refresh.clone());
        match self.api.refresh(&refresh).await {
            Ok(grant) => {
                self.accept_grant(grant).await;
                info!("Access token refreshed");
                true
            }
            Err(e @ (SpotifyError::Rejected(_) | SpotifyError::Unauthorized)) => {
                error!("Could not refresh Spotify access token: {e}");
                warn!("Refresh token might be invalid, please re-authorize");
                self.forget_credentials().await;
                self.request_authorization().await;
                false
            }
            Err(e) => {
                warn!(
                    "Could not reach Spotify to refresh the access token: {e}. Retrying in {}s",
                    REFRESH_RETRY_DELAY.as_secs()
                );
                self.spawn_refresh_retry();
                false
            }
        }
    }

    /// Retries a startup refresh until it succeeds or the token is rejected.
    fn spawn_refresh_retry(&self) {
        let me = self.me.clone();
        tokio::spawn(async move {
            loop {
                time::sleep(REFRESH_RETRY_DELAY).await;
                let Some(session) = me.upgrade() else {
                    return;
                };
                if session.has_access_token().await {
                    return;
                }

                let _guard = session.refreshing.lock().await;
                let refresh = session
                    .tokens
                    .read()
                    .await
                    .refresh
                    .clone()
                    .or_else(|| session.store.refresh_token());
                let Some(refresh) = refresh else {
                    return;
                };
                match session.api.refresh(&refresh).await {
                    Ok(grant) => {
                        session.accept_grant(grant).await;
                        info!("Access token refreshed on retry");
                        session.authorized.notify_one();
                        return;
                    }
                    Err(e @ (SpotifyError::Rejected(_) | SpotifyError::Unauthorized)) => {
                        session.lose_authentication(&e).await;
                        return;
                    }
                    Err(e) => warn!("Refresh retry failed: {e}"),
                }
            }
        });
    }

    /// Fetches playback, refreshing and retrying once on an expired token.
    pub async fn get_current_playback(&self) -> Outcome<Option<PlaybackState>, SpotifyError> {
        let Some(access) = self.access_token().await else {
            debug!("Cannot fetch playback: not authenticated");
            return Outcome::Fatal(SpotifyError::NotAuthenticated);
        };

        match self.api.currently_playing(&access).await {
            Ok(playback) => return Outcome::Done(playback),
            Err(SpotifyError::Unauthorized) => {
                warn!("Access token expired during playback fetch, refreshing");
            }
            Err(e) => {
                warn!("Error fetching current track: {e}");
                return Outcome::Soft(e);
            }
        }

        match self.refresh_access_token(&access).await {
            Ok(()) => {}
            Err(e @ (SpotifyError::Rejected(_) | SpotifyError::Unauthorized)) => {
                self.lose_authentication(&e).await;
                return Outcome::Fatal(e);
            }
            Err(e) => {
                warn!("Could not refresh access token this cycle: {e}");
                return Outcome::Soft(e);
            }
        }

        let Some(fresh) = self.access_token().await else {
            return Outcome::Fatal(SpotifyError::NotAuthenticated);
        };
        debug!("Retrying playback fetch after token refresh");
        match self.api.currently_playing(&fresh).await {
            Ok(playback) => Outcome::Done(playback),
            Err(SpotifyError::Unauthorized) => {
                self.lose_authentication(&SpotifyError::Unauthorized).await;
                Outcome::Fatal(SpotifyError::Unauthorized)
            }
            Err(e) => {
                warn!("Playback fetch failed after refresh: {e}");
                Outcome::Soft(e)
            }
        }
    }

    /// Refreshes unless another caller already replaced `stale` while we waited.
    async fn refresh_access_token(&self, stale: &str) -> Result<(), SpotifyError> {
        let _guard = self.refreshing.lock().await;
        let refresh = {
            let tokens = self.tokens.read().await;
            if tokens.access.as_deref().is_some_and(|current| current != stale) {
                debug!("Access token already refreshed by another caller");
                return Ok(());
            }
            tokens.refresh.clone().or_else(|| self.store.refresh_token())
        };
        let Some(refresh) = refresh else {
            return Err(SpotifyError::Rejected("no refresh token held".to_string()));
        };

        let grant = self.api.refresh(&refresh).await?;
        self.accept_grant(grant).await;
        info!("Access token refreshed during playback fetch");
        Ok(())
    }

    /// Makes `grant` live and persists a rotated refresh token immediately.
    async fn accept_grant(&self, grant: TokenGrant) {
        let mut tokens = self.tokens.write().await;
        tokens.access = Some(grant.access_token);

        match grant.refresh_token {
            Some(rotated) => {
                if self.store.refresh_token().as_deref() != Some(rotated.as_str()) {
                    info!("Received a new refresh token");
                    if let Err(e) = self.store.save(StatePatch::refresh_token(Some(rotated.clone()))) {
                        error!("Failed to persist refresh token: {e}");
                    }
                }
                tokens.refresh = Some(rotated);
            }
            None => {
                if tokens.refresh.is_none() {
                    tokens.refresh = self.store.refresh_token();
                }
            }
        }
    }

    async fn forget_credentials(&self) {
        *self.tokens.write().await = SessionTokens::default();
        if let Err(e) = self.store.save(StatePatch::refresh_token(None)) {
            error!("Failed to clear refresh token: {e}");
        }
    }

    async fn lose_authentication(&self, cause: &SpotifyError) {
        error!("Spotify authentication lost: {cause}");
        self.forget_credentials().await;
        self.request_authorization().await;
    }

    /// Surfaces the authorization URL and starts the callback listener.
    pub async fn request_authorization(&self) {
        let url = match self.api.authorize_url(AUTH_STATE) {
            Ok(url) => url,
            Err(e) => {
                error!("Could not build Spotify authorization URL: {e}");
                return;
            }
        };

        warn!("SPOTIFY AUTHORIZATION NEEDED");
        warn!("Please visit this URL in your browser to authorize the bot: {url}");
        if self.open_browser {
            if let Err(e) = open::that(&url) {
                warn!("Could not open browser: {e}");
            }
        }

        self.start_listener().await;
    }

    async fn start_listener(&self) {
        let mut slot = self.listener.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Callback server is already running");
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };

        match CallbackListener::start(self.callback_addr, me).await {
            Ok(handle) => *slot = Some(handle),
            Err(e @ CallbackError::AddrInUse(_)) => {
                error!("{e}; make sure no other process uses it, then restart to retry authorization");
                *slot = None;
            }
            Err(e) => {
                error!("Callback server error: {e}");
                *slot = None;
            }
        }
    }

    /// Address of the live callback listener, if one is running.
    pub async fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .await
            .as_ref()
            .filter(|handle| !handle.is_finished())
            .map(CallbackHandle::local_addr)
    }

    pub async fn stop_listener(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.stop();
        }
    }

    /// Exchanges an authorization code and makes the resulting tokens live.
    pub async fn complete_authorization(&self, code: &str) -> Result<(), SpotifyError> {
        let grant = self.api.exchange_code(code).await?;
        info!(
            "Authorization successful, access token {}...",
            grant.access_token.chars().take(10).collect::<String>()
        );
        if grant.refresh_token.is_none() {
            info!("No new refresh token received, keeping the previous one");
        }
        self.accept_grant(grant).await;
        self.authorized.notify_one();
        Ok(())
    }
}

#[async_trait]
impl AuthCompletion for SpotifySession {
    async fn complete(&self, code: &str) -> Result<(), SpotifyError> {
        self.complete_authorization(code).await
    }
}

#[async_trait]
impl PlaybackSource for SpotifySession {
    async fn is_authenticated(&self) -> bool {
        self.has_access_token().await
    }

    async fn current_playback(&self) -> Outcome<Option<PlaybackState>, SpotifyError> {
        self.get_current_playback().await
    }
}
