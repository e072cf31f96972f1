use async_trait::async_trait;
use rspotify::{
    clients::{BaseClient, OAuthClient},
    http::{Form, HttpError},
    model::{AdditionalType, CurrentlyPlayingContext, PlayableItem},
    prelude::Id,
    scopes, AuthCodeSpotify, ClientError, Config as SpotifyConfig, Credentials, OAuth, Token,
};

use crate::app::state::{Album, AlbumImage, Artist, PlaybackState, Track};
use crate::config::Config;
use super::{SpotifyApi, SpotifyError, TokenGrant};

/// `SpotifyApi` backed by rspotify. Tokens are owned by the session, so every
/// call gets a short-lived client seeded with the token it should use.
pub struct RspotifyApi {
    creds: Credentials,
    oauth: OAuth,
    sp_config: SpotifyConfig,
}

impl RspotifyApi {
    pub fn new(config: &Config) -> Self {
        let creds = Credentials::new(&config.client_id, &config.client_secret);
        let oauth = OAuth {
            redirect_uri: config.redirect_uri.clone(),
            scopes: scopes!("user-read-currently-playing", "user-read-playback-state"),
            ..Default::default()
        };
        let sp_config = SpotifyConfig {
            api_base_url: config.spotify_api_url.clone(),
            auth_base_url: config.spotify_accounts_url.clone(),
            token_refreshing: false,
            ..Default::default()
        };
        RspotifyApi { creds, oauth, sp_config }
    }

    fn client(&self, oauth: OAuth) -> AuthCodeSpotify {
        AuthCodeSpotify::with_config(self.creds.clone(), oauth, self.sp_config.clone())
    }

    async fn client_with_token(&self, token: Token) -> Result<AuthCodeSpotify, SpotifyError> {
        let spotify = self.client(self.oauth.clone());
        *spotify
            .token
            .lock()
            .await
            .map_err(|_| SpotifyError::Request("token lock poisoned".to_string()))? = Some(token);
        Ok(spotify)
    }
}

#[async_trait]
impl SpotifyApi for RspotifyApi {
    fn authorize_url(&self, state: &str) -> Result<String, SpotifyError> {
        let oauth = OAuth {
            state: state.to_string(),
            ..self.oauth.clone()
        };
        self.client(oauth)
            .get_authorize_url(false)
            .map_err(|e| SpotifyError::Request(e.to_string()))
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, SpotifyError> {
        let spotify = self.client(self.oauth.clone());
        spotify.request_token(code).await.map_err(token_error)?;

        let token = spotify
            .token
            .lock()
            .await
            .map_err(|_| SpotifyError::Request("token lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| SpotifyError::Rejected("token endpoint returned no token".to_string()))?;
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SpotifyError> {
        // `refetch_token` would overwrite a rotated refresh token with the one
        // it sent, so the grant is requested directly.
        let headers = self
            .creds
            .auth_headers()
            .ok_or_else(|| SpotifyError::Request("client secret is not set".to_string()))?;
        let mut data = Form::new();
        data.insert("grant_type", "refresh_token");
        data.insert("refresh_token", refresh_token);

        let token = self
            .client(self.oauth.clone())
            .fetch_access_token(&data, Some(&headers))
            .await
            .map_err(token_error)?;
        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        })
    }

    async fn currently_playing(
        &self,
        access_token: &str,
    ) -> Result<Option<PlaybackState>, SpotifyError> {
        let spotify = self
            .client_with_token(Token {
                access_token: access_token.to_string(),
                ..Default::default()
            })
            .await?;

        let additional = [AdditionalType::Track];
        let playing = spotify
            .current_playing(None, Some(additional.iter()))
            .await
            .map_err(|e| match status_of(&e) {
                Some(401) => SpotifyError::Unauthorized,
                _ => SpotifyError::Request(e.to_string()),
            })?;

        Ok(playing.map(playback_from_context))
    }
}

fn status_of(err: &ClientError) -> Option<u16> {
    match err {
        ClientError::Http(http) => match http.as_ref() {
            HttpError::StatusCode(response) => Some(response.status().as_u16()),
            _ => None,
        },
        _ => None,
    }
}

/// The token endpoint answers 400 `invalid_grant` for revoked or stale tokens.
fn token_error(err: ClientError) -> SpotifyError {
    match status_of(&err) {
        Some(status) if (400..500).contains(&status) => {
            SpotifyError::Rejected(format!("token endpoint returned {status}"))
        }
        _ => SpotifyError::Request(err.to_string()),
    }
}

fn playback_from_context(ctx: CurrentlyPlayingContext) -> PlaybackState {
    // Episodes and local files have no stable track id to compare on.
    let track = match ctx.item {
        Some(PlayableItem::Track(track)) => track.id.as_ref().map(|id| Track {
            id: id.id().to_string(),
            name: track.name.clone(),
            artists: track
                .artists
                .iter()
                .map(|a| Artist { name: a.name.clone() })
                .collect(),
            album: Album {
                name: track.album.name.clone(),
                images: track
                    .album
                    .images
                    .iter()
                    .map(|i| AlbumImage { url: i.url.clone() })
                    .collect(),
            },
            duration_ms: track.duration.num_milliseconds(),
            external_url: track
                .external_urls
                .get("spotify")
                .cloned()
                .unwrap_or_default(),
        }),
        _ => None,
    };

    PlaybackState {
        is_playing: ctx.is_playing,
        track,
        progress_ms: ctx.progress.map(|p| p.num_milliseconds()).unwrap_or(0),
    }
}
