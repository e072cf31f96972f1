use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::{net::SocketAddr, path::PathBuf, time::Duration};

const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";
const DEFAULT_CALLBACK_ADDR: &str = "127.0.0.1:8888";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub callback_addr: SocketAddr,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub poll_interval: Duration,
    pub lrclib_url: String,
    pub spotify_api_url: String,
    pub spotify_accounts_url: String,
    pub open_browser: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenv().ok(); // Try loading .env file, ignore if it doesn't exist (e.g. env vars set manually)

        let callback_addr = std::env::var("CALLBACK_ADDR")
            .unwrap_or_else(|_| DEFAULT_CALLBACK_ADDR.to_string());
        let poll_interval_ms = match std::env::var("POLL_INTERVAL_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("POLL_INTERVAL_MS is not a number: {raw}"))?,
            Err(_) => DEFAULT_POLL_INTERVAL_MS,
        };

        Ok(Config {
            discord_token: required("DISCORD_BOT_TOKEN")?,
            client_id: required("SPOTIFY_CLIENT_ID")?,
            client_secret: required("SPOTIFY_CLIENT_SECRET")?,
            redirect_uri: std::env::var("SPOTIFY_REDIRECT_URI")
                .unwrap_or_else(|_| DEFAULT_REDIRECT_URI.to_string()),
            callback_addr: callback_addr
                .parse()
                .with_context(|| format!("CALLBACK_ADDR is not a socket address: {callback_addr}"))?,
            state_file: std::env::var("STATE_FILE")
                .unwrap_or_else(|_| "config.json".to_string())
                .into(),
            lock_file: std::env::var("LOCK_FILE")
                .unwrap_or_else(|_| ".spotify-status-bot.lock".to_string())
                .into(),
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            lrclib_url: std::env::var("LRCLIB_URL")
                .unwrap_or_else(|_| "https://lrclib.net".to_string()),
            spotify_api_url: std::env::var("SPOTIFY_API_URL")
                .unwrap_or_else(|_| rspotify::DEFAULT_API_BASE_URL.to_string()),
            spotify_accounts_url: std::env::var("SPOTIFY_ACCOUNTS_URL")
                .unwrap_or_else(|_| rspotify::DEFAULT_AUTH_BASE_URL.to_string()),
            open_browser: std::env::var("OPEN_BROWSER")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{key} is missing from .env or environment"))
}
