use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::app::state::Track;

/// Discord embed descriptions cap out at 4096 characters.
pub const MAX_LYRICS_LEN: usize = 4000;

#[derive(Debug, Error)]
pub enum LyricsError {
    #[error("lyrics request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("lyrics provider returned {0}")]
    Status(StatusCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lyrics {
    pub text: String,
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrclibRecord {
    #[serde(default)]
    instrumental: bool,
    plain_lyrics: Option<String>,
    synced_lyrics: Option<String>,
}

/// Client for the LRCLIB `/api/get` endpoint.
pub struct LrclibClient {
    http: reqwest::Client,
    base_url: String,
}

impl LrclibClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        LrclibClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Looks up lyrics for `track`. `Ok(None)` means the provider has none.
    pub async fn fetch(&self, track: &Track) -> Result<Option<Lyrics>, LyricsError> {
        let artist = track.primary_artist().unwrap_or_default();
        info!("Searching lyrics for: {} by {artist}", track.name);

        let duration = (track.duration_ms / 1000).to_string();
        let response = self
            .http
            .get(format!("{}/api/get", self.base_url))
            .query(&[
                ("artist_name", artist),
                ("track_name", track.name.as_str()),
                ("album_name", track.album.name.as_str()),
                ("duration", duration.as_str()),
            ])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("No lyrics record for {}", track.name);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LyricsError::Status(response.status()));
        }

        let record: LrclibRecord = response.json().await?;
        if record.instrumental {
            debug!("{} is instrumental", track.name);
            return Ok(None);
        }
        let raw = match (record.plain_lyrics, record.synced_lyrics) {
            (Some(plain), _) if !plain.trim().is_empty() => plain,
            (_, Some(synced)) if !synced.trim().is_empty() => strip_timestamps(&synced),
            _ => return Ok(None),
        };

        Ok(Some(truncate_lyrics(clean_lyrics(&raw, &track.name))))
    }
}

/// Drops leading `[mm:ss.xx]` stamps from every line of LRC text.
pub fn strip_timestamps(lrc: &str) -> String {
    lrc.lines()
        .map(|line| {
            let mut rest = line.trim_start();
            while let Some(stamp_end) = rest
                .strip_prefix('[')
                .and_then(|s| s.find(']'))
                .filter(|&end| is_timestamp(&rest[1..=end]))
            {
                rest = rest[stamp_end + 2..].trim_start();
            }
            rest
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_timestamp(inner: &str) -> bool {
    let inner = inner.trim_end_matches(']');
    let Some((min, sec)) = inner.split_once(':') else {
        return false;
    };
    !min.is_empty()
        && min.chars().all(|c| c.is_ascii_digit())
        && !sec.is_empty()
        && sec.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Removes section headers and credit lines, then squeezes blank runs.
pub fn clean_lyrics(raw: &str, title: &str) -> String {
    let title_header = format!("{} lyrics", title.to_lowercase());
    let mut lines: Vec<&str> = raw.trim().lines().collect();

    if let Some(first) = lines.first() {
        let lowered = first.to_lowercase();
        if lowered.contains("contributors") || lowered.contains(&title_header) {
            lines.remove(0);
        }
    }

    let kept = lines
        .into_iter()
        .filter(|line| {
            let t = line.trim();
            !(t.len() > 1 && t.starts_with('[') && t.ends_with(']'))
        })
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");

    let mut out = String::with_capacity(kept.len());
    let mut newlines = 0;
    for c in kept.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(c);
    }
    out.trim().to_string()
}

pub fn truncate_lyrics(text: String) -> Lyrics {
    if text.chars().count() <= MAX_LYRICS_LEN {
        return Lyrics {
            text,
            truncated: false,
        };
    }
    let mut cut: String = text.chars().take(MAX_LYRICS_LEN).collect();
    cut.push_str("...");
    Lyrics {
        text: cut,
        truncated: true,
    }
}
