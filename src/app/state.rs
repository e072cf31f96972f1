#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlbumImage {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Album {
    pub name: String,
    /// Largest first, as the Web API returns them.
    pub images: Vec<AlbumImage>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artists: Vec<Artist>,
    pub album: Album,
    pub duration_ms: i64,
    pub external_url: String,
}

impl Track {
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(|a| a.name.as_str())
    }

    pub fn artist_line(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn album_art_url(&self) -> Option<&str> {
        self.album.images.first().map(|i| i.url.as_str())
    }
}

/// One snapshot of the account's playback, rebuilt on every poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub track: Option<Track>,
    pub progress_ms: i64,
}

impl PlaybackState {
    /// The track to display, if the account is actively playing one.
    pub fn now_playing(&self) -> Option<&Track> {
        if self.is_playing {
            self.track.as_ref()
        } else {
            None
        }
    }
}

/// Formats milliseconds as `MM:SS`. Unknown or negative input yields `00:00`.
pub fn format_duration(ms: Option<i64>) -> String {
    let ms = match ms {
        Some(ms) if ms >= 0 => ms,
        _ => return "00:00".to_string(),
    };
    let total_secs = ms / 1000;
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}
