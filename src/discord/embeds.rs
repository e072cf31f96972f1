use serenity::all::{
    ButtonStyle, CreateActionRow, CreateButton, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter,
    CreateMessage, Timestamp,
};

use crate::app::state::{format_duration, Track};
use crate::lyrics::Lyrics;

const SPOTIFY_GREEN: u32 = 0x1DB954;
const GREYPLE: u32 = 0x4F545C;
const ERROR_RED: u32 = 0xFF0000;
const SPOTIFY_ICON: &str = "https://upload.wikimedia.org/wikipedia/commons/thumb/1/19/Spotify_logo_without_text.svg/100px-Spotify_logo_without_text.svg.png";

/// Prefix of the custom id on the "Lyrics" button under a status message.
pub const LYRICS_BUTTON_PREFIX: &str = "lyrics_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum PayloadKind {
    #[strum(to_string = "now playing")]
    NowPlaying,
    #[strum(to_string = "nothing playing")]
    NothingPlaying,
    #[strum(to_string = "lyrics")]
    Lyrics,
    #[strum(to_string = "error")]
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Footer {
    pub text: String,
    pub icon_url: Option<String>,
}

/// Platform-neutral description of one embed message.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPayload {
    pub kind: PayloadKind,
    pub color: u32,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub description: String,
    pub fields: Vec<(String, String)>,
    pub thumbnail: Option<String>,
    pub footer: Option<Footer>,
    pub timestamp: bool,
    pub lyrics_button: Option<String>,
}

impl StatusPayload {
    fn new(kind: PayloadKind, color: u32, description: impl Into<String>) -> Self {
        StatusPayload {
            kind,
            color,
            title: None,
            url: None,
            author: None,
            description: description.into(),
            fields: Vec::new(),
            thumbnail: None,
            footer: None,
            timestamp: false,
            lyrics_button: None,
        }
    }

    pub fn to_embed(&self) -> CreateEmbed {
        let mut embed = CreateEmbed::new()
            .colour(self.color)
            .description(&self.description);
        if let Some(title) = &self.title {
            embed = embed.title(title);
        }
        if let Some(url) = self.url.as_ref().filter(|u| !u.is_empty()) {
            embed = embed.url(url);
        }
        if let Some(author) = &self.author {
            embed = embed.author(CreateEmbedAuthor::new(author));
        }
        for (name, value) in &self.fields {
            embed = embed.field(name, value, true);
        }
        if let Some(thumbnail) = &self.thumbnail {
            embed = embed.thumbnail(thumbnail);
        }
        if let Some(footer) = &self.footer {
            let mut built = CreateEmbedFooter::new(&footer.text);
            if let Some(icon) = &footer.icon_url {
                built = built.icon_url(icon);
            }
            embed = embed.footer(built);
        }
        if self.timestamp {
            embed = embed.timestamp(Timestamp::now());
        }
        embed
    }

    pub fn to_message(&self) -> CreateMessage {
        let message = CreateMessage::new().embed(self.to_embed());
        match &self.lyrics_button {
            Some(custom_id) => message.components(vec![CreateActionRow::Buttons(vec![
                CreateButton::new(custom_id)
                    .label("Lyrics")
                    .style(ButtonStyle::Secondary),
            ])]),
            None => message,
        }
    }
}

pub fn now_playing(track: &Track) -> StatusPayload {
    StatusPayload {
        title: Some(track.name.clone()),
        url: Some(track.external_url.clone()),
        author: Some(track.artist_line()),
        fields: vec![(
            "Duration".to_string(),
            format_duration(Some(track.duration_ms)),
        )],
        thumbnail: track.album_art_url().map(str::to_string),
        footer: Some(Footer {
            text: "Now Playing on Spotify".to_string(),
            icon_url: Some(SPOTIFY_ICON.to_string()),
        }),
        timestamp: true,
        lyrics_button: Some(format!("{LYRICS_BUTTON_PREFIX}{}", track.id)),
        ..StatusPayload::new(
            PayloadKind::NowPlaying,
            SPOTIFY_GREEN,
            format!("**Album:** {}", track.album.name),
        )
    }
}

pub fn nothing_playing() -> StatusPayload {
    StatusPayload {
        footer: Some(Footer {
            text: "Spotify Status".to_string(),
            icon_url: None,
        }),
        ..StatusPayload::new(
            PayloadKind::NothingPlaying,
            GREYPLE,
            "*Nothing playing on Spotify currently.*",
        )
    }
}

pub fn lyrics(track: &Track, lyrics: &Lyrics) -> StatusPayload {
    let description = if lyrics.text.is_empty() {
        "*Lyrics found but were empty after cleanup.*".to_string()
    } else {
        lyrics.text.clone()
    };
    StatusPayload {
        title: Some(track.name.clone()),
        url: Some(track.external_url.clone()),
        author: track.primary_artist().map(str::to_string),
        thumbnail: track.album_art_url().map(str::to_string),
        footer: lyrics.truncated.then(|| Footer {
            text: "Lyrics truncated due to length limits.".to_string(),
            icon_url: None,
        }),
        timestamp: true,
        ..StatusPayload::new(PayloadKind::Lyrics, SPOTIFY_GREEN, description)
    }
}

pub fn error(title: &str, message: &str) -> StatusPayload {
    let message = if message.is_empty() {
        "An unknown error occurred."
    } else {
        message
    };
    StatusPayload {
        title: Some(title.to_string()),
        footer: Some(Footer {
            text: "Spotify Status Error".to_string(),
            icon_url: None,
        }),
        timestamp: true,
        ..StatusPayload::new(PayloadKind::Error, ERROR_RED, format!("```{message}```"))
    }
}

/// Track id carried by a "Lyrics" button, if `custom_id` is one.
pub fn lyrics_button_track(custom_id: &str) -> Option<&str> {
    custom_id
        .strip_prefix(LYRICS_BUTTON_PREFIX)
        .filter(|id| !id.is_empty())
}
