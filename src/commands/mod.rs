use poise::serenity_prelude as serenity;
use poise::CreateReply;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    app::App,
    discord::embeds::{self, StatusPayload},
    lyrics::LrclibClient,
    outcome::Outcome,
    poll::PlaybackSource,
};

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Data, Error>;

const GENERIC_FAILURE: &str = "An error occurred while processing the command.";

pub struct Data {
    pub app: Arc<App>,
}

/// Permissions the bot needs in the status channel.
const REQUIRED: serenity::Permissions = serenity::Permissions::VIEW_CHANNEL
    .union(serenity::Permissions::SEND_MESSAGES)
    .union(serenity::Permissions::MANAGE_MESSAGES)
    .union(serenity::Permissions::EMBED_LINKS);

pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![channelset(), fetchlyrics()]
}

/// Sets the channel where Spotify status updates are posted
#[poise::command(slash_command, guild_only)]
pub async fn channelset(
    ctx: Context<'_>,
    #[description = "The text channel to post updates in"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let app = &ctx.data().app;

    if channel.kind != serenity::ChannelType::Text {
        ctx.send(
            CreateReply::default()
                .content("Please select a valid text channel.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    let bot_id = ctx.serenity_context().cache.current_user().id;
    let granted = channel.permissions_for_user(ctx.serenity_context(), bot_id)?;
    let missing = REQUIRED.difference(granted);
    if !missing.is_empty() {
        warn!("Missing permissions in {}: {:?}", channel.id, missing.get_permission_names());
        ctx.send(
            CreateReply::default()
                .content(format!(
                    "I don't have the required permissions in <#{}>. Missing: {}.",
                    channel.id,
                    missing.get_permission_names().join(", ")
                ))
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    app.poller.stop();
    app.set_target_channel(channel.id)?;
    info!("Target channel set to #{} ({})", channel.name, channel.id);

    let content = if app.session.has_access_token().await {
        format!("Spotify status channel set to <#{}>. Starting updates.", channel.id)
    } else {
        format!(
            "Spotify status channel set to <#{}>, but Spotify is not authenticated yet. \
             Check the bot console for the authorization link.",
            channel.id
        )
    };
    ctx.send(CreateReply::default().content(content).ephemeral(true))
        .await?;

    let started = app.poller.start_if_needed().await;
    info!("Polling after /channelset: {started:?}");
    Ok(())
}

/// Fetches lyrics for the currently playing song
#[poise::command(slash_command)]
pub async fn fetchlyrics(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer().await?;
    let app = &ctx.data().app;
    let reply = match lyrics_reply(app.session.as_ref(), &app.lyrics).await {
        LyricsReply::Text(text) => CreateReply::default().content(text),
        LyricsReply::Embed(payload) => CreateReply::default().embed(payload.to_embed()),
    };
    ctx.send(reply).await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum LyricsReply {
    Text(String),
    Embed(StatusPayload),
}

/// Builds the answer to a lyrics request for whatever is playing now.
pub async fn lyrics_reply(source: &dyn PlaybackSource, lyrics: &LrclibClient) -> LyricsReply {
    if !source.is_authenticated().await {
        return LyricsReply::Text(
            "Spotify is not authenticated. Please complete the authorization flow first."
                .to_string(),
        );
    }

    let playback = match source.current_playback().await {
        Outcome::Done(playback) => playback,
        Outcome::Soft(e) | Outcome::Fatal(e) => {
            warn!("Could not fetch playback for lyrics: {e}");
            return LyricsReply::Text("Couldn't reach Spotify right now. Try again shortly.".to_string());
        }
    };
    let Some(track) = playback.as_ref().and_then(|p| p.now_playing()) else {
        return LyricsReply::Text("Nothing is currently playing on Spotify.".to_string());
    };

    match lyrics.fetch(track).await {
        Ok(Some(found)) => LyricsReply::Embed(embeds::lyrics(track, &found)),
        Ok(None) => LyricsReply::Text(format!(
            "Couldn't find lyrics for **{}** by **{}**.",
            track.name,
            track.artist_line()
        )),
        Err(e) => {
            error!("Error fetching lyrics: {e}");
            LyricsReply::Embed(embeds::error(
                "Lyrics Error",
                "Failed to fetch lyrics. Please try again later.",
            ))
        }
    }
}

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::InteractionCreate {
        interaction: serenity::Interaction::Component(component),
    } = event
    {
        handle_button(ctx, component, data).await?;
    }
    Ok(())
}

async fn handle_button(
    ctx: &serenity::Context,
    component: &serenity::ComponentInteraction,
    data: &Data,
) -> Result<(), Error> {
    let Some(track_id) = embeds::lyrics_button_track(&component.data.custom_id) else {
        component
            .create_response(
                &ctx.http,
                serenity::CreateInteractionResponse::Message(
                    serenity::CreateInteractionResponseMessage::new()
                        .content("This button is not recognized.")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    info!("Lyrics button pressed by {} for track {track_id}", component.user.name);
    component
        .create_response(
            &ctx.http,
            serenity::CreateInteractionResponse::Defer(
                serenity::CreateInteractionResponseMessage::new(),
            ),
        )
        .await?;

    let edit = match lyrics_reply(data.app.session.as_ref(), &data.app.lyrics).await {
        LyricsReply::Text(text) => serenity::EditInteractionResponse::new().content(text),
        LyricsReply::Embed(payload) => {
            serenity::EditInteractionResponse::new().embed(payload.to_embed())
        }
    };
    component.edit_response(&ctx.http, edit).await?;
    Ok(())
}

pub async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Error executing /{}: {error:#}", ctx.command().name);
            let reply = CreateReply::default().content(GENERIC_FAILURE).ephemeral(true);
            if let Err(e) = ctx.send(reply).await {
                error!("Failed to send error reply: {e}");
            }
        }
        poise::FrameworkError::EventHandler { error, event, .. } => {
            error!("Error handling {}: {error:#}", event.snake_case_name());
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling error: {e}");
            }
        }
    }
}

pub async fn pre_command(ctx: Context<'_>) {
    info!(
        "/{} invoked by {} in {}",
        ctx.command().qualified_name,
        ctx.author().name,
        ctx.channel_id()
    );
}
