mod app;
mod commands;
mod config;
mod discord;
mod lock;
mod lyrics;
mod outcome;
mod poll;
mod spotify;
mod store;

use anyhow::{Context as _, Result};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    app::App,
    commands::Data,
    config::Config,
    lock::InstanceLock,
    store::CredentialStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging setup ────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("spotify_status_bot=info,serenity=warn,poise=warn"));
    fmt().with_env_filter(filter).init();

    // ── Load config ──────────────────────────────────────────────────────────
    let config = Config::load()?;

    // ── Single instance ──────────────────────────────────────────────────────
    let _lock = match InstanceLock::acquire(&config.lock_file) {
        Ok(lock) => lock,
        Err(e) => {
            error!("{e}");
            return Err(e.into());
        }
    };

    // ── State + components ───────────────────────────────────────────────────
    let store = Arc::new(CredentialStore::open(&config.state_file));
    let app = App::new(&config, store);

    // ── Discord client ───────────────────────────────────────────────────────
    let setup_app = Arc::clone(&app);
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            event_handler: |ctx, event, framework, data| {
                Box::pin(commands::event_handler(ctx, event, framework, data))
            },
            on_error: |error| Box::pin(commands::on_error(error)),
            pre_command: |ctx| Box::pin(commands::pre_command(ctx)),
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Logged in as {}", ready.user.name);
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                info!("Slash commands registered");
                setup_app.on_ready(ctx).await;
                Ok(Data { app: setup_app })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::GUILD_INTEGRATIONS;
    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .context("failed to create Discord client")?;

    // ── Shutdown on signal ───────────────────────────────────────────────────
    let shard_manager = client.shard_manager.clone();
    let shutdown_app = Arc::clone(&app);
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_app.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // ── Run ──────────────────────────────────────────────────────────────────
    if let Err(e) = client.start().await {
        error!("Discord client error: {e:?}");
        app.shutdown().await;
        return Err(e.into());
    }

    info!("Bot stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            signal.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
