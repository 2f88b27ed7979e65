//! File Renamer Bot - Main Entry Point
//!
//! Telegram bot that renames, compresses and splits files sent to it,
//! limited to a daily number of actions per user.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use teloxide::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use file_renamer_bot::commands::{CommandHandler, Messenger};
use file_renamer_bot::config::BotSettings;
use file_renamer_bot::dispatch::{ActionDispatcher, FileProcessor};
use file_renamer_bot::processing::{FileTransfer, TransferPipeline};
use file_renamer_bot::quota::{Clock, QuotaEngine, SystemClock};
use file_renamer_bot::storage::{MemoryStore, SqliteStore, UserStore};
use file_renamer_bot::telegram::{self, BotApp, RateLimiter, Shortener, TelegramTransfer};

/// Telegram bot for renaming, compressing and splitting files.
#[derive(Parser, Debug)]
#[command(name = "file_renamer_bot")]
#[command(about = "Rename, compress and split Telegram files under a daily quota")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Database URL, overriding `DATABASE_URL`.
    #[arg(long)]
    database_url: Option<String>,

    /// Keep users in memory only (nothing survives a restart).
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let mut settings =
        BotSettings::from_env().context("Failed to load bot settings from environment")?;
    if let Some(url) = args.database_url {
        settings.database_url = url;
    }

    for dir in [&settings.tmp_dir, &settings.thumb_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    let store: Arc<dyn UserStore> = if args.ephemeral {
        warn!("Running with an in-memory user store");
        Arc::new(MemoryStore::new(settings.account_defaults()))
    } else {
        Arc::new(
            SqliteStore::open(&settings.database_url, settings.account_defaults())
                .await
                .context("Failed to open user store")?,
        )
    };

    let bot = Bot::new(settings.bot_token.clone());
    let bot_username = match settings.bot_username.clone() {
        Some(name) => Some(name),
        None => match bot.get_me().await {
            Ok(me) => me.user.username.clone(),
            Err(e) => {
                warn!("Could not fetch bot username, share links disabled: {}", e);
                None
            }
        },
    };

    let shortener = match settings.shortener.clone() {
        Some(config) => Some(Shortener::new(config).context("Failed to build HTTP client")?),
        None => None,
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let quota = QuotaEngine::new(Arc::clone(&store), clock);

    let transfer = Arc::new(TelegramTransfer::new(
        bot.clone(),
        RateLimiter::new(settings.send_interval()),
    ));
    let pipeline = TransferPipeline::new(
        Arc::clone(&transfer) as Arc<dyn FileTransfer>,
        settings.transfer_limits(),
    );
    let dispatcher = ActionDispatcher::new(
        quota.clone(),
        Arc::new(pipeline) as Arc<dyn FileProcessor>,
        settings.tmp_dir.clone(),
    );
    let commands = CommandHandler::new(
        quota.clone(),
        Arc::clone(&transfer) as Arc<dyn Messenger>,
    );

    let app = Arc::new(BotApp {
        quota,
        dispatcher,
        commands,
        transfer,
        shortener,
        bot_username,
        thumb_dir: settings.thumb_dir.clone(),
        split_size_mb: settings.split_size_mb,
        use_nsfw_filter: settings.use_nsfw_filter,
    });

    info!(
        "Starting file renamer bot as @{} (default limit: {}, admins: {})",
        app.bot_username.as_deref().unwrap_or("unknown"),
        settings.default_daily_limit,
        settings.admins.len()
    );
    info!("Bot is running. Use Ctrl+C to stop.");

    telegram::run(bot, Arc::clone(&app)).await;

    info!("Shutting down...");
    store.close().await;

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
