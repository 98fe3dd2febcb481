use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use dotenvy::dotenv;
use log::{error, info};
use serenity::http::Http;
use tokio_util::sync::CancellationToken;

use assistant::core::Config;
use assistant::database::Database;
use assistant::delivery::DiscordSink;
use assistant::features::digest::DailyScheduler;
use assistant::features::reminders::ReminderScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting assistant notification engine...");

    let timezone = Tz::from_str(&config.timezone)
        .map_err(|e| anyhow::anyhow!("invalid TIMEZONE {:?}: {e}", config.timezone))?;

    let database = Database::new(&config.database_path, timezone)
        .await
        .with_context(|| format!("open database at {}", config.database_path))?;

    let http = Arc::new(Http::new(&config.discord_token));
    let sink = Arc::new(DiscordSink::new(http));

    let shutdown = CancellationToken::new();

    let reminder_scheduler = ReminderScheduler::new(
        Arc::new(database.clone()),
        sink.clone(),
        Duration::from_secs(config.scheduler_interval_secs),
        timezone,
        shutdown.child_token(),
    );
    let reminder_handle = tokio::spawn(reminder_scheduler.run());
    info!(
        "⏰ Reminder scheduler polling every {}s ({timezone})",
        config.scheduler_interval_secs
    );

    let daily_scheduler = DailyScheduler::new(
        Arc::new(database.clone()),
        Arc::new(database.clone()),
        Arc::new(database),
        sink,
        timezone,
        shutdown.child_token(),
    );
    let daily_handle = tokio::spawn(daily_scheduler.run());
    info!("🗓 Daily scheduler started");

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal")?;
    info!("Shutdown signal received, stopping schedulers...");
    shutdown.cancel();

    if let Err(e) = reminder_handle.await {
        error!("Reminder scheduler task panicked: {e}");
    }
    if let Err(e) = daily_handle.await {
        error!("Daily scheduler task panicked: {e}");
    }

    info!("Shutdown complete. 👋");
    Ok(())
}
