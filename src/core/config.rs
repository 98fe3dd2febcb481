//! Environment-backed configuration.
//!
//! Every knob comes from the process environment (a `.env` file is loaded by
//! the binary before this runs). Only `DISCORD_TOKEN` is required; everything
//! else has a sensible default.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Bot token used for the Discord HTTP API.
    pub discord_token: String,
    /// Path to the SQLite database file.
    pub database_path: String,
    /// IANA timezone name all user-facing times are rendered in.
    pub timezone: String,
    /// How often the reminder poller wakes up, in seconds.
    pub scheduler_interval_secs: u64,
    /// Default log filter when RUST_LOG is unset.
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let discord_token = std::env::var("DISCORD_TOKEN")
            .context("DISCORD_TOKEN must be set (put it in .env or the environment)")?;

        let scheduler_interval_secs = match std::env::var("SCHEDULER_INTERVAL_SEC") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("SCHEDULER_INTERVAL_SEC is not a number: {raw:?}"))?,
            Err(_) => 30,
        };

        Ok(Config {
            discord_token,
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "assistant.db".to_string()),
            timezone: std::env::var("TIMEZONE").unwrap_or_else(|_| "Asia/Jakarta".to_string()),
            scheduler_interval_secs,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}
