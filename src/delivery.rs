//! Outbound notification transport.
//!
//! The scheduler loops only know how to hand a rendered message to a user id;
//! the concrete chat surface lives behind `DeliverySink`. Production uses a
//! Discord DM via the serenity HTTP client, tests use recording fakes.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serenity::http::Http;
use serenity::model::id::UserId;

/// Deliver a rendered notification to one user.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn send(&self, user_id: i64, text: &str) -> Result<()>;
}

/// Discord delivery: opens (or reuses) the user's DM channel and posts there.
pub struct DiscordSink {
    http: Arc<Http>,
}

impl DiscordSink {
    pub fn new(http: Arc<Http>) -> Self {
        DiscordSink { http }
    }
}

#[async_trait]
impl DeliverySink for DiscordSink {
    async fn send(&self, user_id: i64, text: &str) -> Result<()> {
        let http = self.http.as_ref();
        let channel = UserId(user_id as u64)
            .create_dm_channel(http)
            .await
            .with_context(|| format!("open DM channel for user {user_id}"))?;
        channel
            .say(http, text)
            .await
            .with_context(|| format!("send DM to user {user_id}"))?;
        debug!("Delivered {} chars to user {user_id}", text.len());
        Ok(())
    }
}
