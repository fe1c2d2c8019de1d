use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::requests::Request;
use teloxide::types::{AllowedUpdate, Message, UpdateKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event::{Event, PeerDirectory};

/// One blocking ingestion session. `Ok` means a graceful end (cancellation or
/// consumer gone); `Err` is a transient transport failure the supervisor may
/// restart.
#[async_trait]
pub trait IngestionSession: Send + Sync {
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

/// Builds a fresh session for each supervisor attempt. A `connect` error is
/// fatal and is never retried.
#[async_trait]
pub trait IngestionConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn IngestionSession>>;
}

/// Connects Telegram long-polling sessions for the configured bot.
pub struct TelegramConnector {
    token: String,
    peers: Arc<PeerDirectory>,
    tx: mpsc::Sender<Event>,
}

impl TelegramConnector {
    pub fn new(token: &str, peers: Arc<PeerDirectory>, tx: mpsc::Sender<Event>) -> Self {
        Self {
            token: token.to_string(),
            peers,
            tx,
        }
    }
}

#[async_trait]
impl IngestionConnector for TelegramConnector {
    async fn connect(&self) -> Result<Box<dyn IngestionSession>> {
        let bot = Bot::new(&self.token);

        // The one unrecoverable condition: a token Telegram rejects outright.
        let me = bot
            .get_me()
            .await
            .context("bot token validation failed")?;
        info!(bot = %me.username(), "Telegram client connected");

        Ok(Box::new(TelegramIngestor {
            bot,
            peers: Arc::clone(&self.peers),
            tx: self.tx.clone(),
        }))
    }
}

/// Long-polls the Bot API and forwards allow-listed messages as events.
pub struct TelegramIngestor {
    bot: Bot,
    peers: Arc<PeerDirectory>,
    tx: mpsc::Sender<Event>,
}

#[async_trait]
impl IngestionSession for TelegramIngestor {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut offset: i32 = 0;

        info!("Listening for updates...");
        loop {
            let poll = self
                .bot
                .get_updates()
                .offset(offset)
                .timeout(30)
                .allowed_updates([AllowedUpdate::Message, AllowedUpdate::ChannelPost]);

            let updates = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = poll.send() => result.context("getUpdates failed")?,
            };

            for update in updates {
                offset = update.id.0 as i32 + 1;

                let message = match update.kind {
                    UpdateKind::Message(ref msg) => msg,
                    UpdateKind::ChannelPost(ref msg) => msg,
                    _ => continue,
                };

                let Some(event) = self.to_event(message) else {
                    continue;
                };

                // Never block past shutdown on a full queue.
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    sent = self.tx.send(event) => {
                        // Consumer gone means the pipeline is shutting down
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

impl TelegramIngestor {
    /// Build an [`Event`] for an allow-listed chat, or `None` if the chat is
    /// not monitored or the message carries no text.
    fn to_event(&self, msg: &Message) -> Option<Event> {
        let chat_id = msg.chat.id.0;

        if !self.peers.contains(chat_id) {
            debug!(chat_id, "Ignoring message from non-monitored chat");
            return None;
        }

        let text = msg.text()?;

        let title = msg.chat.title().unwrap_or_default();
        let username = msg.chat.username();
        self.peers.update(chat_id, title, username);

        // Fall back to cached metadata when the update omits it
        let info = self.peers.lookup(chat_id).unwrap_or_default();
        let title = if title.is_empty() { info.title } else { title.to_string() };
        let username = username.map(str::to_string).or(info.username);

        Some(Event {
            id: msg.id.0,
            chat_id,
            chat_title: title,
            text: text.to_string(),
            date: msg.date,
            link: build_link(
                msg.url().map(|u| u.to_string()),
                username.as_deref(),
                msg.id.0,
            ),
        })
    }
}

/// Deep link for an alert: the Bot API's own link when it has one, else a
/// public `t.me` link built from the chat's username.
fn build_link(url: Option<String>, username: Option<&str>, message_id: i32) -> Option<String> {
    url.or_else(|| username.map(|u| format!("https://t.me/{u}/{message_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_prefers_the_api_url() {
        let link = build_link(
            Some("https://t.me/c/1234/7".to_string()),
            Some("deals"),
            7,
        );
        assert_eq!(link.as_deref(), Some("https://t.me/c/1234/7"));
    }

    #[test]
    fn link_falls_back_to_chat_username() {
        let link = build_link(None, Some("deals"), 42);
        assert_eq!(link.as_deref(), Some("https://t.me/deals/42"));
    }

    #[test]
    fn no_url_and_no_username_means_no_link() {
        assert_eq!(build_link(None, None, 42), None);
    }
}
