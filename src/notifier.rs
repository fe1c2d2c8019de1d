use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

/// Capability for delivering one formatted alert.
#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

const MAX_ATTEMPTS: u32 = 3;
const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

enum AttemptError {
    /// HTTP 429; the wait the remote side asked for.
    RateLimited { retry_after: Duration },
    Other(anyhow::Error),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {}s", retry_after.as_secs())
            }
            AttemptError::Other(e) => write!(f, "{e:#}"),
        }
    }
}

/// Sends alerts through the Telegram Bot API.
///
/// Retries are local to a single `send` call: up to 3 attempts with
/// exponential backoff, honoring `Retry-After` on 429 responses.
pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
    chat_id: i64,
    base_url: String,
    backoff_base: Duration,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: i64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            token: token.to_string(),
            chat_id,
            base_url: "https://api.telegram.org".to_string(),
            backoff_base: Duration::from_secs(1),
        })
    }

    #[cfg(test)]
    fn with_endpoint(mut self, base_url: &str, backoff_base: Duration) -> Self {
        self.base_url = base_url.to_string();
        self.backoff_base = backoff_base;
        self
    }

    async fn attempt_send(&self, url: &str, text: &str) -> Result<(), AttemptError> {
        let request = SendMessageRequest {
            chat_id: self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .context("network error")
            .map_err(AttemptError::Other)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(RATE_LIMIT_FALLBACK);
            return Err(AttemptError::RateLimited { retry_after });
        }

        Err(AttemptError::Other(anyhow::anyhow!(
            "api returned status: {status}"
        )))
    }
}

#[async_trait]
impl AlertSender for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);

        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.attempt_send(&url, text).await {
                Ok(()) => {
                    info!(chat_id = self.chat_id, "Notification sent");
                    return Ok(());
                }
                Err(e) => {
                    // Exponential backoff, except the remote side's Retry-After
                    // hint wins when we are rate limited.
                    let delay = match &e {
                        AttemptError::RateLimited { retry_after } => *retry_after,
                        AttemptError::Other(_) => self.backoff_base * (1u32 << attempt),
                    };
                    warn!(attempt = attempt + 1, error = %e, "Failed to send notification, retrying...");
                    last_err = Some(e);

                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        bail!(
            "failed to send notification after {MAX_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )
    }
}
