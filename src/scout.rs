use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dedup::{DedupCache, SWEEP_INTERVAL};
use crate::event::Event;
use crate::limiter::DispatchLimiter;
use crate::notifier::AlertSender;
use crate::rules::{self, MatchRule};

const ALERT_TEXT_LIMIT: usize = 200;

/// Consumes inbound events and dispatches alerts for rule matches.
///
/// Owns the compiled rules, the dedup cache and the dispatch limiter. Its
/// state survives ingestion restarts; only the inbound channel side is
/// supervised.
pub struct Scout {
    rules: Vec<MatchRule>,
    cache: Arc<DedupCache>,
    limiter: DispatchLimiter,
    sender: Arc<dyn AlertSender>,
}

impl Scout {
    pub fn new(keywords: &[String], sender: Arc<dyn AlertSender>) -> Self {
        Self {
            rules: rules::compile(keywords),
            cache: Arc::new(DedupCache::new()),
            limiter: DispatchLimiter::default(),
            sender,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Consume the inbound channel until cancellation or the channel closes.
    /// Also owns the periodic dedup sweep for the duration of the run.
    pub async fn run(&self, cancel: CancellationToken, mut rx: mpsc::Receiver<Event>) {
        let sweep_token = cancel.child_token();
        let sweeper = {
            let cache = Arc::clone(&self.cache);
            let token = sweep_token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
                // interval fires immediately; the first sweep can wait
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = ticker.tick() => cache.sweep(Instant::now()),
                    }
                }
            })
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.process(&cancel, event).await,
                    None => break,
                },
            }
        }

        sweep_token.cancel();
        let _ = sweeper.await;
    }

    async fn process(&self, cancel: &CancellationToken, event: Event) {
        let key = event.dedup_key();
        if self.cache.seen(key) {
            return;
        }

        // First rule in input order wins
        let Some(rule) = self.rules.iter().find(|r| r.check(&event.text)) else {
            return;
        };

        // Mark before dispatch so a slow delivery cannot let the same event
        // retrigger.
        self.cache.mark_seen(key);
        info!(
            keyword = %rule.original(),
            channel = %event.chat_title,
            msg_id = event.id,
            "Keyword matched"
        );

        let alert = format_alert(rule.original(), &event);

        // Non-blocking acquire first; when saturated, block rather than drop
        // the alert, stalling the ingestion loop momentarily.
        let permit = match self.limiter.try_acquire() {
            Some(permit) => permit,
            None => {
                warn!(
                    msg_id = event.id,
                    "Notification queue full, blocking momentarily to dispatch alert"
                );
                match self.limiter.acquire(cancel).await {
                    Some(permit) => permit,
                    // Shutdown during the wait; dropping the alert is accepted
                    None => return,
                }
            }
        };

        let sender = Arc::clone(&self.sender);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _permit = permit;
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = sender.send(&alert) => {
                    if let Err(e) = result {
                        error!(error = %e, "Failed to send notification");
                    }
                }
            }
        });
    }
}

fn format_alert(keyword: &str, event: &Event) -> String {
    let mut alert = format!(
        "\u{1F6A8} <b>Match:</b> {keyword}\n\
         \u{1F4E2} <b>Chat:</b> {}\n\
         \u{1F552} <b>Time:</b> {}",
        event.chat_title,
        event.date.format("%-I:%M%p"),
    );
    if let Some(link) = &event.link {
        alert.push_str(&format!(
            "\n\u{1F517} <a href=\"{link}\">Link to Message</a>"
        ));
    }
    alert.push_str(&format!("\n\n<i>{}</i>", truncate(&event.text, ALERT_TEXT_LIMIT)));
    alert
}

/// Truncate to at most `max` characters, on a char boundary, with a trailing
/// ellipsis marker when anything was cut.
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
