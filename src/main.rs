mod config;
mod dedup;
mod event;
mod ingest;
mod limiter;
mod notifier;
mod rules;
mod scout;
mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::event::PeerDirectory;
use crate::ingest::TelegramConnector;
use crate::notifier::{AlertSender, TelegramNotifier};
use crate::scout::Scout;

/// Capacity of the ingestion -> monitor event queue.
const EVENT_QUEUE_CAPACITY: usize = 100;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,telescout=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Single governing cancellation signal for every task
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            cancel.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

    let peers = Arc::new(PeerDirectory::new(&config.monitoring.chats));
    let sender: Arc<dyn AlertSender> = Arc::new(
        TelegramNotifier::new(&config.telegram.bot_token, config.telegram.alert_chat_id)
            .context("Failed to initialize notifier")?,
    );

    let scout = Arc::new(Scout::new(&config.monitoring.keywords, Arc::clone(&sender)));
    info!(
        monitored_chats = config.monitoring.chats.len(),
        keywords = scout.rule_count(),
        "Starting telescout"
    );

    // Monitor consumer; its state survives ingestion restarts
    let scout_task = tokio::spawn({
        let scout = Arc::clone(&scout);
        let cancel = cancel.clone();
        async move { scout.run(cancel, rx).await }
    });

    // Best-effort startup notification; abandoned if shutdown arrives first
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = sender.send("telescout is now online and monitoring.") => {
            if let Err(e) = result {
                error!(error = %e, "Failed to send startup notification");
            }
        }
    }

    let connector = TelegramConnector::new(&config.telegram.bot_token, peers, tx);
    let result = supervisor::supervise(cancel.clone(), &connector).await;

    // Unwind the monitor whether we got here by shutdown or by fatal error
    cancel.cancel();
    drop(connector);
    let _ = scout_task.await;

    result?;
    info!("telescout shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
