use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::ingest::IngestionConnector;

const BACKOFF_SEED: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// A session that stayed up at least this long counts as a successful run and
/// resets the restart backoff.
const STABLE_RUN: Duration = Duration::from_secs(30);

/// Keep the ingestion connection alive until cancellation.
///
/// Transient session failures are restarted after an exponential backoff
/// (1s seed, doubled per consecutive failure, 60s cap). A `connect` failure is
/// fatal and surfaces to the caller as the process-terminating error. The
/// monitor and its background workers keep running across restarts; only the
/// ingestion side lives inside this loop.
pub async fn supervise(
    cancel: CancellationToken,
    connector: &dyn IngestionConnector,
) -> Result<()> {
    let mut backoff = BACKOFF_SEED;

    loop {
        if cancel.is_cancelled() {
            info!("Cancelled, shutting down supervisor");
            return Ok(());
        }

        let session = connector
            .connect()
            .await
            .context("failed to initialize ingestion session")?;

        let started = Instant::now();
        match session.run(cancel.clone()).await {
            Ok(()) => {
                info!("Ingestion session stopped gracefully");
                return Ok(());
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    info!("Ingestion session stopped (cancelled)");
                    return Ok(());
                }

                if started.elapsed() >= STABLE_RUN {
                    backoff = BACKOFF_SEED;
                }

                error!(error = %format!("{e:#}"), backoff = ?backoff, "Ingestion session crashed, restarting...");

                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Cancelled during restart backoff");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(backoff) => {
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestionSession;
    use anyhow::{anyhow, bail};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Script {
        FailFast,
        FailAfter(Duration),
        BlockUntilCancel,
    }

    struct ScriptedConnector {
        script: Mutex<VecDeque<Script>>,
        connects: Mutex<Vec<Instant>>,
        fail_connect: bool,
    }

    impl ScriptedConnector {
        fn new(script: Vec<Script>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                connects: Mutex::new(Vec::new()),
                fail_connect: false,
            }
        }

        fn connect_times(&self) -> Vec<Instant> {
            self.connects.lock().unwrap().clone()
        }
    }

    struct ScriptedSession(Script);

    #[async_trait]
    impl IngestionSession for ScriptedSession {
        async fn run(&self, cancel: CancellationToken) -> Result<()> {
            match self.0 {
                Script::FailFast => bail!("connection reset"),
                Script::FailAfter(d) => {
                    tokio::time::sleep(d).await;
                    bail!("connection reset after stable run")
                }
                Script::BlockUntilCancel => {
                    cancel.cancelled().await;
                    Ok(())
                }
            }
        }
    }

    #[async_trait]
    impl IngestionConnector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn IngestionSession>> {
            if self.fail_connect {
                return Err(anyhow!("invalid token"));
            }
            self.connects.lock().unwrap().push(Instant::now());
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::BlockUntilCancel);
            Ok(Box::new(ScriptedSession(step)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_back_off_exponentially() {
        let connector = ScriptedConnector::new(vec![
            Script::FailFast,
            Script::FailFast,
            Script::FailFast,
            Script::BlockUntilCancel,
        ]);
        let cancel = CancellationToken::new();

        let supervisor = {
            let cancel = cancel.clone();
            async { supervise(cancel, &connector).await }
        };
        let canceller = async {
            // Well past the 1s + 2s + 4s restart waits
            tokio::time::sleep(Duration::from_secs(30)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(supervisor, canceller);
        result.unwrap();

        let times = connector.connect_times();
        assert_eq!(times.len(), 4);
        assert_eq!(times[1] - times[0], Duration::from_secs(1));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
        assert_eq!(times[3] - times[2], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped_at_one_minute() {
        let mut script: Vec<Script> = (0..8).map(|_| Script::FailFast).collect();
        script.push(Script::BlockUntilCancel);
        let connector = ScriptedConnector::new(script);
        let cancel = CancellationToken::new();

        let supervisor = {
            let cancel = cancel.clone();
            async { supervise(cancel, &connector).await }
        };
        let canceller = async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(supervisor, canceller);
        result.unwrap();

        let times = connector.connect_times();
        assert_eq!(times.len(), 9);
        // 1, 2, 4, 8, 16, 32, 60, 60
        assert_eq!(times[7] - times[6], Duration::from_secs(60));
        assert_eq!(times[8] - times[7], Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn stable_run_resets_the_backoff() {
        let connector = ScriptedConnector::new(vec![
            Script::FailFast,
            Script::FailFast,
            // Third session stays up well past the stability threshold
            Script::FailAfter(Duration::from_secs(45)),
            Script::FailFast,
            Script::BlockUntilCancel,
        ]);
        let cancel = CancellationToken::new();

        let supervisor = {
            let cancel = cancel.clone();
            async { supervise(cancel, &connector).await }
        };
        let canceller = async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(supervisor, canceller);
        result.unwrap();

        let times = connector.connect_times();
        assert_eq!(times.len(), 5);
        // Waits 1s, 2s, then the stable run resets the ladder back to 1s
        assert_eq!(times[1] - times[0], Duration::from_secs(1));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
        // 45s stable session, then a 1s (seed) wait instead of 4s
        assert_eq!(
            times[3] - times[2],
            Duration::from_secs(45) + Duration::from_secs(1)
        );
        assert_eq!(times[4] - times[3], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_immediately() {
        let connector = ScriptedConnector::new(vec![Script::FailFast]);
        let cancel = CancellationToken::new();

        let supervisor = {
            let cancel = cancel.clone();
            async { supervise(cancel, &connector).await }
        };
        let canceller = async {
            // Mid-way through the first 1s backoff wait
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(supervisor, canceller);
        result.unwrap();

        // No restart happened after cancellation
        assert_eq!(connector.connect_times().len(), 1);
    }

    #[tokio::test]
    async fn graceful_session_end_stops_the_supervisor() {
        let connector = ScriptedConnector::new(vec![Script::BlockUntilCancel]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // run() observes the pre-cancelled token and returns Ok
        supervise(cancel, &connector).await.unwrap();
        assert!(connector.connect_times().is_empty());
    }

    #[tokio::test]
    async fn connect_failure_is_fatal() {
        let mut connector = ScriptedConnector::new(vec![]);
        connector.fail_connect = true;
        let cancel = CancellationToken::new();

        let err = supervise(cancel, &connector).await.unwrap_err();
        assert!(err.to_string().contains("failed to initialize"));
    }
}
