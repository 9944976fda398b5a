use std::future::Future;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{Publisher, Updater};
use crate::core::{ConnectionConfig, Error, Result, SchedulerConfig};
use crate::repo::ControllerRepo;

/// Topic of the bridge availability message
pub const STATUS_TOPIC: &str = "status";

/// Availability payload published on shutdown
pub const OFFLINE_PAYLOAD: &str = "offline";

/// Requests an immediate state refresh from outside the control loop
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl RefreshHandle {
    /// Requests a refresh and waits until the control loop has taken it
    pub async fn request(&self) -> Result<()> {
        let (ack, taken) = oneshot::channel();
        self.tx.send(ack).await.map_err(|_| Error::SchedulerStopped)?;
        taken.await.map_err(|_| Error::SchedulerStopped)
    }

    /// Requests a refresh without waiting. Returns false when the request was
    /// folded into a pending one or the loop has stopped.
    pub fn try_request(&self) -> bool {
        let (ack, _) = oneshot::channel();
        self.tx.try_send(ack).is_ok()
    }
}

/// Control loop side of the refresh channel
#[derive(Debug)]
pub struct RefreshReceiver {
    rx: mpsc::Receiver<oneshot::Sender<()>>,
}

impl RefreshReceiver {
    /// Takes the next request and releases its sender
    async fn recv(&mut self) -> Option<()> {
        let ack = self.rx.recv().await?;
        // The sender may have given up waiting
        let _ = ack.send(());
        Some(())
    }
}

/// Creates the refresh channel; at most one request is pending at a time
pub fn refresh_channel() -> (RefreshHandle, RefreshReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (RefreshHandle { tx }, RefreshReceiver { rx })
}

/// Resolves on the first interrupt or termination signal
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Unable to listen for interrupt: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for termination: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Interrupt received"),
        _ = terminate => info!("Termination requested"),
    }
}

/// The bridge's single control loop.
///
/// Owns the repository and the collaborators; every update and publish call
/// runs to completion before the next event is taken.
pub struct Scheduler<U, P> {
    /// Decoded controller state
    repo: ControllerRepo,
    /// Connection settings handed to the updater
    connection: ConnectionConfig,
    /// Timers and priming
    config: SchedulerConfig,
    /// Device side collaborator
    updater: U,
    /// Output side collaborator
    publisher: P,
}

impl<U: Updater, P: Publisher> Scheduler<U, P> {
    /// Creates a new scheduler
    pub fn new(
        connection: ConnectionConfig,
        config: SchedulerConfig,
        updater: U,
        publisher: P,
    ) -> Self {
        Scheduler {
            repo: ControllerRepo::new(),
            connection,
            config,
            updater,
            publisher,
        }
    }

    /// Current repository contents
    pub fn repo(&self) -> &ControllerRepo {
        &self.repo
    }

    /// Runs the full update until it succeeds, waiting the priming backoff
    /// between attempts. Returns the number of attempts made.
    pub async fn prime(&mut self) -> Result<u32> {
        let policy = self.config.priming;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.updater.update_all(&mut self.repo, &self.connection).await {
                Ok(()) => {
                    info!(attempts, "Initial update complete");
                    return Ok(attempts);
                }
                Err(e) => {
                    if policy.max_attempts.map_or(false, |max| attempts >= max) {
                        return Err(Error::Priming {
                            attempts,
                            source: Box::new(e),
                        });
                    }
                    warn!("Unable to do first update: {}", e);
                    info!("Retrying first update in {:?}", policy.backoff);
                    sleep(policy.backoff).await;
                }
            }
        }
    }

    /// Primes the repository, then serves timers and refresh requests until
    /// `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F, mut refresh: RefreshReceiver) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        let primed = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            result = self.prime() => Some(result),
        };
        match primed {
            None => {
                self.go_offline().await;
                return Ok(());
            }
            Some(Err(e)) => {
                self.go_offline().await;
                return Err(e);
            }
            Some(Ok(_)) => {}
        }

        self.publisher.publish_state(&self.repo, false).await;
        self.publisher.publish_discovery(&self.repo, false).await;

        let now = Instant::now();
        let mut full_timer = interval_at(now + self.config.full_interval, self.config.full_interval);
        let mut state_timer =
            interval_at(now + self.config.state_interval, self.config.state_interval);
        full_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        state_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.go_offline().await;
                    return Ok(());
                }
                _ = full_timer.tick() => self.full_refresh().await,
                Some(()) = refresh.recv() => {
                    info!("Refresh requested");
                    self.state_refresh().await;
                }
                _ = state_timer.tick() => self.state_refresh().await,
            }
        }
    }

    async fn full_refresh(&mut self) {
        debug!("Updating all registers");
        match self.updater.update_all(&mut self.repo, &self.connection).await {
            Ok(()) => {
                self.publisher.publish_state(&self.repo, true).await;
                self.publisher.publish_discovery(&self.repo, true).await;
            }
            Err(e) => error!("Unable to update: {}", e),
        }
    }

    async fn state_refresh(&mut self) {
        debug!("Updating state");
        match self.updater.update_state(&mut self.repo, &self.connection).await {
            Ok(()) => self.publisher.publish_state(&self.repo, false).await,
            Err(e) => error!("Unable to update state: {}", e),
        }
    }

    async fn go_offline(&mut self) {
        self.publisher
            .publish_raw(STATUS_TOPIC, OFFLINE_PAYLOAD, true)
            .await;
        if let Err(e) = self.updater.close().await {
            warn!("Error while closing controller connection: {}", e);
        }
        debug!("Exit application");
    }
}
