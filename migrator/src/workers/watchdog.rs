use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use migrator_config::shared::WatchdogConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, MigrationError, MigrationResult};
use crate::metrics::MIGRATOR_STALLS_DETECTED_TOTAL;
use crate::state::progress::ProgressTracker;
use crate::workers::base::{Worker, WorkerHandle, WorkerType};

/// What the watchdog last concluded about the migration's liveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StallState {
    pub stalled: bool,
    /// Number of times the migration went from progressing to stalled.
    pub stalls_detected: u64,
    /// Time without a point of interest at the last check.
    pub idle_for: Duration,
}

#[derive(Debug)]
pub struct StallWatchdogHandle {
    state_rx: watch::Receiver<StallState>,
    join_handle: JoinHandle<MigrationResult<()>>,
}

impl StallWatchdogHandle {
    pub fn subscribe(&self) -> watch::Receiver<StallState> {
        self.state_rx.clone()
    }
}

impl WorkerHandle<StallState> for StallWatchdogHandle {
    fn state(&self) -> StallState {
        *self.state_rx.borrow()
    }

    async fn wait(self) -> MigrationResult<()> {
        match self.join_handle.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "watchdog worker task panicked");
                bail!(
                    ErrorKind::WatchdogWorkerPanic,
                    "Watchdog worker panicked",
                    err
                );
            }
        }
    }
}

/// Flags the migration as stalled once no point of interest was marked for longer than the
/// configured threshold.
#[derive(Debug)]
pub struct StallWatchdog {
    progress: Arc<ProgressTracker>,
    stall_threshold: Duration,
    check_interval: Duration,
    shutdown_rx: ShutdownRx,
    state_tx: watch::Sender<StallState>,
}

impl StallWatchdog {
    pub fn new(
        progress: Arc<ProgressTracker>,
        config: &WatchdogConfig,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        let (state_tx, _) = watch::channel(StallState::default());

        Self {
            progress,
            stall_threshold: Duration::from_millis(config.stall_threshold_ms),
            check_interval: Duration::from_millis(config.check_interval_ms),
            shutdown_rx,
            state_tx,
        }
    }

    /// Compares the time since the last point of interest to the threshold and publishes the
    /// result.
    pub fn check(&self) -> StallState {
        let idle_for = self.progress.time_since_point_of_interest();
        let stalled = idle_for >= self.stall_threshold;

        let mut became_stalled = false;
        let mut recovered = false;
        self.state_tx.send_modify(|state| {
            became_stalled = stalled && !state.stalled;
            recovered = !stalled && state.stalled;

            if became_stalled {
                state.stalls_detected += 1;
            }
            state.stalled = stalled;
            state.idle_for = idle_for;
        });

        if became_stalled {
            counter!(MIGRATOR_STALLS_DETECTED_TOTAL).increment(1);
            warn!(
                idle_ms = idle_for.as_millis() as u64,
                threshold_ms = self.stall_threshold.as_millis() as u64,
                iteration = self.progress.iteration(),
                "migration stalled: no progress recorded"
            );
        } else if recovered {
            info!(iteration = self.progress.iteration(), "migration progressing again");
        }

        *self.state_tx.borrow()
    }

    async fn run(self) -> MigrationResult<()> {
        info!(
            worker_type = WorkerType::Watchdog.as_str(),
            threshold_ms = self.stall_threshold.as_millis() as u64,
            interval_ms = self.check_interval.as_millis() as u64,
            "starting watchdog worker"
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for_shutdown() => break,

                _ = ticker.tick() => {
                    self.check();
                }
            }
        }

        info!("watchdog worker shutting down");

        Ok(())
    }
}

impl Worker<StallWatchdogHandle, StallState> for StallWatchdog {
    type Error = MigrationError;

    async fn start(self) -> Result<StallWatchdogHandle, Self::Error> {
        let state_rx = self.state_tx.subscribe();
        let join_handle = tokio::spawn(self.run());

        Ok(StallWatchdogHandle {
            state_rx,
            join_handle,
        })
    }
}
