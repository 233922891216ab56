use std::time::Duration;

use metrics::counter;
use migrator_config::shared::ThrottleConfig;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, MigrationError, MigrationResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{THROTTLER__BEFORE_SAMPLE, migrator_fail_point};
use crate::metrics::MIGRATOR_LOAD_SAMPLING_FAILURES_TOTAL;
use crate::throttle::{LoadSample, LoadSampler, ThrottleController, ThrottleDecision, ThrottleReason};
use crate::workers::base::{Worker, WorkerHandle, WorkerType};

/// Handle on a running [`ThrottlerWorker`].
#[derive(Debug)]
pub struct ThrottlerWorkerHandle {
    controller: ThrottleController,
    join_handle: JoinHandle<MigrationResult<()>>,
}

impl WorkerHandle<ThrottleDecision> for ThrottlerWorkerHandle {
    /// Returns the decision most recently published by the worker.
    fn state(&self) -> ThrottleDecision {
        self.controller.current_decision()
    }

    async fn wait(self) -> MigrationResult<()> {
        match self.join_handle.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "throttler worker task panicked");
                bail!(
                    ErrorKind::ThrottlerWorkerPanic,
                    "Throttler worker panicked",
                    err
                );
            }
        }
    }
}

/// Samples load at a fixed interval and publishes the resulting throttle decision.
///
/// A sample that fails, or takes longer than the interval, stops work until the next good
/// sample.
#[derive(Debug)]
pub struct ThrottlerWorker<S> {
    controller: ThrottleController,
    sampler: S,
    evaluation_interval: Duration,
    shutdown_rx: ShutdownRx,
}

impl<S> ThrottlerWorker<S>
where
    S: LoadSampler + Send + Sync + 'static,
{
    pub fn new(
        controller: ThrottleController,
        sampler: S,
        config: &ThrottleConfig,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            controller,
            sampler,
            evaluation_interval: Duration::from_millis(config.evaluation_interval_ms),
            shutdown_rx,
        }
    }

    /// Takes one sample, evaluates it and publishes the decision.
    pub async fn evaluate_once(&self) -> ThrottleDecision {
        let decision = match self.sample().await {
            Ok(sample) => self
                .controller
                .evaluate_with_lag(&sample.load, sample.replication_lag),
            Err(err) => {
                counter!(MIGRATOR_LOAD_SAMPLING_FAILURES_TOTAL).increment(1);
                warn!(error = %err, "load sampling failed, stopping work");

                ThrottleDecision::hard_stop(ThrottleReason::SamplingFailed {
                    error: err.to_string(),
                })
            }
        };

        self.controller.publish(decision.clone());
        debug!(
            hard_stop = decision.hard_stop,
            delay_ratio = decision.delay_ratio,
            "load evaluated"
        );

        decision
    }

    async fn sample(&self) -> MigrationResult<LoadSample> {
        #[cfg(feature = "failpoints")]
        migrator_fail_point(THROTTLER__BEFORE_SAMPLE)?;

        match tokio::time::timeout(self.evaluation_interval, self.sampler.sample()).await {
            Ok(result) => result,
            Err(_) => bail!(
                ErrorKind::LoadSamplingFailed,
                "Load sampling timed out",
                format!(
                    "No sample was returned within {}ms",
                    self.evaluation_interval.as_millis()
                )
            ),
        }
    }

    async fn run(self) -> MigrationResult<()> {
        info!(
            worker_type = WorkerType::Throttler.as_str(),
            interval_ms = self.evaluation_interval.as_millis() as u64,
            "starting throttler worker"
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut ticker = interval(self.evaluation_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for_shutdown() => break,

                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for_shutdown() => break,

                _ = self.evaluate_once() => {}
            }
        }

        info!("throttler worker shutting down");

        Ok(())
    }
}

impl<S> Worker<ThrottlerWorkerHandle, ThrottleDecision> for ThrottlerWorker<S>
where
    S: LoadSampler + Send + Sync + 'static,
{
    type Error = MigrationError;

    async fn start(self) -> Result<ThrottlerWorkerHandle, Self::Error> {
        let controller = self.controller.clone();
        let join_handle = tokio::spawn(self.run());

        Ok(ThrottlerWorkerHandle {
            controller,
            join_handle,
        })
    }
}
