use std::future::Future;

use crate::error::MigrationResult;

/// Kinds of background workers run next to the row copy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerType {
    /// Samples load and publishes throttle decisions.
    Throttler,
    /// Detects migrations that stopped making progress.
    Watchdog,
}

impl WorkerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::Throttler => "throttler",
            WorkerType::Watchdog => "watchdog",
        }
    }
}

/// Trait for background workers.
///
/// Starting a worker spawns its loop and returns a handle to observe and await it.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type returned when worker startup fails.
    type Error;

    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// Handle on a running worker.
///
/// The state is a snapshot: holding it does not keep the worker alive.
pub trait WorkerHandle<S> {
    fn state(&self) -> S;

    /// Waits for the worker to finish. A panicked worker is reported as an error.
    fn wait(self) -> impl Future<Output = MigrationResult<()>> + Send;
}
