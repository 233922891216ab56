use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::bail;
use crate::cutover::{CutoverCoordinator, CutoverExecutor};
use crate::error::{ErrorKind, MigrationResult};
use crate::schema::TableName;

/// A call received by [`FakeCutoverExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    Lock(String),
    Unlock(String),
    InjectDrainMarker(u64),
    Rename(String),
}

#[derive(Debug, Default)]
struct FakeCutoverExecutorInner {
    calls: Mutex<Vec<ExecutorCall>>,
    coordinator: Mutex<Option<CutoverCoordinator>>,
    lock_failures: AtomicU64,
    unlock_failures: AtomicU64,
    rename_failures: AtomicU64,
    lock_delay: Mutex<Option<Duration>>,
    drop_drain_markers: AtomicBool,
}

/// Cutover executor recording every call instead of touching a database.
///
/// When attached to a coordinator it plays the event applier too: every injected drain marker
/// is reported as processed right away.
#[derive(Debug, Clone, Default)]
pub struct FakeCutoverExecutor {
    inner: Arc<FakeCutoverExecutorInner>,
}

impl FakeCutoverExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports drain markers to `coordinator` as soon as they are injected.
    pub fn draining_into(coordinator: &CutoverCoordinator) -> Self {
        let executor = Self::new();
        *executor.inner.coordinator.lock() = Some(coordinator.clone());

        executor
    }

    pub fn fail_next_locks(&self, count: u64) {
        self.inner.lock_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_unlocks(&self, count: u64) {
        self.inner.unlock_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_renames(&self, count: u64) {
        self.inner.rename_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_lock_delay(&self, delay: Duration) {
        *self.inner.lock_delay.lock() = Some(delay);
    }

    /// Stops reporting drain markers, as if the applier fell behind.
    pub fn drop_drain_markers(&self) {
        self.inner.drop_drain_markers.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.inner.calls.lock().clone()
    }

    /// Returns `true` if more lock calls than unlock calls were made, counting failed unlocks.
    pub fn holds_locks(&self) -> bool {
        let calls = self.inner.calls.lock();
        let locks = calls
            .iter()
            .filter(|call| matches!(call, ExecutorCall::Lock(_)))
            .count();
        let unlocks = calls
            .iter()
            .filter(|call| matches!(call, ExecutorCall::Unlock(_)))
            .count();

        locks > unlocks
    }

    fn record(&self, call: ExecutorCall) {
        self.inner.calls.lock().push(call);
    }
}

fn take_failure(failures: &AtomicU64) -> bool {
    failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
            remaining.checked_sub(1)
        })
        .is_ok()
}

impl CutoverExecutor for FakeCutoverExecutor {
    async fn lock_tables(&self, table: &TableName) -> MigrationResult<()> {
        self.record(ExecutorCall::Lock(table.to_string()));

        let lock_delay = *self.inner.lock_delay.lock();
        if let Some(lock_delay) = lock_delay {
            tokio::time::sleep(lock_delay).await;
        }

        if take_failure(&self.inner.lock_failures) {
            bail!(
                ErrorKind::LockTablesFailed,
                "Failed to lock tables",
                format!("Lock wait timeout exceeded on {table}")
            );
        }

        Ok(())
    }

    async fn unlock_tables(&self, table: &TableName) -> MigrationResult<()> {
        self.record(ExecutorCall::Unlock(table.to_string()));

        if take_failure(&self.inner.unlock_failures) {
            bail!(
                ErrorKind::UnlockTablesFailed,
                "Failed to unlock tables",
                format!("Connection holding the locks on {table} was lost")
            );
        }

        Ok(())
    }

    async fn inject_drain_marker(&self, _table: &TableName, attempt: u64) -> MigrationResult<()> {
        self.record(ExecutorCall::InjectDrainMarker(attempt));

        if !self.inner.drop_drain_markers.load(Ordering::SeqCst) {
            let coordinator = self.inner.coordinator.lock().clone();
            if let Some(coordinator) = coordinator {
                coordinator.mark_all_events_processed(attempt);
            }
        }

        Ok(())
    }

    async fn rename_tables(&self, table: &TableName) -> MigrationResult<()> {
        self.record(ExecutorCall::Rename(table.to_string()));

        if take_failure(&self.inner.rename_failures) {
            bail!(
                ErrorKind::RenameTablesFailed,
                "Failed to rename tables",
                format!("Rename of {table} was rejected")
            );
        }

        Ok(())
    }
}
