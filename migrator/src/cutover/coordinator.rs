use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use migrator_config::shared::{CutoverConfig, CutoverStrategy};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::concurrency::signal::{SignalRx, SignalTx, create_signal, notify};
use crate::cutover::executor::CutoverExecutor;
use crate::cutover::phase::CutoverPhase;
use crate::cutover::postpone::{PostponeFlagFile, PostponeSignal};
use crate::error::{ErrorKind, MigrationError, MigrationResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{
    CUTOVER__AFTER_LOCK_TABLES, CUTOVER__BEFORE_RENAME_TABLES, migrator_fail_point,
};
use crate::metrics::{
    CUTOVER_STRATEGY_LABEL, MIGRATOR_CRITICAL_SECTION_CONTENTION_TOTAL,
    MIGRATOR_CUTOVER_ATTEMPTS_TOTAL, MIGRATOR_CUTOVER_LOCK_DURATION_SECONDS, MIGRATOR_CUTOVER_PHASE,
    TABLE_NAME_LABEL,
};
use crate::schema::TableName;
use crate::state::progress::ProgressTracker;
use crate::throttle::ThrottleController;
use crate::{bail, migrator_error};

/// Pause between two cutover attempts.
const CUTOVER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Stand-in deadline, roughly 30 years away, for timeouts too large to add to an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns the instant `timeout` from now, saturating to [`FAR_FUTURE`] on overflow.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();

    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// How a cutover run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoverOutcome {
    Complete,
    Shutdown,
}

/// Timestamps of the last cutover attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CutoverTimings {
    pub lock_started_at: Option<Instant>,
    pub rename_started_at: Option<Instant>,
    pub rename_ended_at: Option<Instant>,
    pub unlocked_at: Option<Instant>,
}

impl CutoverTimings {
    /// Time the tables stayed locked, once they were released.
    pub fn lock_duration(&self) -> Option<Duration> {
        Some(
            self.unlocked_at?
                .saturating_duration_since(self.lock_started_at?),
        )
    }

    pub fn rename_duration(&self) -> Option<Duration> {
        Some(
            self.rename_ended_at?
                .saturating_duration_since(self.rename_started_at?),
        )
    }
}

/// Point in time view of every coordination signal, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutoverStatus {
    pub phase: CutoverPhase,
    pub strategy: CutoverStrategy,
    pub counting_rows: bool,
    pub postponing: bool,
    pub unpostpone_commanded: bool,
    pub in_critical_section: bool,
    pub all_events_up_to_lock_processed: bool,
    pub shutdown_requested: bool,
    pub attempts: u64,
}

#[derive(Debug)]
struct CutoverCoordinatorInner {
    config: CutoverConfig,
    progress: Arc<ProgressTracker>,
    throttle: ThrottleController,
    postpone_signal: Option<Arc<dyn PostponeSignal>>,
    phase: AtomicU8,
    counting_rows: AtomicBool,
    postponing: AtomicBool,
    unpostpone_commanded: AtomicBool,
    drain_requested: AtomicU64,
    drain_processed: AtomicU64,
    critical_section_holder: AtomicU64,
    next_holder_token: AtomicU64,
    attempts: AtomicU64,
    changes_tx: SignalTx,
    shutdown_tx: ShutdownTx,
    timings: Mutex<CutoverTimings>,
}

/// Proof of holding the cutover critical section.
///
/// Obtained from [`CutoverCoordinator::enter_critical_section`]; the section is released when the
/// guard is dropped.
#[derive(Debug)]
pub struct CriticalSectionGuard {
    inner: Arc<CutoverCoordinatorInner>,
    token: u64,
}

impl Drop for CriticalSectionGuard {
    fn drop(&mut self) {
        if self
            .inner
            .critical_section_holder
            .compare_exchange(self.token, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(token = self.token, "left cutover critical section");
            notify(&self.inner.changes_tx);
        }
    }
}

/// Coordinates the migration phases, the cutover protocol and shutdown.
///
/// The phase lives in a single atomic register while every side signal (row counting,
/// postponement, event drain, critical section, shutdown) is its own atomic, so readers never
/// take a lock. Cloning yields another handle on the same coordinator.
#[derive(Debug, Clone)]
pub struct CutoverCoordinator {
    inner: Arc<CutoverCoordinatorInner>,
}

impl CutoverCoordinator {
    /// Creates a coordinator postponing on the configured flag file, if any.
    pub fn new(
        config: CutoverConfig,
        progress: Arc<ProgressTracker>,
        throttle: ThrottleController,
    ) -> MigrationResult<Self> {
        let postpone_signal = config
            .postpone_flag_file
            .as_ref()
            .map(|path| Arc::new(PostponeFlagFile::new(path)) as Arc<dyn PostponeSignal>);

        Self::with_postpone_signal(config, progress, throttle, postpone_signal)
    }

    /// Creates a coordinator consulting `postpone_signal` instead of the configured flag file.
    pub fn with_postpone_signal(
        config: CutoverConfig,
        progress: Arc<ProgressTracker>,
        throttle: ThrottleController,
        postpone_signal: Option<Arc<dyn PostponeSignal>>,
    ) -> MigrationResult<Self> {
        config.validate()?;

        let (changes_tx, _) = create_signal();
        let (shutdown_tx, _) = create_shutdown_channel();

        Ok(Self {
            inner: Arc::new(CutoverCoordinatorInner {
                config: config.with_defaults(),
                progress,
                throttle,
                postpone_signal,
                phase: AtomicU8::new(CutoverPhase::Idle as u8),
                counting_rows: AtomicBool::new(false),
                postponing: AtomicBool::new(false),
                unpostpone_commanded: AtomicBool::new(false),
                drain_requested: AtomicU64::new(0),
                drain_processed: AtomicU64::new(0),
                critical_section_holder: AtomicU64::new(0),
                next_holder_token: AtomicU64::new(0),
                attempts: AtomicU64::new(0),
                changes_tx,
                shutdown_tx,
                timings: Mutex::new(CutoverTimings::default()),
            }),
        })
    }

    pub fn config(&self) -> &CutoverConfig {
        &self.inner.config
    }

    pub fn strategy(&self) -> CutoverStrategy {
        self.inner.config.strategy
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.inner.progress
    }

    pub fn throttle(&self) -> &ThrottleController {
        &self.inner.throttle
    }

    pub fn phase(&self) -> CutoverPhase {
        CutoverPhase::from_u8(self.inner.phase.load(Ordering::Acquire))
    }

    pub fn is_cutover_complete(&self) -> bool {
        self.phase() == CutoverPhase::Complete
    }

    /// Moves the phase register to `next`.
    ///
    /// Returns `Ok(false)` once shutdown took over the register and fails with
    /// [`ErrorKind::ProtocolViolation`] on any transition the protocol does not allow.
    fn advance(&self, next: CutoverPhase) -> MigrationResult<bool> {
        let mut current = self.phase();

        loop {
            if current == CutoverPhase::Shutdown {
                return Ok(false);
            }

            if !current.can_transition_to(next) {
                bail!(
                    ErrorKind::ProtocolViolation,
                    "Invalid cutover phase transition",
                    format!("Cannot move from {current} to {next}")
                );
            }

            match self.inner.phase.compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = CutoverPhase::from_u8(actual),
            }
        }

        self.on_phase_changed(current, next);

        Ok(true)
    }

    /// Moves the phase register from exactly `from` to `to`, leaving any other phase untouched.
    fn advance_from(&self, from: CutoverPhase, to: CutoverPhase) -> bool {
        let moved = self
            .inner
            .phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if moved {
            self.on_phase_changed(from, to);
        }

        moved
    }

    fn on_phase_changed(&self, from: CutoverPhase, to: CutoverPhase) {
        gauge!(MIGRATOR_CUTOVER_PHASE).set(to as u8 as f64);
        info!(%from, %to, "migration phase changed");
        notify(&self.inner.changes_tx);
    }

    /// Records that the table rows are being counted.
    ///
    /// Counting may overlap with the row copy; only an idle migration moves to
    /// [`CutoverPhase::CountingRows`]. Returns `false` after shutdown.
    pub fn begin_row_count(&self) -> bool {
        if self.is_shutdown_requested() {
            return false;
        }

        self.advance_from(CutoverPhase::Idle, CutoverPhase::CountingRows);
        self.inner.counting_rows.store(true, Ordering::Release);
        notify(&self.inner.changes_tx);

        true
    }

    pub fn end_row_count(&self) {
        if self.inner.counting_rows.swap(false, Ordering::AcqRel) {
            notify(&self.inner.changes_tx);
        }
    }

    pub fn is_counting_rows(&self) -> bool {
        self.inner.counting_rows.load(Ordering::Acquire)
    }

    /// Moves the migration to [`CutoverPhase::CopyingRows`]. Returns `Ok(false)` after shutdown.
    pub fn begin_row_copy(&self) -> MigrationResult<bool> {
        self.advance(CutoverPhase::CopyingRows)
    }

    pub fn is_postponing(&self) -> bool {
        self.inner.postponing.load(Ordering::Acquire)
    }

    /// Commands the cutover to stop waiting on the postpone marker.
    ///
    /// The marker is removed by the next postpone check. Ignored after shutdown, in which case
    /// `false` is returned.
    pub fn command_unpostpone(&self) -> bool {
        if self.is_shutdown_requested() {
            return false;
        }

        if !self.inner.unpostpone_commanded.swap(true, Ordering::AcqRel) {
            info!("unpostpone commanded");
            notify(&self.inner.changes_tx);
        }

        true
    }

    pub fn is_unpostpone_commanded(&self) -> bool {
        self.inner.unpostpone_commanded.load(Ordering::Acquire)
    }

    /// Tries to become the single holder of the cutover critical section.
    ///
    /// Fails with [`ErrorKind::CriticalSectionBusy`] while another guard is alive. Returns
    /// `Ok(None)` once shutdown was requested.
    pub fn enter_critical_section(&self) -> MigrationResult<Option<CriticalSectionGuard>> {
        if self.is_shutdown_requested() {
            return Ok(None);
        }

        let token = self.inner.next_holder_token.fetch_add(1, Ordering::Relaxed) + 1;

        if let Err(holder) = self.inner.critical_section_holder.compare_exchange(
            0,
            token,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            counter!(MIGRATOR_CRITICAL_SECTION_CONTENTION_TOTAL).increment(1);
            bail!(
                ErrorKind::CriticalSectionBusy,
                "Cutover critical section is already held",
                format!("The critical section is held by token {holder}")
            );
        }

        let guard = CriticalSectionGuard {
            inner: self.inner.clone(),
            token,
        };

        // Shutdown may have been requested between the check and the test-and-set.
        if self.is_shutdown_requested() {
            return Ok(None);
        }

        debug!(token, "entered cutover critical section");
        notify(&self.inner.changes_tx);

        Ok(Some(guard))
    }

    pub fn is_in_critical_section(&self) -> bool {
        self.inner.critical_section_holder.load(Ordering::Acquire) != 0
    }

    fn check_holder(&self, guard: &CriticalSectionGuard) -> MigrationResult<()> {
        if !Arc::ptr_eq(&self.inner, &guard.inner)
            || self.inner.critical_section_holder.load(Ordering::Acquire) != guard.token
        {
            bail!(
                ErrorKind::ProtocolViolation,
                "Critical section guard does not hold this coordinator's critical section"
            );
        }

        Ok(())
    }

    /// Moves to [`CutoverPhase::LockingTables`]. Returns `Ok(false)` after shutdown.
    pub fn begin_locking(&self, guard: &CriticalSectionGuard) -> MigrationResult<bool> {
        self.check_holder(guard)?;
        self.advance(CutoverPhase::LockingTables)
    }

    /// Moves to [`CutoverPhase::InCriticalSection`] once the tables are locked.
    pub fn mark_tables_locked(&self, guard: &CriticalSectionGuard) -> MigrationResult<bool> {
        self.check_holder(guard)?;
        self.advance(CutoverPhase::InCriticalSection)
    }

    /// Moves to [`CutoverPhase::RenamingTables`].
    pub fn begin_rename(&self, guard: &CriticalSectionGuard) -> MigrationResult<bool> {
        self.check_holder(guard)?;
        self.advance(CutoverPhase::RenamingTables)
    }

    /// Moves to [`CutoverPhase::Complete`].
    ///
    /// Requires the guard of the current holder and every event up to the lock to be processed;
    /// anything else is a [`ErrorKind::ProtocolViolation`]. Returns `Ok(false)` after shutdown.
    ///
    /// Only the holder can request drains, so no newer drain can start between the check and
    /// the phase change.
    pub fn complete(&self, guard: &CriticalSectionGuard) -> MigrationResult<bool> {
        self.check_holder(guard)?;

        if !self.all_events_up_to_lock_processed() {
            bail!(
                ErrorKind::ProtocolViolation,
                "Cutover completed before all events up to the lock were processed"
            );
        }

        self.advance(CutoverPhase::Complete)
    }

    /// Abandons a cutover in progress, returning the migration to [`CutoverPhase::CopyingRows`].
    ///
    /// Does nothing outside of a cutover.
    pub fn abort_cutover(&self) -> bool {
        let mut current = self.phase();

        while current.is_cutting_over() {
            match self.inner.phase.compare_exchange(
                current as u8,
                CutoverPhase::CopyingRows as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.on_phase_changed(current, CutoverPhase::CopyingRows);
                    return true;
                }
                Err(actual) => current = CutoverPhase::from_u8(actual),
            }
        }

        false
    }

    /// Starts a new event drain on behalf of the critical section holder and returns its attempt
    /// number.
    ///
    /// A guard that does not hold the section is a [`ErrorKind::ProtocolViolation`]. Returns
    /// `Ok(None)` after shutdown.
    pub fn request_events_drain(
        &self,
        guard: &CriticalSectionGuard,
    ) -> MigrationResult<Option<u64>> {
        self.check_holder(guard)?;

        if self.is_shutdown_requested() {
            return Ok(None);
        }

        let attempt = self.inner.drain_requested.fetch_add(1, Ordering::AcqRel) + 1;
        notify(&self.inner.changes_tx);

        Ok(Some(attempt))
    }

    /// Reports that the drain marker of `attempt` was applied.
    ///
    /// Markers of unknown attempts, stale markers and reports after shutdown are ignored and
    /// return `false`.
    pub fn mark_all_events_processed(&self, attempt: u64) -> bool {
        if self.is_shutdown_requested()
            || attempt == 0
            || attempt > self.inner.drain_requested.load(Ordering::Acquire)
        {
            return false;
        }

        let previous = self
            .inner
            .drain_processed
            .fetch_max(attempt, Ordering::AcqRel);
        if previous >= attempt {
            return false;
        }

        debug!(attempt, "all events up to the lock processed");
        notify(&self.inner.changes_tx);

        true
    }

    /// Returns `true` once the marker of the most recent drain was applied.
    pub fn all_events_up_to_lock_processed(&self) -> bool {
        let requested = self.inner.drain_requested.load(Ordering::Acquire);
        requested > 0 && self.inner.drain_processed.load(Ordering::Acquire) >= requested
    }

    /// Requests shutdown of every loop observing this coordinator.
    ///
    /// Any non terminal phase becomes [`CutoverPhase::Shutdown`]. Returns `true` for the call
    /// that performed the request.
    pub fn request_shutdown(&self) -> bool {
        if !self.inner.shutdown_tx.shutdown() {
            return false;
        }

        let mut current = self.phase();
        while !current.is_terminal() {
            match self.inner.phase.compare_exchange(
                current as u8,
                CutoverPhase::Shutdown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    gauge!(MIGRATOR_CUTOVER_PHASE).set(CutoverPhase::Shutdown as u8 as f64);
                    break;
                }
                Err(actual) => current = CutoverPhase::from_u8(actual),
            }
        }

        self.inner.postponing.store(false, Ordering::Release);
        info!(phase = %current, "migration shutdown requested");
        notify(&self.inner.changes_tx);

        true
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.shutdown_tx.is_shutdown()
    }

    /// Returns a receiver completing once shutdown is requested.
    pub fn subscribe_shutdown(&self) -> ShutdownRx {
        self.inner.shutdown_tx.subscribe()
    }

    /// Returns a receiver notified whenever the phase or any signal changes.
    pub fn subscribe_changes(&self) -> SignalRx {
        self.inner.changes_tx.subscribe()
    }

    pub fn timings(&self) -> CutoverTimings {
        *self.inner.timings.lock()
    }

    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> CutoverStatus {
        CutoverStatus {
            phase: self.phase(),
            strategy: self.strategy(),
            counting_rows: self.is_counting_rows(),
            postponing: self.is_postponing(),
            unpostpone_commanded: self.is_unpostpone_commanded(),
            in_critical_section: self.is_in_critical_section(),
            all_events_up_to_lock_processed: self.all_events_up_to_lock_processed(),
            shutdown_requested: self.is_shutdown_requested(),
            attempts: self.attempts(),
        }
    }

    /// Waits while the postpone marker is present.
    ///
    /// Returns as soon as the marker disappears or unpostpone is commanded, removing the marker
    /// in the latter case. Fails with [`ErrorKind::CutoverTimeout`] once the lock timeout elapsed.
    pub async fn wait_for_postpone_release(
        &self,
        shutdown_rx: &mut ShutdownRx,
    ) -> MigrationResult<ShutdownResult<(), ()>> {
        let Some(signal) = self.inner.postpone_signal.clone() else {
            return Ok(ShutdownResult::Ok(()));
        };

        let result = self.poll_postpone_signal(&*signal, shutdown_rx).await;

        if self.inner.postponing.swap(false, Ordering::AcqRel) {
            notify(&self.inner.changes_tx);
        }

        result
    }

    async fn poll_postpone_signal(
        &self,
        signal: &dyn PostponeSignal,
        shutdown_rx: &mut ShutdownRx,
    ) -> MigrationResult<ShutdownResult<(), ()>> {
        let mut changes_rx = self.subscribe_changes();
        let lock_timeout = self.inner.config.lock_timeout();
        let poll_interval = self.inner.config.postpone_poll_interval();
        let deadline = deadline_after(lock_timeout);

        loop {
            if shutdown_rx.is_shutdown() {
                return Ok(ShutdownResult::Shutdown(()));
            }

            if self.is_unpostpone_commanded() {
                signal.release()?;
                return Ok(ShutdownResult::Ok(()));
            }

            if !signal.is_postponed()? {
                return Ok(ShutdownResult::Ok(()));
            }

            if !self.inner.postponing.swap(true, Ordering::AcqRel) {
                if self.phase() == CutoverPhase::CopyingRows
                    && !self.advance(CutoverPhase::Postponed)?
                {
                    return Ok(ShutdownResult::Shutdown(()));
                }

                info!(
                    lock_timeout_ms = lock_timeout.as_millis() as u64,
                    "cutover delayed: postpone flag present"
                );
            }

            let now = Instant::now();
            if now >= deadline {
                bail!(
                    ErrorKind::CutoverTimeout,
                    "Cutover postponed beyond the lock timeout",
                    format!(
                        "The postpone flag was still present after {}ms",
                        lock_timeout.as_millis()
                    )
                );
            }

            debug!(
                remaining_ms = (deadline - now).as_millis() as u64,
                "cutover delayed: postpone flag present"
            );

            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for_shutdown() => {
                    return Ok(ShutdownResult::Shutdown(()));
                }

                _ = changes_rx.changed() => {}

                _ = tokio::time::sleep_until(deadline_after(poll_interval).min(deadline)) => {}
            }
        }
    }

    /// Waits, within the lock timeout, until the throttler allows holding locks.
    async fn wait_for_throttle_release(
        &self,
        shutdown_rx: &mut ShutdownRx,
    ) -> MigrationResult<ShutdownResult<(), ()>> {
        let lock_timeout = self.inner.config.lock_timeout();

        match tokio::time::timeout(
            lock_timeout,
            self.inner.throttle.wait_while_hard_stopped(shutdown_rx),
        )
        .await
        {
            Ok(result) => Ok(result),
            Err(_) => {
                let reason = self
                    .inner
                    .throttle
                    .current_decision()
                    .reason
                    .map(|reason| reason.to_string())
                    .unwrap_or_default();

                bail!(
                    ErrorKind::CutoverTimeout,
                    "Cutover timed out waiting for throttling to be released",
                    reason
                );
            }
        }
    }

    /// Waits, within the lock timeout, until the drain marker of `attempt` was applied.
    async fn wait_for_events_drain(
        &self,
        attempt: u64,
        shutdown_rx: &mut ShutdownRx,
    ) -> MigrationResult<ShutdownResult<(), ()>> {
        let mut changes_rx = self.subscribe_changes();
        let lock_timeout = self.inner.config.lock_timeout();
        let deadline = deadline_after(lock_timeout);

        loop {
            if self.inner.drain_processed.load(Ordering::Acquire) >= attempt {
                return Ok(ShutdownResult::Ok(()));
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for_shutdown() => {
                    return Ok(ShutdownResult::Shutdown(()));
                }

                _ = changes_rx.changed() => {}

                _ = tokio::time::sleep_until(deadline) => {
                    bail!(
                        ErrorKind::CutoverTimeout,
                        "Cutover timed out waiting for events to drain",
                        format!(
                            "The drain marker of attempt {attempt} was not applied within {}ms",
                            lock_timeout.as_millis()
                        )
                    );
                }
            }
        }
    }

    /// Runs one executor step, bounded by the lock timeout and abandoned on shutdown.
    async fn bounded<T, F>(
        &self,
        step: &'static str,
        shutdown_rx: &mut ShutdownRx,
        future: F,
    ) -> MigrationResult<ShutdownResult<T, ()>>
    where
        F: Future<Output = MigrationResult<T>>,
    {
        let lock_timeout = self.inner.config.lock_timeout();

        tokio::select! {
            biased;

            _ = shutdown_rx.wait_for_shutdown() => Ok(ShutdownResult::Shutdown(())),

            result = tokio::time::timeout(lock_timeout, future) => match result {
                Ok(result) => result.map(ShutdownResult::Ok),
                Err(_) => Err(migrator_error!(
                    ErrorKind::CutoverTimeout,
                    "Cutover step timed out",
                    format!("{step} did not complete within {}ms", lock_timeout.as_millis())
                )),
            },
        }
    }

    async fn lock_tables<E>(
        &self,
        executor: &E,
        table: &TableName,
        shutdown_rx: &mut ShutdownRx,
        locked: &mut bool,
    ) -> MigrationResult<ShutdownResult<(), ()>>
    where
        E: CutoverExecutor + Sync,
    {
        // A lock request that timed out may still have been granted.
        *locked = true;
        let result = self
            .bounded("lock tables", shutdown_rx, executor.lock_tables(table))
            .await?;

        if !result.should_shutdown() {
            debug!(%table, "tables locked");
        }

        Ok(result)
    }

    /// Releases the table locks, logging instead of failing so cleanup always completes.
    async fn release_locks<E>(&self, executor: &E, table: &TableName)
    where
        E: CutoverExecutor + Sync,
    {
        let lock_timeout = self.inner.config.lock_timeout();

        match tokio::time::timeout(lock_timeout, executor.unlock_tables(table)).await {
            Ok(Ok(())) => debug!(%table, "tables unlocked"),
            Ok(Err(err)) => error!(%table, error = %err, "failed to unlock tables"),
            Err(_) => error!(%table, "timed out unlocking tables"),
        }

        let mut timings = self.inner.timings.lock();
        timings.unlocked_at = Some(Instant::now());

        if let Some(lock_duration) = timings.lock_duration() {
            gauge!(
                MIGRATOR_CUTOVER_LOCK_DURATION_SECONDS,
                TABLE_NAME_LABEL => table.to_string()
            )
            .set(lock_duration.as_secs_f64());
        }
    }

    /// Runs a full cutover of `table` with the configured strategy.
    ///
    /// The row copy must have completed. The cutover waits for the postpone marker and the
    /// throttler, enters the critical section, locks the tables, drains events and renames.
    /// `Atomic` holds the locks from locking through the rename; `TwoStep` releases them after
    /// the drain and reacquires them, draining again, before the rename. Held locks are always
    /// released before returning. On failure the migration goes back to
    /// [`CutoverPhase::CopyingRows`] so the cutover can be retried.
    pub async fn run_cutover<E>(
        &self,
        executor: &E,
        table: &TableName,
    ) -> MigrationResult<CutoverOutcome>
    where
        E: CutoverExecutor + Sync,
    {
        let mut shutdown_rx = self.subscribe_shutdown();
        if shutdown_rx.is_shutdown() {
            return Ok(CutoverOutcome::Shutdown);
        }

        if !self.inner.progress.is_row_copy_complete() {
            bail!(
                ErrorKind::ProtocolViolation,
                "Cutover started before the row copy completed"
            );
        }

        let strategy = self.strategy();
        let attempt = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        counter!(
            MIGRATOR_CUTOVER_ATTEMPTS_TOTAL,
            CUTOVER_STRATEGY_LABEL => strategy.as_str()
        )
        .increment(1);
        info!(%table, attempt, strategy = strategy.as_str(), "starting cutover");

        let result = self
            .attempt_cutover(executor, table, &mut shutdown_rx)
            .await;

        match &result {
            Ok(CutoverOutcome::Complete) => {
                let timings = self.timings();
                info!(
                    %table,
                    attempt,
                    lock_duration_ms = timings.lock_duration().map(|d| d.as_millis() as u64),
                    rename_duration_ms = timings.rename_duration().map(|d| d.as_millis() as u64),
                    "cutover complete"
                );
            }
            Ok(CutoverOutcome::Shutdown) => info!(%table, attempt, "cutover abandoned on shutdown"),
            Err(err) => warn!(%table, attempt, error = %err, "cutover attempt failed"),
        }

        result
    }

    async fn attempt_cutover<E>(
        &self,
        executor: &E,
        table: &TableName,
        shutdown_rx: &mut ShutdownRx,
    ) -> MigrationResult<CutoverOutcome>
    where
        E: CutoverExecutor + Sync,
    {
        let window = match self.wait_for_cutover_window(shutdown_rx).await {
            Ok(window) => window,
            Err(err) => {
                // A concurrent cutover holding the critical section owns the phase register.
                if !self.is_in_critical_section() {
                    self.abort_cutover();
                }
                return Err(err);
            }
        };
        if window.should_shutdown() {
            return Ok(CutoverOutcome::Shutdown);
        }

        let Some(guard) = self.enter_critical_section()? else {
            return Ok(CutoverOutcome::Shutdown);
        };
        let mut locked = false;

        let result = self
            .cutover_in_critical_section(executor, table, &guard, shutdown_rx, &mut locked)
            .await;

        if locked {
            self.release_locks(executor, table).await;
        }

        // The phase must leave the cutover before the guard is released.
        if result.is_err() {
            self.abort_cutover();
        }
        drop(guard);

        result
    }

    /// Waits until neither the postpone marker nor the throttler holds the cutover back.
    async fn wait_for_cutover_window(
        &self,
        shutdown_rx: &mut ShutdownRx,
    ) -> MigrationResult<ShutdownResult<(), ()>> {
        if self
            .wait_for_postpone_release(shutdown_rx)
            .await?
            .should_shutdown()
        {
            return Ok(ShutdownResult::Shutdown(()));
        }

        self.wait_for_throttle_release(shutdown_rx).await
    }

    async fn cutover_in_critical_section<E>(
        &self,
        executor: &E,
        table: &TableName,
        guard: &CriticalSectionGuard,
        shutdown_rx: &mut ShutdownRx,
        locked: &mut bool,
    ) -> MigrationResult<CutoverOutcome>
    where
        E: CutoverExecutor + Sync,
    {
        if !self.begin_locking(guard)? {
            return Ok(CutoverOutcome::Shutdown);
        }

        *self.inner.timings.lock() = CutoverTimings {
            lock_started_at: Some(Instant::now()),
            ..CutoverTimings::default()
        };

        if self
            .lock_tables(executor, table, shutdown_rx, locked)
            .await?
            .should_shutdown()
        {
            return Ok(CutoverOutcome::Shutdown);
        }

        #[cfg(feature = "failpoints")]
        migrator_fail_point(CUTOVER__AFTER_LOCK_TABLES)?;

        if !self.mark_tables_locked(guard)? {
            return Ok(CutoverOutcome::Shutdown);
        }

        if self
            .drain_events(executor, table, guard, shutdown_rx)
            .await?
            .should_shutdown()
        {
            return Ok(CutoverOutcome::Shutdown);
        }

        if self.strategy() == CutoverStrategy::TwoStep {
            if self
                .bounded("unlock tables", shutdown_rx, executor.unlock_tables(table))
                .await?
                .should_shutdown()
            {
                return Ok(CutoverOutcome::Shutdown);
            }
            *locked = false;
            debug!(%table, "tables unlocked between lock and rename");

            if self
                .lock_tables(executor, table, shutdown_rx, locked)
                .await?
                .should_shutdown()
            {
                return Ok(CutoverOutcome::Shutdown);
            }

            // Writes may have landed while the tables were unlocked.
            if self
                .drain_events(executor, table, guard, shutdown_rx)
                .await?
                .should_shutdown()
            {
                return Ok(CutoverOutcome::Shutdown);
            }
        }

        #[cfg(feature = "failpoints")]
        migrator_fail_point(CUTOVER__BEFORE_RENAME_TABLES)?;

        if !self.begin_rename(guard)? {
            return Ok(CutoverOutcome::Shutdown);
        }

        self.inner.timings.lock().rename_started_at = Some(Instant::now());
        if self
            .bounded("rename tables", shutdown_rx, executor.rename_tables(table))
            .await?
            .should_shutdown()
        {
            return Ok(CutoverOutcome::Shutdown);
        }
        self.inner.timings.lock().rename_ended_at = Some(Instant::now());

        if !self.complete(guard)? {
            return Ok(CutoverOutcome::Shutdown);
        }

        Ok(CutoverOutcome::Complete)
    }

    async fn drain_events<E>(
        &self,
        executor: &E,
        table: &TableName,
        guard: &CriticalSectionGuard,
        shutdown_rx: &mut ShutdownRx,
    ) -> MigrationResult<ShutdownResult<(), ()>>
    where
        E: CutoverExecutor + Sync,
    {
        let Some(attempt) = self.request_events_drain(guard)? else {
            return Ok(ShutdownResult::Shutdown(()));
        };

        if self
            .bounded(
                "inject drain marker",
                shutdown_rx,
                executor.inject_drain_marker(table, attempt),
            )
            .await?
            .should_shutdown()
        {
            return Ok(ShutdownResult::Shutdown(()));
        }

        self.wait_for_events_drain(attempt, shutdown_rx).await
    }

    /// Runs [`CutoverCoordinator::run_cutover`] up to `max_retries` times.
    ///
    /// Only retryable failures are retried. Once every attempt failed the last error is returned
    /// as the source of an [`ErrorKind::CutoverRetriesExhausted`] error.
    pub async fn run_cutover_with_retries<E>(
        &self,
        executor: &E,
        table: &TableName,
        max_retries: u64,
    ) -> MigrationResult<CutoverOutcome>
    where
        E: CutoverExecutor + Sync,
    {
        let max_retries = max_retries.max(1);
        let mut shutdown_rx = self.subscribe_shutdown();
        let mut last_error: Option<MigrationError> = None;

        for attempt in 1..=max_retries {
            match self.run_cutover(executor, table).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.kind().is_retryable() => {
                    warn!(%table, attempt, max_retries, error = %err, "retrying cutover");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }

            if attempt < max_retries {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.wait_for_shutdown() => return Ok(CutoverOutcome::Shutdown),

                    _ = tokio::time::sleep(CUTOVER_RETRY_DELAY) => {}
                }
            }
        }

        let message = format!("Cutover of {table} failed {max_retries} times");
        match last_error {
            Some(err) => bail!(
                ErrorKind::CutoverRetriesExhausted,
                "Cutover retries exhausted",
                message,
                source: err
            ),
            None => bail!(
                ErrorKind::CutoverRetriesExhausted,
                "Cutover retries exhausted",
                message
            ),
        }
    }
}
