use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::metrics::{MIGRATOR_EVENTS_APPLIED_TOTAL, MIGRATOR_ROWS_COPIED_TOTAL};
use crate::state::binlog::BinlogCoordinate;

/// State guarded by the coordinate lock.
///
/// Row copy timestamps and the binlog coordinate are read and written together, so a reader
/// never observes a start without its matching end or half of a coordinate.
#[derive(Debug, Default)]
struct CoordinateState {
    row_copy_start: Option<Instant>,
    row_copy_end: Option<Instant>,
    recent_coordinate: BinlogCoordinate,
}

/// Progress bookkeeping shared by every worker of a migration.
///
/// Two independent lock domains exist: the coordinate lock (row copy timestamps and binlog
/// coordinate) and the liveness lock (point of interest). Counters are plain atomics.
#[derive(Debug)]
pub struct ProgressTracker {
    started_at: Instant,
    coordinates: Mutex<CoordinateState>,
    point_of_interest: Mutex<Instant>,
    rows_copied: AtomicU64,
    events_applied: AtomicU64,
    iteration: AtomicU64,
    rows_estimate: AtomicU64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let now = Instant::now();

        Self {
            started_at: now,
            coordinates: Mutex::new(CoordinateState::default()),
            point_of_interest: Mutex::new(now),
            rows_copied: AtomicU64::new(0),
            events_applied: AtomicU64::new(0),
            iteration: AtomicU64::new(0),
            rows_estimate: AtomicU64::new(0),
        }
    }

    /// Marks the beginning of the row copy.
    ///
    /// Marking an already running copy again keeps the first start. Starting after the copy
    /// ended is a protocol violation.
    pub fn mark_row_copy_start(&self) -> MigrationResult<()> {
        let mut coordinates = self.coordinates.lock();

        if coordinates.row_copy_end.is_some() {
            bail!(
                ErrorKind::ProtocolViolation,
                "Row copy started after it ended"
            );
        }

        if coordinates.row_copy_start.is_none() {
            coordinates.row_copy_start = Some(Instant::now());
            debug!("row copy started");
        }

        Ok(())
    }

    /// Marks the end of the row copy.
    ///
    /// Fails with [`ErrorKind::ProtocolViolation`] when the copy never started or already ended.
    pub fn mark_row_copy_end(&self) -> MigrationResult<()> {
        let mut coordinates = self.coordinates.lock();

        let Some(start) = coordinates.row_copy_start else {
            bail!(
                ErrorKind::ProtocolViolation,
                "Row copy end marked before start"
            );
        };

        if coordinates.row_copy_end.is_some() {
            bail!(
                ErrorKind::ProtocolViolation,
                "Row copy end marked twice"
            );
        }

        // Instants are monotonic, so the end can never precede the start.
        let end = Instant::now().max(start);
        coordinates.row_copy_end = Some(end);
        debug!(elapsed_ms = (end - start).as_millis() as u64, "row copy ended");

        Ok(())
    }

    /// Returns `true` once the row copy ended.
    pub fn is_row_copy_complete(&self) -> bool {
        self.coordinates.lock().row_copy_end.is_some()
    }

    /// Returns how long the row copy has been running, or ran.
    ///
    /// Zero before the start, `now - start` while running and `end - start` once ended.
    pub fn elapsed_row_copy_time(&self) -> Duration {
        let coordinates = self.coordinates.lock();

        match (coordinates.row_copy_start, coordinates.row_copy_end) {
            (None, _) => Duration::ZERO,
            (Some(start), None) => Instant::now().saturating_duration_since(start),
            (Some(start), Some(end)) => end.saturating_duration_since(start),
        }
    }

    pub fn set_recent_binlog_coordinate(&self, coordinate: BinlogCoordinate) {
        self.coordinates.lock().recent_coordinate = coordinate;
    }

    /// Returns a copy of the most recently applied binlog coordinate.
    pub fn recent_binlog_coordinate(&self) -> BinlogCoordinate {
        self.coordinates.lock().recent_coordinate.clone()
    }

    pub fn increment_rows_copied(&self, rows: u64) -> u64 {
        counter!(MIGRATOR_ROWS_COPIED_TOTAL).increment(rows);
        self.rows_copied.fetch_add(rows, Ordering::Relaxed) + rows
    }

    pub fn increment_events_applied(&self, events: u64) -> u64 {
        counter!(MIGRATOR_EVENTS_APPLIED_TOTAL).increment(events);
        self.events_applied.fetch_add(events, Ordering::Relaxed) + events
    }

    pub fn total_rows_copied(&self) -> u64 {
        self.rows_copied.load(Ordering::Relaxed)
    }

    pub fn total_events_applied(&self) -> u64 {
        self.events_applied.load(Ordering::Relaxed)
    }

    /// Bumps the iteration counter and returns its new value.
    pub fn increment_iteration(&self) -> u64 {
        self.iteration.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Relaxed)
    }

    pub fn set_rows_estimate(&self, rows: u64) {
        self.rows_estimate.store(rows, Ordering::Relaxed);
    }

    pub fn rows_estimate(&self) -> u64 {
        self.rows_estimate.load(Ordering::Relaxed)
    }

    /// Records that the migration made observable progress and returns the current iteration.
    ///
    /// Uses the liveness lock only, so it never waits on coordinate updates.
    pub fn mark_point_of_interest(&self) -> u64 {
        *self.point_of_interest.lock() = Instant::now();
        self.iteration()
    }

    pub fn time_since_point_of_interest(&self) -> Duration {
        let point_of_interest = *self.point_of_interest.lock();
        Instant::now().saturating_duration_since(point_of_interest)
    }

    /// Time elapsed since the tracker was created.
    pub fn elapsed_time(&self) -> Duration {
        Instant::now().saturating_duration_since(self.started_at)
    }

    /// Returns copy progress in percent of the rows estimate, capped at 100.
    ///
    /// A finished copy always reports 100, an unknown estimate reports 0 until then.
    pub fn progress_pct(&self) -> f64 {
        if self.is_row_copy_complete() {
            return 100.0;
        }

        let estimate = self.rows_estimate();
        if estimate == 0 {
            return 0.0;
        }

        (100.0 * self.total_rows_copied() as f64 / estimate as f64).min(100.0)
    }

    /// Captures a point in time view of the progress for status reporting.
    ///
    /// Each field is read on its own: the snapshot is not a consistent cut across lock domains.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            captured_at: Utc::now(),
            rows_copied: self.total_rows_copied(),
            events_applied: self.total_events_applied(),
            iteration: self.iteration(),
            rows_estimate: self.rows_estimate(),
            progress_pct: self.progress_pct(),
            row_copy_complete: self.is_row_copy_complete(),
            elapsed_row_copy_time: self.elapsed_row_copy_time(),
            elapsed_time: self.elapsed_time(),
            time_since_point_of_interest: self.time_since_point_of_interest(),
            recent_binlog_coordinate: self.recent_binlog_coordinate(),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Status view returned by [`ProgressTracker::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub captured_at: DateTime<Utc>,
    pub rows_copied: u64,
    pub events_applied: u64,
    pub iteration: u64,
    pub rows_estimate: u64,
    pub progress_pct: f64,
    pub row_copy_complete: bool,
    pub elapsed_row_copy_time: Duration,
    pub elapsed_time: Duration,
    pub time_since_point_of_interest: Duration,
    pub recent_binlog_coordinate: BinlogCoordinate,
}
