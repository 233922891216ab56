use std::future::Future;

use crate::error::MigrationResult;
use crate::schema::TableName;

/// Database side of the cutover.
///
/// The coordinator decides when each step runs and bounds every call by the lock timeout; the
/// executor only talks to the database.
pub trait CutoverExecutor {
    /// Locks the original and ghost tables against writes.
    fn lock_tables(&self, table: &TableName) -> impl Future<Output = MigrationResult<()>> + Send;

    /// Releases the locks taken by [`CutoverExecutor::lock_tables`].
    fn unlock_tables(&self, table: &TableName) -> impl Future<Output = MigrationResult<()>> + Send;

    /// Writes a drain marker for `attempt` into the change stream.
    ///
    /// Once the event applier reaches the marker it reports the attempt through
    /// [`crate::cutover::CutoverCoordinator::mark_all_events_processed`].
    fn inject_drain_marker(
        &self,
        table: &TableName,
        attempt: u64,
    ) -> impl Future<Output = MigrationResult<()>> + Send;

    /// Swaps the tables: the original becomes the old table and the ghost takes its name.
    fn rename_tables(&self, table: &TableName) -> impl Future<Output = MigrationResult<()>> + Send;
}
