use std::fmt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::MigrationResult;

/// Operator controlled marker holding back the cutover.
///
/// While [`PostponeSignal::is_postponed`] reports `true` the cutover waits, within its lock
/// timeout, before locking any table.
pub trait PostponeSignal: fmt::Debug + Send + Sync {
    /// Returns `true` while the operator wants the cutover to wait.
    fn is_postponed(&self) -> MigrationResult<bool>;

    /// Removes the marker so that later checks no longer postpone.
    fn release(&self) -> MigrationResult<()>;
}

/// Postpones the cutover for as long as a file exists at the configured path.
#[derive(Debug, Clone)]
pub struct PostponeFlagFile {
    path: PathBuf,
}

impl PostponeFlagFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PostponeSignal for PostponeFlagFile {
    fn is_postponed(&self) -> MigrationResult<bool> {
        Ok(self.path.try_exists()?)
    }

    fn release(&self) -> MigrationResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "removed postpone flag file");
                Ok(())
            }
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
