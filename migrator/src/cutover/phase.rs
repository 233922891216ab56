use std::fmt;

use serde::Serialize;

/// Phase of a migration as seen by the cutover protocol.
///
/// `Complete` and `Shutdown` are terminal. `Shutdown` is reachable from every other phase; the
/// cutover phases (`Postponed` to `RenamingTables`) may fall back to `CopyingRows` when an attempt
/// is abandoned so it can be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CutoverPhase {
    Idle = 0,
    CountingRows = 1,
    CopyingRows = 2,
    Postponed = 3,
    LockingTables = 4,
    InCriticalSection = 5,
    RenamingTables = 6,
    Complete = 7,
    Shutdown = 8,
}

impl CutoverPhase {
    pub(crate) fn from_u8(value: u8) -> CutoverPhase {
        match value {
            0 => CutoverPhase::Idle,
            1 => CutoverPhase::CountingRows,
            2 => CutoverPhase::CopyingRows,
            3 => CutoverPhase::Postponed,
            4 => CutoverPhase::LockingTables,
            5 => CutoverPhase::InCriticalSection,
            6 => CutoverPhase::RenamingTables,
            7 => CutoverPhase::Complete,
            _ => CutoverPhase::Shutdown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CutoverPhase::Idle => "idle",
            CutoverPhase::CountingRows => "counting_rows",
            CutoverPhase::CopyingRows => "copying_rows",
            CutoverPhase::Postponed => "postponed",
            CutoverPhase::LockingTables => "locking_tables",
            CutoverPhase::InCriticalSection => "in_critical_section",
            CutoverPhase::RenamingTables => "renaming_tables",
            CutoverPhase::Complete => "complete",
            CutoverPhase::Shutdown => "shutdown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CutoverPhase::Complete | CutoverPhase::Shutdown)
    }

    /// Returns `true` while the cutover itself is in progress.
    pub fn is_cutting_over(&self) -> bool {
        matches!(
            self,
            CutoverPhase::Postponed
                | CutoverPhase::LockingTables
                | CutoverPhase::InCriticalSection
                | CutoverPhase::RenamingTables
        )
    }

    /// Returns `true` if the protocol allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: CutoverPhase) -> bool {
        use CutoverPhase::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (_, Shutdown)
                | (Idle, CountingRows)
                | (Idle | CountingRows, CopyingRows)
                | (CopyingRows, Postponed)
                | (CopyingRows | Postponed, LockingTables)
                | (LockingTables, InCriticalSection)
                | (InCriticalSection, RenamingTables)
                | (RenamingTables, Complete)
                | (Postponed | LockingTables | InCriticalSection | RenamingTables, CopyingRows)
        )
    }
}

impl fmt::Display for CutoverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
