use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::cutover::PostponeSignal;
use crate::error::MigrationResult;

/// Postpone marker living in memory, toggled by the test.
#[derive(Debug, Default)]
pub struct InMemoryPostponeSignal {
    postponed: AtomicBool,
    releases: AtomicU64,
}

impl InMemoryPostponeSignal {
    pub fn new(postponed: bool) -> Self {
        Self {
            postponed: AtomicBool::new(postponed),
            releases: AtomicU64::new(0),
        }
    }

    pub fn set_postponed(&self, postponed: bool) {
        self.postponed.store(postponed, Ordering::SeqCst);
    }

    /// Number of times the coordinator removed the marker.
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }
}

impl PostponeSignal for InMemoryPostponeSignal {
    fn is_postponed(&self) -> MigrationResult<bool> {
        Ok(self.postponed.load(Ordering::SeqCst))
    }

    fn release(&self) -> MigrationResult<()> {
        self.postponed.store(false, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}
