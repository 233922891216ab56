mod coordinator;
mod executor;
mod phase;
mod postpone;

pub use coordinator::{
    CriticalSectionGuard, CutoverCoordinator, CutoverOutcome, CutoverStatus, CutoverTimings,
};
pub use executor::CutoverExecutor;
pub use phase::CutoverPhase;
pub use postpone::{PostponeFlagFile, PostponeSignal};
