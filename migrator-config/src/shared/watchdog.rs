use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration of the stall watchdog.
///
/// The watchdog reports a stall when no point of interest has been marked for longer than
/// `stall_threshold_ms`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WatchdogConfig {
    /// Elapsed time, in milliseconds, since the last point of interest that counts as a stall.
    ///
    /// Default: 60000 (60 seconds)
    #[serde(default = "default_stall_threshold_ms")]
    pub stall_threshold_ms: u64,
    /// Interval, in milliseconds, between two stall checks.
    ///
    /// Default: 5000 (5 seconds)
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

impl WatchdogConfig {
    pub const DEFAULT_STALL_THRESHOLD_MS: u64 = 60_000;

    pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 5_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.check_interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "watchdog.check_interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.stall_threshold_ms < self.check_interval_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "watchdog.stall_threshold_ms".to_string(),
                constraint: "must be >= check_interval_ms".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stall_threshold_ms: default_stall_threshold_ms(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

fn default_stall_threshold_ms() -> u64 {
    WatchdogConfig::DEFAULT_STALL_THRESHOLD_MS
}

fn default_check_interval_ms() -> u64 {
    WatchdogConfig::DEFAULT_CHECK_INTERVAL_MS
}
