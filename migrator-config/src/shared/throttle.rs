use serde::{Deserialize, Serialize};

use crate::shared::{LoadMap, ValidationError};

/// Throttling thresholds protecting the source database while rows are copied.
///
/// `max_load` is the soft limit: exceeding it slows work down proportionally. `critical_load` is
/// the hard limit: reaching it stops work entirely. A metric present in `max_load` but absent from
/// `critical_load` has no hard-stop check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ThrottleConfig {
    /// Soft thresholds per metric.
    #[serde(default)]
    pub max_load: LoadMap,
    /// Hard thresholds per metric.
    #[serde(default)]
    pub critical_load: LoadMap,
    /// Replication lag, in milliseconds, above which work is fully throttled.
    #[serde(default)]
    pub max_lag_ms: Option<u64>,
    /// Fraction of each unit of work's duration to sleep after it, regardless of load.
    ///
    /// Default: 0.0
    #[serde(default)]
    pub nice_ratio: f64,
    /// Interval in milliseconds between two load evaluations of the throttler.
    ///
    /// Default: 1000
    #[serde(default = "default_evaluation_interval_ms")]
    pub evaluation_interval_ms: u64,
}

impl ThrottleConfig {
    /// Default interval between load evaluations.
    pub const DEFAULT_EVALUATION_INTERVAL_MS: u64 = 1_000;

    /// Validates thresholds and ratios.
    ///
    /// Every metric configured in both maps must have a critical threshold greater than or equal
    /// to its max threshold.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (metric, max) in self.max_load.iter() {
            if let Some(critical) = self.critical_load.get(metric)
                && critical < max
            {
                return Err(ValidationError::CriticalLoadBelowMaxLoad {
                    metric: metric.to_string(),
                    max,
                    critical,
                });
            }
        }

        if !self.nice_ratio.is_finite() || self.nice_ratio < 0.0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "throttle.nice_ratio".to_string(),
                constraint: "must be a finite number >= 0".to_string(),
            });
        }

        if self.evaluation_interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "throttle.evaluation_interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_load: LoadMap::new(),
            critical_load: LoadMap::new(),
            max_lag_ms: None,
            nice_ratio: 0.0,
            evaluation_interval_ms: default_evaluation_interval_ms(),
        }
    }
}

fn default_evaluation_interval_ms() -> u64 {
    ThrottleConfig::DEFAULT_EVALUATION_INTERVAL_MS
}
