use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How the original and migrated tables are swapped during cutover.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutoverStrategy {
    /// Table locks are held continuously from locking through the rename.
    #[default]
    Atomic,
    /// Table locks may be released and reacquired between locking and renaming, trading a longer
    /// inconsistency window for shorter exclusive lock durations.
    TwoStep,
}

impl CutoverStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CutoverStrategy::Atomic => "atomic",
            CutoverStrategy::TwoStep => "two_step",
        }
    }
}

/// Cutover behavior, fixed when the migration is planned.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CutoverConfig {
    /// Strategy used to swap the tables.
    #[serde(default)]
    pub strategy: CutoverStrategy,
    /// File whose existence postpones the cutover.
    #[serde(default)]
    pub postpone_flag_file: Option<PathBuf>,
    /// Upper bound, in seconds, for every blocking wait of the cutover.
    ///
    /// Default when unset: 3. At most one hour.
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,
    /// Interval, in milliseconds, between two checks of the postpone flag file.
    ///
    /// Default when unset: 1000
    #[serde(default)]
    pub postpone_poll_interval_ms: Option<u64>,
}

impl CutoverConfig {
    /// Default bound of every blocking cutover wait.
    pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 3;

    /// Largest accepted lock timeout.
    pub const MAX_LOCK_TIMEOUT_SECS: u64 = 3_600;

    /// Default interval between postpone flag checks.
    pub const DEFAULT_POSTPONE_POLL_INTERVAL_MS: u64 = 1_000;

    /// Returns a copy with unset fields defaulted.
    pub fn with_defaults(&self) -> Self {
        let mut result = self.clone();

        result
            .lock_timeout_secs
            .get_or_insert(Self::DEFAULT_LOCK_TIMEOUT_SECS);
        result
            .postpone_poll_interval_ms
            .get_or_insert(Self::DEFAULT_POSTPONE_POLL_INTERVAL_MS);

        result
    }

    /// Returns the configured lock timeout, falling back to the default.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(
            self.lock_timeout_secs
                .unwrap_or(Self::DEFAULT_LOCK_TIMEOUT_SECS),
        )
    }

    /// Returns the configured postpone poll interval, falling back to the default.
    pub fn postpone_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.postpone_poll_interval_ms
                .unwrap_or(Self::DEFAULT_POSTPONE_POLL_INTERVAL_MS),
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.lock_timeout_secs == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "cutover.lock_timeout_secs".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if let Some(lock_timeout_secs) = self.lock_timeout_secs
            && lock_timeout_secs > Self::MAX_LOCK_TIMEOUT_SECS
        {
            return Err(ValidationError::InvalidFieldValue {
                field: "cutover.lock_timeout_secs".to_string(),
                constraint: format!("must be at most {}", Self::MAX_LOCK_TIMEOUT_SECS),
            });
        }

        if self.postpone_poll_interval_ms == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "cutover.postpone_poll_interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_deserializes_from_snake_case() {
        let config: CutoverConfig =
            serde_json::from_str(r#"{"strategy": "two_step", "lock_timeout_secs": 5}"#).unwrap();

        assert_eq!(config.strategy, CutoverStrategy::TwoStep);
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn with_defaults_fills_only_unset_fields() {
        let config = CutoverConfig {
            lock_timeout_secs: Some(10),
            ..Default::default()
        };

        let defaulted = config.with_defaults();
        assert_eq!(defaulted.lock_timeout_secs, Some(10));
        assert_eq!(
            defaulted.postpone_poll_interval_ms,
            Some(CutoverConfig::DEFAULT_POSTPONE_POLL_INTERVAL_MS)
        );
        assert_eq!(config.postpone_poll_interval_ms, None);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = CutoverConfig {
            lock_timeout_secs: Some(0),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_caps_the_lock_timeout() {
        let mut config = CutoverConfig {
            lock_timeout_secs: Some(CutoverConfig::MAX_LOCK_TIMEOUT_SECS),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.lock_timeout_secs = Some(u64::MAX);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidFieldValue { ref field, .. } if field == "cutover.lock_timeout_secs"
        ));
    }
}
