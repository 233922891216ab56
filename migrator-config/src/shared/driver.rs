use serde::Deserialize;

use crate::shared::{
    ConnectionConfig, CutoverConfig, ThrottleConfig, ValidationError, WatchdogConfig,
};

/// Database and tables replicated from it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DataSourceConfig {
    pub database: String,
    #[serde(default)]
    pub tables: Vec<String>,
}

/// Migration driver settings.
///
/// Optional knobs stay `None` until [`DriverConfig::with_defaults`] fills them, so a loaded
/// configuration can tell apart "unset" from "explicitly set to the default value".
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct DriverConfig {
    pub replicate_do_db: Vec<DataSourceConfig>,
    /// Rows copied per chunk.
    pub chunk_size: Option<u64>,
    /// Attempts of a failing operation (including cutover) before giving up.
    pub max_retries: Option<u64>,
    pub parallel_workers: Option<u16>,
    pub throttle: ThrottleConfig,
    pub cutover: CutoverConfig,
    pub watchdog: WatchdogConfig,
    /// Binlog format of the source server.
    pub binlog_format: String,
    pub binlog_row_image: String,
    pub time_zone: String,
    pub approve_heterogeneous: bool,
    pub skip_renamed_columns: bool,
    pub concurrent_count_table_rows: bool,
    pub connection: Option<ConnectionConfig>,
}

impl DriverConfig {
    pub const DEFAULT_CHUNK_SIZE: u64 = 1_000;

    pub const DEFAULT_MAX_RETRIES: u64 = 60;

    pub const DEFAULT_PARALLEL_WORKERS: u16 = 1;

    /// Binlog format the event applier requires.
    pub const REQUIRED_BINLOG_FORMAT: &'static str = "ROW";

    /// Returns a copy with unset knobs defaulted. Applying it twice yields the same value.
    pub fn with_defaults(&self) -> Self {
        let mut result = self.clone();

        result.chunk_size.get_or_insert(Self::DEFAULT_CHUNK_SIZE);
        result.max_retries.get_or_insert(Self::DEFAULT_MAX_RETRIES);
        result
            .parallel_workers
            .get_or_insert(Self::DEFAULT_PARALLEL_WORKERS);
        result.cutover = result.cutover.with_defaults();

        result
    }

    /// Returns `true` when the source server must be switched to row based binlogs first.
    ///
    /// The server reports the format in upper case, so the comparison is exact.
    pub fn requires_binlog_format_change(&self) -> bool {
        self.binlog_format != Self::REQUIRED_BINLOG_FORMAT
    }

    pub fn max_retries(&self) -> u64 {
        self.max_retries.unwrap_or(Self::DEFAULT_MAX_RETRIES)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.chunk_size == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "driver.chunk_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.parallel_workers == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "driver.parallel_workers".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        for source in &self.replicate_do_db {
            if source.database.is_empty() {
                return Err(ValidationError::InvalidFieldValue {
                    field: "driver.replicate_do_db.database".to_string(),
                    constraint: "must not be empty".to_string(),
                });
            }
        }

        self.throttle.validate()?;
        self.cutover.validate()?;
        self.watchdog.validate()?;

        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            replicate_do_db: Vec::new(),
            chunk_size: None,
            max_retries: None,
            parallel_workers: None,
            throttle: ThrottleConfig::default(),
            cutover: CutoverConfig::default(),
            watchdog: WatchdogConfig::default(),
            binlog_format: Self::REQUIRED_BINLOG_FORMAT.to_string(),
            binlog_row_image: "FULL".to_string(),
            time_zone: "+00:00".to_string(),
            approve_heterogeneous: false,
            skip_renamed_columns: false,
            concurrent_count_table_rows: false,
            connection: None,
        }
    }
}
