use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, MigrationError, MigrationResult};

/// Position in the source database change stream.
///
/// Binlog files are named like `mysql-bin.000123`; coordinates order by the numeric suffix of the
/// file name first and by the offset within the file second.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinlogCoordinate {
    pub log_file: String,
    pub log_pos: u64,
}

impl BinlogCoordinate {
    pub fn new(log_file: impl Into<String>, log_pos: u64) -> Self {
        Self {
            log_file: log_file.into(),
            log_pos,
        }
    }

    /// Returns `true` for the zero value, i.e. no position recorded yet.
    pub fn is_empty(&self) -> bool {
        self.log_file.is_empty() && self.log_pos == 0
    }

    /// Extracts the numeric suffix of the binlog file name.
    pub fn file_number(&self) -> MigrationResult<u32> {
        let Some((_, suffix)) = self.log_file.rsplit_once('.') else {
            bail!(
                ErrorKind::ConversionError,
                "Invalid binlog file name",
                format!("Binlog file `{}` has no numeric suffix", self.log_file)
            );
        };

        Ok(suffix.parse::<u32>()?)
    }

    /// Returns `true` when `self` is strictly before `other` in the change stream.
    pub fn smaller_than(&self, other: &BinlogCoordinate) -> bool {
        self < other
    }
}

impl Ord for BinlogCoordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.file_number()
            .ok()
            .cmp(&other.file_number().ok())
            .then_with(|| self.log_file.cmp(&other.log_file))
            .then_with(|| self.log_pos.cmp(&other.log_pos))
    }
}

impl PartialOrd for BinlogCoordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BinlogCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.log_file, self.log_pos)
    }
}

/// Parses the `file:offset` form produced by [`fmt::Display`].
impl FromStr for BinlogCoordinate {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((log_file, log_pos)) = s.trim().rsplit_once(':') else {
            bail!(
                ErrorKind::ConversionError,
                "Invalid binlog coordinate",
                format!("Expected `file:offset`, got `{s}`")
            );
        };

        if log_file.is_empty() {
            bail!(
                ErrorKind::ConversionError,
                "Invalid binlog coordinate",
                format!("Missing binlog file name in `{s}`")
            );
        }

        Ok(BinlogCoordinate::new(log_file, log_pos.parse::<u64>()?))
    }
}
