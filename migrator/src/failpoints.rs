use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};

pub const CUTOVER__AFTER_LOCK_TABLES: &str = "cutover.after_lock_tables";
pub const CUTOVER__BEFORE_RENAME_TABLES: &str = "cutover.before_rename_tables";
pub const THROTTLER__BEFORE_SAMPLE: &str = "throttler.before_sample";

pub fn migrator_fail_point(name: &str) -> MigrationResult<()> {
    fail_point!(name, |parameter| {
        let mut error_kind = ErrorKind::WithNoRetry;
        if let Some(parameter) = parameter {
            error_kind = match parameter.as_str() {
                "no_retry" => ErrorKind::WithNoRetry,
                "retry" => ErrorKind::WithRetry,
                _ => ErrorKind::WithNoRetry,
            }
        }

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
