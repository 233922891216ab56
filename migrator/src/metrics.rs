//! Metrics definitions for migration monitoring.

/// Label for the migrated table in metrics.
pub const TABLE_NAME_LABEL: &str = "table_name";

/// Label for the cutover strategy in metrics.
pub const CUTOVER_STRATEGY_LABEL: &str = "cutover_strategy";

/// Label for the throttle reason in metrics.
pub const THROTTLE_REASON_LABEL: &str = "reason";

// Progress metrics

/// Counter for rows copied from the original table.
pub const MIGRATOR_ROWS_COPIED_TOTAL: &str = "migrator_rows_copied_total";

/// Counter for change events applied to the migrated table.
pub const MIGRATOR_EVENTS_APPLIED_TOTAL: &str = "migrator_events_applied_total";

// Throttle metrics

/// Gauge set to 1 while work is hard stopped, 0 otherwise.
pub const MIGRATOR_THROTTLE_HARD_STOP: &str = "migrator_throttle_hard_stop";

/// Gauge for the current delay ratio in `[0, 1]`.
pub const MIGRATOR_THROTTLE_DELAY_RATIO: &str = "migrator_throttle_delay_ratio";

/// Counter for published throttling decisions, labeled by reason.
pub const MIGRATOR_THROTTLE_CHANGES_TOTAL: &str = "migrator_throttle_changes_total";

/// Counter for load sampling failures.
pub const MIGRATOR_LOAD_SAMPLING_FAILURES_TOTAL: &str = "migrator_load_sampling_failures_total";

// Cutover metrics

/// Gauge for the current cutover phase, as its numeric code.
pub const MIGRATOR_CUTOVER_PHASE: &str = "migrator_cutover_phase";

/// Counter for cutover attempts.
pub const MIGRATOR_CUTOVER_ATTEMPTS_TOTAL: &str = "migrator_cutover_attempts_total";

/// Counter for rejected attempts to enter an already held critical section.
pub const MIGRATOR_CRITICAL_SECTION_CONTENTION_TOTAL: &str =
    "migrator_critical_section_contention_total";

/// Gauge for the time the tables stayed locked during the last cutover.
pub const MIGRATOR_CUTOVER_LOCK_DURATION_SECONDS: &str = "migrator_cutover_lock_duration_seconds";

// Watchdog metrics

/// Counter for detected stalls.
pub const MIGRATOR_STALLS_DETECTED_TOTAL: &str = "migrator_stalls_detected_total";
