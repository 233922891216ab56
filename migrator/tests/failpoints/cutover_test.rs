use std::sync::Arc;

use migrator::cutover::{CutoverOutcome, CutoverPhase};
use migrator::error::ErrorKind;
use migrator::failpoints::{CUTOVER__AFTER_LOCK_TABLES, CUTOVER__BEFORE_RENAME_TABLES};
use migrator::test_utils::executor::{ExecutorCall, FakeCutoverExecutor};
use migrator::test_utils::failpoints::CustomFailScenario;
use migrator::test_utils::migration::{finish_row_copy, test_migration};
use migrator::test_utils::postpone::InMemoryPostponeSignal;
use migrator_config::shared::CutoverStrategy;
use migrator_telemetry::tracing::init_test_tracing;

fn ready_migration() -> migrator::config::MigrationConfig {
    let migration = test_migration(
        CutoverStrategy::Atomic,
        5,
        Arc::new(InMemoryPostponeSignal::new(false)),
    );
    finish_row_copy(&migration);

    migration
}

#[tokio::test(start_paused = true)]
async fn retryable_failure_before_rename_is_retried() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(CUTOVER__BEFORE_RENAME_TABLES, "1*return(retry)")]);

    let migration = ready_migration();
    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    let outcome = cutover
        .run_cutover_with_retries(&executor, &table, 3)
        .await
        .unwrap();

    assert_eq!(outcome, CutoverOutcome::Complete);
    assert_eq!(cutover.attempts(), 2);

    let renames = executor
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ExecutorCall::Rename(_)))
        .count();
    assert_eq!(renames, 1);
    assert!(!executor.holds_locks());
}

#[tokio::test(start_paused = true)]
async fn non_retryable_failure_after_lock_stops_immediately() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(CUTOVER__AFTER_LOCK_TABLES, "return(no_retry)")]);

    let migration = ready_migration();
    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    let err = cutover
        .run_cutover_with_retries(&executor, &table, 5)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WithNoRetry);
    assert_eq!(cutover.attempts(), 1);
    assert_eq!(
        executor.calls(),
        vec![
            ExecutorCall::Lock(table.to_string()),
            ExecutorCall::Unlock(table.to_string()),
        ]
    );
    assert_eq!(cutover.phase(), CutoverPhase::CopyingRows);
    assert!(!cutover.is_in_critical_section());
}
