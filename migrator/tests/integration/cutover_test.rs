use std::sync::Arc;
use std::time::Duration;

use migrator::cutover::{CutoverOutcome, CutoverPhase};
use migrator::error::ErrorKind;
use migrator::test_utils::executor::{ExecutorCall, FakeCutoverExecutor};
use migrator::test_utils::migration::{finish_row_copy, test_migration};
use migrator::test_utils::postpone::InMemoryPostponeSignal;
use migrator::throttle::{ThrottleDecision, ThrottleReason};
use migrator_config::shared::CutoverStrategy;
use migrator_telemetry::tracing::init_test_tracing;

fn ready_migration(strategy: CutoverStrategy) -> migrator::config::MigrationConfig {
    let migration = test_migration(strategy, 5, Arc::new(InMemoryPostponeSignal::new(false)));
    finish_row_copy(&migration);

    migration
}

#[tokio::test(start_paused = true)]
async fn atomic_cutover_holds_locks_through_rename() {
    init_test_tracing();
    let migration = ready_migration(CutoverStrategy::Atomic);
    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    let outcome = cutover.run_cutover(&executor, &table).await.unwrap();

    assert_eq!(outcome, CutoverOutcome::Complete);
    assert_eq!(
        executor.calls(),
        vec![
            ExecutorCall::Lock(table.to_string()),
            ExecutorCall::InjectDrainMarker(1),
            ExecutorCall::Rename(table.to_string()),
            ExecutorCall::Unlock(table.to_string()),
        ]
    );
    assert_eq!(cutover.phase(), CutoverPhase::Complete);
    assert!(!cutover.is_in_critical_section());
    assert!(cutover.all_events_up_to_lock_processed());
    assert_eq!(cutover.attempts(), 1);

    let timings = cutover.timings();
    assert!(timings.lock_duration().is_some());
    assert!(timings.rename_duration().is_some());
}

#[tokio::test(start_paused = true)]
async fn two_step_cutover_drains_again_after_relocking() {
    init_test_tracing();
    let migration = ready_migration(CutoverStrategy::TwoStep);
    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    let outcome = cutover.run_cutover(&executor, &table).await.unwrap();

    assert_eq!(outcome, CutoverOutcome::Complete);
    assert_eq!(
        executor.calls(),
        vec![
            ExecutorCall::Lock(table.to_string()),
            ExecutorCall::InjectDrainMarker(1),
            ExecutorCall::Unlock(table.to_string()),
            ExecutorCall::Lock(table.to_string()),
            ExecutorCall::InjectDrainMarker(2),
            ExecutorCall::Rename(table.to_string()),
            ExecutorCall::Unlock(table.to_string()),
        ]
    );
    assert!(cutover.is_cutover_complete());
    assert!(!executor.holds_locks());
}

#[tokio::test(start_paused = true)]
async fn undrained_events_time_out_and_release_locks() {
    init_test_tracing();
    let migration = ready_migration(CutoverStrategy::Atomic);
    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    executor.drop_drain_markers();
    let table = migration.tables()[0].name().clone();

    let started = tokio::time::Instant::now();
    let err = cutover.run_cutover(&executor, &table).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CutoverTimeout);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(!executor.holds_locks());
    assert!(!executor.calls().contains(&ExecutorCall::Rename(table.to_string())));
    assert_eq!(cutover.phase(), CutoverPhase::CopyingRows);
    assert!(!cutover.is_in_critical_section());
}

#[tokio::test(start_paused = true)]
async fn failed_lock_attempts_are_retried() {
    init_test_tracing();
    let migration = ready_migration(CutoverStrategy::Atomic);
    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    executor.fail_next_locks(2);
    let table = migration.tables()[0].name().clone();

    let outcome = cutover
        .run_cutover_with_retries(&executor, &table, 5)
        .await
        .unwrap();

    assert_eq!(outcome, CutoverOutcome::Complete);
    assert_eq!(cutover.attempts(), 3);
    assert!(!executor.holds_locks());
}

#[tokio::test(start_paused = true)]
async fn failed_unlock_between_steps_is_retried_with_locks_released() {
    init_test_tracing();
    let migration = ready_migration(CutoverStrategy::TwoStep);
    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    executor.fail_next_unlocks(1);
    let table = migration.tables()[0].name().clone();

    let err = cutover.run_cutover(&executor, &table).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnlockTablesFailed);
    assert!(err.kind().is_retryable());
    assert_eq!(
        executor.calls(),
        vec![
            ExecutorCall::Lock(table.to_string()),
            ExecutorCall::InjectDrainMarker(1),
            ExecutorCall::Unlock(table.to_string()),
            ExecutorCall::Unlock(table.to_string()),
        ]
    );
    assert_eq!(cutover.phase(), CutoverPhase::CopyingRows);

    let outcome = cutover
        .run_cutover_with_retries(&executor, &table, 3)
        .await
        .unwrap();

    assert_eq!(outcome, CutoverOutcome::Complete);
    assert_eq!(cutover.attempts(), 2);
    assert!(!executor.holds_locks());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_the_last_error() {
    init_test_tracing();
    let migration = ready_migration(CutoverStrategy::Atomic);
    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    executor.fail_next_renames(10);
    let table = migration.tables()[0].name().clone();

    let err = cutover
        .run_cutover_with_retries(&executor, &table, 3)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CutoverRetriesExhausted);
    assert_eq!(cutover.attempts(), 3);
    assert_eq!(cutover.phase(), CutoverPhase::CopyingRows);
    assert!(!executor.holds_locks());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_drain_releases_locks() {
    init_test_tracing();
    let migration = ready_migration(CutoverStrategy::Atomic);
    let cutover = migration.cutover().clone();
    let executor = FakeCutoverExecutor::draining_into(&cutover);
    executor.drop_drain_markers();
    let table = migration.tables()[0].name().clone();

    let handle = tokio::spawn({
        let cutover = cutover.clone();
        let executor = executor.clone();
        async move { cutover.run_cutover(&executor, &table).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cutover.phase(), CutoverPhase::InCriticalSection);
    assert!(cutover.request_shutdown());

    let outcome = handle.await.unwrap().unwrap();

    assert_eq!(outcome, CutoverOutcome::Shutdown);
    assert_eq!(cutover.phase(), CutoverPhase::Shutdown);
    assert!(!executor.holds_locks());
    assert!(!cutover.is_in_critical_section());
}

#[tokio::test(start_paused = true)]
async fn hard_stopped_throttle_keeps_tables_unlocked() {
    init_test_tracing();
    let migration = ready_migration(CutoverStrategy::Atomic);
    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    migration
        .throttle()
        .publish(ThrottleDecision::hard_stop(ThrottleReason::CriticalLoad {
            metric: "threads_running".to_string(),
            value: 120.0,
            threshold: 100.0,
        }));

    let err = cutover.run_cutover(&executor, &table).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CutoverTimeout);
    assert!(executor.calls().is_empty());
    assert_eq!(cutover.phase(), CutoverPhase::CopyingRows);
}

#[tokio::test]
async fn cutover_after_shutdown_does_nothing() {
    init_test_tracing();
    let migration = ready_migration(CutoverStrategy::Atomic);
    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    cutover.request_shutdown();
    let outcome = cutover.run_cutover(&executor, &table).await.unwrap();

    assert_eq!(outcome, CutoverOutcome::Shutdown);
    assert_eq!(cutover.attempts(), 0);
    assert!(executor.calls().is_empty());
}
