use std::sync::Arc;
use std::time::Duration;

use migrator::cutover::{CutoverOutcome, CutoverPhase, PostponeSignal};
use migrator::error::ErrorKind;
use migrator::test_utils::executor::FakeCutoverExecutor;
use migrator::test_utils::migration::{finish_row_copy, test_migration};
use migrator::test_utils::postpone::InMemoryPostponeSignal;
use migrator_config::shared::CutoverStrategy;
use migrator_telemetry::tracing::init_test_tracing;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn marker_never_released_times_out_without_locking() {
    init_test_tracing();
    let signal = Arc::new(InMemoryPostponeSignal::new(true));
    let migration = test_migration(CutoverStrategy::Atomic, 5, signal.clone());
    finish_row_copy(&migration);

    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    let started = Instant::now();
    let err = cutover.run_cutover(&executor, &table).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CutoverTimeout);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(executor.calls().is_empty());
    assert_eq!(cutover.phase(), CutoverPhase::CopyingRows);
    assert!(!cutover.is_postponing());
    assert_eq!(signal.releases(), 0);
}

#[tokio::test(start_paused = true)]
async fn removing_the_marker_lets_the_cutover_proceed() {
    init_test_tracing();
    let signal = Arc::new(InMemoryPostponeSignal::new(true));
    let migration = test_migration(CutoverStrategy::Atomic, 5, signal.clone());
    finish_row_copy(&migration);

    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    let started = Instant::now();
    let (outcome, _) = tokio::join!(cutover.run_cutover(&executor, &table), async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        signal.set_postponed(false);
    });

    let elapsed = started.elapsed();
    assert_eq!(outcome.unwrap(), CutoverOutcome::Complete);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(5));
    assert!(!cutover.is_postponing());
    assert_eq!(signal.releases(), 0);
}

#[tokio::test(start_paused = true)]
async fn unpostpone_command_removes_the_marker() {
    init_test_tracing();
    let signal = Arc::new(InMemoryPostponeSignal::new(true));
    let migration = test_migration(CutoverStrategy::Atomic, 5, signal.clone());
    finish_row_copy(&migration);

    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    let started = Instant::now();
    let (outcome, _) = tokio::join!(cutover.run_cutover(&executor, &table), async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cutover.command_unpostpone());
    });

    assert_eq!(outcome.unwrap(), CutoverOutcome::Complete);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(signal.releases(), 1);
    assert!(!signal.is_postponed().unwrap());
    assert!(cutover.is_unpostpone_commanded());
}

#[tokio::test(start_paused = true)]
async fn status_reports_postponed_cutover() {
    init_test_tracing();
    let signal = Arc::new(InMemoryPostponeSignal::new(true));
    let migration = test_migration(CutoverStrategy::TwoStep, 5, signal.clone());
    finish_row_copy(&migration);

    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    let (outcome, status) = tokio::join!(cutover.run_cutover(&executor, &table), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = cutover.status();
        cutover.command_unpostpone();

        status
    });

    assert_eq!(status.phase, CutoverPhase::Postponed);
    assert!(status.postponing);
    assert!(!status.in_critical_section);
    assert_eq!(status.attempts, 1);

    assert_eq!(outcome.unwrap(), CutoverOutcome::Complete);
    assert_eq!(cutover.phase(), CutoverPhase::Complete);
    assert!(!cutover.is_postponing());
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_postponed_abandons_the_cutover() {
    init_test_tracing();
    let signal = Arc::new(InMemoryPostponeSignal::new(true));
    let migration = test_migration(CutoverStrategy::Atomic, 5, signal.clone());
    finish_row_copy(&migration);

    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    let started = Instant::now();
    let (outcome, _) = tokio::join!(cutover.run_cutover(&executor, &table), async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cutover.phase(), CutoverPhase::Postponed);
        assert!(cutover.request_shutdown());
    });

    assert_eq!(outcome.unwrap(), CutoverOutcome::Shutdown);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(executor.calls().is_empty());
    assert!(!cutover.is_postponing());
    assert!(!cutover.is_in_critical_section());
    assert_eq!(cutover.phase(), CutoverPhase::Shutdown);
    assert!(signal.is_postponed().unwrap());
    assert_eq!(signal.releases(), 0);
}
