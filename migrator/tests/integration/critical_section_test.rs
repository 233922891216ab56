use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use migrator::config::MigrationConfig;
use migrator::cutover::CutoverOutcome;
use migrator::error::ErrorKind;
use migrator::test_utils::executor::FakeCutoverExecutor;
use migrator::test_utils::migration::{finish_row_copy, test_migration};
use migrator::test_utils::postpone::InMemoryPostponeSignal;
use migrator_config::shared::{ClientConfig, CutoverStrategy};
use migrator_telemetry::tracing::init_test_tracing;

#[test]
fn critical_section_has_a_single_holder_under_contention() {
    init_test_tracing();
    let migration = MigrationConfig::new(ClientConfig::default(), vec![]).unwrap();

    let holders = Arc::new(AtomicUsize::new(0));
    let max_holders = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let cutover = migration.cutover().clone();
            let holders = holders.clone();
            let max_holders = max_holders.clone();
            let entries = entries.clone();

            std::thread::spawn(move || {
                for _ in 0..500 {
                    match cutover.enter_critical_section() {
                        Ok(Some(guard)) => {
                            let current = holders.fetch_add(1, Ordering::SeqCst) + 1;
                            max_holders.fetch_max(current, Ordering::SeqCst);
                            std::thread::yield_now();
                            holders.fetch_sub(1, Ordering::SeqCst);
                            entries.fetch_add(1, Ordering::SeqCst);
                            drop(guard);
                        }
                        Ok(None) => panic!("critical section refused without shutdown"),
                        Err(err) => assert_eq!(err.kind(), ErrorKind::CriticalSectionBusy),
                    }
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(max_holders.load(Ordering::SeqCst), 1);
    assert!(entries.load(Ordering::SeqCst) > 0);
    assert!(!migration.cutover().is_in_critical_section());
}

#[test]
fn critical_section_is_refused_once_shutdown_is_requested() {
    init_test_tracing();
    let migration = MigrationConfig::new(ClientConfig::default(), vec![]).unwrap();
    let entries_after_shutdown = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let cutover = migration.cutover().clone();
            let entries_after_shutdown = entries_after_shutdown.clone();

            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    let shutdown_before = cutover.is_shutdown_requested();
                    match cutover.enter_critical_section() {
                        Ok(Some(guard)) => {
                            if shutdown_before {
                                entries_after_shutdown.fetch_add(1, Ordering::SeqCst);
                            }
                            drop(guard);
                        }
                        Ok(None) => assert!(cutover.is_shutdown_requested()),
                        Err(err) => assert_eq!(err.kind(), ErrorKind::CriticalSectionBusy),
                    }
                }
            })
        })
        .collect();

    std::thread::yield_now();
    assert!(migration.cutover().request_shutdown());

    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(entries_after_shutdown.load(Ordering::SeqCst), 0);
    assert!(migration.cutover().enter_critical_section().unwrap().is_none());
    assert!(!migration.cutover().is_in_critical_section());
}

#[tokio::test(start_paused = true)]
async fn concurrent_cutovers_complete_only_once() {
    init_test_tracing();
    let migration = test_migration(
        CutoverStrategy::Atomic,
        5,
        Arc::new(InMemoryPostponeSignal::new(false)),
    );
    finish_row_copy(&migration);

    let cutover = migration.cutover().clone();
    let executor = FakeCutoverExecutor::draining_into(&cutover);
    let table = migration.tables()[0].name().clone();

    let (first, second) = tokio::join!(
        cutover.run_cutover(&executor, &table),
        cutover.run_cutover(&executor, &table)
    );

    let outcomes = [first, second];
    let completed = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Ok(CutoverOutcome::Complete)))
        .count();
    assert_eq!(completed, 1);

    for outcome in outcomes.iter().filter(|outcome| outcome.is_err()) {
        let kind = outcome.as_ref().unwrap_err().kind();
        assert!(
            matches!(
                kind,
                ErrorKind::CriticalSectionBusy | ErrorKind::ProtocolViolation
            ),
            "unexpected error kind {kind:?}"
        );
    }

    assert!(cutover.is_cutover_complete());
    assert!(!executor.holds_locks());
}
