use std::sync::Arc;
use std::time::Duration;

use migrator::cutover::{CutoverOutcome, CutoverPhase};
use migrator::error::ErrorKind;
use migrator::test_utils::executor::FakeCutoverExecutor;
use migrator::test_utils::migration::{finish_row_copy, test_migration};
use migrator::test_utils::postpone::InMemoryPostponeSignal;
use migrator::test_utils::sampler::FakeLoadSampler;
use migrator::throttle::ThrottleReason;
use migrator::workers::base::WorkerHandle;
use migrator_config::shared::{CutoverStrategy, LoadMap};
use migrator_telemetry::tracing::init_test_tracing;

#[tokio::test(start_paused = true)]
async fn critical_load_holds_the_cutover_back_until_it_drops() {
    init_test_tracing();
    let migration = test_migration(
        CutoverStrategy::Atomic,
        5,
        Arc::new(InMemoryPostponeSignal::new(false)),
    );
    finish_row_copy(&migration);

    let cutover = migration.cutover();
    let executor = FakeCutoverExecutor::draining_into(cutover);
    let table = migration.tables()[0].name().clone();

    let sampler = FakeLoadSampler::new(LoadMap::parse("threads_running=150").unwrap());
    let throttler = migration.start_throttler(sampler.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let decision = throttler.state();
    assert!(decision.hard_stop);
    assert!(matches!(
        decision.reason,
        Some(ThrottleReason::CriticalLoad { .. })
    ));

    let err = cutover.run_cutover(&executor, &table).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CutoverTimeout);
    assert!(executor.calls().is_empty());
    assert_eq!(cutover.phase(), CutoverPhase::CopyingRows);

    sampler.set_load(LoadMap::parse("threads_running=10").unwrap());
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!throttler.state().hard_stop);

    let outcome = cutover.run_cutover(&executor, &table).await.unwrap();
    assert_eq!(outcome, CutoverOutcome::Complete);
    assert_eq!(cutover.attempts(), 2);

    cutover.request_shutdown();
    throttler.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failing_sampler_stops_work() {
    init_test_tracing();
    let migration = test_migration(
        CutoverStrategy::Atomic,
        5,
        Arc::new(InMemoryPostponeSignal::new(false)),
    );

    let sampler = FakeLoadSampler::new(LoadMap::parse("threads_running=10").unwrap());
    sampler.fail_with("connection refused");
    let throttler = migration.start_throttler(sampler.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let decision = migration.throttle().current_decision();
    assert!(decision.hard_stop);
    assert!(matches!(
        decision.reason,
        Some(ThrottleReason::SamplingFailed { .. })
    ));

    let mut shutdown_rx = migration.shutdown_rx();
    let wait = tokio::time::timeout(
        Duration::from_secs(1),
        migration.throttle().wait_while_hard_stopped(&mut shutdown_rx),
    )
    .await;
    assert!(wait.is_err());

    migration.cutover().request_shutdown();
    throttler.wait().await.unwrap();
}
