use std::sync::Arc;

use migrator::failpoints::THROTTLER__BEFORE_SAMPLE;
use migrator::test_utils::failpoints::CustomFailScenario;
use migrator::test_utils::migration::test_migration;
use migrator::test_utils::postpone::InMemoryPostponeSignal;
use migrator::test_utils::sampler::FakeLoadSampler;
use migrator::throttle::ThrottleReason;
use migrator::workers::throttler::ThrottlerWorker;
use migrator_config::shared::{CutoverStrategy, LoadMap, ThrottleConfig};
use migrator_telemetry::tracing::init_test_tracing;

#[tokio::test(start_paused = true)]
async fn failed_sample_stops_work_until_the_next_good_sample() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(THROTTLER__BEFORE_SAMPLE, "1*return(retry)")]);

    let migration = test_migration(
        CutoverStrategy::Atomic,
        5,
        Arc::new(InMemoryPostponeSignal::new(false)),
    );
    let sampler = FakeLoadSampler::new(LoadMap::parse("threads_running=5").unwrap());
    let worker = ThrottlerWorker::new(
        migration.throttle().clone(),
        sampler.clone(),
        &ThrottleConfig::default(),
        migration.shutdown_rx(),
    );

    let decision = worker.evaluate_once().await;
    assert!(decision.hard_stop);
    assert!(matches!(
        decision.reason,
        Some(ThrottleReason::SamplingFailed { .. })
    ));
    assert_eq!(sampler.samples_taken(), 0);
    assert!(migration.throttle().current_decision().hard_stop);

    let decision = worker.evaluate_once().await;
    assert!(!decision.hard_stop);
    assert_eq!(sampler.samples_taken(), 1);
    assert!(!migration.throttle().current_decision().hard_stop);
}
