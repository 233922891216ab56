use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use migrator::config::MigrationConfig;
use migrator::error::{ErrorKind, MigrationResult};
use migrator::migrator_error;
use migrator::rpc::RpcHandler;
use migrator::schema::ColumnValues;
use migrator::test_utils::migration::{test_client_config, test_table_descriptor};
use migrator::test_utils::sampler::FakeLoadSampler;
use migrator::workers::base::WorkerHandle;
use migrator_config::shared::{ClientConfig, CutoverStrategy, LoadMap, MessageBusConfig};
use migrator_telemetry::tracing::init_test_tracing;
use serde_json::{Value, json};

#[derive(Debug)]
struct EchoRpcHandler;

impl RpcHandler for EchoRpcHandler {
    fn call<'a>(&'a self, method: &'a str, payload: Value) -> BoxFuture<'a, MigrationResult<Value>> {
        Box::pin(async move { Ok(json!({ "method": method, "payload": payload })) })
    }
}

#[derive(Debug)]
struct FailingRpcHandler;

impl RpcHandler for FailingRpcHandler {
    fn call<'a>(&'a self, _method: &'a str, _payload: Value) -> BoxFuture<'a, MigrationResult<Value>> {
        Box::pin(async {
            Err(migrator_error!(
                ErrorKind::IoError,
                "Local socket closed",
                "connection reset by peer"
            ))
        })
    }
}

fn sparse_client() -> ClientConfig {
    let mut client = test_client_config(CutoverStrategy::Atomic, 3);
    client.region = String::new();
    client.bind_port = 0;
    client.cluster_id = String::new();
    client.bus = MessageBusConfig::default();
    client.driver.parallel_workers = None;

    client
}

#[test]
fn with_defaults_is_idempotent_and_leaves_receiver_untouched() {
    init_test_tracing();
    let migration =
        MigrationConfig::new(sparse_client(), vec![test_table_descriptor("orders")]).unwrap();

    let once = migration.with_defaults();
    let twice = once.with_defaults();

    assert_eq!(once.client(), twice.client());
    assert_eq!(once.client().region, ClientConfig::DEFAULT_REGION);
    assert_eq!(once.client().bind_port, 8191);
    assert_eq!(once.client().cluster_id, ClientConfig::DEFAULT_CLUSTER_ID);
    assert_eq!(once.client().bus.addr, "127.0.0.1:8193");
    assert_eq!(once.client().bus.store_type, "memory");
    assert_eq!(once.client().driver.parallel_workers, Some(1));

    assert!(migration.client().region.is_empty());
    assert_eq!(migration.client().bind_port, 0);
    assert!(migration.client().bus.addr.is_empty());
    assert_eq!(migration.client().driver.parallel_workers, None);
    assert_eq!(migration.parallel_workers(), 1);
}

#[tokio::test]
async fn copies_share_capabilities_and_duplicate_tables() {
    init_test_tracing();
    let migration = MigrationConfig::new(
        test_client_config(CutoverStrategy::Atomic, 3),
        vec![test_table_descriptor("orders"), test_table_descriptor("refunds")],
    )
    .unwrap()
    .with_rpc_handler(Arc::new(EchoRpcHandler));

    let copy = migration.copy();

    assert!(Arc::ptr_eq(
        copy.rpc_handler().unwrap(),
        migration.rpc_handler().unwrap()
    ));
    assert!(Arc::ptr_eq(copy.progress(), migration.progress()));
    assert_eq!(copy.progress().rows_estimate(), 20_000);

    let orders = copy.tables()[0].name().clone();
    let iteration = copy.table(&orders).unwrap().advance_chunk(
        ColumnValues::new(vec![json!(1)]),
        ColumnValues::new(vec![json!(1_000)]),
    );
    assert_eq!(iteration, 1);
    assert_eq!(migration.table(&orders).unwrap().iteration(), 0);
    assert!(migration.table(&orders).unwrap().chunk_range().max.is_none());

    let response = copy
        .invoke_rpc("status", json!({ "verbose": true }))
        .await
        .unwrap();
    assert_eq!(
        response,
        json!({ "method": "status", "payload": { "verbose": true } })
    );
}

#[tokio::test]
async fn rpc_without_handler_is_unavailable() {
    init_test_tracing();
    let migration = MigrationConfig::new(ClientConfig::default(), vec![]).unwrap();

    let err = migration
        .copy()
        .invoke_rpc("unpostpone", Value::Null)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RpcUnavailable);
}

#[tokio::test]
async fn failing_rpc_call_keeps_the_handler_error_as_source() {
    init_test_tracing();
    let migration = MigrationConfig::new(ClientConfig::default(), vec![])
        .unwrap()
        .with_rpc_handler(Arc::new(FailingRpcHandler));

    let err = migration
        .invoke_rpc("unpostpone", Value::Null)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RpcFailed);
    assert!(err.kind().is_retryable());
    assert!(err.detail().unwrap().contains("unpostpone"));

    let source = std::error::Error::source(&err).unwrap();
    assert!(source.to_string().contains("[IoError] Local socket closed"));
}

#[test]
fn shutdown_through_a_copy_reaches_the_original() {
    init_test_tracing();
    let migration = MigrationConfig::new(ClientConfig::default(), vec![]).unwrap();
    let copy = migration.copy();
    let shutdown_rx = migration.shutdown_rx();

    assert!(copy.cutover().request_shutdown());

    assert!(migration.cutover().is_shutdown_requested());
    assert!(shutdown_rx.is_shutdown());
}

#[test]
fn invalid_client_config_is_rejected() {
    init_test_tracing();
    let mut client = ClientConfig::default();
    client.servers = vec!["  ".to_string()];

    let err = MigrationConfig::new(client, vec![]).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
}

#[test]
fn unbounded_lock_timeout_is_rejected() {
    init_test_tracing();
    let client = test_client_config(CutoverStrategy::Atomic, u64::MAX);

    let err = MigrationConfig::new(client, vec![test_table_descriptor("orders")]).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(err.detail().unwrap().contains("cutover.lock_timeout_secs"));
}

#[tokio::test(start_paused = true)]
async fn workers_stop_on_migration_shutdown() {
    init_test_tracing();
    let migration = MigrationConfig::new(
        test_client_config(CutoverStrategy::Atomic, 3),
        vec![test_table_descriptor("orders")],
    )
    .unwrap();

    let sampler = FakeLoadSampler::new(LoadMap::parse("threads_running=5").unwrap());
    let throttler = migration.start_throttler(sampler.clone()).await.unwrap();
    let watchdog = migration.start_watchdog().await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(sampler.samples_taken() >= 1);
    assert!(!throttler.state().hard_stop);
    assert!(!watchdog.state().stalled);

    migration.cutover().request_shutdown();

    throttler.wait().await.unwrap();
    watchdog.wait().await.unwrap();
}
