//! Aggregate configuration of a migration.
//!
//! [`MigrationConfig`] composes the client configuration, the migrated tables and the live
//! coordination components. Copies follow one rule: values are deep copied, while the injected
//! RPC handler and the live components (progress, throttle, cutover) are shared, so every copy
//! observes and drives the same running migration.

use std::sync::Arc;

use migrator_config::shared::{ClientConfig, CutoverConfig, DriverConfig};
use serde_json::Value;
use tracing::debug;

use crate::{bail, migrator_error};
use crate::concurrency::shutdown::ShutdownRx;
use crate::cutover::{CutoverCoordinator, PostponeSignal};
use crate::error::{ErrorKind, MigrationResult};
use crate::rpc::RpcHandler;
use crate::schema::{TableDescriptor, TableName};
use crate::state::progress::ProgressTracker;
use crate::state::table::Table;
use crate::throttle::{LoadSampler, ThrottleController};
use crate::workers::base::Worker;
use crate::workers::throttler::{ThrottlerWorker, ThrottlerWorkerHandle};
use crate::workers::watchdog::{StallWatchdog, StallWatchdogHandle};

#[derive(Debug)]
pub struct MigrationConfig {
    client: ClientConfig,
    tables: Vec<Arc<Table>>,
    rpc_handler: Option<Arc<dyn RpcHandler>>,
    progress: Arc<ProgressTracker>,
    throttle: ThrottleController,
    cutover: CutoverCoordinator,
}

impl MigrationConfig {
    /// Validates `client` and builds the live components from its driver configuration.
    pub fn new(client: ClientConfig, tables: Vec<TableDescriptor>) -> MigrationResult<Self> {
        Self::build(client, tables, CutoverCoordinator::new)
    }

    /// Like [`MigrationConfig::new`] with a custom postpone marker in place of the flag file.
    pub fn with_postpone_signal(
        client: ClientConfig,
        tables: Vec<TableDescriptor>,
        postpone_signal: Arc<dyn PostponeSignal>,
    ) -> MigrationResult<Self> {
        Self::build(client, tables, |config, progress, throttle| {
            CutoverCoordinator::with_postpone_signal(config, progress, throttle, Some(postpone_signal))
        })
    }

    fn build<F>(
        client: ClientConfig,
        tables: Vec<TableDescriptor>,
        new_coordinator: F,
    ) -> MigrationResult<Self>
    where
        F: FnOnce(
            CutoverConfig,
            Arc<ProgressTracker>,
            ThrottleController,
        ) -> MigrationResult<CutoverCoordinator>,
    {
        client.validate()?;

        let driver = client.driver.with_defaults();
        let progress = Arc::new(ProgressTracker::new());
        let throttle = ThrottleController::new(&driver.throttle)?;
        let cutover = new_coordinator(driver.cutover, progress.clone(), throttle.clone())?;

        let rows_estimate = tables.iter().map(|table| table.rows_estimate).sum();
        progress.set_rows_estimate(rows_estimate);

        Ok(Self {
            client,
            tables: tables
                .into_iter()
                .map(|descriptor| Arc::new(Table::new(descriptor)))
                .collect(),
            rpc_handler: None,
            progress,
            throttle,
            cutover,
        })
    }

    /// Injects the local RPC capability.
    pub fn with_rpc_handler(mut self, rpc_handler: Arc<dyn RpcHandler>) -> Self {
        self.rpc_handler = Some(rpc_handler);
        self
    }

    /// Returns an independent copy with every unset client value defaulted.
    ///
    /// The receiver is left untouched and applying it twice yields the same values as once.
    pub fn with_defaults(&self) -> Self {
        let mut result = self.copy();
        result.client = self.client.with_defaults();

        result
    }

    /// Returns a copy with deep copied values and shared capabilities and live components.
    pub fn copy(&self) -> Self {
        Self {
            client: self.client.clone(),
            tables: self
                .tables
                .iter()
                .map(|table| Arc::new(table.duplicate()))
                .collect(),
            rpc_handler: self.rpc_handler.clone(),
            progress: self.progress.clone(),
            throttle: self.throttle.clone(),
            cutover: self.cutover.clone(),
        }
    }

    pub fn client(&self) -> &ClientConfig {
        &self.client
    }

    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    pub fn table(&self, name: &TableName) -> Option<&Arc<Table>> {
        self.tables.iter().find(|table| table.name() == name)
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn throttle(&self) -> &ThrottleController {
        &self.throttle
    }

    pub fn cutover(&self) -> &CutoverCoordinator {
        &self.cutover
    }

    pub fn rpc_handler(&self) -> Option<&Arc<dyn RpcHandler>> {
        self.rpc_handler.as_ref()
    }

    /// Number of row copy workers, at least one.
    pub fn parallel_workers(&self) -> u16 {
        self.client
            .driver
            .parallel_workers
            .unwrap_or(DriverConfig::DEFAULT_PARALLEL_WORKERS)
            .max(1)
    }

    pub fn max_retries(&self) -> u64 {
        self.client.driver.max_retries()
    }

    pub fn shutdown_rx(&self) -> ShutdownRx {
        self.cutover.subscribe_shutdown()
    }

    /// Invokes `method` on the co-located server.
    ///
    /// Fails with [`ErrorKind::RpcUnavailable`] when no handler was injected and with
    /// [`ErrorKind::RpcFailed`], wrapping the handler's error, when the call itself fails.
    pub async fn invoke_rpc(&self, method: &str, payload: Value) -> MigrationResult<Value> {
        let Some(rpc_handler) = &self.rpc_handler else {
            bail!(
                ErrorKind::RpcUnavailable,
                "No local RPC handler configured",
                format!("Cannot invoke {method}")
            );
        };

        debug!(method, "invoking local rpc");
        rpc_handler.call(method, payload).await.map_err(|err| {
            migrator_error!(
                ErrorKind::RpcFailed,
                "Local RPC call failed",
                format!("{method} returned an error"),
                source: err
            )
        })
    }

    /// Starts the throttler over `sampler`, stopping on migration shutdown.
    pub async fn start_throttler<S>(&self, sampler: S) -> MigrationResult<ThrottlerWorkerHandle>
    where
        S: LoadSampler + Send + Sync + 'static,
    {
        let driver = self.client.driver.with_defaults();

        ThrottlerWorker::new(
            self.throttle.clone(),
            sampler,
            &driver.throttle,
            self.shutdown_rx(),
        )
        .start()
        .await
    }

    /// Starts the stall watchdog, stopping on migration shutdown.
    pub async fn start_watchdog(&self) -> MigrationResult<StallWatchdogHandle> {
        let driver = self.client.driver.with_defaults();
        driver.watchdog.validate()?;

        StallWatchdog::new(self.progress.clone(), &driver.watchdog, self.shutdown_rx())
            .start()
            .await
    }
}

#[cfg(test)]
mod tests {
    use migrator_config::shared::NodeConfig;

    use super::*;
    use crate::schema::ColumnList;

    fn descriptor(name: &str) -> TableDescriptor {
        let mut descriptor = TableDescriptor::new(
            TableName::new("shop".to_string(), name.to_string()),
            ColumnList::from_iter(["id", "amount"]),
        );
        descriptor.rows_estimate = 500;

        descriptor
    }

    #[test]
    fn rows_estimate_sums_tables() {
        let config =
            MigrationConfig::new(ClientConfig::default(), vec![descriptor("a"), descriptor("b")])
                .unwrap();

        assert_eq!(config.progress().rows_estimate(), 1_000);
        assert_eq!(config.tables().len(), 2);
    }

    #[test]
    fn copy_deep_copies_values() {
        let mut client = ClientConfig::default();
        client.node = NodeConfig {
            name: "node-1".to_string(),
            ..NodeConfig::default()
        };
        client.servers = vec!["10.0.0.1:8193".to_string()];

        let config = MigrationConfig::new(client, vec![descriptor("orders")]).unwrap();
        let copy = config.copy();

        assert_eq!(copy.client(), config.client());
        assert!(!Arc::ptr_eq(&copy.tables()[0], &config.tables()[0]));
        assert_eq!(
            copy.tables()[0].descriptor(),
            config.tables()[0].descriptor()
        );
        assert!(Arc::ptr_eq(copy.progress(), config.progress()));
    }

    #[tokio::test]
    async fn rpc_without_handler_is_unavailable() {
        let config = MigrationConfig::new(ClientConfig::default(), vec![]).unwrap();

        let err = config
            .invoke_rpc("status", Value::Null)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RpcUnavailable);
    }
}
