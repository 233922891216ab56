use std::sync::Arc;

use migrator_config::shared::{ClientConfig, CutoverConfig, CutoverStrategy, LoadMap};

use crate::config::MigrationConfig;
use crate::cutover::PostponeSignal;
use crate::schema::{ColumnList, TableDescriptor, TableName, UniqueKey};

/// Returns a descriptor of `shop.<name>` keyed by its `id` primary key.
pub fn test_table_descriptor(name: &str) -> TableDescriptor {
    let mut descriptor = TableDescriptor::new(
        TableName::new("shop".to_string(), name.to_string()),
        ColumnList::from_iter(["id", "customer_id", "amount", "created_at"]),
    );

    descriptor.unique_keys = vec![UniqueKey {
        name: "PRIMARY".to_string(),
        columns: ColumnList::from_iter(["id"]),
        has_nullable: false,
        is_auto_increment: true,
    }];
    descriptor.shared_columns = descriptor.original_columns.clone();
    descriptor.mapped_shared_columns = descriptor.original_columns.clone();
    descriptor.rows_estimate = 10_000;
    descriptor.engine = "InnoDB".to_string();
    descriptor.alter_statement = "ADD COLUMN note VARCHAR(255)".to_string();

    descriptor
}

/// Client configuration using `strategy` and a cutover lock timeout of `lock_timeout_secs`.
pub fn test_client_config(strategy: CutoverStrategy, lock_timeout_secs: u64) -> ClientConfig {
    let mut client = ClientConfig::default();
    client.driver.cutover = CutoverConfig {
        strategy,
        lock_timeout_secs: Some(lock_timeout_secs),
        ..CutoverConfig::default()
    };
    client.driver.throttle.max_load = LoadMap::parse("threads_running=50").unwrap();
    client.driver.throttle.critical_load = LoadMap::parse("threads_running=100").unwrap();

    client
}

/// Builds a migration of `shop.orders` postponed by `postpone_signal`.
pub fn test_migration(
    strategy: CutoverStrategy,
    lock_timeout_secs: u64,
    postpone_signal: Arc<dyn PostponeSignal>,
) -> MigrationConfig {
    MigrationConfig::with_postpone_signal(
        test_client_config(strategy, lock_timeout_secs),
        vec![test_table_descriptor("orders")],
        postpone_signal,
    )
    .unwrap()
}

/// Walks a migration through row counting and copying so that it is ready to cut over.
pub fn finish_row_copy(migration: &MigrationConfig) {
    let cutover = migration.cutover();
    cutover.begin_row_count();
    cutover.begin_row_copy().unwrap();
    cutover.end_row_count();

    let progress = migration.progress();
    progress.mark_row_copy_start().unwrap();
    progress.increment_rows_copied(progress.rows_estimate());
    progress.mark_row_copy_end().unwrap();
}
