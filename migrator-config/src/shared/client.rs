use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{DriverConfig, MessageBusConfig, ServiceRegistryConfig, ValidationError};

/// Identity of the node running the migrator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct NodeConfig {
    /// Stable node id. Generated by the agent when absent.
    pub id: Option<String>,
    pub name: String,
    pub datacenter: String,
    pub meta: BTreeMap<String, String>,
}

/// Top level configuration of a migrator client.
///
/// Loaded through [`crate::load_config`]. Every field has a serde default so partial files are
/// accepted; [`ClientConfig::with_defaults`] then resolves the remaining unset values.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ClientConfig {
    pub node: NodeConfig,
    /// Addresses of the coordinating servers.
    pub servers: Vec<String>,
    pub region: String,
    pub state_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    /// Interval, in milliseconds, between two progress statistics publications.
    pub stats_collection_interval_ms: u64,
    pub bind_port: u16,
    pub cluster_id: String,
    pub bus: MessageBusConfig,
    pub registry: ServiceRegistryConfig,
    pub driver: DriverConfig,
    pub publish_node_metrics: bool,
}

impl ClientConfig {
    pub const DEFAULT_REGION: &'static str = "global";

    pub const DEFAULT_LOG_LEVEL: &'static str = "debug";

    pub const DEFAULT_STATS_COLLECTION_INTERVAL_MS: u64 = 1_000;

    pub const DEFAULT_BIND_PORT: u16 = 8191;

    pub const DEFAULT_CLUSTER_ID: &'static str = "migrator-cluster";

    /// Returns an independent copy with every unset value defaulted.
    ///
    /// The receiver is never modified and `with_defaults(with_defaults(c)) == with_defaults(c)`.
    pub fn with_defaults(&self) -> Self {
        let mut result = self.clone();

        if result.region.is_empty() {
            result.region = Self::DEFAULT_REGION.to_string();
        }
        if result.log_level.is_empty() {
            result.log_level = Self::DEFAULT_LOG_LEVEL.to_string();
        }
        if result.stats_collection_interval_ms == 0 {
            result.stats_collection_interval_ms = Self::DEFAULT_STATS_COLLECTION_INTERVAL_MS;
        }
        if result.bind_port == 0 {
            result.bind_port = Self::DEFAULT_BIND_PORT;
        }
        if result.cluster_id.is_empty() {
            result.cluster_id = Self::DEFAULT_CLUSTER_ID.to_string();
        }

        result.bus = MessageBusConfig::defaults().merge(&self.bus);
        result.registry = ServiceRegistryConfig::defaults().merge(&self.registry);
        result.driver = self.driver.with_defaults();

        result
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for server in &self.servers {
            if server.trim().is_empty() {
                return Err(ValidationError::InvalidFieldValue {
                    field: "servers".to_string(),
                    constraint: "must not contain empty addresses".to_string(),
                });
            }
        }

        self.driver.validate()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            servers: Vec::new(),
            region: Self::DEFAULT_REGION.to_string(),
            state_dir: None,
            log_file: None,
            log_level: Self::DEFAULT_LOG_LEVEL.to_string(),
            stats_collection_interval_ms: Self::DEFAULT_STATS_COLLECTION_INTERVAL_MS,
            bind_port: Self::DEFAULT_BIND_PORT,
            cluster_id: Self::DEFAULT_CLUSTER_ID.to_string(),
            bus: MessageBusConfig::default(),
            registry: ServiceRegistryConfig::default(),
            driver: DriverConfig::default(),
            publish_node_metrics: false,
        }
    }
}

impl Config for ClientConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["servers"];
}
