use serde::{Deserialize, Serialize};

/// Connection parameters for the message bus client.
///
/// These values are passed through to the bus client untouched; the migrator never interprets
/// them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MessageBusConfig {
    /// Address of the bus, as `host:port`.
    #[serde(default, alias = "address")]
    pub addr: String,
    /// Storage backend of the bus.
    #[serde(default)]
    pub store_type: String,
    /// Directory used by the file storage backend.
    #[serde(default)]
    pub file_store_dir: String,
}

impl MessageBusConfig {
    /// Default address of the message bus.
    pub const DEFAULT_ADDR: &'static str = "127.0.0.1:8193";

    /// Default storage backend of the message bus.
    pub const DEFAULT_STORE_TYPE: &'static str = "memory";

    /// Returns the canonical defaults.
    pub fn defaults() -> Self {
        Self {
            addr: Self::DEFAULT_ADDR.to_string(),
            store_type: Self::DEFAULT_STORE_TYPE.to_string(),
            file_store_dir: String::new(),
        }
    }

    /// Merges `other` on top of `self`: every non-empty field of `other` wins.
    pub fn merge(&self, other: &MessageBusConfig) -> Self {
        let mut result = self.clone();

        if !other.addr.is_empty() {
            result.addr = other.addr.clone();
        }
        if !other.store_type.is_empty() {
            result.store_type = other.store_type.clone();
        }
        if !other.file_store_dir.is_empty() {
            result.file_store_dir = other.file_store_dir.clone();
        }

        result
    }
}
