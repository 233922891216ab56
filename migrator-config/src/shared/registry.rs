use serde::{Deserialize, Serialize};

/// Connection parameters for the service registry client.
///
/// Passed through to the registry client; the migrator never interprets them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceRegistryConfig {
    /// Address of the registry agent, as `host:port`.
    #[serde(default)]
    pub addr: String,
    /// Name under which the migrator registers itself.
    #[serde(default)]
    pub service_name: String,
    /// Tags attached to the registration.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ServiceRegistryConfig {
    pub const DEFAULT_ADDR: &'static str = "127.0.0.1:8500";

    pub const DEFAULT_SERVICE_NAME: &'static str = "migrator";

    pub fn defaults() -> Self {
        Self {
            addr: Self::DEFAULT_ADDR.to_string(),
            service_name: Self::DEFAULT_SERVICE_NAME.to_string(),
            tags: Vec::new(),
        }
    }

    /// Merges `other` on top of `self`: non-empty fields of `other` win.
    pub fn merge(&self, other: &ServiceRegistryConfig) -> Self {
        let mut result = self.clone();

        if !other.addr.is_empty() {
            result.addr = other.addr.clone();
        }
        if !other.service_name.is_empty() {
            result.service_name = other.service_name.clone();
        }
        if !other.tags.is_empty() {
            result.tags = other.tags.clone();
        }

        result
    }
}
