use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Connection to the database whose table is migrated.
///
/// Consumed by the SQL layer only; the coordinator never opens connections itself.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Connection as seen from the replica the binlog is read from, when different.
    #[serde(default)]
    pub replica_host: Option<String>,
}

impl ConnectionConfig {
    pub const DEFAULT_PORT: u16 = 3306;
}

impl PartialEq for ConnectionConfig {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.user == other.user
            && self.replica_host == other.replica_host
            && self.password.as_ref().map(|p| p.expose_secret().as_str())
                == other.password.as_ref().map(|p| p.expose_secret().as_str())
    }
}

/// Same as [`ConnectionConfig`] but without the password, safe to serialize and log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfigWithoutSecrets {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_host: Option<String>,
}

impl From<ConnectionConfig> for ConnectionConfigWithoutSecrets {
    fn from(value: ConnectionConfig) -> Self {
        ConnectionConfigWithoutSecrets {
            host: value.host,
            port: value.port,
            user: value.user,
            replica_host: value.replica_host,
        }
    }
}
