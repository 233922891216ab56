//! Shared configuration types for the migrator.

mod base;
mod bus;
mod client;
mod connection;
mod cutover;
mod driver;
mod load_map;
mod registry;
mod throttle;
mod watchdog;

pub use base::ValidationError;
pub use bus::MessageBusConfig;
pub use client::{ClientConfig, NodeConfig};
pub use connection::{ConnectionConfig, ConnectionConfigWithoutSecrets};
pub use cutover::{CutoverConfig, CutoverStrategy};
pub use driver::{DataSourceConfig, DriverConfig};
pub use load_map::LoadMap;
pub use registry::ServiceRegistryConfig;
pub use throttle::ThrottleConfig;
pub use watchdog::WatchdogConfig;
