//! Coordination core of an online table migration.
//!
//! Rows of the original table are copied in chunks while its change stream is applied to the
//! ghost table; once both caught up, the tables are swapped in a short critical section. This
//! crate holds the state every worker shares during that process:
//!
//! - [`state::progress::ProgressTracker`] tracks row copy timing, the binlog position and the
//!   progress counters.
//! - [`throttle::ThrottleController`] turns load measurements into throttle decisions.
//! - [`cutover::CutoverCoordinator`] drives the phase state machine, the cutover critical section,
//!   operator postponement and shutdown.
//! - [`config::MigrationConfig`] composes them with the client configuration and the migrated
//!   tables.
//!
//! SQL execution, binlog parsing and the network transports stay outside: they plug in through
//! [`cutover::CutoverExecutor`], [`throttle::LoadSampler`], [`cutover::PostponeSignal`] and
//! [`rpc::RpcHandler`].

pub mod concurrency;
pub mod config;
pub mod cutover;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod rpc;
pub mod schema;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod throttle;
pub mod workers;
