use std::fmt;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::MigrationResult;

/// Capability reaching a co-located server without going over the network.
///
/// Injected by the embedding agent and only ever invoked here.
pub trait RpcHandler: fmt::Debug + Send + Sync {
    fn call<'a>(&'a self, method: &'a str, payload: Value) -> BoxFuture<'a, MigrationResult<Value>>;
}
