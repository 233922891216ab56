use std::future::Future;
use std::time::Duration;

use migrator_config::shared::LoadMap;

use crate::error::MigrationResult;

/// Health measurements taken at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSample {
    /// Current value of every measured metric.
    pub load: LoadMap,
    /// Replication lag of the replica the change stream is read from, when measured.
    pub replication_lag: Option<Duration>,
}

/// Source of health measurements, implemented by the SQL layer.
///
/// A metric the sampler cannot read should be left out of [`LoadSample::load`] rather than
/// reported as zero: the throttler treats missing critical metrics as unhealthy.
pub trait LoadSampler {
    fn sample(&self) -> impl Future<Output = MigrationResult<LoadSample>> + Send;
}
