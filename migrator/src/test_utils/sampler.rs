use std::sync::Arc;
use std::time::Duration;

use migrator_config::shared::LoadMap;
use parking_lot::Mutex;

use crate::error::{ErrorKind, MigrationResult};
use crate::migrator_error;
use crate::throttle::{LoadSample, LoadSampler};

#[derive(Debug)]
struct FakeLoadSamplerState {
    next: Result<LoadSample, String>,
    samples_taken: u64,
}

/// Load sampler returning whatever the test last scripted.
///
/// Clones share the script, so a test can keep one clone while the throttler owns another.
#[derive(Debug, Clone)]
pub struct FakeLoadSampler {
    state: Arc<Mutex<FakeLoadSamplerState>>,
}

impl FakeLoadSampler {
    pub fn new(load: LoadMap) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeLoadSamplerState {
                next: Ok(LoadSample {
                    load,
                    replication_lag: None,
                }),
                samples_taken: 0,
            })),
        }
    }

    pub fn set_load(&self, load: LoadMap) {
        let mut state = self.state.lock();
        let replication_lag = state
            .next
            .as_ref()
            .ok()
            .and_then(|sample| sample.replication_lag);

        state.next = Ok(LoadSample {
            load,
            replication_lag,
        });
    }

    pub fn set_replication_lag(&self, replication_lag: Option<Duration>) {
        let mut state = self.state.lock();
        let load = state
            .next
            .as_ref()
            .map(|sample| sample.load.clone())
            .unwrap_or_default();

        state.next = Ok(LoadSample {
            load,
            replication_lag,
        });
    }

    /// Makes every following sample fail with `message`.
    pub fn fail_with(&self, message: &str) {
        self.state.lock().next = Err(message.to_string());
    }

    pub fn samples_taken(&self) -> u64 {
        self.state.lock().samples_taken
    }
}

impl LoadSampler for FakeLoadSampler {
    async fn sample(&self) -> MigrationResult<LoadSample> {
        let mut state = self.state.lock();
        state.samples_taken += 1;

        match &state.next {
            Ok(sample) => Ok(sample.clone()),
            Err(message) => Err(migrator_error!(
                ErrorKind::LoadSamplingFailed,
                "Load sampling failed",
                message
            )),
        }
    }
}
