use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use migrator_config::shared::{LoadMap, ThrottleConfig};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::MigrationResult;
use crate::metrics::{
    MIGRATOR_THROTTLE_CHANGES_TOTAL, MIGRATOR_THROTTLE_DELAY_RATIO, MIGRATOR_THROTTLE_HARD_STOP,
    THROTTLE_REASON_LABEL,
};

/// Why work is throttled.
#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleReason {
    /// A metric reached its critical threshold.
    CriticalLoad {
        metric: String,
        value: f64,
        threshold: f64,
    },
    /// A metric with a critical threshold could not be measured.
    MissingCriticalMetric { metric: String },
    /// A metric is above its max threshold.
    MaxLoad {
        metric: String,
        value: f64,
        threshold: f64,
    },
    /// A metric with a max threshold could not be measured.
    MissingMaxMetric { metric: String },
    /// Replication lag is at or above the allowed maximum, or unknown.
    ReplicationLag {
        lag: Option<Duration>,
        max_lag: Duration,
    },
    /// The load could not be sampled at all.
    SamplingFailed { error: String },
}

impl ThrottleReason {
    /// Short label identifying the kind of reason in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ThrottleReason::CriticalLoad { .. } => "critical_load",
            ThrottleReason::MissingCriticalMetric { .. } => "missing_critical_metric",
            ThrottleReason::MaxLoad { .. } => "max_load",
            ThrottleReason::MissingMaxMetric { .. } => "missing_max_metric",
            ThrottleReason::ReplicationLag { .. } => "replication_lag",
            ThrottleReason::SamplingFailed { .. } => "sampling_failed",
        }
    }
}

impl fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleReason::CriticalLoad {
                metric,
                value,
                threshold,
            } => write!(f, "critical load {metric}={value} >= {threshold}"),
            ThrottleReason::MissingCriticalMetric { metric } => {
                write!(f, "critical metric {metric} unavailable")
            }
            ThrottleReason::MaxLoad {
                metric,
                value,
                threshold,
            } => write!(f, "max load {metric}={value} > {threshold}"),
            ThrottleReason::MissingMaxMetric { metric } => {
                write!(f, "max load metric {metric} unavailable")
            }
            ThrottleReason::ReplicationLag {
                lag: Some(lag),
                max_lag,
            } => write!(
                f,
                "replication lag {}ms >= {}ms",
                lag.as_millis(),
                max_lag.as_millis()
            ),
            ThrottleReason::ReplicationLag { lag: None, .. } => {
                write!(f, "replication lag unavailable")
            }
            ThrottleReason::SamplingFailed { error } => write!(f, "load sampling failed: {error}"),
        }
    }
}

/// Outcome of a load evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleDecision {
    /// Work must stop entirely.
    pub hard_stop: bool,
    /// Fraction in `[0, 1]` of each unit of work's duration to wait before the next one.
    pub delay_ratio: f64,
    pub reason: Option<ThrottleReason>,
}

impl ThrottleDecision {
    /// A decision letting work proceed at full speed.
    pub fn clear() -> Self {
        Self {
            hard_stop: false,
            delay_ratio: 0.0,
            reason: None,
        }
    }

    /// A decision stopping work entirely for `reason`.
    pub fn hard_stop(reason: ThrottleReason) -> Self {
        Self {
            hard_stop: true,
            delay_ratio: 1.0,
            reason: Some(reason),
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.hard_stop || self.delay_ratio > 0.0
    }

    /// Returns how long to wait after a unit of work that took `work`.
    pub fn delay_for(&self, work: Duration) -> Duration {
        work.mul_f64(self.delay_ratio)
    }
}

impl Default for ThrottleDecision {
    fn default() -> Self {
        Self::clear()
    }
}

#[derive(Debug, Clone)]
struct Thresholds {
    max_load: LoadMap,
    critical_load: LoadMap,
    max_lag: Option<Duration>,
}

#[derive(Debug)]
struct ThrottleControllerInner {
    thresholds: RwLock<Thresholds>,
    nice_ratio: f64,
    decision_tx: watch::Sender<ThrottleDecision>,
}

/// Evaluates load against max and critical thresholds and publishes the resulting decision.
///
/// Cloning yields another handle on the same controller.
#[derive(Debug, Clone)]
pub struct ThrottleController {
    inner: Arc<ThrottleControllerInner>,
}

impl ThrottleController {
    /// Creates a controller from a validated configuration.
    pub fn new(config: &ThrottleConfig) -> MigrationResult<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(ThrottleControllerInner {
                thresholds: RwLock::new(Thresholds {
                    max_load: config.max_load.duplicate(),
                    critical_load: config.critical_load.duplicate(),
                    max_lag: config.max_lag_ms.map(Duration::from_millis),
                }),
                nice_ratio: config.nice_ratio,
                decision_tx: watch::channel(ThrottleDecision::clear()).0,
            }),
        })
    }

    /// Returns an independent copy of the soft thresholds.
    pub fn max_load(&self) -> LoadMap {
        self.inner.thresholds.read().max_load.duplicate()
    }

    /// Returns an independent copy of the hard thresholds.
    pub fn critical_load(&self) -> LoadMap {
        self.inner.thresholds.read().critical_load.duplicate()
    }

    /// Replaces the soft thresholds, rejecting maps that would put a max above its critical.
    pub fn set_max_load(&self, max_load: LoadMap) -> MigrationResult<()> {
        let mut thresholds = self.inner.thresholds.write();
        validate_thresholds(&max_load, &thresholds.critical_load)?;
        thresholds.max_load = max_load;

        Ok(())
    }

    /// Replaces the hard thresholds, rejecting maps that would put a critical below its max.
    pub fn set_critical_load(&self, critical_load: LoadMap) -> MigrationResult<()> {
        let mut thresholds = self.inner.thresholds.write();
        validate_thresholds(&thresholds.max_load, &critical_load)?;
        thresholds.critical_load = critical_load;

        Ok(())
    }

    /// Evaluates `current` load against the thresholds.
    ///
    /// A critical metric that is missing, not finite or at its threshold stops work. Otherwise
    /// the delay ratio is the highest proximity of any max metric to its critical threshold.
    /// Max metrics without a critical counterpart, or missing from `current`, yield a full delay.
    pub fn evaluate(&self, current: &LoadMap) -> ThrottleDecision {
        let thresholds = self.inner.thresholds.read();
        evaluate_load(&thresholds, current)
    }

    /// Like [`ThrottleController::evaluate`], additionally stopping work when replication lag is
    /// at or above the configured maximum. Unknown lag counts as exceeded when a maximum is set.
    pub fn evaluate_with_lag(&self, current: &LoadMap, lag: Option<Duration>) -> ThrottleDecision {
        let thresholds = self.inner.thresholds.read();

        if let Some(max_lag) = thresholds.max_lag
            && lag.is_none_or(|lag| lag >= max_lag)
        {
            return ThrottleDecision::hard_stop(ThrottleReason::ReplicationLag { lag, max_lag });
        }

        evaluate_load(&thresholds, current)
    }

    /// Returns the extra pause to take after a unit of work, independent of load.
    pub fn nice_delay(&self, work: Duration) -> Duration {
        work.mul_f64(self.inner.nice_ratio)
    }

    /// Publishes `decision` as the current one. Returns `true` if it differs from the previous.
    pub fn publish(&self, decision: ThrottleDecision) -> bool {
        let changed = self.inner.decision_tx.send_if_modified(|current| {
            if *current == decision {
                return false;
            }

            *current = decision.clone();
            true
        });

        if changed {
            emit_decision_metrics(&decision);

            match &decision.reason {
                Some(reason) if decision.hard_stop => {
                    warn!(%reason, "throttling: work stopped");
                }
                Some(reason) => {
                    info!(%reason, delay_ratio = decision.delay_ratio, "throttling: work slowed down");
                }
                None => info!("throttling released"),
            }
        }

        changed
    }

    /// Returns the most recently published decision.
    pub fn current_decision(&self) -> ThrottleDecision {
        self.inner.decision_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThrottleDecision> {
        self.inner.decision_tx.subscribe()
    }

    /// Waits until the published decision no longer hard stops work.
    pub async fn wait_while_hard_stopped(
        &self,
        shutdown_rx: &mut ShutdownRx,
    ) -> ShutdownResult<(), ()> {
        let mut decision_rx = self.subscribe();

        tokio::select! {
            biased;

            _ = shutdown_rx.wait_for_shutdown() => ShutdownResult::Shutdown(()),

            _ = decision_rx.wait_for(|decision| !decision.hard_stop) => ShutdownResult::Ok(()),
        }
    }

    /// Applies the current throttle to a unit of work that took `work`.
    ///
    /// Waits while work is hard stopped, then sleeps for the load delay plus the nice delay.
    pub async fn throttle(&self, work: Duration, shutdown_rx: &mut ShutdownRx) -> ShutdownResult<(), ()> {
        if self
            .wait_while_hard_stopped(shutdown_rx)
            .await
            .should_shutdown()
        {
            return ShutdownResult::Shutdown(());
        }

        let delay = self.current_decision().delay_for(work) + self.nice_delay(work);
        if delay.is_zero() {
            return ShutdownResult::Ok(());
        }

        tokio::select! {
            biased;

            _ = shutdown_rx.wait_for_shutdown() => ShutdownResult::Shutdown(()),

            _ = tokio::time::sleep(delay) => ShutdownResult::Ok(()),
        }
    }
}

fn validate_thresholds(max_load: &LoadMap, critical_load: &LoadMap) -> MigrationResult<()> {
    let config = ThrottleConfig {
        max_load: max_load.duplicate(),
        critical_load: critical_load.duplicate(),
        ..Default::default()
    };

    Ok(config.validate()?)
}

fn evaluate_load(thresholds: &Thresholds, current: &LoadMap) -> ThrottleDecision {
    for (metric, critical) in thresholds.critical_load.iter() {
        match current.get(metric) {
            Some(value) if value.is_finite() && value < critical => {}
            Some(value) if value.is_finite() => {
                return ThrottleDecision::hard_stop(ThrottleReason::CriticalLoad {
                    metric: metric.to_string(),
                    value,
                    threshold: critical,
                });
            }
            _ => {
                return ThrottleDecision::hard_stop(ThrottleReason::MissingCriticalMetric {
                    metric: metric.to_string(),
                });
            }
        }
    }

    let mut decision = ThrottleDecision::clear();

    for (metric, max) in thresholds.max_load.iter() {
        let (proximity, reason) = match current.get(metric) {
            Some(value) if value.is_finite() && value <= max => continue,
            Some(value) if value.is_finite() => {
                let proximity = match thresholds.critical_load.get(metric) {
                    Some(critical) if critical > max => (value - max) / (critical - max),
                    _ => 1.0,
                };
                let reason = ThrottleReason::MaxLoad {
                    metric: metric.to_string(),
                    value,
                    threshold: max,
                };

                (proximity, reason)
            }
            _ => (
                1.0,
                ThrottleReason::MissingMaxMetric {
                    metric: metric.to_string(),
                },
            ),
        };

        let proximity = proximity.clamp(0.0, 1.0);
        if proximity > decision.delay_ratio {
            decision.delay_ratio = proximity;
            decision.reason = Some(reason);
        }
    }

    decision
}

fn emit_decision_metrics(decision: &ThrottleDecision) {
    gauge!(MIGRATOR_THROTTLE_HARD_STOP).set(if decision.hard_stop { 1.0 } else { 0.0 });
    gauge!(MIGRATOR_THROTTLE_DELAY_RATIO).set(decision.delay_ratio);

    if let Some(reason) = &decision.reason {
        counter!(
            MIGRATOR_THROTTLE_CHANGES_TOTAL,
            THROTTLE_REASON_LABEL => reason.kind()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;

    fn controller(max_load: &str, critical_load: &str) -> ThrottleController {
        ThrottleController::new(&ThrottleConfig {
            max_load: LoadMap::parse(max_load).unwrap(),
            critical_load: LoadMap::parse(critical_load).unwrap(),
            ..Default::default()
        })
        .unwrap()
    }

    fn load(current: &str) -> LoadMap {
        LoadMap::parse(current).unwrap()
    }

    #[test]
    fn load_above_critical_hard_stops() {
        let decision = controller("lag=5", "lag=10").evaluate(&load("lag=12"));

        assert!(decision.hard_stop);
        assert_eq!(
            decision.reason,
            Some(ThrottleReason::CriticalLoad {
                metric: "lag".to_string(),
                value: 12.0,
                threshold: 10.0,
            })
        );
    }

    #[test]
    fn load_below_max_is_not_delayed() {
        let decision = controller("lag=5", "lag=10").evaluate(&load("lag=4"));

        assert!(!decision.hard_stop);
        assert_eq!(decision.delay_ratio, 0.0);
        assert!(!decision.is_throttled());
    }

    #[test]
    fn load_between_max_and_critical_is_interpolated() {
        let decision = controller("lag=5", "lag=10").evaluate(&load("lag=7"));

        assert!(!decision.hard_stop);
        assert_eq!(decision.delay_ratio, 0.4);
    }

    #[test]
    fn load_at_critical_hard_stops() {
        assert!(controller("lag=5", "lag=10").evaluate(&load("lag=10")).hard_stop);
    }

    #[test]
    fn missing_critical_metric_hard_stops() {
        let decision = controller("", "threads=50").evaluate(&load("lag=1"));

        assert!(decision.hard_stop);
        assert_eq!(
            decision.reason,
            Some(ThrottleReason::MissingCriticalMetric {
                metric: "threads".to_string()
            })
        );
    }

    #[test]
    fn max_only_metric_yields_full_delay_without_hard_stop() {
        let controller = controller("threads=20", "");

        let exceeded = controller.evaluate(&load("threads=21"));
        assert!(!exceeded.hard_stop);
        assert_eq!(exceeded.delay_ratio, 1.0);

        let missing = controller.evaluate(&load(""));
        assert!(!missing.hard_stop);
        assert_eq!(missing.delay_ratio, 1.0);
    }

    #[test]
    fn delay_ratio_is_the_maximum_across_metrics() {
        let decision = controller("lag=5,threads=10", "lag=10,threads=20")
            .evaluate(&load("lag=6,threads=18"));

        assert_eq!(decision.delay_ratio, 0.8);
        assert!(matches!(
            decision.reason,
            Some(ThrottleReason::MaxLoad { ref metric, .. }) if metric == "threads"
        ));
    }

    #[test]
    fn returned_load_maps_are_independent() {
        let controller = controller("lag=5", "lag=10");

        let mut max_load = controller.max_load();
        max_load.insert("lag", 100.0);
        let mut critical_load = controller.critical_load();
        critical_load.remove("lag");

        assert_eq!(controller.max_load().get("lag"), Some(5.0));
        assert_eq!(controller.critical_load().get("lag"), Some(10.0));
        assert!(controller.evaluate(&load("lag=12")).hard_stop);
    }

    #[test]
    fn updating_thresholds_is_validated() {
        let controller = controller("lag=5", "lag=10");

        assert!(controller.set_max_load(load("lag=20")).is_err());
        assert_eq!(controller.max_load().get("lag"), Some(5.0));

        controller.set_critical_load(load("lag=15")).unwrap();
        assert_eq!(controller.evaluate(&load("lag=10")).delay_ratio, 0.5);
    }

    #[test]
    fn replication_lag_above_maximum_hard_stops() {
        let controller = ThrottleController::new(&ThrottleConfig {
            max_lag_ms: Some(1_500),
            ..Default::default()
        })
        .unwrap();

        assert!(!controller
            .evaluate_with_lag(&LoadMap::new(), Some(Duration::from_millis(200)))
            .hard_stop);
        assert!(controller
            .evaluate_with_lag(&LoadMap::new(), Some(Duration::from_millis(1_500)))
            .hard_stop);
        assert!(controller.evaluate_with_lag(&LoadMap::new(), None).hard_stop);
    }

    #[test]
    fn nice_delay_scales_with_work() {
        let controller = ThrottleController::new(&ThrottleConfig {
            nice_ratio: 0.5,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            controller.nice_delay(Duration::from_millis(100)),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = ThrottleController::new(&ThrottleConfig {
            max_load: load("lag=10"),
            critical_load: load("lag=5"),
            ..Default::default()
        });

        assert!(result.is_err());
    }

    #[test]
    fn publish_reports_changes_only() {
        let controller = controller("lag=5", "lag=10");
        let decision = controller.evaluate(&load("lag=12"));

        assert!(controller.publish(decision.clone()));
        assert!(!controller.publish(decision));
        assert!(controller.current_decision().hard_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_waits_until_hard_stop_is_released() {
        let controller = controller("lag=5", "lag=10");
        controller.publish(controller.evaluate(&load("lag=12")));
        let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

        let releaser = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            releaser.publish(ThrottleDecision::clear());
        });

        let started = tokio::time::Instant::now();
        let result = controller
            .throttle(Duration::from_millis(10), &mut shutdown_rx)
            .await;

        assert!(!result.should_shutdown());
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn throttle_returns_on_shutdown() {
        let controller = controller("lag=5", "lag=10");
        controller.publish(controller.evaluate(&load("lag=12")));
        let (shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

        shutdown_tx.shutdown();

        assert!(controller
            .throttle(Duration::from_millis(10), &mut shutdown_rx)
            .await
            .should_shutdown());
    }
}
