//! Reconciliation and metrics-collection loops.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::metrics::ControllerMetrics;
use crate::queue::{QueueError, QUEUE_MAIN, QUEUE_PRIORITY};

use super::policy::ScalingPolicy;
use super::workload::{WorkloadError, WorkloadReplicas};
use super::QueueProbe;

/// Errors that can occur during a reconcile tick.
#[derive(Debug, Error)]
pub enum ScaleError {
    /// Queue substrate probe failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Workload knob operation failed.
    #[error("workload error: {0}")]
    Workload(#[from] WorkloadError),
}

/// Periodic controller that sizes the worker fleet from queue pressure.
pub struct Autoscaler {
    queue: Arc<dyn QueueProbe>,
    workload: Arc<dyn WorkloadReplicas>,
    policy: ScalingPolicy,
    reconcile_interval: Duration,
    metrics: ControllerMetrics,
}

impl Autoscaler {
    /// Creates a controller for one managed workload.
    pub fn new(
        queue: Arc<dyn QueueProbe>,
        workload: Arc<dyn WorkloadReplicas>,
        policy: ScalingPolicy,
        reconcile_interval: Duration,
    ) -> Self {
        let metrics = ControllerMetrics::new(workload.name());
        Self {
            queue,
            workload,
            policy,
            reconcile_interval,
            metrics,
        }
    }

    /// Runs the reconciliation loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.reconcile_interval);
        // The immediate first tick would reconcile before any pressure
        // reading is meaningful; skip it.
        ticker.tick().await;

        info!(
            interval_secs = self.reconcile_interval.as_secs(),
            workload = self.workload.name(),
            "starting periodic reconciliation"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "reconcile tick failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("stopping periodic reconciliation");
                    return;
                }
            }
        }
    }

    /// Runs one reconcile tick.
    ///
    /// Fail-soft on a missing workload and on probe errors: both turn the
    /// tick into a no-op so the controller never scales on stale data.
    pub async fn reconcile(&self) -> Result<(), ScaleError> {
        let Some(current) = self.workload.replicas().await? else {
            info!(
                workload = self.workload.name(),
                "workload not found, skipping tick"
            );
            return Ok(());
        };

        let lengths = match self.queue.all_queue_lengths().await {
            Ok(lengths) => lengths,
            Err(e) => {
                error!(error = %e, "failed to probe queue depth, skipping tick");
                return Ok(());
            }
        };

        // Pressure excludes the failed queue: those messages are not work
        // the fleet can drain by growing.
        let depth = lengths.get(QUEUE_MAIN).copied().unwrap_or(0)
            + lengths.get(QUEUE_PRIORITY).copied().unwrap_or(0);

        let target = self.policy.target(depth, current);

        info!(
            current_replicas = current,
            target_replicas = target,
            queue_depth = depth,
            "scaling analysis"
        );

        if target != current {
            self.workload.patch_replicas(target).await?;

            let direction = if target > current { "up" } else { "down" };
            self.metrics.record_scaling_event(direction);

            info!(
                from = current,
                to = target,
                direction,
                queue_depth = depth,
                "scaled workload"
            );
        }

        self.metrics.set_replicas(current, target);
        Ok(())
    }
}

/// Independent loop feeding the queue-depth and fleet gauges.
pub struct QueueMetricsCollector {
    queue: Arc<dyn QueueProbe>,
    interval: Duration,
    metrics: ControllerMetrics,
}

impl QueueMetricsCollector {
    /// Creates a collector probing at the given interval.
    pub fn new(queue: Arc<dyn QueueProbe>, workload: &str, interval: Duration) -> Self {
        Self {
            queue,
            interval,
            metrics: ControllerMetrics::new(workload),
        }
    }

    /// Runs the collection loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);

        info!(
            interval_secs = self.interval.as_secs(),
            "starting periodic metrics collection"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.collect().await {
                        error!(error = %e, "failed to collect queue metrics");
                    }
                }
                _ = shutdown.recv() => {
                    info!("stopping metrics collection");
                    return;
                }
            }
        }
    }

    /// Probes the substrate once and updates the gauges.
    pub async fn collect(&self) -> Result<(), QueueError> {
        let lengths = self.queue.all_queue_lengths().await?;
        for (queue_name, depth) in &lengths {
            self.metrics.set_queue_depth(queue_name, *depth);
        }

        let workers = self.queue.active_workers().await?;
        self.metrics.set_active_workers(workers.len());

        debug!(
            queue_lengths = ?lengths,
            active_workers = workers.len(),
            "collected queue metrics"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QUEUE_FAILED;
    use crate::scaler::workload::LocalWorkload;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeProbe {
        lengths: Mutex<Result<HashMap<String, i64>, ()>>,
        workers: Vec<String>,
    }

    impl FakeProbe {
        fn with_depths(main: i64, priority: i64, failed: i64) -> Self {
            let mut lengths = HashMap::new();
            lengths.insert(QUEUE_MAIN.to_string(), main);
            lengths.insert(QUEUE_PRIORITY.to_string(), priority);
            lengths.insert(QUEUE_FAILED.to_string(), failed);
            Self {
                lengths: Mutex::new(Ok(lengths)),
                workers: vec!["worker-1".to_string()],
            }
        }

        fn failing() -> Self {
            Self {
                lengths: Mutex::new(Err(())),
                workers: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl QueueProbe for FakeProbe {
        async fn all_queue_lengths(&self) -> Result<HashMap<String, i64>, QueueError> {
            self.lengths
                .lock()
                .expect("lock")
                .clone()
                .map_err(|()| QueueError::ConnectionFailed("probe down".to_string()))
        }

        async fn active_workers(&self) -> Result<Vec<String>, QueueError> {
            Ok(self.workers.clone())
        }
    }

    fn autoscaler(probe: FakeProbe, workload: Arc<LocalWorkload>) -> Autoscaler {
        Autoscaler::new(
            Arc::new(probe),
            workload,
            ScalingPolicy::default(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn scales_up_under_pressure() {
        let workload = Arc::new(LocalWorkload::new("worker", 1));
        let scaler = autoscaler(FakeProbe::with_depths(30, 20, 0), workload.clone());

        scaler.reconcile().await.expect("reconcile");
        // depth 50 -> needed 5, damped to current + 2.
        assert_eq!(workload.current(), 3);
    }

    #[tokio::test]
    async fn failed_queue_is_excluded_from_pressure() {
        let workload = Arc::new(LocalWorkload::new("worker", 2));
        // Only the failed queue is deep; effective depth is 10, inside the
        // hysteresis band.
        let scaler = autoscaler(FakeProbe::with_depths(10, 0, 400), workload.clone());

        scaler.reconcile().await.expect("reconcile");
        assert_eq!(workload.current(), 2);
    }

    #[tokio::test]
    async fn zero_depth_snaps_to_minimum() {
        let workload = Arc::new(LocalWorkload::new("worker", 6));
        let scaler = autoscaler(FakeProbe::with_depths(0, 0, 0), workload.clone());

        scaler.reconcile().await.expect("reconcile");
        assert_eq!(workload.current(), 1);
    }

    #[tokio::test]
    async fn probe_failure_is_a_no_op_tick() {
        let workload = Arc::new(LocalWorkload::new("worker", 4));
        let scaler = autoscaler(FakeProbe::failing(), workload.clone());

        scaler.reconcile().await.expect("reconcile is fail-soft");
        assert_eq!(workload.current(), 4);
    }

    #[tokio::test]
    async fn missing_workload_skips_the_tick() {
        struct MissingWorkload;

        #[async_trait]
        impl WorkloadReplicas for MissingWorkload {
            fn name(&self) -> &str {
                "worker"
            }
            async fn replicas(&self) -> Result<Option<u32>, WorkloadError> {
                Ok(None)
            }
            async fn patch_replicas(&self, _replicas: u32) -> Result<(), WorkloadError> {
                panic!("must not patch a missing workload");
            }
        }

        let scaler = Autoscaler::new(
            Arc::new(FakeProbe::with_depths(100, 0, 0)),
            Arc::new(MissingWorkload),
            ScalingPolicy::default(),
            Duration::from_secs(30),
        );

        scaler.reconcile().await.expect("reconcile");
    }

    #[tokio::test]
    async fn collector_probes_without_error() {
        let probe: Arc<dyn QueueProbe> = Arc::new(FakeProbe::with_depths(3, 1, 2));
        let collector = QueueMetricsCollector::new(probe, "worker", Duration::from_secs(15));
        collector.collect().await.expect("collect");
    }
}
