//! Recorder helpers over the raw Prometheus metrics.
//!
//! The worker and the controller each get a small wrapper bound to their
//! identity, so call sites never repeat label plumbing. Every method is a
//! no-op when metrics were not initialized.

use super::prometheus::{
    ACTIVE_WORKERS, AUTOSCALING_EVENTS, CURRENT_REPLICAS, DB_QUERIES, DB_QUERY_DURATION,
    DESIRED_REPLICAS, JOBS_ACTIVE, JOBS_PROCESSED, JOB_DELAY, JOB_DURATION, QUEUE_DEPTH,
    REDIS_OPS, REDIS_OP_DURATION,
};

/// Metrics recorder bound to one worker identity.
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    worker_id: String,
}

impl WorkerMetrics {
    /// Creates a recorder for the given worker.
    ///
    /// Note: metrics must be initialized with `init_metrics()` before any
    /// recording method has an effect.
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
        }
    }

    /// Records one terminal job outcome and its duration.
    pub fn record_job(&self, processing_type: &str, status: &str, duration_secs: f64) {
        if let Some(counter) = JOBS_PROCESSED.get() {
            counter
                .with_label_values(&[&self.worker_id, processing_type, status])
                .inc();
        }
        if let Some(histogram) = JOB_DURATION.get() {
            histogram
                .with_label_values(&[&self.worker_id, processing_type])
                .observe(duration_secs);
        }
    }

    /// Records the configured synthetic delay of a job.
    pub fn record_delay(&self, processing_type: &str, delay_secs: f64) {
        if let Some(histogram) = JOB_DELAY.get() {
            histogram
                .with_label_values(&[&self.worker_id, processing_type])
                .observe(delay_secs);
        }
    }

    /// Records one database mutation and its duration.
    pub fn record_db_query(&self, operation: &str, duration_secs: f64) {
        if let Some(counter) = DB_QUERIES.get() {
            counter
                .with_label_values(&[&self.worker_id, operation])
                .inc();
        }
        if let Some(histogram) = DB_QUERY_DURATION.get() {
            histogram
                .with_label_values(&[&self.worker_id, operation])
                .observe(duration_secs);
        }
    }

    /// Records one Redis operation and its duration.
    pub fn record_redis_op(&self, operation: &str, duration_secs: f64) {
        if let Some(counter) = REDIS_OPS.get() {
            counter
                .with_label_values(&[&self.worker_id, operation])
                .inc();
        }
        if let Some(histogram) = REDIS_OP_DURATION.get() {
            histogram
                .with_label_values(&[&self.worker_id, operation])
                .observe(duration_secs);
        }
    }

    /// Increments the in-flight gauge. Call strictly after a permit is
    /// acquired.
    pub fn inc_active(&self) {
        if let Some(gauge) = JOBS_ACTIVE.get() {
            gauge.with_label_values(&[&self.worker_id]).inc();
        }
    }

    /// Decrements the in-flight gauge. Call strictly before the permit is
    /// released.
    pub fn dec_active(&self) {
        if let Some(gauge) = JOBS_ACTIVE.get() {
            gauge.with_label_values(&[&self.worker_id]).dec();
        }
    }

    /// Current value of the in-flight gauge for this worker.
    pub fn active_count(&self) -> f64 {
        JOBS_ACTIVE
            .get()
            .map(|gauge| gauge.with_label_values(&[&self.worker_id]).get())
            .unwrap_or(0.0)
    }
}

/// Metrics recorder bound to one managed workload.
#[derive(Debug, Clone)]
pub struct ControllerMetrics {
    workload: String,
}

impl ControllerMetrics {
    /// Creates a recorder for the given workload name.
    pub fn new(workload: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
        }
    }

    /// Sets the depth gauge for one queue.
    pub fn set_queue_depth(&self, queue_name: &str, depth: i64) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.with_label_values(&[queue_name]).set(depth as f64);
        }
    }

    /// Sets the fleet-size gauge.
    pub fn set_active_workers(&self, count: usize) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.set(count as f64);
        }
    }

    /// Records a scaling decision that changed the replica count.
    pub fn record_scaling_event(&self, direction: &str) {
        if let Some(counter) = AUTOSCALING_EVENTS.get() {
            counter
                .with_label_values(&[&self.workload, direction])
                .inc();
        }
    }

    /// Publishes the current and desired replica counts.
    pub fn set_replicas(&self, current: u32, desired: u32) {
        if let Some(gauge) = CURRENT_REPLICAS.get() {
            gauge
                .with_label_values(&[&self.workload])
                .set(f64::from(current));
        }
        if let Some(gauge) = DESIRED_REPLICAS.get() {
            gauge
                .with_label_values(&[&self.workload])
                .set(f64::from(desired));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    #[test]
    fn in_flight_gauge_tracks_inc_dec() {
        let _ = init_metrics();
        let metrics = WorkerMetrics::new("worker-gauge-test");

        assert_eq!(metrics.active_count(), 0.0);
        metrics.inc_active();
        metrics.inc_active();
        assert_eq!(metrics.active_count(), 2.0);
        metrics.dec_active();
        assert_eq!(metrics.active_count(), 1.0);
        metrics.dec_active();
    }

    #[test]
    fn recording_without_init_is_a_no_op() {
        // init_metrics may already have run in another test; either way these
        // must not panic.
        let metrics = WorkerMetrics::new("worker-noop");
        metrics.record_job("uppercase", "success", 0.1);
        metrics.record_delay("uppercase", 1.0);
        metrics.record_db_query("mark_running", 0.01);
        metrics.record_redis_op("claim", 0.01);

        let controller = ControllerMetrics::new("worker");
        controller.set_queue_depth("text_tasks", 5);
        controller.set_active_workers(2);
        controller.record_scaling_event("up");
        controller.set_replicas(1, 3);
    }
}
