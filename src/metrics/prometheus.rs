//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by textflow and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all textflow metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total jobs processed, labeled by worker, processing type, and status.
pub static JOBS_PROCESSED: OnceLock<CounterVec> = OnceLock::new();

/// Job processing duration in seconds, labeled by worker and processing type.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of jobs currently in flight, labeled by worker.
pub static JOBS_ACTIVE: OnceLock<GaugeVec> = OnceLock::new();

/// Configured synthetic delay per job in seconds.
pub static JOB_DELAY: OnceLock<HistogramVec> = OnceLock::new();

/// Total database queries, labeled by worker and operation.
pub static DB_QUERIES: OnceLock<CounterVec> = OnceLock::new();

/// Database query duration in seconds, labeled by worker and operation.
pub static DB_QUERY_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Total Redis operations, labeled by worker and operation.
pub static REDIS_OPS: OnceLock<CounterVec> = OnceLock::new();

/// Redis operation duration in seconds, labeled by worker and operation.
pub static REDIS_OP_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Depth of each queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of workers with an unexpired heartbeat.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Total autoscaling events, labeled by workload and direction.
pub static AUTOSCALING_EVENTS: OnceLock<CounterVec> = OnceLock::new();

/// Currently requested replica count, labeled by workload.
pub static CURRENT_REPLICAS: OnceLock<GaugeVec> = OnceLock::new();

/// Replica count the policy asked for, labeled by workload.
pub static DESIRED_REPLICAS: OnceLock<GaugeVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. Calling it
/// again is a no-op for the already-set statics.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due
/// to duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Worker metrics
    let jobs_processed = CounterVec::new(
        Opts::new(
            "worker_jobs_processed_total",
            "Total number of jobs processed by the worker",
        ),
        &["worker_id", "processing_type", "status"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "worker_job_processing_duration_seconds",
            "Job processing duration in seconds",
        ),
        &["worker_id", "processing_type"],
    )?;

    let jobs_active = GaugeVec::new(
        Opts::new(
            "worker_jobs_active",
            "Number of jobs currently being processed by the worker",
        ),
        &["worker_id"],
    )?;

    let job_delay = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "worker_job_delay_seconds",
            "Configured delay for jobs in seconds",
        )
        .buckets(vec![0.0, 1.0, 5.0, 10.0, 30.0, 60.0]),
        &["worker_id", "processing_type"],
    )?;

    let db_queries = CounterVec::new(
        Opts::new(
            "worker_db_queries_total",
            "Total number of database queries by the worker",
        ),
        &["worker_id", "operation"],
    )?;

    let db_query_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "worker_db_query_duration_seconds",
            "Database query duration in seconds",
        ),
        &["worker_id", "operation"],
    )?;

    let redis_ops = CounterVec::new(
        Opts::new(
            "worker_redis_operations_total",
            "Total number of Redis operations by the worker",
        ),
        &["worker_id", "operation"],
    )?;

    let redis_op_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "worker_redis_operation_duration_seconds",
            "Redis operation duration in seconds",
        ),
        &["worker_id", "operation"],
    )?;

    // Controller metrics
    let queue_depth = GaugeVec::new(
        Opts::new(
            "textflow_queue_depth",
            "Current depth of text processing queues",
        ),
        &["queue_name"],
    )?;

    let active_workers = Gauge::new(
        "textflow_active_workers",
        "Number of active text processing workers",
    )?;

    let autoscaling_events = CounterVec::new(
        Opts::new(
            "textflow_autoscaling_events_total",
            "Total number of autoscaling events",
        ),
        &["workload", "direction"],
    )?;

    let current_replicas = GaugeVec::new(
        Opts::new(
            "textflow_current_replicas",
            "Current number of replicas for the managed workload",
        ),
        &["workload"],
    )?;

    let desired_replicas = GaugeVec::new(
        Opts::new(
            "textflow_desired_replicas",
            "Desired number of replicas for the managed workload",
        ),
        &["workload"],
    )?;

    // Register all metrics with the registry
    registry.register(Box::new(jobs_processed.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(jobs_active.clone()))?;
    registry.register(Box::new(job_delay.clone()))?;
    registry.register(Box::new(db_queries.clone()))?;
    registry.register(Box::new(db_query_duration.clone()))?;
    registry.register(Box::new(redis_ops.clone()))?;
    registry.register(Box::new(redis_op_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(autoscaling_events.clone()))?;
    registry.register(Box::new(current_replicas.clone()))?;
    registry.register(Box::new(desired_replicas.clone()))?;

    // Store metrics in static variables
    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOBS_PROCESSED.set(jobs_processed);
    let _ = JOB_DURATION.set(job_duration);
    let _ = JOBS_ACTIVE.set(jobs_active);
    let _ = JOB_DELAY.set(job_delay);
    let _ = DB_QUERIES.set(db_queries);
    let _ = DB_QUERY_DURATION.set(db_query_duration);
    let _ = REDIS_OPS.set(redis_ops);
    let _ = REDIS_OP_DURATION.set(redis_op_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = AUTOSCALING_EVENTS.set(autoscaling_events);
    let _ = CURRENT_REPLICAS.set(current_replicas);
    let _ = DESIRED_REPLICAS.set(desired_replicas);

    tracing::info!("prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Gathers all metrics from the registry and encodes them in the text
/// exposition format, suitable for scraping.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        // First call should succeed or metrics already initialized
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        let _ = init_metrics();

        if let Some(gauge) = JOBS_ACTIVE.get() {
            gauge.with_label_values(&["worker-test"]).set(1.0);
        }

        let metrics = export_metrics();
        assert!(!metrics.is_empty());
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("worker_jobs_active"));
    }
}
