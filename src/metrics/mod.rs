//! Metrics module for Prometheus-based monitoring.
//!
//! This module provides metrics collection and export for the worker
//! runtime and the autoscaler: job throughput and latency, queue depths,
//! fleet size, and scaling decisions. The core only emits; exposition is
//! the host's concern.
//!
//! # Example
//!
//! ```ignore
//! use textflow::metrics::{init_metrics, export_metrics, WorkerMetrics};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! // Create a recorder bound to one worker identity
//! let metrics = WorkerMetrics::new("worker-ab12cd34");
//! metrics.record_job("uppercase", "success", 0.42);
//!
//! // Export metrics for scraping
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

// Re-export key types for convenient access
pub use collectors::{ControllerMetrics, WorkerMetrics};
pub use prometheus::{export_metrics, init_metrics};
