//! Queue-pressure autoscaler.
//!
//! A reconciliation loop reads queue pressure (main + priority depth, the
//! failed queue excluded) and nudges the managed workload's replica count
//! within policy bounds. Step sizes are damped and asymmetric so the
//! replica series settles instead of oscillating: at most `step_up` added
//! per tick, at most `step_down` removed, and no change at all inside the
//! hysteresis band.

pub mod controller;
pub mod policy;
pub mod workload;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::queue::{QueueError, TaskQueue};

// Re-export main types for convenience
pub use controller::{Autoscaler, QueueMetricsCollector, ScaleError};
pub use policy::ScalingPolicy;
pub use workload::{LocalWorkload, WorkloadError, WorkloadReplicas};

/// Read-only view of the queue substrate the controller depends on.
#[async_trait]
pub trait QueueProbe: Send + Sync {
    /// Lengths of all three queues, keyed by queue name.
    async fn all_queue_lengths(&self) -> Result<HashMap<String, i64>, QueueError>;

    /// Ids of workers with an unexpired heartbeat.
    async fn active_workers(&self) -> Result<Vec<String>, QueueError>;
}

#[async_trait]
impl QueueProbe for TaskQueue {
    async fn all_queue_lengths(&self) -> Result<HashMap<String, i64>, QueueError> {
        TaskQueue::all_queue_lengths(self).await
    }

    async fn active_workers(&self) -> Result<Vec<String>, QueueError> {
        TaskQueue::active_workers(self).await
    }
}
