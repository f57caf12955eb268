//! Replica knob of the managed workload.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a workload knob implementation.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// Reading the current replica count failed.
    #[error("failed to read workload replicas: {0}")]
    ReadFailed(String),

    /// Patching the replica count failed (conflicts excluded; see trait).
    #[error("failed to patch workload replicas: {0}")]
    PatchFailed(String),
}

/// The replica-count knob of a named managed workload.
///
/// Implementations mutate only the replica field, with merge-patch
/// semantics so concurrent edits of other fields are not clobbered.
/// Optimistic-concurrency conflicts are swallowed by the implementation:
/// the next reconcile tick resolves them.
#[async_trait]
pub trait WorkloadReplicas: Send + Sync {
    /// Name of the managed workload, used for logs and metric labels.
    fn name(&self) -> &str;

    /// Currently requested replica count, or `None` when the workload does
    /// not exist (the controller skips that tick).
    async fn replicas(&self) -> Result<Option<u32>, WorkloadError>;

    /// Requests a new replica count.
    async fn patch_replicas(&self, replicas: u32) -> Result<(), WorkloadError>;
}

/// In-process replica knob.
///
/// Stands in for an orchestrator-managed workload during local runs and in
/// tests; the count is a plain atomic that hosting code can observe.
pub struct LocalWorkload {
    name: String,
    replicas: AtomicU32,
}

impl LocalWorkload {
    /// Creates a knob starting at the given replica count.
    pub fn new(name: impl Into<String>, initial_replicas: u32) -> Self {
        Self {
            name: name.into(),
            replicas: AtomicU32::new(initial_replicas),
        }
    }

    /// Reads the knob synchronously.
    pub fn current(&self) -> u32 {
        self.replicas.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadReplicas for LocalWorkload {
    fn name(&self) -> &str {
        &self.name
    }

    async fn replicas(&self) -> Result<Option<u32>, WorkloadError> {
        Ok(Some(self.replicas.load(Ordering::SeqCst)))
    }

    async fn patch_replicas(&self, replicas: u32) -> Result<(), WorkloadError> {
        self.replicas.store(replicas, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_workload_round_trips_the_knob() {
        let workload = LocalWorkload::new("worker", 1);
        assert_eq!(workload.name(), "worker");
        assert_eq!(workload.replicas().await.expect("read"), Some(1));

        workload.patch_replicas(4).await.expect("patch");
        assert_eq!(workload.current(), 4);
        assert_eq!(workload.replicas().await.expect("read"), Some(4));
    }
}
