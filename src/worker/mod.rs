//! Worker runtime.
//!
//! A worker runs three cooperating loops: a heartbeat loop keeping its
//! fleet registration alive, a dispatch loop claiming messages and handing
//! them to per-job drivers under a bounded in-flight envelope, and the
//! drivers themselves, each taking one claimed message to a terminal row
//! state.
//!
//! The worker touches its collaborators only through the seams below, so
//! tests can inject failures at any step of the job state machine.

pub mod runtime;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::queue::{QueueError, SubmitJobMessage, TaskQueue};
use crate::storage::{Database, StoreError};

// Re-export main types for convenience
pub use runtime::{Worker, WorkerError};

/// Queue operations a worker depends on.
#[async_trait]
pub trait JobConsumer: Send + Sync {
    /// Claims the next message, blocking up to `timeout`.
    async fn claim(&self, timeout: Duration) -> Result<SubmitJobMessage, QueueError>;

    /// Shunts a message to the failed queue.
    async fn publish_failed(
        &self,
        message: &SubmitJobMessage,
        error_message: &str,
    ) -> Result<(), QueueError>;

    /// Posts a heartbeat for this worker.
    async fn set_heartbeat(&self, worker_id: &str, interval: Duration) -> Result<(), QueueError>;

    /// Verifies substrate connectivity.
    async fn health_check(&self) -> Result<(), QueueError>;
}

#[async_trait]
impl JobConsumer for TaskQueue {
    async fn claim(&self, timeout: Duration) -> Result<SubmitJobMessage, QueueError> {
        TaskQueue::claim(self, timeout).await
    }

    async fn publish_failed(
        &self,
        message: &SubmitJobMessage,
        error_message: &str,
    ) -> Result<(), QueueError> {
        TaskQueue::publish_failed(self, message, error_message).await
    }

    async fn set_heartbeat(&self, worker_id: &str, interval: Duration) -> Result<(), QueueError> {
        TaskQueue::set_heartbeat(self, worker_id, interval).await
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        TaskQueue::health_check(self).await
    }
}

/// Row mutations a worker depends on.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Transitions the row into Running with worker attribution.
    async fn mark_running(&self, id: Uuid, worker_id: &str) -> Result<(), StoreError>;

    /// Closes the row as Succeeded.
    async fn set_result(&self, id: Uuid, result_path: &str) -> Result<(), StoreError>;

    /// Closes the row as Failed.
    async fn set_error(&self, id: Uuid, error_message: &str) -> Result<(), StoreError>;

    /// Verifies store connectivity.
    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl JobStore for Database {
    async fn mark_running(&self, id: Uuid, worker_id: &str) -> Result<(), StoreError> {
        Database::mark_running(self, id, worker_id).await
    }

    async fn set_result(&self, id: Uuid, result_path: &str) -> Result<(), StoreError> {
        Database::set_result(self, id, result_path).await
    }

    async fn set_error(&self, id: Uuid, error_message: &str) -> Result<(), StoreError> {
        Database::set_error(self, id, error_message).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Database::health_check(self).await
    }
}
