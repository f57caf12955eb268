//! Redis adapter for the task queue substrate.
//!
//! Publishing LPUSHes onto the left of a list and claiming BRPOPs from the
//! right, so FIFO order of publication is preserved within one queue. A
//! single `BRPOP` across `[priority, main]` gives the priority queue
//! preference on every claim. Shunting to the failed queue and the
//! heartbeat registry are best-effort auxiliary operations.

use std::collections::HashMap;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::message::{
    FailedJobMessage, SubmitJobMessage, WorkerHeartbeat, HEARTBEAT_KEY_PREFIX, MAX_DELAY_MS,
    QUEUE_FAILED, QUEUE_MAIN, QUEUE_PRIORITY,
};

/// Extra seconds added to the heartbeat TTL beyond two intervals.
const HEARTBEAT_TTL_BUFFER_SECS: u64 = 10;
/// Multiplier applied to the heartbeat interval when computing the TTL.
const HEARTBEAT_TTL_MULTIPLIER: u64 = 2;

/// Timeout applied to health-probe pings.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to encode or decode a queue message.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking claim elapsed with nothing available.
    #[error("no jobs available in the queue")]
    NoJobsAvailable,

    /// The message violates a publish-time bound.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Typed facade over the Redis queue substrate.
pub struct TaskQueue {
    redis: ConnectionManager,
}

impl TaskQueue {
    /// Connects to Redis and returns a new task queue.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        info!("redis connection established");
        Ok(Self { redis })
    }

    /// Creates a task queue from an existing connection manager.
    ///
    /// Useful when the connection is shared with other components.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Publishes a job message, routing by priority.
    ///
    /// Messages with priority above the threshold go to the priority queue;
    /// everything else goes to main. The split is decided here so a claim
    /// never scans.
    pub async fn publish(&self, message: &SubmitJobMessage) -> Result<(), QueueError> {
        if message.delay_ms > MAX_DELAY_MS {
            return Err(QueueError::InvalidMessage(format!(
                "delay_ms {} exceeds maximum {}",
                message.delay_ms, MAX_DELAY_MS
            )));
        }

        let data = serde_json::to_string(message)?;
        let queue_name = message.target_queue();

        debug!(
            job_id = %message.job_id,
            queue = queue_name,
            processing_type = %message.processing_type,
            "publishing job"
        );

        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(queue_name, data).await?;

        info!(job_id = %message.job_id, queue = queue_name, "job published");
        Ok(())
    }

    /// Atomically claims the next message, preferring the priority queue.
    ///
    /// Blocks up to `timeout`. Returns [`QueueError::NoJobsAvailable`] when
    /// the wait elapses with nothing available. A message that fails to
    /// decode is already consumed and therefore lost; the error surfaces to
    /// the caller.
    pub async fn claim(&self, timeout: Duration) -> Result<SubmitJobMessage, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1);

        let reply: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(QUEUE_PRIORITY)
            .arg(QUEUE_MAIN)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        let (queue_name, data) = reply.ok_or(QueueError::NoJobsAvailable)?;
        let message: SubmitJobMessage = serde_json::from_str(&data)?;

        debug!(job_id = %message.job_id, queue = %queue_name, "job claimed");
        Ok(message)
    }

    /// Shunts a message to the failed queue with its failure cause.
    ///
    /// The failed queue is a terminal sink; nothing in the core re-consumes
    /// it.
    pub async fn publish_failed(
        &self,
        message: &SubmitJobMessage,
        error_message: &str,
    ) -> Result<(), QueueError> {
        let envelope = FailedJobMessage::new(message.clone(), error_message);
        let data = serde_json::to_string(&envelope)?;

        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(QUEUE_FAILED, data).await?;

        Ok(())
    }

    /// Posts (or refreshes) a worker heartbeat.
    ///
    /// TTL = 2 x interval + 10 s, so one missed beat does not retire the
    /// worker from the fleet.
    pub async fn set_heartbeat(
        &self,
        worker_id: &str,
        interval: Duration,
    ) -> Result<(), QueueError> {
        let key = format!("{HEARTBEAT_KEY_PREFIX}:{worker_id}");
        let beat = WorkerHeartbeat::now(worker_id);
        let data = serde_json::to_string(&beat)?;

        let ttl_secs =
            interval.as_secs() * HEARTBEAT_TTL_MULTIPLIER + HEARTBEAT_TTL_BUFFER_SECS;

        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(&key, data, ttl_secs).await?;

        Ok(())
    }

    /// Returns the ids of workers with an unexpired heartbeat.
    ///
    /// Entries that fail to decode are skipped, not fatal.
    pub async fn active_workers(&self) -> Result<Vec<String>, QueueError> {
        let mut conn = self.redis.clone();
        let pattern = format!("{HEARTBEAT_KEY_PREFIX}:*");
        let keys: Vec<String> = conn.keys(pattern).await?;

        let mut workers = Vec::new();
        for key in keys {
            let value: Option<String> = match conn.get(&key).await {
                Ok(value) => value,
                Err(_) => continue, // expired between KEYS and GET
            };
            let Some(value) = value else { continue };
            match serde_json::from_str::<WorkerHeartbeat>(&value) {
                Ok(beat) => workers.push(beat.worker_id),
                Err(e) => warn!(key = %key, error = %e, "skipping undecodable heartbeat"),
            }
        }

        Ok(workers)
    }

    /// Returns the length of a single queue.
    pub async fn queue_length(&self, queue_name: &str) -> Result<i64, QueueError> {
        let mut conn = self.redis.clone();
        let length: i64 = conn.llen(queue_name).await?;
        Ok(length)
    }

    /// Returns the lengths of all three queues.
    pub async fn all_queue_lengths(&self) -> Result<HashMap<String, i64>, QueueError> {
        let mut lengths = HashMap::new();
        for queue in [QUEUE_MAIN, QUEUE_PRIORITY, QUEUE_FAILED] {
            lengths.insert(queue.to_string(), self.queue_length(queue).await?);
        }
        Ok(lengths)
    }

    /// Peeks at failed-queue envelopes without removing them.
    ///
    /// Undecodable entries are skipped so one corrupt envelope does not hide
    /// the rest from an operator.
    pub async fn peek_failed(&self, limit: usize) -> Result<Vec<FailedJobMessage>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn
            .lrange(QUEUE_FAILED, 0, limit as isize - 1)
            .await?;

        let mut envelopes = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_str(&entry) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => warn!(error = %e, "skipping undecodable failed envelope"),
            }
        }

        Ok(envelopes)
    }

    /// Deletes all three queues.
    ///
    /// **Warning**: this permanently discards queued work. Intended for test
    /// fixtures and development resets.
    pub async fn purge(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.del(QUEUE_MAIN).del(QUEUE_PRIORITY).del(QUEUE_FAILED);
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Verifies connectivity with a bounded PING.
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let cmd = redis::cmd("PING");
        let ping = cmd.query_async::<String>(&mut conn);
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, ping).await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Err(QueueError::ConnectionFailed(
                "health check timed out".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ProcessingType;
    use uuid::Uuid;

    #[test]
    fn queue_error_display() {
        let err = QueueError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = QueueError::NoJobsAvailable;
        assert!(err.to_string().contains("no jobs"));

        let err = QueueError::InvalidMessage("delay_ms 90000 exceeds maximum 60000".to_string());
        assert!(err.to_string().contains("90000"));
    }

    #[test]
    fn heartbeat_ttl_math() {
        let interval = Duration::from_secs(30);
        let ttl = interval.as_secs() * HEARTBEAT_TTL_MULTIPLIER + HEARTBEAT_TTL_BUFFER_SECS;
        assert_eq!(ttl, 70);
    }

    #[test]
    fn failed_envelope_serializes_for_the_wire() {
        let message = SubmitJobMessage::new(
            Uuid::new_v4(),
            "/in/a.txt",
            ProcessingType::WordCount,
        );
        let envelope = FailedJobMessage::new(message, "mark running failed");
        let data = serde_json::to_string(&envelope).expect("serialize");
        let parsed: serde_json::Value = serde_json::from_str(&data).expect("parse back");
        assert_eq!(parsed["retry_count"], 1);
    }
}
