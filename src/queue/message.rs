//! Wire messages exchanged through the task queue.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::ProcessingType;

/// Main FIFO queue name.
pub const QUEUE_MAIN: &str = "text_tasks";
/// Higher-priority FIFO, drained before main on every claim.
pub const QUEUE_PRIORITY: &str = "text_tasks:priority";
/// Terminal sink for messages that failed before the row owned them.
pub const QUEUE_FAILED: &str = "text_tasks:failed";
/// Key prefix of the heartbeat registry.
pub const HEARTBEAT_KEY_PREFIX: &str = "workers:heartbeat";

/// Messages with a priority above this value go to the priority queue.
/// The split happens at publish time so a claim stays O(1).
pub const HIGH_PRIORITY_THRESHOLD: i64 = 5;

/// Upper bound on the synthetic processing delay.
pub const MAX_DELAY_MS: u64 = 60_000;

/// A job submission as it travels between the publisher and a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitJobMessage {
    /// Identifier shared with the job row.
    pub job_id: Uuid,
    /// Absolute path of the input artifact.
    pub file_path: String,
    /// Requested transformation.
    pub processing_type: ProcessingType,
    /// Transformation parameters.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Publish priority; values above [`HIGH_PRIORITY_THRESHOLD`] route to
    /// the priority queue.
    pub priority: i64,
    /// Synthetic processing delay in milliseconds, applied before any I/O.
    #[serde(default)]
    pub delay_ms: u64,
}

impl SubmitJobMessage {
    /// Creates a message with normal priority and no delay.
    pub fn new(
        job_id: Uuid,
        file_path: impl Into<String>,
        processing_type: ProcessingType,
    ) -> Self {
        Self {
            job_id,
            file_path: file_path.into(),
            processing_type,
            parameters: HashMap::new(),
            priority: 0,
            delay_ms: 0,
        }
    }

    /// Sets the parameter map.
    pub fn with_parameters(mut self, parameters: HashMap<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the publish priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the synthetic processing delay.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Queue this message routes to at publish time.
    pub fn target_queue(&self) -> &'static str {
        if self.priority > HIGH_PRIORITY_THRESHOLD {
            QUEUE_PRIORITY
        } else {
            QUEUE_MAIN
        }
    }
}

/// Envelope deposited on the failed queue.
///
/// `retry_count` is always 1 in this revision; it exists for a future retry
/// mechanism that would re-publish drained envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJobMessage {
    /// The original submission, flattened into the envelope.
    #[serde(flatten)]
    pub message: SubmitJobMessage,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
    /// Why the message was shunted.
    pub error_message: String,
    /// Delivery attempt count.
    pub retry_count: u32,
}

impl FailedJobMessage {
    /// Wraps a message with its failure cause.
    pub fn new(message: SubmitJobMessage, error_message: impl Into<String>) -> Self {
        Self {
            message,
            failed_at: Utc::now(),
            error_message: error_message.into(),
            retry_count: 1,
        }
    }
}

/// Heartbeat record stored under `workers:heartbeat:{worker_id}`.
///
/// The key's TTL is the authoritative liveness signal; this payload is
/// informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    /// Identity of the reporting worker.
    pub worker_id: String,
    /// Unix seconds of the last post.
    pub last_seen: i64,
    /// Always "active" in this revision.
    pub status: String,
}

impl WorkerHeartbeat {
    /// Creates a heartbeat for the given worker, stamped now.
    pub fn now(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            last_seen: Utc::now().timestamp(),
            status: "active".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> SubmitJobMessage {
        SubmitJobMessage::new(
            Uuid::new_v4(),
            "/data/uploads/a.txt",
            ProcessingType::Uppercase,
        )
    }

    #[test]
    fn wire_field_names() {
        let message = sample_message().with_priority(3).with_delay_ms(250);
        let value = serde_json::to_value(&message).expect("serialize");

        assert!(value.get("job_id").is_some());
        assert!(value.get("file_path").is_some());
        assert_eq!(value["processing_type"], "uppercase");
        assert!(value.get("parameters").is_some());
        assert_eq!(value["priority"], 3);
        assert_eq!(value["delay_ms"], 250);
    }

    #[test]
    fn message_round_trip() {
        let mut params = HashMap::new();
        params.insert("find".to_string(), serde_json::json!("old"));
        params.insert("replace_with".to_string(), serde_json::json!("new"));

        let message = SubmitJobMessage::new(
            Uuid::new_v4(),
            "/data/uploads/b.txt",
            ProcessingType::Replace,
        )
        .with_parameters(params)
        .with_priority(7);

        let json = serde_json::to_string(&message).expect("serialize");
        let parsed: SubmitJobMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, message);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = format!(
            r#"{{"job_id":"{}","file_path":"/in/x.txt","processing_type":"wordcount","priority":0}}"#,
            Uuid::new_v4()
        );
        let parsed: SubmitJobMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(parsed.parameters.is_empty());
        assert_eq!(parsed.delay_ms, 0);
    }

    #[test]
    fn priority_split_happens_at_the_threshold() {
        assert_eq!(sample_message().with_priority(0).target_queue(), QUEUE_MAIN);
        assert_eq!(sample_message().with_priority(5).target_queue(), QUEUE_MAIN);
        assert_eq!(
            sample_message().with_priority(6).target_queue(),
            QUEUE_PRIORITY
        );
        assert_eq!(
            sample_message().with_priority(9).target_queue(),
            QUEUE_PRIORITY
        );
    }

    #[test]
    fn failed_envelope_flattens_the_original() {
        let message = sample_message();
        let job_id = message.job_id;
        let envelope = FailedJobMessage::new(message, "mark running failed");

        let value = serde_json::to_value(&envelope).expect("serialize");
        // Original fields sit at the top level next to the failure fields.
        assert_eq!(value["job_id"], serde_json::json!(job_id));
        assert_eq!(value["error_message"], "mark running failed");
        assert_eq!(value["retry_count"], 1);
        assert!(value.get("failed_at").is_some());

        let parsed: FailedJobMessage =
            serde_json::from_value(value).expect("deserialize envelope");
        assert_eq!(parsed.message.job_id, job_id);
        assert_eq!(parsed.retry_count, 1);
    }

    #[test]
    fn heartbeat_payload_shape() {
        let beat = WorkerHeartbeat::now("worker-ab12cd34");
        let value = serde_json::to_value(&beat).expect("serialize");

        assert_eq!(value["worker_id"], "worker-ab12cd34");
        assert_eq!(value["status"], "active");
        assert!(value["last_seen"].is_i64());
    }
}
