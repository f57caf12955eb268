//! Redis-backed task queue substrate.
//!
//! Three logical queues share one Redis instance:
//!
//! - `text_tasks`: main FIFO for normal-priority jobs
//! - `text_tasks:priority`: drained before main on every claim
//! - `text_tasks:failed`: terminal sink, never re-consumed by workers
//!
//! A message lives in at most one queue at a time; `BRPOP` moves it from the
//! substrate into the claiming worker's memory, so delivery is at-least-once
//! and a worker crash between claim and the first row update loses the
//! message. The heartbeat registry (`workers:heartbeat:{worker_id}`, TTL
//! bound) is the authoritative fleet liveness signal.

pub mod message;
pub mod redis;

// Re-export main types for convenience
pub use message::{
    FailedJobMessage, SubmitJobMessage, WorkerHeartbeat, HEARTBEAT_KEY_PREFIX,
    HIGH_PRIORITY_THRESHOLD, MAX_DELAY_MS, QUEUE_FAILED, QUEUE_MAIN, QUEUE_PRIORITY,
};
pub use redis::{QueueError, TaskQueue};
