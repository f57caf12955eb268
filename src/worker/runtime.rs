//! The worker: heartbeat loop, dispatch loop, and per-job drivers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::ProcessError;
use crate::metrics::WorkerMetrics;
use crate::processing::pipeline::{create_result_dir, FilePipeline};
use crate::queue::{QueueError, SubmitJobMessage};
use crate::storage::StoreError;

use super::{JobConsumer, JobStore};

/// Errors that can occur while setting up or probing a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The result directory could not be created.
    #[error("failed to create result directory: {0}")]
    ResultDir(#[from] ProcessError),

    /// Database health check failed.
    #[error("database health check failed: {0}")]
    Store(#[from] StoreError),

    /// Queue health check failed.
    #[error("queue health check failed: {0}")]
    Queue(#[from] QueueError),
}

/// A stateless job worker.
///
/// One claimed message is owned exclusively by its driver until it reaches
/// a terminal row state; the in-flight semaphore is the only worker-local
/// shared mutable resource.
pub struct Worker {
    config: WorkerConfig,
    worker_id: String,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobConsumer>,
    pipeline: FilePipeline,
    in_flight: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    metrics: WorkerMetrics,
}

impl Worker {
    /// Creates a worker, generating an identity when none is configured and
    /// creating the result directory.
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobConsumer>,
    ) -> Result<Self, WorkerError> {
        let worker_id = if config.worker_id.is_empty() {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("worker-{}", &suffix[..8])
        } else {
            config.worker_id.clone()
        };

        create_result_dir(&config.result_dir)?;
        let pipeline = FilePipeline::new(&config.result_dir);

        let in_flight = Arc::new(Semaphore::new(config.concurrent_jobs));
        let (shutdown_tx, _) = broadcast::channel(1);
        let metrics = WorkerMetrics::new(&worker_id);

        Ok(Self {
            config,
            worker_id,
            store,
            queue,
            pipeline,
            in_flight,
            shutdown_tx,
            metrics,
        })
    }

    /// This worker's identity.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Signals every loop and driver to stop.
    ///
    /// Dispatch stops claiming; in-flight drivers run to their terminal
    /// transition (or cancel their delay); [`run`] returns once every permit
    /// is back.
    ///
    /// [`run`]: Worker::run
    pub fn stop(&self) {
        info!(worker_id = %self.worker_id, "stopping worker");
        // Ignore send error - all receivers may have already stopped
        let _ = self.shutdown_tx.send(());
    }

    /// Runs the worker until [`stop`] is called.
    ///
    /// [`stop`]: Worker::stop
    pub async fn run(self: Arc<Self>) {
        info!(
            worker_id = %self.worker_id,
            concurrent_jobs = self.config.concurrent_jobs,
            "starting worker"
        );

        let heartbeat = {
            let worker = Arc::clone(&self);
            tokio::spawn(async move { worker.heartbeat_loop().await })
        };

        self.dispatch_loop().await;

        // Wait for every in-flight driver to release its permit.
        let _ = self
            .in_flight
            .acquire_many(self.config.concurrent_jobs as u32)
            .await;
        let _ = heartbeat.await;

        info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// Verifies both collaborators are reachable.
    pub async fn health_check(&self) -> Result<(), WorkerError> {
        self.store.health_check().await?;
        self.queue.health_check().await?;
        Ok(())
    }

    /// Posts a heartbeat immediately, then on every interval tick.
    ///
    /// A failed post is logged and retried on the next tick; it never
    /// terminates the worker.
    async fn heartbeat_loop(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let posted = self
                        .queue
                        .set_heartbeat(&self.worker_id, self.config.heartbeat_interval)
                        .await;
                    self.metrics
                        .record_redis_op("set_heartbeat", start.elapsed().as_secs_f64());

                    match posted {
                        Ok(()) => debug!(worker_id = %self.worker_id, "heartbeat posted"),
                        Err(e) => {
                            warn!(worker_id = %self.worker_id, error = %e, "failed to post heartbeat")
                        }
                    }
                }
                _ = shutdown.recv() => {
                    debug!(worker_id = %self.worker_id, "heartbeat loop stopped");
                    return;
                }
            }
        }
    }

    /// Claims messages and hands each to a concurrent driver.
    ///
    /// Only ever waits on the claim, the permit, and the shutdown signal -
    /// never on job completion.
    async fn dispatch_loop(self: &Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        info!(worker_id = %self.worker_id, "starting dispatch loop");

        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.worker_id, "dispatch loop received shutdown signal");
                    return;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            let claim_start = Instant::now();
            let claimed = self.queue.claim(self.config.poll_interval).await;
            self.metrics
                .record_redis_op("claim", claim_start.elapsed().as_secs_f64());

            match claimed {
                Ok(message) => {
                    info!(
                        worker_id = %self.worker_id,
                        job_id = %message.job_id,
                        processing_type = %message.processing_type,
                        "received job"
                    );

                    // The message is already out of the queue; abandoning it
                    // here on shutdown is within the at-least-once contract.
                    let permit = tokio::select! {
                        permit = Arc::clone(&self.in_flight).acquire_owned() => {
                            match permit {
                                Ok(permit) => permit,
                                Err(_) => return,
                            }
                        }
                        _ = shutdown.recv() => {
                            warn!(
                                worker_id = %self.worker_id,
                                job_id = %message.job_id,
                                "shutdown while waiting for a permit, abandoning message"
                            );
                            return;
                        }
                    };

                    // Gauge moves strictly inside the permit's lifetime so it
                    // never exceeds the in-flight bound.
                    self.metrics.inc_active();

                    let worker = Arc::clone(self);
                    let driver_shutdown = self.shutdown_tx.subscribe();
                    tokio::spawn(async move {
                        worker.process_job(&message, driver_shutdown).await;
                        worker.metrics.dec_active();
                        drop(permit);
                    });
                }
                Err(QueueError::NoJobsAvailable) => {
                    debug!(worker_id = %self.worker_id, "no jobs available, waiting");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.recv() => return,
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "failed to claim job");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.recv() => return,
                    }
                }
            }
        }
    }

    /// Drives one claimed message to a terminal row state.
    ///
    /// Before the row is marked running the failed queue is the only safe
    /// sink; after that the row owns the outcome and every failure lands in
    /// `set_error`, never back on a queue.
    async fn process_job(
        &self,
        message: &SubmitJobMessage,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let start = Instant::now();
        let job_id = message.job_id;
        let processing_type = message.processing_type.as_str();

        info!(
            worker_id = %self.worker_id,
            job_id = %job_id,
            processing_type,
            "processing job"
        );

        if message.delay_ms > 0 {
            self.metrics
                .record_delay(processing_type, message.delay_ms as f64 / 1000.0);
        }

        let update_start = Instant::now();
        let marked = self.store.mark_running(job_id, &self.worker_id).await;
        self.metrics
            .record_db_query("mark_running", update_start.elapsed().as_secs_f64());

        if let Err(e) = marked {
            // The row may not exist or be in an unknown state; do not touch
            // it further.
            error!(job_id = %job_id, error = %e, "failed to mark job running");

            let shunt_start = Instant::now();
            if let Err(publish_err) = self.queue.publish_failed(message, &e.to_string()).await {
                error!(
                    job_id = %job_id,
                    error = %publish_err,
                    "failed to publish job to failed queue"
                );
            }
            self.metrics
                .record_redis_op("publish_failed", shunt_start.elapsed().as_secs_f64());
            self.metrics
                .record_job(processing_type, "failed", start.elapsed().as_secs_f64());
            return;
        }

        if message.delay_ms > 0 {
            let delay = Duration::from_millis(message.delay_ms);
            let cancelled = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = shutdown.recv() => true,
            };
            if cancelled {
                warn!(job_id = %job_id, "job delay cancelled by shutdown");
                let cause = ProcessError::Cancelled("worker shutdown during delay".to_string());
                self.fail_job(message, &cause.to_string(), start).await;
                return;
            }
        }

        let result_path = match self
            .pipeline
            .execute(
                job_id,
                &message.file_path,
                message.processing_type,
                &message.parameters,
            )
            .await
        {
            Ok(path) => path,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "processor failed");
                self.fail_job(message, &e.to_string(), start).await;
                return;
            }
        };

        let update_start = Instant::now();
        let recorded = self
            .store
            .set_result(job_id, &result_path.to_string_lossy())
            .await;
        self.metrics
            .record_db_query("set_result", update_start.elapsed().as_secs_f64());

        if let Err(e) = recorded {
            // The result file stays on disk as a post-mortem artifact.
            error!(job_id = %job_id, error = %e, "failed to record job result");
            self.fail_job(message, &e.to_string(), start).await;
            return;
        }

        self.metrics
            .record_job(processing_type, "success", start.elapsed().as_secs_f64());

        info!(
            worker_id = %self.worker_id,
            job_id = %job_id,
            result_path = %result_path.display(),
            duration_ms = start.elapsed().as_millis(),
            "job completed"
        );
    }

    /// Closes the row as Failed, best effort.
    async fn fail_job(&self, message: &SubmitJobMessage, error_message: &str, start: Instant) {
        let update_start = Instant::now();
        if let Err(e) = self.store.set_error(message.job_id, error_message).await {
            error!(job_id = %message.job_id, error = %e, "failed to record job error");
        }
        self.metrics
            .record_db_query("set_error", update_start.elapsed().as_secs_f64());
        self.metrics.record_job(
            message.processing_type.as_str(),
            "failed",
            start.elapsed().as_secs_f64(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;
    use crate::storage::ProcessingType;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Queue stub: hands out scripted messages, records shunts and beats.
    struct FakeQueue {
        pending: Mutex<VecDeque<SubmitJobMessage>>,
        failed: Mutex<Vec<(SubmitJobMessage, String)>>,
        heartbeats: Mutex<Vec<String>>,
    }

    impl FakeQueue {
        fn new(messages: Vec<SubmitJobMessage>) -> Self {
            Self {
                pending: Mutex::new(messages.into()),
                failed: Mutex::new(Vec::new()),
                heartbeats: Mutex::new(Vec::new()),
            }
        }

        fn failed_count(&self) -> usize {
            self.failed.lock().expect("lock").len()
        }

        fn heartbeat_count(&self) -> usize {
            self.heartbeats.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl JobConsumer for FakeQueue {
        async fn claim(&self, timeout: Duration) -> Result<SubmitJobMessage, QueueError> {
            let next = self.pending.lock().expect("lock").pop_front();
            match next {
                Some(message) => Ok(message),
                None => {
                    tokio::time::sleep(timeout).await;
                    Err(QueueError::NoJobsAvailable)
                }
            }
        }

        async fn publish_failed(
            &self,
            message: &SubmitJobMessage,
            error_message: &str,
        ) -> Result<(), QueueError> {
            self.failed
                .lock()
                .expect("lock")
                .push((message.clone(), error_message.to_string()));
            Ok(())
        }

        async fn set_heartbeat(
            &self,
            worker_id: &str,
            _interval: Duration,
        ) -> Result<(), QueueError> {
            self.heartbeats
                .lock()
                .expect("lock")
                .push(worker_id.to_string());
            Ok(())
        }

        async fn health_check(&self) -> Result<(), QueueError> {
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum StoreCall {
        MarkRunning(Uuid, String),
        SetResult(Uuid, String),
        SetError(Uuid, String),
    }

    /// Store stub: records every mutation, optionally failing some of them.
    #[derive(Default)]
    struct FakeStore {
        calls: Mutex<Vec<StoreCall>>,
        fail_mark_running: bool,
        fail_set_result: bool,
    }

    impl FakeStore {
        fn calls(&self) -> Vec<StoreCall> {
            self.calls.lock().expect("lock").clone()
        }

        fn errors(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    StoreCall::SetError(_, message) => Some(message),
                    _ => None,
                })
                .collect()
        }

        fn results(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    StoreCall::SetResult(_, path) => Some(path),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl JobStore for FakeStore {
        async fn mark_running(&self, id: Uuid, worker_id: &str) -> Result<(), StoreError> {
            if self.fail_mark_running {
                return Err(StoreError::NotFound(id));
            }
            self.calls
                .lock()
                .expect("lock")
                .push(StoreCall::MarkRunning(id, worker_id.to_string()));
            Ok(())
        }

        async fn set_result(&self, id: Uuid, result_path: &str) -> Result<(), StoreError> {
            if self.fail_set_result {
                return Err(StoreError::NotFound(id));
            }
            self.calls
                .lock()
                .expect("lock")
                .push(StoreCall::SetResult(id, result_path.to_string()));
            Ok(())
        }

        async fn set_error(&self, id: Uuid, error_message: &str) -> Result<(), StoreError> {
            self.calls
                .lock()
                .expect("lock")
                .push(StoreCall::SetError(id, error_message.to_string()));
            Ok(())
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct Fixture {
        worker: Arc<Worker>,
        store: Arc<FakeStore>,
        queue: Arc<FakeQueue>,
        _dir: tempfile::TempDir,
    }

    fn fixture_with(
        store: FakeStore,
        messages: Vec<SubmitJobMessage>,
        configure: impl FnOnce(WorkerConfig) -> WorkerConfig,
    ) -> Fixture {
        let _ = init_metrics();
        let dir = tempfile::tempdir().expect("tempdir");
        let config = configure(
            WorkerConfig::default()
                .with_result_dir(dir.path().join("results"))
                .with_poll_interval(Duration::from_millis(20))
                .with_heartbeat_interval(Duration::from_millis(50)),
        );

        let store = Arc::new(store);
        let queue = Arc::new(FakeQueue::new(messages));
        let worker = Arc::new(
            Worker::new(config, store.clone(), queue.clone()).expect("worker"),
        );

        Fixture {
            worker,
            store,
            queue,
            _dir: dir,
        }
    }

    fn fixture(store: FakeStore, messages: Vec<SubmitJobMessage>) -> Fixture {
        fixture_with(store, messages, |config| config)
    }

    async fn write_input(dir: &std::path::Path, content: &str) -> String {
        let path = dir.join("input.txt");
        tokio::fs::write(&path, content).await.expect("write input");
        path.display().to_string()
    }

    async fn drive(fixture: &Fixture, message: &SubmitJobMessage) {
        let shutdown = fixture.worker.shutdown_tx.subscribe();
        fixture.worker.process_job(message, shutdown).await;
    }

    #[test]
    fn generates_worker_id_when_unset() {
        let fixture = fixture(FakeStore::default(), Vec::new());
        let id = fixture.worker.worker_id();
        assert!(id.starts_with("worker-"));
        assert_eq!(id.len(), "worker-".len() + 8);
    }

    #[test]
    fn keeps_configured_worker_id() {
        let fixture = fixture_with(FakeStore::default(), Vec::new(), |config| {
            config.with_worker_id("worker-stable")
        });
        assert_eq!(fixture.worker.worker_id(), "worker-stable");
    }

    #[tokio::test]
    async fn happy_path_records_the_result() {
        let fixture = fixture(FakeStore::default(), Vec::new());
        let input = write_input(fixture._dir.path(), "Hello").await;

        let message = SubmitJobMessage::new(Uuid::new_v4(), input, ProcessingType::Uppercase);
        drive(&fixture, &message).await;

        let calls = fixture.store.calls();
        assert!(matches!(calls[0], StoreCall::MarkRunning(id, ref worker) if id == message.job_id && worker == fixture.worker.worker_id()));

        let results = fixture.store.results();
        assert_eq!(results.len(), 1);
        let written = tokio::fs::read_to_string(&results[0]).await.expect("read");
        assert_eq!(written, "HELLO");

        assert!(fixture.store.errors().is_empty());
        assert_eq!(fixture.queue.failed_count(), 0);
    }

    #[tokio::test]
    async fn transform_failure_terminates_on_the_row() {
        let fixture = fixture(FakeStore::default(), Vec::new());
        let input = write_input(fixture._dir.path(), "irrelevant").await;

        // extract with no parameters: invalid-parameter on `pattern`
        let message = SubmitJobMessage::new(Uuid::new_v4(), input, ProcessingType::Extract);
        drive(&fixture, &message).await;

        let errors = fixture.store.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("pattern"));
        // No failed-queue deposit: the row owns the failure after J1.
        assert_eq!(fixture.queue.failed_count(), 0);
        assert!(fixture.store.results().is_empty());
    }

    #[tokio::test]
    async fn mark_running_failure_shunts_to_the_failed_queue() {
        let store = FakeStore {
            fail_mark_running: true,
            ..Default::default()
        };
        let fixture = fixture(store, Vec::new());
        let input = write_input(fixture._dir.path(), "irrelevant").await;

        let message = SubmitJobMessage::new(Uuid::new_v4(), input, ProcessingType::Uppercase);
        drive(&fixture, &message).await;

        assert_eq!(fixture.queue.failed_count(), 1);
        let (shunted, cause) = fixture.queue.failed.lock().expect("lock")[0].clone();
        assert_eq!(shunted.job_id, message.job_id);
        assert!(cause.contains("not found"));
        // The row is not touched further.
        assert!(fixture.store.calls().is_empty());
    }

    #[tokio::test]
    async fn record_failure_falls_back_to_the_row_error() {
        let store = FakeStore {
            fail_set_result: true,
            ..Default::default()
        };
        let fixture = fixture(store, Vec::new());
        let input = write_input(fixture._dir.path(), "Hello").await;

        let message = SubmitJobMessage::new(Uuid::new_v4(), input, ProcessingType::Uppercase);
        drive(&fixture, &message).await;

        // set_result failed; set_error closed the row, and the result file
        // is left on disk.
        let errors = fixture.store.errors();
        assert_eq!(errors.len(), 1);
        let result_file = fixture
            ._dir
            .path()
            .join("results")
            .join(format!("result_{}.txt", message.job_id));
        assert!(result_file.exists());
        assert_eq!(fixture.queue.failed_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_during_delay_fails_with_a_cancellation_cause() {
        let fixture = fixture(FakeStore::default(), Vec::new());
        let input = write_input(fixture._dir.path(), "Hello").await;

        let message = SubmitJobMessage::new(Uuid::new_v4(), input, ProcessingType::Uppercase)
            .with_delay_ms(10_000);

        let driver = tokio::spawn({
            let worker = Arc::clone(&fixture.worker);
            let shutdown = fixture.worker.shutdown_tx.subscribe();
            let message = message.clone();
            async move { worker.process_job(&message, shutdown).await }
        });

        // Let the driver reach the delay, then pull the plug.
        tokio::time::sleep(Duration::from_millis(50)).await;
        fixture.worker.stop();
        driver.await.expect("driver");

        let errors = fixture.store.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("cancelled"));
        assert!(fixture.store.results().is_empty());
    }

    #[tokio::test]
    async fn dispatch_respects_the_in_flight_bound() {
        let _ = init_metrics();

        // Four delayed jobs, two permits: the gauge must never exceed 2 and
        // draining must take at least two delay rounds.
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_input(dir.path(), "Hello").await;

        let messages: Vec<_> = (0..4)
            .map(|_| {
                SubmitJobMessage::new(Uuid::new_v4(), input.clone(), ProcessingType::Uppercase)
                    .with_delay_ms(300)
            })
            .collect();

        let config = WorkerConfig::default()
            .with_worker_id(format!("worker-bound-{}", Uuid::new_v4().simple()))
            .with_concurrent_jobs(2)
            .with_poll_interval(Duration::from_millis(20))
            .with_heartbeat_interval(Duration::from_secs(60))
            .with_result_dir(dir.path().join("results"));

        let store = Arc::new(FakeStore::default());
        let queue = Arc::new(FakeQueue::new(messages));
        let worker = Arc::new(Worker::new(config, store.clone(), queue.clone()).expect("worker"));

        let started = Instant::now();
        let running = tokio::spawn(Arc::clone(&worker).run());

        let mut peak: f64 = 0.0;
        while started.elapsed() < Duration::from_millis(900) {
            peak = peak.max(worker.metrics.active_count());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        worker.stop();
        running.await.expect("run");

        assert!(peak <= 2.0, "in-flight gauge peaked at {peak}");
        assert!(peak >= 2.0, "expected the bound to be reached, peak {peak}");
        assert_eq!(store.results().len(), 4, "all four jobs should finish");
        // Two rounds of two 300 ms jobs cannot finish faster than 600 ms.
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn heartbeat_posts_immediately_and_then_periodically() {
        let fixture = fixture(FakeStore::default(), Vec::new());
        let worker = Arc::clone(&fixture.worker);
        let running = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(180)).await;
        fixture.worker.stop();
        running.await.expect("run");

        // 50 ms interval over ~180 ms: the immediate beat plus at least two
        // ticks.
        assert!(fixture.queue.heartbeat_count() >= 3);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_drivers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_input(dir.path(), "Hello").await;
        let message = SubmitJobMessage::new(Uuid::new_v4(), input, ProcessingType::Uppercase)
            .with_delay_ms(200);

        let fixture = fixture(FakeStore::default(), vec![message]);
        let worker = Arc::clone(&fixture.worker);
        let running = tokio::spawn(worker.run());

        // Let dispatch pick the job up, then stop: the delay is cancelled,
        // the driver closes the row, and run() returns only after that.
        tokio::time::sleep(Duration::from_millis(80)).await;
        fixture.worker.stop();
        running.await.expect("run");

        assert_eq!(fixture.store.errors().len() + fixture.store.results().len(), 1);
    }
}
