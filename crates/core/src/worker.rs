//! Dequeue and execution loop.
//!
//! A worker claims one ready job at a time with a select-then-remove
//! protocol: it reads the highest-scoring ready id and then removes exactly
//! that id from the ready set. Only the worker whose removal succeeds owns
//! the job; a worker that loses the race yields for this cycle.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::handler::{BoxedHandler, JobError, JobResult};
use crate::job::{current_timestamp_ms, Job, JobState};
use crate::queue::Queue;
use crate::store::Store;

/// Setting that overrides the configured idle interval, in milliseconds.
pub const POLL_INTERVAL_SETTING: &str = "poll_interval";

/// Identity of a worker: `host:pid`, plus `:type` when bound to a type.
pub fn worker_id(job_type: Option<&str>) -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let base = format!("{}:{}", hostname, std::process::id());
    match job_type {
        Some(t) => format!("{}:{}", base, t),
        None => base,
    }
}

/// A single polling loop bound to an optional job type.
#[derive(Debug, Clone)]
pub struct Worker {
    queue: Queue,
    job_type: Option<String>,
    id: String,
}

impl Worker {
    pub fn new(queue: Queue, job_type: Option<String>) -> Self {
        let id = worker_id(job_type.as_deref());
        Self {
            queue,
            job_type,
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn job_type(&self) -> Option<&str> {
        self.job_type.as_deref()
    }

    /// Claim the highest-scoring id in `key` whose score is not in the future.
    ///
    /// Returns `None` when nothing is ready or another worker removed the id
    /// first.
    pub async fn pop(&self, key: &str) -> Result<Option<String>> {
        let store = self.queue.store();
        let now = current_timestamp_ms();
        let Some(id) = store.zrevrangebyscore(key, now, 1).await?.into_iter().next() else {
            return Ok(None);
        };
        if store.zrem(key, &id).await? == 0 {
            tracing::debug!(worker_id = %self.id, job_id = %id, "Lost dequeue race");
            return Ok(None);
        }
        Ok(Some(id))
    }

    /// Claim and load the next ready job.
    pub async fn get_job(&self) -> Result<Option<Job>> {
        let key = self.queue.keys().ready(self.job_type.as_deref());
        let Some(id) = self.pop(&key).await? else {
            return Ok(None);
        };
        let job = Job::load(&self.queue, &id).await?;
        if job.is_none() {
            tracing::warn!(worker_id = %self.id, job_id = %id, "Claimed job has no record");
        }
        Ok(job)
    }

    /// Run the handler for `job` and resolve the outcome.
    ///
    /// Handler failures and panics are routed to the retry policy; only store
    /// errors are returned.
    pub async fn process(&self, mut job: Job) -> Result<()> {
        job.mark_active().await?;
        job.set_worker(&self.id).await?;
        let started = current_timestamp_ms();

        tracing::debug!(
            worker_id = %self.id,
            job_id = %job.id(),
            job_type = %job.job_type(),
            "Processing job"
        );

        let outcome = match self.queue.handler_for(job.job_type()) {
            Some(handler) => run_handler(handler, job.clone()).await,
            None => Err(JobError::new(format!(
                "no handler registered for job type {}",
                job.job_type()
            ))),
        };

        // The handler may have changed the state through its own copy
        let forced_failed = job.refresh_state().await? == JobState::Failed;

        match outcome {
            Ok(result) if !forced_failed => {
                job.complete(result).await?;
                job.set_duration(current_timestamp_ms() - started).await?;
                tracing::debug!(
                    worker_id = %self.id,
                    job_id = %job.id(),
                    duration_ms = job.duration(),
                    "Job completed successfully"
                );
            }
            Ok(_) => {
                tracing::debug!(worker_id = %self.id, job_id = %job.id(), "Job was marked failed by its handler");
                self.failed(&mut job, None).await?;
            }
            Err(err) => {
                tracing::debug!(worker_id = %self.id, job_id = %job.id(), error = %err, "Job handler failed");
                self.failed(&mut job, Some(err.message)).await?;
            }
        }
        Ok(())
    }

    async fn failed(&self, job: &mut Job, error: Option<String>) -> Result<()> {
        if let Some(error) = error {
            job.set_error(error).await?;
        }
        let attempt = job.attempt().await?;
        job.reattempt(attempt.remaining, attempt.number).await
    }

    /// One poll cycle. Returns whether a job was processed.
    pub async fn run_once(&self) -> Result<bool> {
        match self.get_job().await? {
            Some(job) => {
                self.process(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Poll forever. Returns only on a store error.
    pub async fn start(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Poll until `shutdown` resolves. An in-flight job is finished before
    /// the loop stops.
    pub async fn run_until<S>(&self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let interval = self.poll_interval().await?;
        let mut shutdown = std::pin::pin!(shutdown);
        tracing::info!(worker_id = %self.id, job_type = ?self.job_type, interval_ms = interval.as_millis() as u64, "Worker started");

        loop {
            let processed = match self.run_once().await {
                Ok(processed) => processed,
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Worker error");
                    return Err(e);
                }
            };

            if processed {
                let stop = tokio::select! {
                    biased;
                    _ = &mut shutdown => true,
                    _ = std::future::ready(()) => false,
                };
                if stop {
                    break;
                }
                continue;
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!(worker_id = %self.id, "Worker stopped");
        Ok(())
    }

    async fn poll_interval(&self) -> Result<Duration> {
        let setting = self.queue.setting(POLL_INTERVAL_SETTING).await?;
        Ok(setting
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(self.queue.config().poll_interval))
    }
}

/// Aborts the handler task when the worker future is dropped mid-job.
struct HandlerTask(JoinHandle<JobResult>);

impl Drop for HandlerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run a handler on its own task so a panic becomes a job failure.
async fn run_handler(handler: BoxedHandler, job: Job) -> JobResult {
    let mut task = HandlerTask(tokio::spawn(handler(job)));
    match (&mut task.0).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let panic = e.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(JobError::new(format!("handler panicked: {}", message)))
        }
        Err(_) => Err(JobError::new("handler task was cancelled")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::config::QueueConfig;
    use crate::memory::MemoryStore;
    use crate::store::Store;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn queue() -> Queue {
        Queue::new(
            QueueConfig::builder()
                .poll_interval(Duration::from_millis(10))
                .build(),
            MemoryStore::new(),
        )
    }

    async fn saved(queue: &Queue, job_type: &str) -> Job {
        let mut job = queue.create(job_type, json!({"n": 1}));
        job.save().await.unwrap();
        job
    }

    #[test]
    fn test_worker_id_format() {
        let pid = std::process::id().to_string();
        let plain = worker_id(None);
        assert!(plain.ends_with(&format!(":{}", pid)));
        let typed = worker_id(Some("email"));
        assert_eq!(typed, format!("{}:email", plain));
    }

    #[tokio::test]
    async fn test_pop_empty() {
        let queue = queue();
        let worker = Worker::new(queue.clone(), None);
        assert!(worker.get_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pop_respects_type_filter() {
        let queue = queue();
        saved(&queue, "video").await;
        let worker = Worker::new(queue.clone(), Some("email".to_string()));
        assert!(worker.get_job().await.unwrap().is_none());

        let email = saved(&queue, "email").await;
        let claimed = worker.get_job().await.unwrap().unwrap();
        assert_eq!(claimed.id(), email.id());
    }

    #[tokio::test]
    async fn test_pop_skips_future_jobs() {
        let queue = queue();
        let mut job = queue.create("email", json!({}));
        job.delay(Duration::from_secs(3600));
        job.save().await.unwrap();

        let worker = Worker::new(queue.clone(), None);
        assert!(worker.get_job().await.unwrap().is_none());
        assert_eq!(queue.card(JobState::Inactive).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pop_prefers_higher_score() {
        let queue = queue();
        let mut low = queue.create("email", json!({}));
        low.set_priority(crate::job::Priority::Low);
        low.save().await.unwrap();
        let mut critical = queue.create("email", json!({}));
        critical.set_priority(crate::job::Priority::Critical);
        critical.save().await.unwrap();

        let worker = Worker::new(queue.clone(), None);
        assert_eq!(worker.get_job().await.unwrap().unwrap().id(), low.id());
        assert_eq!(worker.get_job().await.unwrap().unwrap().id(), critical.id());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pop_claims_once() {
        let queue = queue();
        saved(&queue, "email").await;
        let key = queue.keys().ready(None);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let worker = Worker::new(queue.clone(), None);
            let key = key.clone();
            handles.push(tokio::spawn(async move { worker.pop(&key).await.unwrap() }));
        }
        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_process_success() {
        let queue = queue();
        queue.register(Some("email"), |mut job: Job| async move {
            job.set_progress(0.5).await?;
            Ok::<_, JobError>(Some(json!({"sent": true})))
        });
        let job = saved(&queue, "email").await;

        let worker = Worker::new(queue.clone(), Some("email".to_string()));
        assert!(worker.run_once().await.unwrap());

        let done = queue.job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(done.state(), JobState::Complete);
        assert_eq!(done.result(), Some(&json!({"sent": true})));
        assert_eq!(done.progress(), 100);
        assert_eq!(done.worker(), Some(worker.id()));
        assert!(done.duration() >= 0);
        assert_eq!(queue.complete().await.unwrap(), vec![job.id().to_string()]);
        assert!(queue.active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_until_failed() {
        let queue = queue();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        queue.register(None, move |_job| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(JobError::new("smtp down")) }
        });
        let mut job = queue.create("email", json!({}));
        job.set_max_attempts(3);
        job.save().await.unwrap();

        // The first run plus one retry per configured attempt
        let worker = Worker::new(queue.clone(), None);
        for _ in 0..4 {
            assert!(worker.run_once().await.unwrap());
        }
        assert!(!worker.run_once().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let failed = queue.job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(failed.state(), JobState::Failed);
        assert_eq!(failed.error(), Some("smtp down"));
        assert!(failed.failed_at().is_some());
        assert_eq!(failed.attempts(), 4);
        assert_eq!(queue.failed().await.unwrap(), vec![job.id().to_string()]);
        assert!(queue.inactive().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_with_backoff_defers_retry() {
        let queue = queue();
        queue.register(None, |_job| async { Err(JobError::new("later")) });
        let mut job = queue.create("email", json!({}));
        job.set_max_attempts(2).set_backoff(Backoff::fixed(60_000));
        job.save().await.unwrap();

        let worker = Worker::new(queue.clone(), None);
        let before = current_timestamp_ms();
        assert!(worker.run_once().await.unwrap());
        // Deferred, so not claimable yet
        assert!(!worker.run_once().await.unwrap());

        let retried = queue.job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(retried.state(), JobState::Inactive);
        assert!(retried.timing() >= before + 60_000);
    }

    #[tokio::test]
    async fn test_handler_panic_is_a_failure() {
        let queue = queue();
        queue.register(None, |_job| async { panic!("handler exploded") });
        let job = saved(&queue, "email").await;

        let worker = Worker::new(queue.clone(), None);
        assert!(worker.run_once().await.unwrap());
        let retried = queue.job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(retried.state(), JobState::Inactive);
        assert_eq!(retried.error(), Some("handler panicked: handler exploded"));

        assert!(worker.run_once().await.unwrap());
        let failed = queue.job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(failed.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn test_missing_handler_is_a_failure() {
        let queue = queue();
        let job = saved(&queue, "email").await;

        let worker = Worker::new(queue.clone(), None);
        assert!(worker.run_once().await.unwrap());

        let retried = queue.job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(retried.state(), JobState::Inactive);
        assert!(retried.error().unwrap().contains("no handler"));
    }

    #[tokio::test]
    async fn test_forced_failure_takes_failure_path() {
        let queue = queue();
        queue.register(None, |mut job: Job| async move {
            job.mark_failed().await?;
            Ok::<_, JobError>(Some(json!("ignored")))
        });
        let mut job = queue.create("email", json!({}));
        job.set_max_attempts(2);
        job.save().await.unwrap();

        let worker = Worker::new(queue.clone(), None);
        assert!(worker.run_once().await.unwrap());

        // One attempt left, so the job is requeued and indexed once
        let requeued = queue.job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(requeued.state(), JobState::Inactive);
        assert!(requeued.result().is_none());
        assert!(queue.failed().await.unwrap().is_empty());
        assert_eq!(queue.inactive().await.unwrap(), vec![job.id().to_string()]);
    }

    #[tokio::test]
    async fn test_dropping_worker_aborts_handler() {
        let queue = queue();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        queue.register(None, move |_job| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        });
        saved(&queue, "email").await;

        let worker = Worker::new(queue.clone(), None);
        let handle = tokio::spawn(async move { worker.run_once().await });
        for _ in 0..100 {
            if queue.card(JobState::Active).await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(queue.complete().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_interval_setting_overrides_config() {
        let queue = queue();
        let worker = Worker::new(queue.clone(), None);
        assert_eq!(worker.poll_interval().await.unwrap(), Duration::from_millis(10));

        queue.set_setting(POLL_INTERVAL_SETTING, "250").await.unwrap();
        assert_eq!(worker.poll_interval().await.unwrap(), Duration::from_millis(250));

        queue.set_setting(POLL_INTERVAL_SETTING, "soon").await.unwrap();
        assert_eq!(worker.poll_interval().await.unwrap(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_run_until_drains_then_stops() {
        let queue = queue();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        for _ in 0..3 {
            saved(&queue, "email").await;
        }

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let q = queue.clone();
        let handle = tokio::spawn(async move {
            q.process_until(
                Some("email"),
                move |_job| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(None) }
                },
                async {
                    let _ = rx.await;
                },
            )
            .await
        });

        for _ in 0..200 {
            if queue.card(JobState::Complete).await.unwrap() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.card(JobState::Complete).await.unwrap(), 3);
    }
}
