//! Queue facade: job factory, handler registry, settings and state views.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock, RwLock};

use crate::config::QueueConfig;
use crate::error::{KueError, Result};
use crate::events::{EventBus, JobEvent, JobEventKind, QueueEvent};
use crate::handler::{boxed_handler, BoxedHandler, JobResult};
use crate::job::{Job, JobState};
use crate::keys::StoreKeys;
use crate::schedule::SchedulingStrategy;
use crate::store::{SharedStore, Store};
use crate::worker::Worker;

/// Handler key used for workers without a type filter.
const ANY_TYPE: &str = "*";

struct Inner {
    store: SharedStore,
    keys: StoreKeys,
    config: QueueConfig,
    strategy: Arc<dyn SchedulingStrategy>,
    handlers: RwLock<HashMap<String, BoxedHandler>>,
    job_events: EventBus<JobEvent>,
    queue_events: EventBus<QueueEvent>,
}

/// Handle to a job queue. Cloning shares the store connection, handlers and
/// listeners.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("prefix", &self.inner.keys.prefix())
            .field("scheduling", &self.inner.config.scheduling)
            .finish_non_exhaustive()
    }
}

impl Queue {
    /// Create a queue over `store`.
    pub fn new<S: Store + 'static>(config: QueueConfig, store: S) -> Self {
        Self::with_store(config, SharedStore::new(store))
    }

    /// Create a queue over an already shared store.
    pub fn with_store(config: QueueConfig, store: SharedStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                keys: StoreKeys::new(config.prefix.clone()),
                strategy: config.scheduling.strategy(),
                config,
                handlers: RwLock::new(HashMap::new()),
                job_events: EventBus::default(),
                queue_events: EventBus::default(),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.inner.keys
    }

    pub(crate) fn strategy(&self) -> &dyn SchedulingStrategy {
        self.inner.strategy.as_ref()
    }

    /// Whether the original delayed-state scheduling is in use.
    pub fn original_mode(&self) -> bool {
        self.inner.strategy.is_original()
    }

    /// Build a new, unsaved job.
    pub fn create(&self, job_type: impl Into<String>, data: Value) -> Job {
        let job = Job::new(self.clone(), job_type, data);
        self.emit_queue(&QueueEvent::Create {
            job_type: job.job_type().to_string(),
        });
        self.emit_job(&JobEvent {
            id: job.id().clone(),
            job_type: job.job_type().to_string(),
            kind: JobEventKind::Create,
        });
        job
    }

    /// Load a job by id.
    pub async fn job(&self, id: &str) -> Result<Option<Job>> {
        Job::load(self, id).await
    }

    /// Remove a job by id.
    pub async fn remove(&self, id: &str) -> Result<()> {
        match Job::load(self, id).await? {
            Some(job) => job.remove().await,
            None => Err(KueError::JobNotFound(id.to_string())),
        }
    }

    /// Log lines of a job, oldest first.
    pub async fn job_logs(&self, id: &str) -> Result<Vec<String>> {
        self.inner.store.lrange(&self.inner.keys.job_log(id), 0, -1).await
    }

    /// Register `handler` for `job_type`, or for every type when `None`.
    ///
    /// A later registration for the same type replaces the earlier one.
    pub fn register<F, Fut>(&self, job_type: Option<&str>, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let key = job_type.unwrap_or(ANY_TYPE).to_string();
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        handlers.insert(key, boxed_handler(handler));
    }

    /// Handler for `job_type`, falling back to the untyped handler.
    pub(crate) fn handler_for(&self, job_type: &str) -> Option<BoxedHandler> {
        let handlers = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner());
        handlers
            .get(job_type)
            .or_else(|| handlers.get(ANY_TYPE))
            .cloned()
    }

    /// Register `handler` and run a worker loop for it. Returns only on a
    /// store error.
    pub async fn process<F, Fut>(&self, job_type: Option<&str>, handler: F) -> Result<()>
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        self.process_until(job_type, handler, std::future::pending())
            .await
    }

    /// Like `process`, but stops once `shutdown` resolves.
    pub async fn process_until<F, Fut, S>(
        &self,
        job_type: Option<&str>,
        handler: F,
        shutdown: S,
    ) -> Result<()>
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
        S: Future<Output = ()>,
    {
        self.register(job_type, handler);
        self.emit_queue(&QueueEvent::Process {
            job_type: job_type.map(str::to_string),
        });
        Worker::new(self.clone(), job_type.map(str::to_string))
            .run_until(shutdown)
            .await
    }

    /// Read an operator setting.
    pub async fn setting(&self, name: &str) -> Result<Option<String>> {
        self.inner.store.hget(&self.inner.keys.settings(), name).await
    }

    /// Persist an operator setting.
    pub async fn set_setting(&self, name: &str, value: &str) -> Result<()> {
        self.inner
            .store
            .hset(&self.inner.keys.settings(), name, value)
            .await
    }

    /// Every job type ever saved.
    pub async fn types(&self) -> Result<Vec<String>> {
        self.inner.store.smembers(&self.inner.keys.types()).await
    }

    /// Ids of jobs in `state`, ascending by score.
    pub async fn state(&self, state: JobState) -> Result<Vec<String>> {
        self.inner
            .store
            .zrange_all(&self.inner.keys.jobs_by_state(state))
            .await
    }

    /// Number of jobs in `state`.
    pub async fn card(&self, state: JobState) -> Result<usize> {
        self.inner
            .store
            .zcard(&self.inner.keys.jobs_by_state(state))
            .await
    }

    pub async fn complete(&self) -> Result<Vec<String>> {
        self.state(JobState::Complete).await
    }

    pub async fn failed(&self) -> Result<Vec<String>> {
        self.state(JobState::Failed).await
    }

    pub async fn inactive(&self) -> Result<Vec<String>> {
        self.state(JobState::Inactive).await
    }

    pub async fn active(&self) -> Result<Vec<String>> {
        self.state(JobState::Active).await
    }

    pub async fn delayed(&self) -> Result<Vec<String>> {
        self.state(JobState::Delayed).await
    }

    /// Subscribe to job lifecycle events.
    pub fn on_job_event<F>(&self, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.inner.job_events.subscribe(listener);
    }

    /// Subscribe to queue events.
    pub fn on_queue_event<F>(&self, listener: F)
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.inner.queue_events.subscribe(listener);
    }

    pub(crate) fn emit_job(&self, event: &JobEvent) {
        self.inner.job_events.emit(event);
    }

    pub(crate) fn emit_queue(&self, event: &QueueEvent) {
        self.inner.queue_events.emit(event);
    }
}

/// Holds the one queue of a process. The first initialisation wins.
///
/// ```
/// use kue_core::{MemoryStore, Queue, QueueConfig, QueueRegistry};
///
/// static QUEUE: QueueRegistry = QueueRegistry::new();
///
/// let queue = QUEUE.get_or_init(|| Queue::new(QueueConfig::default(), MemoryStore::new()));
/// let again = QUEUE.get_or_init(|| unreachable!());
/// assert_eq!(queue.keys().prefix(), again.keys().prefix());
/// ```
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queue: OnceLock<Queue>,
}

impl QueueRegistry {
    pub const fn new() -> Self {
        Self {
            queue: OnceLock::new(),
        }
    }

    /// Return the registered queue, building it with `init` on first use.
    pub fn get_or_init<F>(&self, init: F) -> Queue
    where
        F: FnOnce() -> Queue,
    {
        self.queue.get_or_init(init).clone()
    }

    /// The registered queue, if any.
    pub fn get(&self) -> Option<Queue> {
        self.queue.get().cloned()
    }
}
