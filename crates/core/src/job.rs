//! Job entity and its lifecycle state machine.
//!
//! A `Job` is an in-memory copy of one hash record in the store. Configuration
//! setters (`set_priority`, `set_max_attempts`, `set_backoff`, `delay`,
//! `run_at`) only touch the in-memory copy and reach the store on `save`.
//! Every other mutation writes through to the store immediately, one field per
//! round trip, so several mutations are never atomic together.
//!
//! Every state change re-indexes the job id in three sorted sets (all jobs,
//! jobs by state, jobs by type and state) scored by `timing + priority`. Stale
//! memberships are removed before the new ones are added.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::error::{KueError, Result};
use crate::events::{JobEvent, JobEventKind};
use crate::queue::Queue;
use crate::schedule::Schedule;
use crate::store::Store;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Generate a new random JobId.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed.
    Inactive,
    /// Claimed by a worker and executing.
    Active,
    /// Finished successfully.
    Complete,
    /// Failed with no attempts left.
    Failed,
    /// Parked until promoted (original scheduling mode only).
    Delayed,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 5] = [
        JobState::Inactive,
        JobState::Active,
        JobState::Complete,
        JobState::Failed,
        JobState::Delayed,
    ];

    /// Name used in store keys and records.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Inactive => "inactive",
            JobState::Active => "active",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = KueError;

    fn from_str(s: &str) -> Result<Self> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| KueError::Config(format!("unknown job state: {}", s)))
    }
}

/// Job priority. Lower values are dequeued first among jobs with equal timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    Medium,
    High,
    Critical,
    /// A raw score offset.
    Value(i64),
}

impl Priority {
    /// Score offset for this priority.
    pub fn value(&self) -> i64 {
        match self {
            Priority::Low => 10,
            Priority::Normal => 0,
            Priority::Medium => -5,
            Priority::High => -10,
            Priority::Critical => -15,
            Priority::Value(v) => *v,
        }
    }
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Priority::Value(value)
    }
}

impl FromStr for Priority {
    type Err = KueError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => other
                .parse::<i64>()
                .map(Priority::Value)
                .map_err(|_| KueError::Config(format!("unknown priority: {}", other))),
        }
    }
}

/// Result of consuming one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Attempts left, never negative.
    pub remaining: u32,
    /// 0-based number of this retry, used to compute backoff.
    pub number: u32,
    /// Configured maximum.
    pub max_attempts: u32,
}

/// One unit of work.
#[derive(Debug, Clone)]
pub struct Job {
    queue: Queue,
    id: JobId,
    job_type: String,
    data: Value,
    result: Option<Value>,
    priority: i64,
    progress: u8,
    state: JobState,
    /// State whose indexes currently hold the id, `None` until saved.
    indexed_state: Option<JobState>,
    backoff: Option<Backoff>,
    error: Option<String>,
    timing: i64,
    delay: i64,
    attempts: u32,
    max_attempts: u32,
    created_at: i64,
    updated_at: i64,
    failed_at: Option<i64>,
    duration: i64,
    worker: Option<String>,
}

impl Job {
    /// Build a new, unsaved job.
    pub(crate) fn new(queue: Queue, job_type: impl Into<String>, data: Value) -> Self {
        let now = current_timestamp_ms();
        Self {
            queue,
            id: JobId::new(),
            job_type: job_type.into(),
            data,
            result: None,
            priority: Priority::Normal.value(),
            progress: 0,
            state: JobState::Inactive,
            indexed_state: None,
            backoff: None,
            error: None,
            timing: 0,
            delay: 0,
            attempts: 0,
            max_attempts: 1,
            created_at: now,
            updated_at: now,
            failed_at: None,
            duration: 0,
            worker: None,
        }
    }

    /// Load a job from its stored record. `None` if no record exists.
    pub async fn load(queue: &Queue, id: &str) -> Result<Option<Job>> {
        let fields = queue.store().hgetall(&queue.keys().job(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Self::from_fields(queue.clone(), id, fields)
    }

    // ========== Accessors ==========

    /// Unique id of the job.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Type name used to route the job to a handler.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Payload given at creation.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Value returned by the handler on success.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Priority offset added to the ready time.
    pub fn priority(&self) -> i64 {
        self.priority
    }

    /// Progress percentage, 0 to 100.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Retry backoff policy, if any.
    pub fn backoff(&self) -> Option<Backoff> {
        self.backoff
    }

    /// Last recorded failure description.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Ready time in epoch milliseconds, 0 when immediately ready.
    pub fn timing(&self) -> i64 {
        self.timing
    }

    /// Delay in milliseconds (delayed-state scheduling).
    pub fn delay_ms(&self) -> i64 {
        self.delay
    }

    /// Attempts consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Creation time in epoch milliseconds.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Last modification time in epoch milliseconds.
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Time of the last recorded failure in epoch milliseconds.
    pub fn failed_at(&self) -> Option<i64> {
        self.failed_at
    }

    /// Wall time of the last successful run, in milliseconds.
    pub fn duration(&self) -> i64 {
        self.duration
    }

    /// Id of the worker that last claimed the job.
    pub fn worker(&self) -> Option<&str> {
        self.worker.as_deref()
    }

    /// Ready-time score used by every index.
    pub fn score(&self) -> i64 {
        self.timing.saturating_add(self.priority)
    }

    // ========== Configuration (in memory until saved) ==========

    /// Set a named or numeric priority.
    pub fn set_priority(&mut self, priority: impl Into<Priority>) -> &mut Self {
        self.priority = priority.into().value();
        self
    }

    /// Set the priority from a name such as `"high"` or a number.
    ///
    /// Unknown names leave the current priority untouched.
    pub fn set_priority_name(&mut self, name: &str) -> &mut Self {
        match name.parse::<Priority>() {
            Ok(priority) => self.priority = priority.value(),
            Err(_) => tracing::debug!(job_id = %self.id, priority = name, "Ignoring unknown priority"),
        }
        self
    }

    /// Set the maximum number of attempts.
    pub fn set_max_attempts(&mut self, max_attempts: u32) -> &mut Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the retry backoff policy.
    pub fn set_backoff(&mut self, backoff: Backoff) -> &mut Self {
        self.backoff = Some(backoff);
        self
    }

    /// Make the job eligible at an absolute epoch-millisecond time.
    pub fn run_at(&mut self, run_at_ms: i64) -> &mut Self {
        let mut schedule = self.schedule();
        self.queue
            .strategy()
            .run_at(&mut schedule, run_at_ms, current_timestamp_ms());
        self.apply_schedule(schedule);
        self
    }

    /// Make the job eligible after `delay`.
    pub fn delay(&mut self, delay: Duration) -> &mut Self {
        let mut schedule = self.schedule();
        self.queue.strategy().delay(
            &mut schedule,
            duration_ms(delay),
            current_timestamp_ms(),
        );
        self.apply_schedule(schedule);
        self
    }

    fn schedule(&self) -> Schedule {
        Schedule {
            timing: self.timing,
            delay: self.delay,
            state: self.state,
        }
    }

    fn apply_schedule(&mut self, schedule: Schedule) {
        self.timing = schedule.timing;
        self.delay = schedule.delay;
        self.state = schedule.state;
    }

    // ========== Persisted mutations ==========

    /// Record progress. Fractions below 1 are read as a ratio, the value is
    /// capped at 100.
    pub async fn set_progress(&mut self, progress: f64) -> Result<()> {
        let pct = if progress < 1.0 {
            progress * 100.0
        } else {
            progress
        };
        let pct = pct.clamp(0.0, 100.0).round() as u8;
        self.set_field("progress", pct.to_string()).await?;
        self.progress = pct;
        self.touch().await
    }

    /// Record a failure description and stamp `failed_at`.
    pub async fn set_error(&mut self, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.emit(JobEventKind::Error(error.clone()));
        self.set_field("error", error.clone()).await?;
        self.error = Some(error);
        let now = current_timestamp_ms();
        self.set_field("failed_at", now.to_string()).await?;
        self.failed_at = Some(now);
        Ok(())
    }

    /// Stamp the id of the worker that claimed the job.
    pub async fn set_worker(&mut self, worker: &str) -> Result<()> {
        self.set_field("worker", worker.to_string()).await?;
        self.worker = Some(worker.to_string());
        Ok(())
    }

    /// Record the wall time of a successful run.
    pub async fn set_duration(&mut self, duration_ms: i64) -> Result<()> {
        self.set_field("duration", duration_ms.to_string()).await?;
        self.duration = duration_ms;
        Ok(())
    }

    /// Append a line to the job log.
    pub async fn log(&mut self, line: impl Into<String>) -> Result<()> {
        let line = line.into();
        self.emit(JobEventKind::Log(line.clone()));
        self.queue
            .store()
            .rpush(&self.queue.keys().job_log(self.id.as_str()), &line)
            .await?;
        self.touch().await
    }

    /// Finish successfully, storing `result` when one is given.
    pub async fn complete(&mut self, result: Option<Value>) -> Result<()> {
        if let Some(result) = result.filter(|r| !r.is_null()) {
            self.set_field("result", serde_json::to_string(&result)?)
                .await?;
            self.result = Some(result);
        }
        self.set_field("progress", "100".to_string()).await?;
        self.progress = 100;
        self.set_state(JobState::Complete).await
    }

    /// Move to `failed`.
    pub async fn mark_failed(&mut self) -> Result<()> {
        self.set_state(JobState::Failed).await
    }

    /// Move to `inactive`.
    pub async fn mark_inactive(&mut self) -> Result<()> {
        self.set_state(JobState::Inactive).await
    }

    /// Move to `active`.
    pub async fn mark_active(&mut self) -> Result<()> {
        self.set_state(JobState::Active).await
    }

    /// Transition to `state` and re-index the job under its current score.
    pub async fn set_state(&mut self, state: JobState) -> Result<()> {
        self.emit(JobEventKind::State(state));
        self.remove_state().await?;

        let score = self.score();
        self.set_field("state", state.to_string()).await?;
        self.state = state;

        let store = self.queue.store();
        let keys = self.queue.keys();
        let id = self.id.as_str();
        store.zadd(&keys.jobs(), id, score).await?;
        store.zadd(&keys.jobs_by_state(state), id, score).await?;
        store
            .zadd(&keys.jobs_by_type_state(&self.job_type, state), id, score)
            .await?;
        self.indexed_state = Some(state);

        if state == JobState::Inactive && self.queue.strategy().signals_inactive() {
            store.lpush(&keys.wakeup(&self.job_type), "1").await?;
        }

        tracing::debug!(job_id = %self.id, job_type = %self.job_type, state = %state, score, "Job state changed");
        self.touch().await
    }

    /// Drop the job from the three indexes it is currently held in.
    ///
    /// The indexed state can differ from `state()` after `delay` or `run_at`
    /// on a saved job, until the next save.
    pub async fn remove_state(&mut self) -> Result<()> {
        let Some(indexed) = self.indexed_state else {
            return Ok(());
        };
        let store = self.queue.store();
        let keys = self.queue.keys();
        let id = self.id.as_str();
        store.zrem(&keys.jobs(), id).await?;
        store.zrem(&keys.jobs_by_state(indexed), id).await?;
        store
            .zrem(&keys.jobs_by_type_state(&self.job_type, indexed), id)
            .await?;
        self.indexed_state = None;
        Ok(())
    }

    /// Write the whole record and re-index under the current state.
    pub async fn update(&mut self) -> Result<()> {
        self.emit(JobEventKind::Update);
        self.updated_at = current_timestamp_ms();
        let fields = self.to_fields()?;
        self.queue
            .store()
            .hset_multiple(&self.queue.keys().job(self.id.as_str()), &fields)
            .await?;
        self.set_state(self.state).await
    }

    /// Persist the job and register its type.
    pub async fn save(&mut self) -> Result<()> {
        self.emit(JobEventKind::Save);
        self.update().await?;
        self.queue
            .store()
            .sadd(&self.queue.keys().types(), &self.job_type)
            .await?;
        tracing::debug!(job_id = %self.id, job_type = %self.job_type, "Job saved");
        Ok(())
    }

    /// Erase the record, the log and every index membership.
    pub async fn remove(mut self) -> Result<()> {
        self.remove_state().await?;
        let keys = self.queue.keys();
        self.queue
            .store()
            .del(&[keys.job_log(self.id.as_str()), keys.job(self.id.as_str())])
            .await?;
        self.emit(JobEventKind::Remove);
        tracing::debug!(job_id = %self.id, job_type = %self.job_type, "Job removed");
        Ok(())
    }

    /// Consume one attempt with a single atomic increment on the store.
    pub async fn attempt(&mut self) -> Result<Attempt> {
        let attempts = self
            .queue
            .store()
            .hincr(&self.queue.keys().job(self.id.as_str()), "attempts", 1)
            .await?;
        self.attempts = u32::try_from(attempts).unwrap_or(0);

        let max = i64::from(self.max_attempts);
        Ok(Attempt {
            remaining: u32::try_from((max - attempts + 1).max(0)).unwrap_or(u32::MAX),
            number: u32::try_from((attempts - 1).max(0)).unwrap_or(u32::MAX),
            max_attempts: self.max_attempts,
        })
    }

    /// Decide between terminal failure, deferred retry and immediate retry.
    pub async fn reattempt(&mut self, remaining: u32, attempt_number: u32) -> Result<()> {
        if remaining == 0 {
            tracing::warn!(job_id = %self.id, job_type = %self.job_type, error = ?self.error, "Job failed, no attempts left");
            return self.mark_failed().await;
        }

        match self.backoff {
            Some(backoff) => {
                let fallback = u64::try_from(self.delay).unwrap_or(0);
                let delay_ms = backoff.compute_delay(attempt_number, fallback);
                tracing::debug!(job_id = %self.id, attempt = attempt_number, delay_ms, "Retrying job after backoff");
                self.defer(delay_ms).await
            }
            None => {
                tracing::debug!(job_id = %self.id, attempt = attempt_number, "Retrying job immediately");
                self.mark_inactive().await
            }
        }
    }

    /// Push the ready time `delay_ms` into the future and re-index.
    async fn defer(&mut self, delay_ms: u64) -> Result<()> {
        let mut schedule = self.schedule();
        self.queue.strategy().delay(
            &mut schedule,
            i64::try_from(delay_ms).unwrap_or(i64::MAX),
            current_timestamp_ms(),
        );
        if schedule.timing != self.timing {
            self.set_field("timing", schedule.timing.to_string()).await?;
        }
        if schedule.delay != self.delay {
            self.set_field("delay", schedule.delay.to_string()).await?;
        }
        self.timing = schedule.timing;
        self.delay = schedule.delay;
        self.set_state(schedule.state).await
    }

    /// Re-read the state field, picking up transitions made elsewhere.
    pub(crate) async fn refresh_state(&mut self) -> Result<JobState> {
        let stored = self
            .queue
            .store()
            .hget(&self.queue.keys().job(self.id.as_str()), "state")
            .await?;
        if let Some(state) = stored.and_then(|s| s.parse().ok()) {
            self.state = state;
            self.indexed_state = Some(state);
        }
        Ok(self.state)
    }

    async fn touch(&mut self) -> Result<()> {
        let now = current_timestamp_ms();
        self.set_field("updated_at", now.to_string()).await?;
        self.updated_at = now;
        Ok(())
    }

    async fn set_field(&self, field: &str, value: String) -> Result<()> {
        self.queue
            .store()
            .hset(&self.queue.keys().job(self.id.as_str()), field, &value)
            .await
    }

    fn emit(&self, kind: JobEventKind) {
        self.queue.emit_job(&JobEvent {
            id: self.id.clone(),
            job_type: self.job_type.clone(),
            kind,
        });
    }

    // ========== Record encoding ==========

    fn to_fields(&self) -> Result<Vec<(String, String)>> {
        let mut fields = vec![
            ("id".to_string(), self.id.to_string()),
            ("type".to_string(), self.job_type.clone()),
            ("data".to_string(), serde_json::to_string(&self.data)?),
            ("priority".to_string(), self.priority.to_string()),
            ("progress".to_string(), self.progress.to_string()),
            ("state".to_string(), self.state.to_string()),
            ("timing".to_string(), self.timing.to_string()),
            ("delay".to_string(), self.delay.to_string()),
            ("attempts".to_string(), self.attempts.to_string()),
            ("max_attempts".to_string(), self.max_attempts.to_string()),
            ("created_at".to_string(), self.created_at.to_string()),
            ("updated_at".to_string(), self.updated_at.to_string()),
            ("duration".to_string(), self.duration.to_string()),
        ];
        if let Some(result) = &self.result {
            fields.push(("result".to_string(), serde_json::to_string(result)?));
        }
        if let Some(backoff) = &self.backoff {
            fields.push(("backoff".to_string(), serde_json::to_string(backoff)?));
        }
        if let Some(error) = &self.error {
            fields.push(("error".to_string(), error.clone()));
        }
        if let Some(failed_at) = self.failed_at {
            fields.push(("failed_at".to_string(), failed_at.to_string()));
        }
        if let Some(worker) = &self.worker {
            fields.push(("worker".to_string(), worker.clone()));
        }
        Ok(fields)
    }

    /// A record without a `type` is a leftover of a concurrent field write
    /// after removal and is reported as missing.
    fn from_fields(
        queue: Queue,
        id: &str,
        mut fields: HashMap<String, String>,
    ) -> Result<Option<Job>> {
        let Some(job_type) = fields.remove("type") else {
            tracing::warn!(job_id = id, "Ignoring job record without a type");
            return Ok(None);
        };

        fn num<T: FromStr + Default>(fields: &HashMap<String, String>, key: &str) -> T {
            fields
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default()
        }

        let data = match fields.get("data") {
            Some(raw) => serde_json::from_str(raw)?,
            None => Value::Null,
        };
        let result = match fields.get("result") {
            Some(raw) => Some(serde_json::from_str(raw)?),
            None => None,
        };
        let backoff = fields.get("backoff").and_then(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| tracing::warn!(job_id = id, error = %e, "Ignoring malformed backoff"))
                .ok()
        });
        let state = fields
            .get("state")
            .and_then(|s| s.parse().ok())
            .unwrap_or(JobState::Inactive);

        Ok(Some(Job {
            queue,
            id: JobId::from(id),
            job_type,
            data,
            result,
            priority: num(&fields, "priority"),
            progress: num(&fields, "progress"),
            state,
            indexed_state: Some(state),
            backoff,
            error: fields.get("error").cloned(),
            timing: num(&fields, "timing"),
            delay: num(&fields, "delay"),
            attempts: num(&fields, "attempts"),
            max_attempts: fields
                .get("max_attempts")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            created_at: num(&fields, "created_at"),
            updated_at: num(&fields, "updated_at"),
            failed_at: fields.get("failed_at").and_then(|v| v.parse().ok()),
            duration: num(&fields, "duration"),
            worker: fields.get("worker").cloned(),
        }))
    }
}

/// Current Unix timestamp in milliseconds.
pub(crate) fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
