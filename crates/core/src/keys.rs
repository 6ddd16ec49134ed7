//! Store key layout with prefix support.

use crate::job::JobState;

/// Builds every key the queue reads or writes.
///
/// With the default prefix `q` the layout is:
///
/// | key                     | structure  |
/// |-------------------------|------------|
/// | `q:job:<id>`            | hash       |
/// | `q:job:<id>:log`        | list       |
/// | `q:job:types`           | set        |
/// | `q:jobs`                | sorted set |
/// | `q:jobs:<state>`        | sorted set |
/// | `q:jobs:<type>:<state>` | sorted set |
/// | `q:<type>:jobs`         | list       |
/// | `q:settings`            | hash       |
#[derive(Debug, Clone)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    /// Create a new StoreKeys instance with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Get the prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Hash record of one job.
    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    /// Append-only log list of one job.
    pub fn job_log(&self, id: &str) -> String {
        format!("{}:job:{}:log", self.prefix, id)
    }

    /// Set of every job type ever saved.
    pub fn types(&self) -> String {
        format!("{}:job:types", self.prefix)
    }

    /// Global index of all jobs.
    pub fn jobs(&self) -> String {
        format!("{}:jobs", self.prefix)
    }

    /// Index of jobs in one state.
    pub fn jobs_by_state(&self, state: JobState) -> String {
        format!("{}:jobs:{}", self.prefix, state)
    }

    /// Index of jobs of one type in one state.
    pub fn jobs_by_type_state(&self, job_type: &str, state: JobState) -> String {
        format!("{}:jobs:{}:{}", self.prefix, job_type, state)
    }

    /// Ready set a worker pops from, narrowed to a type when one is given.
    pub fn ready(&self, job_type: Option<&str>) -> String {
        match job_type {
            Some(t) => self.jobs_by_type_state(t, JobState::Inactive),
            None => self.jobs_by_state(JobState::Inactive),
        }
    }

    /// Wake-up list used by the original delayed-state scheduling.
    pub fn wakeup(&self, job_type: &str) -> String {
        format!("{}:{}:jobs", self.prefix, job_type)
    }

    /// Operator settings hash.
    pub fn settings(&self) -> String {
        format!("{}:settings", self.prefix)
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new("q")
    }
}
