//! Configuration types for the job queue library.

use std::sync::Arc;
use std::time::Duration;

use crate::schedule::{DelayedState, ScoreDeferral, SchedulingStrategy};

/// How deferred jobs are represented in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingMode {
    /// Defer through the ready-time score of `inactive` jobs.
    #[default]
    ScoreDeferral,
    /// Park deferred jobs in the `delayed` state and push wake-up tokens.
    OriginalDelayed,
}

impl SchedulingMode {
    pub(crate) fn strategy(self) -> Arc<dyn SchedulingStrategy> {
        match self {
            SchedulingMode::ScoreDeferral => Arc::new(ScoreDeferral),
            SchedulingMode::OriginalDelayed => Arc::new(DelayedState),
        }
    }
}

/// Configuration for a Queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Prefix for every store key.
    pub prefix: String,
    /// Idle sleep between polls when no job is ready.
    ///
    /// Overridden by the `poll_interval` setting (milliseconds) when present.
    pub poll_interval: Duration,
    /// Deferral representation.
    pub scheduling: SchedulingMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: "q".to_string(),
            poll_interval: Duration::from_secs(1),
            scheduling: SchedulingMode::ScoreDeferral,
        }
    }
}

impl QueueConfig {
    /// Create a new builder.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }
}

/// Builder for QueueConfig.
#[derive(Debug, Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    /// Set the idle poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the scheduling mode.
    pub fn scheduling(mut self, mode: SchedulingMode) -> Self {
        self.config.scheduling = mode;
        self
    }

    /// Build the QueueConfig.
    pub fn build(self) -> QueueConfig {
        self.config
    }
}

/// Configuration for a WorkerPool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Restrict every worker to one job type.
    pub job_type: Option<String>,
    /// Graceful shutdown timeout. Workers still busy afterwards are aborted
    /// together with their running handlers.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            job_type: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a new builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// Builder for PoolConfig.
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Set the number of workers.
    pub fn num_workers(mut self, num: usize) -> Self {
        self.config.num_workers = num;
        self
    }

    /// Restrict the pool to one job type.
    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.config.job_type = Some(job_type.into());
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Build the PoolConfig.
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.prefix, "q");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.scheduling, SchedulingMode::ScoreDeferral);
    }

    #[test]
    fn test_queue_config_builder() {
        let config = QueueConfig::builder()
            .prefix("jobs")
            .poll_interval(Duration::from_millis(50))
            .scheduling(SchedulingMode::OriginalDelayed)
            .build();
        assert_eq!(config.prefix, "jobs");
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert!(config.scheduling.strategy().is_original());
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::builder()
            .num_workers(8)
            .job_type("email")
            .shutdown_timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.job_type.as_deref(), Some("email"));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }
}
