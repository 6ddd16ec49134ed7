//! # kue-core - Job state machine, queue and worker
//!
//! This crate provides the core of the kue job queue:
//! - `Store` trait for the primitive operations the queue is built on,
//!   with an in-process `MemoryStore`
//! - `Job` with its lifecycle state machine and ready-time scoring
//! - `Queue` for creating jobs, registering handlers and reading state views
//! - `Worker` and `WorkerPool` for claiming and executing jobs
//! - Backoff policies, scheduling strategies and lifecycle events
//! - Error types

mod backoff;
mod config;
mod error;
mod events;
mod handler;
mod job;
mod keys;
mod memory;
mod pool;
mod queue;
mod schedule;
mod store;
mod worker;

// Re-export main types
pub use backoff::Backoff;
pub use config::{PoolConfig, PoolConfigBuilder, QueueConfig, QueueConfigBuilder, SchedulingMode};
pub use error::{KueError, Result};
pub use events::{EventBus, JobEvent, JobEventKind, QueueEvent};
pub use handler::{boxed_handler, BoxedHandler, HandlerFuture, JobError, JobResult};
pub use job::{Attempt, Job, JobId, JobState, Priority};
pub use keys::StoreKeys;
pub use memory::MemoryStore;
pub use pool::WorkerPool;
pub use queue::{Queue, QueueRegistry};
pub use schedule::{DelayedState, Schedule, ScoreDeferral, SchedulingStrategy};
pub use store::{DynStore, SharedStore, Store};
pub use worker::{worker_id, Worker, POLL_INTERVAL_SETTING};
