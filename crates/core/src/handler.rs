//! Job handler types.

use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::job::Job;

/// Result type for job handlers. `Ok(Some(value))` stores `value` as the
/// job result.
pub type JobResult = std::result::Result<Option<Value>, JobError>;

/// Error returned from job handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    /// Error message.
    pub message: String,
}

impl JobError {
    /// Create a new error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: std::error::Error> From<E> for JobError {
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

/// Future returned by a boxed handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = JobResult> + Send>>;

/// Type-erased job handler.
pub type BoxedHandler = Arc<dyn Fn(Job) -> HandlerFuture + Send + Sync>;

/// Box an async function into a handler.
pub fn boxed_handler<F, Fut>(handler: F) -> BoxedHandler
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    Arc::new(move |job| Box::pin(handler(job)))
}
