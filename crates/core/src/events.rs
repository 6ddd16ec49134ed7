//! Lifecycle notifications.
//!
//! Listeners run synchronously on the emitting task. They are advisory: a
//! listener that panics is logged and skipped, and the operation that emitted
//! the event carries on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::job::{JobId, JobState};

/// What happened to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEventKind {
    Create,
    State(JobState),
    Update,
    Save,
    Log(String),
    Error(String),
    Remove,
}

/// A job lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub id: JobId,
    pub job_type: String,
    pub kind: JobEventKind,
}

/// A queue level notification.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// A job was built by `Queue::create`.
    Create { job_type: String },
    /// A worker loop is about to start, optionally bound to a type.
    Process { job_type: Option<String> },
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Registry of listeners for one event type.
pub struct EventBus<E> {
    listeners: RwLock<Vec<Listener<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<E: std::fmt::Debug> EventBus<E> {
    /// Register a listener.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push(Arc::new(listener));
    }

    /// Deliver an event to every listener.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(event = ?event, "Event listener panicked");
            }
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_all_listeners() {
        let bus: EventBus<QueueEvent> = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            bus.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(&QueueEvent::Process { job_type: None });
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(bus.len(), 3);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let bus: EventBus<QueueEvent> = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(|_| panic!("listener failure"));
        let counter = hits.clone();
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&QueueEvent::Create {
            job_type: "email".to_string(),
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_bus() {
        let bus: EventBus<QueueEvent> = EventBus::default();
        assert!(bus.is_empty());
        bus.emit(&QueueEvent::Process {
            job_type: Some("x".to_string()),
        });
    }
}
