//! Several workers in one process.
//!
//! Each worker is an independent dequeuer. The pool only spawns them and
//! stops them together; claiming still goes through the store, so a pool
//! behaves the same as the same number of separate processes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::PoolConfig;
use crate::error::Result;
use crate::events::QueueEvent;
use crate::queue::Queue;
use crate::worker::Worker;

/// Runs `num_workers` worker loops over one queue.
///
/// Handlers come from the queue; register them before running the pool.
pub struct WorkerPool {
    queue: Queue,
    config: PoolConfig,
    draining: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(queue: Queue, config: PoolConfig) -> Self {
        Self {
            queue,
            config,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
    }

    /// Run until `shutdown` resolves, then let every worker finish its
    /// current job.
    ///
    /// Returns the first store error reported by a worker.
    pub async fn run_until<S>(&self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        self.queue.emit_queue(&QueueEvent::Process {
            job_type: self.config.job_type.clone(),
        });

        for _ in 0..self.config.num_workers {
            let worker = Worker::new(self.queue.clone(), self.config.job_type.clone());
            let mut stop_rx = stop_rx.clone();
            tasks.spawn(async move {
                worker
                    .run_until(async move {
                        let _ = stop_rx.wait_for(|stop| *stop).await;
                    })
                    .await
            });
        }

        tracing::info!(
            workers = self.config.num_workers,
            job_type = ?self.config.job_type,
            prefix = %self.queue.keys().prefix(),
            "Worker pool started"
        );

        let mut first_error = None;
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown requested, draining...");
            }
            Some(result) = tasks.join_next() => {
                // A worker only exits early on a store error
                Self::record(result, &mut first_error);
                tracing::warn!("Worker exited early, stopping pool");
            }
        }

        self.draining.store(true, Ordering::SeqCst);
        let _ = stop_tx.send(true);

        let deadline = tokio::time::sleep(self.config.shutdown_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                next = tasks.join_next() => match next {
                    Some(result) => Self::record(result, &mut first_error),
                    None => break,
                },
                _ = &mut deadline => {
                    tracing::warn!(remaining = tasks.len(), "Shutdown timeout reached, forcing stop");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        tracing::info!("Worker pool stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record(
        result: std::result::Result<Result<()>, tokio::task::JoinError>,
        first_error: &mut Option<crate::error::KueError>,
    ) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    *first_error = Some(e);
                }
            }
            Err(e) => tracing::error!(error = %e, "Task panicked"),
        }
    }

    /// Whether shutdown has started.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::job::JobState;
    use crate::memory::MemoryStore;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    fn queue() -> Queue {
        Queue::new(
            QueueConfig::builder()
                .poll_interval(Duration::from_millis(5))
                .build(),
            MemoryStore::new(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_processes_each_job_once() {
        let queue = queue();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        queue.register(None, move |job| {
            sink.lock().unwrap().push(job.id().to_string());
            async { Ok(None) }
        });

        for i in 0..20 {
            queue.create("email", json!({ "i": i })).save().await.unwrap();
        }

        let pool = WorkerPool::new(queue.clone(), PoolConfig::builder().num_workers(4).build());
        let q = queue.clone();
        pool.run_until(async move {
            while q.card(JobState::Complete).await.unwrap_or(0) < 20 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(pool.is_draining());
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 20);
        assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 20);
        assert_eq!(queue.card(JobState::Inactive).await.unwrap(), 0);
        assert_eq!(queue.card(JobState::Active).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pool_stops_when_idle() {
        let queue = queue();
        let pool = WorkerPool::new(
            queue,
            PoolConfig::builder()
                .num_workers(2)
                .job_type("email")
                .build(),
        );
        pool.run_until(tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(pool.is_draining());
    }
}
