//! Basic example using the in-process store.
//!
//! This example demonstrates:
//! - Creating a queue over `MemoryStore`
//! - Saving jobs with priorities and attempts
//! - Reporting progress and log lines from a handler
//! - Processing jobs with a worker pool until the queue is drained
//!
//! Run with: `cargo run -p demo-basic`

use kue_core::{
    Job, JobError, JobResult, JobState, MemoryStore, PoolConfig, Priority, Queue, QueueConfig,
    WorkerPool,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Email notification job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmailJob {
    to: String,
    subject: String,
}

/// Process an email job.
async fn send_email(mut job: Job) -> JobResult {
    let email: EmailJob = serde_json::from_value(job.data().clone())?;
    job.log(format!("sending to {}", email.to)).await?;

    // Simulate some work
    for step in 1..=4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        job.set_progress(step as f64 / 4.0).await?;
    }

    if email.to.ends_with("@invalid") {
        return Err(JobError::new(format!("mailbox {} does not exist", email.to)));
    }

    println!("[email] sent \"{}\" to {}", email.subject, email.to);
    Ok(Some(serde_json::json!({ "delivered": email.to })))
}

#[tokio::main]
async fn main() -> kue_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("kue job queue example\n");

    let queue = Queue::new(
        QueueConfig::builder()
            .poll_interval(Duration::from_millis(100))
            .build(),
        MemoryStore::new(),
    );
    queue.register(Some("email"), send_email);

    let emails = [
        ("alice@example.com", "Welcome!", Priority::Normal),
        ("bob@example.com", "Your order shipped", Priority::High),
        ("charlie@invalid", "Password reset", Priority::Critical),
        ("diana@example.com", "Weekly digest", Priority::Low),
    ];

    for (to, subject, priority) in emails {
        let payload = serde_json::to_value(EmailJob {
            to: to.to_string(),
            subject: subject.to_string(),
        })?;
        let mut job = queue.create("email", payload);
        job.set_priority(priority).set_max_attempts(2);
        job.save().await?;
        println!("  enqueued: {} ({})", job.id(), to);
    }

    println!("\nStarting worker pool (2 workers)...\n");

    let pool = WorkerPool::new(
        queue.clone(),
        PoolConfig::builder()
            .num_workers(2)
            .job_type("email")
            .shutdown_timeout(Duration::from_secs(5))
            .build(),
    );

    let watcher = queue.clone();
    let total = emails.len();
    pool.run_until(async move {
        loop {
            let complete = watcher.card(JobState::Complete).await.unwrap_or(0);
            let failed = watcher.card(JobState::Failed).await.unwrap_or(0);
            if complete + failed >= total {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await?;

    println!("\ncomplete: {:?}", queue.complete().await?);
    println!("failed:   {:?}", queue.failed().await?);
    for id in queue.failed().await? {
        if let Some(job) = queue.job(&id).await? {
            println!("  {} error={:?} log={:?}", id, job.error(), queue.job_logs(&id).await?);
        }
    }

    Ok(())
}
