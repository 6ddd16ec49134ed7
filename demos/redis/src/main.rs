//! Redis example with delayed jobs, backoff and graceful shutdown.
//!
//! This example demonstrates:
//! - Using Redis as the shared store
//! - Delaying a job into the future
//! - Exponential backoff when a handler fails
//! - Stopping a worker with Ctrl+C
//!
//! Prerequisites:
//! - Redis server running on localhost:6379 (or set REDIS_URL)
//!
//! Run with: `cargo run -p demo-redis`

use kue_core::{Backoff, Job, JobError, JobResult, Queue, QueueConfig};
use kue_redis::RedisStore;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Process a webhook job that fails on its first two attempts.
async fn deliver_webhook(mut job: Job) -> JobResult {
    let url = job.data()["url"].as_str().unwrap_or_default().to_string();
    println!("[webhook] attempt={} url={}", job.attempts() + 1, url);

    if job.attempts() < 2 {
        job.log("endpoint returned 503").await?;
        return Err(JobError::new("endpoint unavailable"));
    }

    println!("[webhook] delivered\n");
    Ok(Some(serde_json::json!({ "status": 200 })))
}

/// Process a report job.
async fn build_report(job: Job) -> JobResult {
    println!("[report] building {}", job.data());
    tokio::time::sleep(Duration::from_millis(300)).await;
    Ok(None)
}

/// Fallback for job types without a handler of their own.
async fn reject_unknown(job: Job) -> JobResult {
    Err(JobError::new(format!("unexpected job type {}", job.job_type())))
}

#[tokio::main]
async fn main() -> kue_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let store = RedisStore::new(&url).await?;
    let queue = Queue::new(
        QueueConfig::builder()
            .prefix("kue_demo")
            .poll_interval(Duration::from_millis(200))
            .build(),
        store,
    );

    queue.on_job_event(|event| tracing::debug!(job_id = %event.id, kind = ?event.kind, "job event"));

    let mut webhook = queue.create("webhook", serde_json::json!({ "url": "https://example.com/hook" }));
    webhook
        .set_max_attempts(3)
        .set_backoff(Backoff::exponential(1000));
    webhook.save().await?;

    let mut report = queue.create("report", serde_json::json!({ "month": "2024-01" }));
    report.delay(Duration::from_secs(2));
    report.save().await?;

    println!("Enqueued webhook {} and delayed report {}", webhook.id(), report.id());
    println!("Press Ctrl+C to stop\n");

    queue.register(Some("webhook"), deliver_webhook);
    queue.register(Some("report"), build_report);

    queue
        .process_until(None, reject_unknown, async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    println!("\ncomplete: {:?}", queue.complete().await?);
    println!("failed:   {:?}", queue.failed().await?);
    Ok(())
}
