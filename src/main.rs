use jobqueue::{
    BackoffStrategy, Job, JobOptions, MemoryStore, QueueConfig, QueueEvent, QueueRegistry,
    RedisStore, Result, Store, Task,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::signal;

#[derive(Serialize, Deserialize, Debug, Clone)]
struct DemoJob {
    id: String,
    message: String,
    should_fail: bool,
}

#[async_trait::async_trait]
impl Task for DemoJob {
    fn job_type() -> &'static str {
        "demo"
    }

    async fn run(&self, job: &Job) -> Result<Value> {
        println!(
            "🔄 Processing demo job: {} - {} (attempt {})",
            self.id, self.message, job.attempts
        );

        // Simulate some work
        tokio::time::sleep(Duration::from_millis(500)).await;

        if self.should_fail {
            println!("❌ Job {} intentionally failed", self.id);
            Err(jobqueue::Error::Handler(
                "Intentional failure for demo".to_string(),
            ))
        } else {
            println!("✅ Job {} completed successfully", self.id);
            Ok(json!({ "echo": self.message }))
        }
    }
}

async fn open_store() -> Result<Arc<dyn Store>> {
    match std::env::var("JOBQUEUE_REDIS_URL") {
        Ok(url) => Ok(Arc::new(RedisStore::connect(&url).await?)),
        Err(_) => Ok(Arc::new(MemoryStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("🚀 jobqueue Demo");
    println!("================");

    let config = QueueConfig::builder()
        .from_env()
        .promotion_interval(Duration::from_millis(500))
        .build_and_validate()?;
    let registry = QueueRegistry::new(open_store().await?, config);

    let queue = registry.queue("demo", None)?;
    queue.register_task::<DemoJob>();

    // Clear existing jobs for clean demo
    let cleared = queue.clear().await?;
    println!("🧹 Cleared {} existing jobs", cleared);

    let mut events = queue.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let QueueEvent::Retry { job, delay_ms } = &event {
                println!("🔁 {} {} in {}ms", event.name(), job.id, delay_ms);
            } else {
                println!("📣 {} {}", event.name(), event.job().id);
            }
        }
    });

    let demo_jobs = vec![
        (
            DemoJob {
                id: "job_1".to_string(),
                message: "This job will succeed".to_string(),
                should_fail: false,
            },
            0,
        ),
        (
            DemoJob {
                id: "job_2".to_string(),
                message: "This job will fail and retry".to_string(),
                should_fail: true,
            },
            0,
        ),
        (
            DemoJob {
                id: "job_3".to_string(),
                message: "A high priority job".to_string(),
                should_fail: false,
            },
            10,
        ),
    ];

    for (job, priority) in demo_jobs {
        let options = JobOptions::default()
            .with_priority(priority)
            .with_retry_base_delay_ms(1_000)
            .with_backoff(BackoffStrategy::Exponential);
        let job_id = queue.enqueue_task(&job, options).await?;
        println!("📝 Enqueued job: {}", job_id);
    }

    println!("Press Ctrl+C to stop\n");

    match signal::ctrl_c().await {
        Ok(()) => {
            println!("\n🛑 Received Ctrl+C signal. Shutting down gracefully...");
        }
        Err(err) => {
            eprintln!("Unable to listen for shutdown signal: {}", err);
        }
    }

    for (name, stats) in registry.get_all_stats().await? {
        println!(
            "📊 {}: {} completed, {} failed, {} delayed, error rate {:.2}",
            name, stats.completed_count, stats.failed_count, stats.delayed_count, stats.error_rate
        );
    }

    registry.shutdown_all(Duration::from_secs(5)).await;

    println!("✅ Shutdown complete.");
    Ok(())
}
