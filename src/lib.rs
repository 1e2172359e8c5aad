//! # jobqueue - Priority Job Queue with Retry and Dead-Letter Handling
//!
//! An asynchronous job queue that schedules jobs by priority and delay, runs
//! them under a concurrency ceiling, retries failures with fixed, linear or
//! exponential backoff, and parks exhausted jobs in a dead-letter store.
//!
//! Dispatch is at-least-once. A queue can run on the in-process
//! [`MemoryStore`] or on Redis through [`RedisStore`], in which case several
//! processes may serve the same queue.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jobqueue::{JobOptions, Queue, Result};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let queue = Queue::builder("emails").concurrency(4).build()?;
//!
//!     queue.register_fn("send_email", |job| async move {
//!         println!("Sending email to: {}", job.payload["to"]);
//!         Ok(json!({ "sent": true }))
//!     });
//!
//!     queue
//!         .enqueue(
//!             "send_email",
//!             json!({ "to": "user@example.com" }),
//!             JobOptions::default().with_priority(10),
//!         )
//!         .await?;
//!
//!     queue.start();
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     queue.shutdown(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Ordering
//!
//! Strictly higher priority always dispatches first. Jobs of equal priority
//! dispatch in id order, and ids are time-ordered UUIDv7, so in practice
//! oldest first. Jobs promoted from the delayed set in the same tick follow
//! the same rule once they are waiting.
//!
//! ## Timeouts
//!
//! A job whose handler outlives `timeout_ms` fails with
//! [`Error::JobTimeout`], but the handler itself keeps running until it
//! returns. Handlers must tolerate being abandoned.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod store;
mod worker;

pub use backoff::BackoffStrategy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{QueueConfig, QueueConfigBuilder};
pub use error::{Error, Result};
pub use events::QueueEvent;
pub use job::{FnHandler, Job, JobHandler, JobOptions, JobState, Task, TaskHandler};
pub use metrics::{JobTypeCount, QueueStats};
pub use queue::{HealthStatus, Queue, QueueBuilder};
pub use registry::QueueRegistry;
pub use store::{MemoryStore, RedisStore, Store};

// Re-export commonly used types
pub use serde_json::Value as JsonValue;
