use thiserror::Error;

/// Error types for queue operations
#[derive(Debug, Error)]
pub enum Error {
    /// The waiting set already holds `max_jobs` entries
    #[error("Queue full: queue '{queue}' already holds {max_jobs} waiting jobs")]
    QueueFull { queue: String, max_jobs: usize },
    /// No handler is registered for the job's type
    #[error("Processor not registered: no handler for job type '{0}'")]
    ProcessorNotRegistered(String),
    /// The handler did not finish within the job's deadline
    #[error("Job timeout: job {job_id} exceeded {timeout_ms}ms")]
    JobTimeout { job_id: String, timeout_ms: u64 },
    /// The handler reported a failure
    #[error("Handler error: {0}")]
    Handler(String),
    /// Job options or stored job data are not acceptable
    #[error("Invalid job: {0}")]
    InvalidJob(String),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// Backing store failures that are not Redis protocol errors
    #[error("Store error: {0}")]
    Store(String),
    /// Redis connection or operation errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, Error>;
