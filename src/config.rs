use crate::error::{Error, Result};
use std::{env, time::Duration};

/// Configuration for a single queue engine
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub key_prefix: String,
    pub concurrency: usize,
    pub max_jobs: usize,
    pub poll_interval: Duration,
    pub promotion_interval: Duration,
    pub cleanup_interval: Duration,
    pub max_job_age: Duration,
    pub error_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key_prefix: "jobqueue".to_string(),
            concurrency: 5,
            max_jobs: 10_000,
            poll_interval: Duration::from_millis(100),
            promotion_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(60),
            max_job_age: Duration::from_secs(24 * 60 * 60),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Builder for QueueConfig
#[derive(Debug)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueConfigBuilder {
    /// Create a new config builder with default values
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: QueueConfig) -> Self {
        Self { config }
    }

    /// Set the prefix every store key of the queue starts with
    pub fn key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Set the maximum number of jobs processed at once
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the waiting-set size at which enqueue is rejected
    pub fn max_jobs(mut self, max_jobs: usize) -> Self {
        self.config.max_jobs = max_jobs;
        self
    }

    /// Set how long the dispatch loop sleeps when idle or at capacity
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set how often due delayed jobs are promoted
    pub fn promotion_interval(mut self, interval: Duration) -> Self {
        self.config.promotion_interval = interval;
        self
    }

    /// Set how often aged terminal jobs are pruned
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Set how long completed and dead-lettered jobs are retained
    pub fn max_job_age(mut self, age: Duration) -> Self {
        self.config.max_job_age = age;
        self
    }

    /// Set how long the dispatch loop backs off after a store error
    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.config.error_backoff = backoff;
        self
    }

    /// Load configuration from environment variables
    pub fn from_env(mut self) -> Self {
        self.config = QueueConfig::from_env();
        self
    }

    /// Validate and build the final configuration
    pub fn build_and_validate(self) -> Result<QueueConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the final configuration
    pub fn build(self) -> QueueConfig {
        self.config
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring unparsable value '{}' for {}", raw, key);
            None
        }
    }
}

impl QueueConfig {
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = QueueConfig::default();

        if let Ok(prefix) = env::var("JOBQUEUE_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Some(concurrency) = env_parsed::<usize>("JOBQUEUE_CONCURRENCY") {
            config.concurrency = concurrency;
        }
        if let Some(max_jobs) = env_parsed::<usize>("JOBQUEUE_MAX_JOBS") {
            config.max_jobs = max_jobs;
        }
        if let Some(ms) = env_parsed::<u64>("JOBQUEUE_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parsed::<u64>("JOBQUEUE_PROMOTION_INTERVAL_MS") {
            config.promotion_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parsed::<u64>("JOBQUEUE_CLEANUP_INTERVAL_MS") {
            config.cleanup_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parsed::<u64>("JOBQUEUE_MAX_JOB_AGE_SECS") {
            config.max_job_age = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parsed::<u64>("JOBQUEUE_ERROR_BACKOFF_MS") {
            config.error_backoff = Duration::from_millis(ms);
        }

        config
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(Error::Config("Key prefix cannot be empty".to_string()));
        }

        if self.concurrency == 0 {
            return Err(Error::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_jobs == 0 {
            return Err(Error::Config("Max jobs must be greater than 0".to_string()));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::Config(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.promotion_interval.is_zero() {
            return Err(Error::Config(
                "Promotion interval must be greater than 0".to_string(),
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(Error::Config(
                "Cleanup interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
