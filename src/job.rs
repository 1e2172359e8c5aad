use crate::backoff::BackoffStrategy;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// A unit of work together with its scheduling and retry metadata.
///
/// `id` is serialized first. Stores order equal scores by the serialized
/// bytes, so jobs of equal priority dispatch in id order, and ids are
/// UUIDv7 and therefore sorted by creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Value,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub timeout_ms: Option<u64>,
    pub retry_base_delay_ms: u64,
    pub backoff_strategy: BackoffStrategy,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: i64,
    #[serde(default)]
    pub processed_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub failed_at: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl Job {
    /// Build a fresh job with a new id. Fails if the type is empty or the
    /// options are out of range.
    pub fn new<S: Into<String>>(
        job_type: S,
        payload: Value,
        options: &JobOptions,
        now_ms: i64,
    ) -> Result<Self> {
        let job_type = job_type.into();
        if job_type.trim().is_empty() {
            return Err(Error::InvalidJob("Job type cannot be empty".to_string()));
        }
        options.validate()?;

        Ok(Self {
            id: uuid::Uuid::now_v7().to_string(),
            job_type,
            payload,
            priority: options.priority,
            attempts: 0,
            max_attempts: options.max_attempts,
            delay_ms: options.delay_ms,
            timeout_ms: options.timeout_ms,
            retry_base_delay_ms: options.retry_base_delay_ms,
            backoff_strategy: options.backoff_strategy,
            tags: options.tags.clone(),
            created_at: now_ms,
            processed_at: None,
            completed_at: None,
            failed_at: None,
            last_error: None,
            result: None,
        })
    }

    /// Whether another failure would still leave room for a retry.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Delay before the next run, based on how many times the job has run.
    pub fn retry_delay_ms(&self) -> u64 {
        self.backoff_strategy
            .delay_ms(self.retry_base_delay_ms, self.attempts)
    }

    /// Score in the waiting set; lower pops first.
    pub fn waiting_score(&self) -> f64 {
        -f64::from(self.priority)
    }

    /// Timestamp that starts the retention clock of a terminal job.
    pub fn terminal_at(&self) -> Option<i64> {
        self.completed_at.or(self.failed_at)
    }

    /// Decode the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub(crate) fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Per-job scheduling options accepted by `enqueue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub priority: i32,
    pub max_attempts: u32,
    pub delay_ms: u64,
    /// `None` lets the handler run without a deadline.
    pub timeout_ms: Option<u64>,
    pub retry_base_delay_ms: u64,
    pub backoff_strategy: BackoffStrategy,
    pub tags: Vec<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            max_attempts: 3,
            delay_ms: 0,
            timeout_ms: Some(30_000),
            retry_base_delay_ms: 5_000,
            backoff_strategy: BackoffStrategy::Exponential,
            tags: Vec::new(),
        }
    }
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout_ms = None;
        self
    }

    pub fn with_retry_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_base_delay_ms = delay_ms;
        self
    }

    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidJob(
                "Max attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partition a job currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    DeadLetter,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::DeadLetter => "dead_letter",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::DeadLetter)
    }
}

/// Executes jobs of one type.
///
/// A handler that outlives its job's timeout keeps running; the job is
/// already marked failed by then. Handlers must tolerate being abandoned.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Return the job result, or an error to schedule a retry.
    async fn handle(&self, job: Job) -> Result<Value>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn handle(&self, job: Job) -> Result<Value> {
        (self.f)(job).await
    }
}

/// A typed payload that knows how to run itself.
#[async_trait]
pub trait Task: DeserializeOwned + Send + Sync + Debug {
    /// Job type the task is enqueued and registered under
    fn job_type() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    /// Run the task. `job` carries the surrounding metadata (attempts, tags).
    async fn run(&self, job: &Job) -> Result<Value>;
}

/// A handler that decodes the payload into `T` and runs it.
pub struct TaskHandler<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Task> TaskHandler<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }

    pub fn job_type(&self) -> &'static str {
        T::job_type()
    }
}

impl<T: Task> Default for TaskHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Task + 'static> JobHandler for TaskHandler<T> {
    async fn handle(&self, job: Job) -> Result<Value> {
        let task: T = job.payload_as()?;
        task.run(&job).await
    }
}
