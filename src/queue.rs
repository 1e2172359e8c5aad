use crate::{
    clock::{Clock, SystemClock},
    config::{QueueConfig, QueueConfigBuilder},
    error::{Error, Result},
    events::QueueEvent,
    job::{FnHandler, Job, JobHandler, JobOptions, JobState, Task, TaskHandler},
    metrics::{Metrics, QueueStats},
    store::{MemoryStore, Store},
    worker::{self, Worker},
};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
    time::Duration,
};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{self, Instant},
};

const EVENT_CAPACITY: usize = 1024;
const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// Store keys of the five partitions of one queue.
#[derive(Debug, Clone)]
pub(crate) struct QueueKeys {
    pub(crate) waiting: String,
    pub(crate) delayed: String,
    pub(crate) active: String,
    pub(crate) completed: String,
    pub(crate) failed: String,
}

impl QueueKeys {
    fn new(prefix: &str, name: &str) -> Self {
        let key = |partition: &str| format!("{}:{}:{}", prefix, name, partition);
        Self {
            waiting: key("waiting"),
            delayed: key("delayed"),
            active: key("active"),
            completed: key("completed"),
            failed: key("failed"),
        }
    }

    fn all(&self) -> [&str; 5] {
        [
            &self.waiting,
            &self.delayed,
            &self.active,
            &self.completed,
            &self.failed,
        ]
    }
}

/// Health status of the queue
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub store_connected: bool,
    pub waiting_count: usize,
    pub delayed_count: usize,
    pub active_count: usize,
    pub dead_letter_count: usize,
    pub last_check_timestamp: i64,
}

struct Located {
    state: JobState,
    job: Job,
    raw: String,
}

pub(crate) struct QueueInner {
    pub(crate) name: String,
    pub(crate) config: QueueConfig,
    pub(crate) keys: QueueKeys,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) clock: Arc<dyn Clock>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    paused: AtomicBool,
    stopped: AtomicBool,
    active: AtomicUsize,
    events: broadcast::Sender<QueueEvent>,
    pub(crate) metrics: Metrics,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueInner {
    pub(crate) fn emit(&self, event: QueueEvent) {
        // no subscribers is not an error
        let _ = self.events.send(event);
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Take one of the `concurrency` slots, or return false at the ceiling.
    pub(crate) fn try_reserve_slot(&self) -> bool {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.config.concurrency).then_some(n + 1)
            })
            .is_ok()
    }

    pub(crate) fn release_slot(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn handler_for(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(job_type).cloned()
    }

    /// Move every due delayed job into the waiting set.
    pub(crate) async fn promote_delayed(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let due = self
            .store
            .scored_range_by_score(&self.keys.delayed, f64::NEG_INFINITY, now as f64)
            .await?;

        let mut promoted = 0;
        for raw in due {
            // another engine sharing the store may have promoted it already
            if !self.store.scored_remove(&self.keys.delayed, &raw).await? {
                continue;
            }
            match Job::from_json(&raw) {
                Ok(job) => {
                    if let Err(e) = self
                        .store
                        .scored_insert(&self.keys.waiting, job.waiting_score(), &raw)
                        .await
                    {
                        // still due, so the next tick picks it up again
                        if let Err(restore) = self
                            .store
                            .scored_insert(&self.keys.delayed, now as f64, &raw)
                            .await
                        {
                            log::error!("Error returning job {} to the delayed set: {}", job.id, restore);
                        }
                        return Err(e);
                    }
                    promoted += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Dropping unparsable delayed entry in queue {}: {}",
                        self.name,
                        e
                    );
                }
            }
        }

        if promoted > 0 {
            log::debug!("Promoted {} delayed job(s) in queue {}", promoted, self.name);
        }
        Ok(promoted)
    }

    /// Prune terminal jobs older than `max_job_age` and unparsable entries.
    pub(crate) async fn cleanup(&self) -> Result<usize> {
        let max_age_ms = i64::try_from(self.config.max_job_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.clock.now_ms().saturating_sub(max_age_ms);
        let mut removed = 0;

        for key in [&self.keys.completed, &self.keys.failed] {
            for (id, raw) in self.store.hash_get_all(key).await? {
                let expired = match Job::from_json(&raw) {
                    Ok(job) => job.terminal_at().unwrap_or(job.created_at) < cutoff,
                    Err(e) => {
                        log::warn!("Removing invalid entry {} from {}: {}", id, key, e);
                        true
                    }
                };
                if expired && self.store.hash_delete(key, &id).await? {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            log::info!("Cleaned up {} job(s) from queue {}", removed, self.name);
        }
        Ok(removed)
    }

    async fn locate(&self, id: &str) -> Result<Option<Located>> {
        let hashes = [
            (JobState::Active, &self.keys.active),
            (JobState::Completed, &self.keys.completed),
            (JobState::DeadLetter, &self.keys.failed),
        ];
        for (state, key) in hashes {
            if let Some(raw) = self.store.hash_get(key, id).await? {
                let job = Job::from_json(&raw)?;
                return Ok(Some(Located { state, job, raw }));
            }
        }

        let sets = [
            (JobState::Waiting, &self.keys.waiting),
            (JobState::Delayed, &self.keys.delayed),
        ];
        for (state, key) in sets {
            let members = self
                .store
                .scored_range_by_score(key, f64::NEG_INFINITY, f64::INFINITY)
                .await?;
            for raw in members {
                match Job::from_json(&raw) {
                    Ok(job) if job.id == id => return Ok(Some(Located { state, job, raw })),
                    _ => {}
                }
            }
        }

        Ok(None)
    }
}

/// A named queue engine.
///
/// Cloning is cheap and every clone drives the same engine. Call
/// [`Queue::start`] to run the dispatch loop and timers, and
/// [`Queue::shutdown`] to stop them; background tasks keep the engine alive
/// until then.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Create a new Queue builder
    pub fn builder<S: Into<String>>(name: S) -> QueueBuilder {
        QueueBuilder::new(name)
    }

    /// Create a queue on `store` with the system clock
    pub fn new<S: Into<String>>(
        name: S,
        config: QueueConfig,
        store: Arc<dyn Store>,
    ) -> Result<Self> {
        Self::with_clock(name, config, store, Arc::new(SystemClock))
    }

    /// Create a queue whose scheduling decisions read `clock`
    pub fn with_clock<S: Into<String>>(
        name: S,
        config: QueueConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config("Queue name cannot be empty".to_string()));
        }
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        let keys = QueueKeys::new(&config.key_prefix, &name);

        Ok(Self {
            inner: Arc::new(QueueInner {
                name,
                config,
                keys,
                store,
                clock,
                handlers: RwLock::new(HashMap::new()),
                paused: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                events,
                metrics: Metrics::new(),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Spawn the dispatch loop, the promotion timer and the cleanup timer.
    ///
    /// Must be called inside a Tokio runtime. Calling it again while running,
    /// or after shutdown, does nothing.
    pub fn start(&self) {
        if self.inner.is_stopped() {
            log::warn!("Queue {} is shut down and cannot be restarted", self.inner.name);
            return;
        }

        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return;
        }

        let worker = Worker::new(self.inner.clone(), self.inner.shutdown_tx.subscribe());
        tasks.push(tokio::spawn(worker.run()));
        tasks.push(tokio::spawn(worker::promotion_loop(
            self.inner.clone(),
            self.inner.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(worker::cleanup_loop(
            self.inner.clone(),
            self.inner.shutdown_tx.subscribe(),
        )));

        log::info!(
            "Queue {} started (concurrency {})",
            self.inner.name,
            self.inner.config.concurrency
        );
    }

    /// Enqueue a job and return its generated id.
    ///
    /// Fails with [`Error::QueueFull`] when the waiting set already holds
    /// `max_jobs` entries.
    pub async fn enqueue<P: Serialize>(
        &self,
        job_type: &str,
        payload: P,
        options: JobOptions,
    ) -> Result<String> {
        let inner = &self.inner;
        let now = inner.clock.now_ms();
        let job = Job::new(job_type, serde_json::to_value(payload)?, &options, now)?;

        let waiting = inner.store.scored_cardinality(&inner.keys.waiting).await?;
        if waiting >= inner.config.max_jobs {
            return Err(Error::QueueFull {
                queue: inner.name.clone(),
                max_jobs: inner.config.max_jobs,
            });
        }

        let job_json = job.to_json()?;
        if job.delay_ms > 0 {
            let due = now.saturating_add(i64::try_from(job.delay_ms).unwrap_or(i64::MAX));
            inner
                .store
                .scored_insert(&inner.keys.delayed, due as f64, &job_json)
                .await?;
            log::info!(
                "Added job {} ({}) to queue {} with a delay of {}ms",
                job.id,
                job.job_type,
                inner.name,
                job.delay_ms
            );
        } else {
            inner
                .store
                .scored_insert(&inner.keys.waiting, job.waiting_score(), &job_json)
                .await?;
            log::info!(
                "Added job {} ({}) to queue {} with priority {}",
                job.id,
                job.job_type,
                inner.name,
                job.priority
            );
        }

        let id = job.id.clone();
        inner.emit(QueueEvent::Added(job));
        Ok(id)
    }

    /// Enqueue a typed task under its own job type
    pub async fn enqueue_task<T>(&self, task: &T, options: JobOptions) -> Result<String>
    where
        T: Task + Serialize,
    {
        self.enqueue(T::job_type(), task, options).await
    }

    /// Register the handler for `job_type`, replacing any previous one
    pub fn register_handler<S, H>(&self, job_type: S, handler: H)
    where
        S: Into<String>,
        H: JobHandler + 'static,
    {
        self.insert_handler(job_type.into(), Arc::new(handler));
    }

    /// Register an async closure as the handler for `job_type`
    pub fn register_fn<S, F, Fut>(&self, job_type: S, f: F)
    where
        S: Into<String>,
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_handler(job_type, FnHandler::new(f));
    }

    /// Register the handler for a typed task
    pub fn register_task<T: Task + 'static>(&self) {
        self.register_handler(T::job_type(), TaskHandler::<T>::new());
    }

    fn insert_handler(&self, job_type: String, handler: Arc<dyn JobHandler>) {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.insert(job_type.clone(), handler).is_some() {
            log::debug!("Replaced handler for job type {}", job_type);
        }
    }

    /// Stop dispatching new jobs; queued and running jobs are kept
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        log::info!("Queue {} paused", self.inner.name);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        log::info!("Queue {} resumed", self.inner.name);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }

    /// Jobs currently being handled by this engine
    pub fn active_count(&self) -> usize {
        self.inner.active_count()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Empty all five partitions and return how many jobs were removed
    pub async fn clear(&self) -> Result<usize> {
        let inner = &self.inner;
        let keys = &inner.keys;
        let mut removed = 0;

        removed += inner.store.scored_cardinality(&keys.waiting).await?;
        removed += inner.store.scored_cardinality(&keys.delayed).await?;
        removed += inner.store.hash_length(&keys.active).await?;
        removed += inner.store.hash_length(&keys.completed).await?;
        removed += inner.store.hash_length(&keys.failed).await?;

        for key in keys.all() {
            inner.store.delete(key).await?;
        }

        log::info!("Cleared {} job(s) from queue {}", removed, inner.name);
        Ok(removed)
    }

    /// Look a job up in whichever partition holds it
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.inner.locate(id).await?.map(|located| located.job))
    }

    /// Partition that currently holds the job
    pub async fn job_state(&self, id: &str) -> Result<Option<JobState>> {
        Ok(self.inner.locate(id).await?.map(|located| located.state))
    }

    /// Remove a job from whichever partition holds it.
    ///
    /// Removing an active job does not stop its handler; its outcome is
    /// discarded when the handler returns.
    pub async fn remove_job(&self, id: &str) -> Result<bool> {
        let inner = &self.inner;
        let Some(located) = inner.locate(id).await? else {
            return Ok(false);
        };

        let removed = match located.state {
            JobState::Waiting => {
                inner
                    .store
                    .scored_remove(&inner.keys.waiting, &located.raw)
                    .await?
            }
            JobState::Delayed => {
                inner
                    .store
                    .scored_remove(&inner.keys.delayed, &located.raw)
                    .await?
            }
            JobState::Active => inner.store.hash_delete(&inner.keys.active, id).await?,
            JobState::Completed => inner.store.hash_delete(&inner.keys.completed, id).await?,
            JobState::DeadLetter => inner.store.hash_delete(&inner.keys.failed, id).await?,
        };

        if removed {
            log::info!(
                "Removed job {} ({}) from queue {}",
                id,
                located.state.as_str(),
                inner.name
            );
        }
        Ok(removed)
    }

    /// Get queue statistics for monitoring
    pub async fn get_stats(&self) -> Result<QueueStats> {
        let inner = &self.inner;
        let keys = &inner.keys;
        let metrics = inner.metrics.snapshot(inner.clock.now_ms());

        Ok(QueueStats {
            name: inner.name.clone(),
            waiting_count: inner.store.scored_cardinality(&keys.waiting).await?,
            active_count: inner.store.hash_length(&keys.active).await?,
            completed_count: inner.store.hash_length(&keys.completed).await?,
            failed_count: inner.store.hash_length(&keys.failed).await?,
            delayed_count: inner.store.scored_cardinality(&keys.delayed).await?,
            paused: inner.is_paused(),
            total_processed: metrics.total_processed,
            avg_processing_time_ms: metrics.avg_processing_time_ms,
            throughput_per_minute: metrics.throughput_per_minute,
            error_rate: metrics.error_rate,
            top_job_types: metrics.top_job_types,
        })
    }

    /// Check health status of the queue and its store
    pub async fn health_check(&self) -> HealthStatus {
        let inner = &self.inner;
        let keys = &inner.keys;
        let now = inner.clock.now_ms();

        let store_connected = match inner.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Health check for queue {} failed: {}", inner.name, e);
                false
            }
        };

        if !store_connected {
            return HealthStatus {
                store_connected,
                waiting_count: 0,
                delayed_count: 0,
                active_count: 0,
                dead_letter_count: 0,
                last_check_timestamp: now,
            };
        }

        HealthStatus {
            store_connected,
            waiting_count: inner
                .store
                .scored_cardinality(&keys.waiting)
                .await
                .unwrap_or(0),
            delayed_count: inner
                .store
                .scored_cardinality(&keys.delayed)
                .await
                .unwrap_or(0),
            active_count: inner.store.hash_length(&keys.active).await.unwrap_or(0),
            dead_letter_count: inner.store.hash_length(&keys.failed).await.unwrap_or(0),
            last_check_timestamp: now,
        }
    }

    /// Run one promotion tick; returns how many jobs became waiting
    pub async fn promote_delayed(&self) -> Result<usize> {
        self.inner.promote_delayed().await
    }

    /// Run one cleanup tick; returns how many entries were pruned
    pub async fn cleanup(&self) -> Result<usize> {
        self.inner.cleanup().await
    }

    /// Claim and run a single waiting job on the calling task.
    ///
    /// Returns false when nothing was dispatched: the queue is paused or shut
    /// down, every slot is busy, or no job is waiting.
    pub async fn process_next_job(&self) -> Result<bool> {
        let inner = &self.inner;
        if inner.is_paused() || inner.is_stopped() || !inner.try_reserve_slot() {
            return Ok(false);
        }

        match inner.claim_next().await {
            Ok(Some(job)) => {
                inner.run_job(job).await;
                Ok(true)
            }
            Ok(None) => {
                inner.release_slot();
                Ok(false)
            }
            Err(e) => {
                inner.release_slot();
                Err(e)
            }
        }
    }

    /// Stop dispatching and wait up to `grace_period` for active jobs.
    ///
    /// Handlers still running when the grace period ends are not interrupted;
    /// a warning is logged and the call returns.
    pub async fn shutdown(&self, grace_period: Duration) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            log::debug!("Queue {} is already shut down", inner.name);
        }
        let _ = inner.shutdown_tx.send(());

        let deadline = Instant::now() + grace_period;
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.drain(..).collect()
        };
        for task in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let abort = task.abort_handle();
            if time::timeout(remaining, task).await.is_err() {
                abort.abort();
            }
        }

        while inner.active_count() > 0 && Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            time::sleep(remaining.min(SHUTDOWN_POLL)).await;
        }

        let still_active = inner.active_count();
        if still_active > 0 {
            log::warn!(
                "Queue {} shut down with {} job(s) still active after {:?}",
                inner.name,
                still_active,
                grace_period
            );
        } else {
            log::info!("Queue {} shutdown complete.", inner.name);
        }
    }
}

/// Builder for Queue
pub struct QueueBuilder {
    name: String,
    config: QueueConfigBuilder,
    store: Option<Arc<dyn Store>>,
    clock: Option<Arc<dyn Clock>>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl QueueBuilder {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            config: QueueConfigBuilder::new(),
            store: None,
            clock: None,
            handlers: HashMap::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = QueueConfigBuilder::from_config(config);
        self
    }

    /// Set the maximum number of jobs processed at once
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config = self.config.concurrency(concurrency);
        self
    }

    /// Set the waiting-set size at which enqueue is rejected
    pub fn max_jobs(mut self, max_jobs: usize) -> Self {
        self.config = self.config.max_jobs(max_jobs);
        self
    }

    /// Set how long the dispatch loop sleeps when idle or at capacity
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.poll_interval(interval);
        self
    }

    /// Set how often due delayed jobs are promoted
    pub fn promotion_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.promotion_interval(interval);
        self
    }

    /// Use `store` instead of a fresh in-memory store
    pub fn store<S: Store + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Add a job handler
    pub fn handler<S, H>(mut self, job_type: S, handler: H) -> Self
    where
        S: Into<String>,
        H: JobHandler + 'static,
    {
        self.handlers.insert(job_type.into(), Arc::new(handler));
        self
    }

    /// Build the Queue; it is not started
    pub fn build(self) -> Result<Queue> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn Store>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let queue = Queue::with_clock(self.name, self.config.build(), store, clock)?;
        for (job_type, handler) in self.handlers {
            queue.insert_handler(job_type, handler);
        }
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_prefix_and_name() {
        let keys = QueueKeys::new("jq", "emails");
        assert_eq!(keys.waiting, "jq:emails:waiting");
        assert_eq!(keys.failed, "jq:emails:failed");
        assert_eq!(keys.all().len(), 5);
    }

    #[test]
    fn slots_never_exceed_concurrency() {
        let queue = Queue::builder("slots").concurrency(2).build().unwrap();
        assert!(queue.inner.try_reserve_slot());
        assert!(queue.inner.try_reserve_slot());
        assert!(!queue.inner.try_reserve_slot());
        queue.inner.release_slot();
        assert!(queue.inner.try_reserve_slot());
        assert_eq!(queue.active_count(), 2);
    }

    #[test]
    fn rejects_empty_name_and_invalid_config() {
        assert!(Queue::builder("").build().is_err());
        assert!(Queue::builder("q").concurrency(0).build().is_err());
    }
}
