use crate::{
    error::{Error, Result},
    events::QueueEvent,
    job::Job,
    queue::QueueInner,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::{
    sync::broadcast,
    time::{self, Duration, Instant, MissedTickBehavior},
};

const OUTCOME_ATTEMPTS: u32 = 3;

/// The dispatch loop of one queue.
pub(crate) struct Worker {
    queue: Arc<QueueInner>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Worker {
    pub(crate) fn new(queue: Arc<QueueInner>, shutdown_rx: broadcast::Receiver<()>) -> Self {
        Self { queue, shutdown_rx }
    }

    /// Sleep for `duration`, returning true if shutdown was signalled.
    async fn idle(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown_rx.recv() => true,
            _ = time::sleep(duration) => false,
        }
    }

    pub(crate) async fn run(mut self) {
        log::info!("Worker for queue {} started. Looking for jobs...", self.queue.name);

        let poll_interval = self.queue.config.poll_interval;
        let error_backoff = self.queue.config.error_backoff;
        let mut consecutive_errors: u32 = 0;

        loop {
            if self.queue.is_stopped() {
                break;
            }

            if self.queue.is_paused() || !self.queue.try_reserve_slot() {
                if self.idle(poll_interval).await {
                    break;
                }
                continue;
            }

            match self.queue.claim_next().await {
                Ok(Some(job)) => {
                    consecutive_errors = 0;
                    let queue = self.queue.clone();
                    tokio::spawn(async move { queue.run_job(job).await });
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    self.queue.release_slot();
                    if self.idle(poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    self.queue.release_slot();
                    consecutive_errors += 1;
                    log::error!(
                        "Error claiming job from queue {} (attempt {}): {}",
                        self.queue.name,
                        consecutive_errors,
                        e
                    );
                    if self.idle(error_backoff).await {
                        break;
                    }
                }
            }
        }

        log::info!("Worker for queue {} stopped.", self.queue.name);
    }
}

/// Periodically move due delayed jobs into the waiting set.
pub(crate) async fn promotion_loop(queue: Arc<QueueInner>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = time::interval(queue.config.promotion_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                if let Err(e) = queue.promote_delayed().await {
                    log::error!("Error promoting delayed jobs in queue {}: {}", queue.name, e);
                }
            }
        }
    }
}

/// Periodically prune aged completed and dead-lettered jobs.
pub(crate) async fn cleanup_loop(queue: Arc<QueueInner>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = time::interval(queue.config.cleanup_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                if let Err(e) = queue.cleanup().await {
                    log::error!("Error cleaning up queue {}: {}", queue.name, e);
                }
            }
        }
    }
}

impl QueueInner {
    /// Pop the best waiting job and move it into the active set.
    ///
    /// The caller must hold a concurrency slot.
    pub(crate) async fn claim_next(&self) -> Result<Option<Job>> {
        let (raw, mut job) = loop {
            let Some(raw) = self.store.scored_pop_min(&self.keys.waiting).await? else {
                return Ok(None);
            };
            match Job::from_json(&raw) {
                Ok(job) => break (raw, job),
                Err(e) => {
                    log::error!("Error parsing job JSON in queue {}: {}. Error: {}", self.name, raw, e);
                }
            }
        };

        job.attempts += 1;
        job.processed_at = Some(self.clock.now_ms());

        let job_json = job.to_json()?;
        if let Err(e) = self.store.hash_set(&self.keys.active, &job.id, &job_json).await {
            // put the untouched entry back so the job is not lost
            if let Err(restore) = self
                .store
                .scored_insert(&self.keys.waiting, job.waiting_score(), &raw)
                .await
            {
                log::error!("Error returning job {} to the waiting set: {}", job.id, restore);
            }
            return Err(e);
        }

        log::info!(
            "Processing job: {} (type: {}, attempt {}/{})",
            job.id,
            job.job_type,
            job.attempts,
            job.max_attempts
        );
        self.emit(QueueEvent::Active(job.clone()));
        Ok(Some(job))
    }

    /// Run a claimed job to an outcome and release its slot.
    ///
    /// Recording the outcome is retried with `error_backoff` between tries.
    /// If every try fails the job stays in the active set.
    pub(crate) async fn run_job(&self, job: Job) {
        let started = Instant::now();
        let outcome = self.invoke(&job).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.metrics
            .record(&job.job_type, duration_ms, outcome.is_ok(), self.clock.now_ms());

        let mut attempt = 1;
        loop {
            let recorded = match &outcome {
                Ok(value) => self.complete(job.clone(), value.clone(), duration_ms).await,
                Err(e) => self.fail(job.clone(), e).await,
            };
            match recorded {
                Ok(()) => break,
                Err(e) if attempt < OUTCOME_ATTEMPTS => {
                    log::warn!(
                        "Error recording outcome of job {} (attempt {}/{}): {}",
                        job.id,
                        attempt,
                        OUTCOME_ATTEMPTS,
                        e
                    );
                    attempt += 1;
                    time::sleep(self.config.error_backoff).await;
                }
                Err(e) => {
                    log::error!(
                        "Giving up recording outcome of job {}; it stays active: {}",
                        job.id,
                        e
                    );
                    break;
                }
            }
        }

        self.release_slot();
    }

    /// Run the handler on its own task, racing it against the job timeout.
    ///
    /// On timeout the handler task is detached, not aborted.
    async fn invoke(&self, job: &Job) -> Result<Value> {
        let Some(handler) = self.handler_for(&job.job_type) else {
            log::error!(
                "No processor found for job type '{}' (job: {})",
                job.job_type,
                job.id
            );
            return Err(Error::ProcessorNotRegistered(job.job_type.clone()));
        };

        let handler_job = job.clone();
        let handle = tokio::spawn(async move { handler.handle(handler_job).await });

        let joined = match job.timeout_ms {
            Some(timeout_ms) => match time::timeout(Duration::from_millis(timeout_ms), handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    log::warn!(
                        "Job {} timed out after {}ms; its handler is left running",
                        job.id,
                        timeout_ms
                    );
                    return Err(Error::JobTimeout {
                        job_id: job.id.clone(),
                        timeout_ms,
                    });
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) => Err(Error::Handler(format!("handler panicked: {}", e))),
        }
    }

    // Each transition writes the target partition before removing the job
    // from the active set, so a failed write leaves it active.
    async fn complete(&self, mut job: Job, value: Value, duration_ms: u64) -> Result<()> {
        job.result = Some(value);
        job.completed_at = Some(self.clock.now_ms());

        self.store
            .hash_set(&self.keys.completed, &job.id, &job.to_json()?)
            .await?;

        if !self.store.hash_delete(&self.keys.active, &job.id).await? {
            log::warn!(
                "Job {} was removed while active; discarding its result",
                job.id
            );
            self.store.hash_delete(&self.keys.completed, &job.id).await?;
            return Ok(());
        }

        log::info!("Job {} processed successfully in {}ms", job.id, duration_ms);
        self.emit(QueueEvent::Completed(job));
        Ok(())
    }

    async fn fail(&self, mut job: Job, error: &Error) -> Result<()> {
        let now = self.clock.now_ms();
        job.last_error = Some(error.to_string());

        if job.has_attempts_left() {
            let delay_ms = job.retry_delay_ms();
            let due = now.saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX));
            let job_json = job.to_json()?;

            self.store
                .scored_insert(&self.keys.delayed, due as f64, &job_json)
                .await?;

            if !self.store.hash_delete(&self.keys.active, &job.id).await? {
                log::warn!(
                    "Job {} was removed while active; discarding its failure",
                    job.id
                );
                self.store.scored_remove(&self.keys.delayed, &job_json).await?;
                return Ok(());
            }

            log::warn!(
                "Job {} failed: {}. Retrying in {}ms (attempt {}/{})",
                job.id,
                error,
                delay_ms,
                job.attempts,
                job.max_attempts
            );
            self.emit(QueueEvent::Retry { job, delay_ms });
        } else {
            job.failed_at = Some(now);

            self.store
                .hash_set(&self.keys.failed, &job.id, &job.to_json()?)
                .await?;

            if !self.store.hash_delete(&self.keys.active, &job.id).await? {
                log::warn!(
                    "Job {} was removed while active; discarding its failure",
                    job.id
                );
                self.store.hash_delete(&self.keys.failed, &job.id).await?;
                return Ok(());
            }

            log::warn!(
                "Moving job {} to dead letter queue after {} failed attempts: {}",
                job.id,
                job.attempts,
                error
            );
            self.emit(QueueEvent::Failed(job));
        }
        Ok(())
    }
}
