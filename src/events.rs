use crate::job::Job;

/// Lifecycle notifications published by a queue.
///
/// Delivery is fire-and-forget over a broadcast channel: subscribers that
/// lag or join late miss events.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Added(Job),
    Active(Job),
    Completed(Job),
    Retry { job: Job, delay_ms: u64 },
    /// Attempts exhausted; the job is in the dead-letter store.
    Failed(Job),
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Added(_) => "job:added",
            QueueEvent::Active(_) => "job:active",
            QueueEvent::Completed(_) => "job:completed",
            QueueEvent::Retry { .. } => "job:retry",
            QueueEvent::Failed(_) => "job:failed",
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            QueueEvent::Added(job)
            | QueueEvent::Active(job)
            | QueueEvent::Completed(job)
            | QueueEvent::Failed(job)
            | QueueEvent::Retry { job, .. } => job,
        }
    }
}
