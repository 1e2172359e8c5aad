use crate::{
    clock::{Clock, SystemClock},
    config::QueueConfig,
    error::Result,
    metrics::QueueStats,
    queue::Queue,
    store::Store,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::task::JoinSet;

/// Owns named queues that share one store.
///
/// Queues are created and started on first use.
pub struct QueueRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    default_config: QueueConfig,
    queues: Mutex<HashMap<String, Queue>>,
}

impl QueueRegistry {
    pub fn new(store: Arc<dyn Store>, default_config: QueueConfig) -> Self {
        Self::with_clock(store, default_config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn Store>,
        default_config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            default_config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Return the queue called `name`, creating and starting it if needed.
    ///
    /// `config` only applies when the queue is created; later calls get the
    /// existing instance unchanged. Must be called inside a Tokio runtime.
    pub fn queue(&self, name: &str, config: Option<QueueConfig>) -> Result<Queue> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = queues.get(name) {
            if config.is_some() {
                log::debug!("Queue {} already exists; ignoring the supplied config", name);
            }
            return Ok(queue.clone());
        }

        let config = config.unwrap_or_else(|| self.default_config.clone());
        let queue = Queue::with_clock(name, config, self.store.clone(), self.clock.clone())?;
        queue.start();
        queues.insert(name.to_string(), queue.clone());
        Ok(queue)
    }

    /// Names of the managed queues
    pub fn names(&self) -> Vec<String> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    fn snapshot(&self) -> Vec<Queue> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.values().cloned().collect()
    }

    /// Statistics for every managed queue, keyed by name
    pub async fn get_all_stats(&self) -> Result<HashMap<String, QueueStats>> {
        let mut all = HashMap::new();
        for queue in self.snapshot() {
            let stats = queue.get_stats().await?;
            all.insert(queue.name().to_string(), stats);
        }
        Ok(all)
    }

    /// Shut every queue down concurrently and forget them
    pub async fn shutdown_all(&self, grace_period: Duration) {
        let queues: Vec<Queue> = {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            queues.drain().map(|(_, queue)| queue).collect()
        };

        log::info!("Shutting down {} queue(s)", queues.len());

        let mut shutdowns = JoinSet::new();
        for queue in queues {
            shutdowns.spawn(async move { queue.shutdown(grace_period).await });
        }
        while let Some(joined) = shutdowns.join_next().await {
            if let Err(e) = joined {
                log::error!("Queue shutdown task failed: {}", e);
            }
        }
    }
}
