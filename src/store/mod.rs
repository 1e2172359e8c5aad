//! Storage primitives the queue engine is built on.
//!
//! A queue only needs two shapes of data: score-ordered sets (waiting and
//! delayed jobs) and hashes keyed by job id (active, completed and
//! dead-lettered jobs). Anything that can provide both, with an atomic
//! pop-minimum, can back a queue.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert `member` with `score`, replacing the score if it is present.
    async fn scored_insert(&self, key: &str, score: f64, member: &str) -> Result<()>;

    /// Remove and return the lowest-scored member. Equal scores are broken
    /// by member byte order. Must be atomic across concurrent callers.
    async fn scored_pop_min(&self, key: &str) -> Result<Option<String>>;

    /// Members with `min <= score <= max`, lowest score first.
    async fn scored_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>>;

    /// Returns whether the member was present.
    async fn scored_remove(&self, key: &str, member: &str) -> Result<bool>;

    async fn scored_cardinality(&self, key: &str) -> Result<usize>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Returns whether the field was present.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hash_length(&self, key: &str) -> Result<usize>;

    /// Drop a key of either shape.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Round-trip to the backing store.
    async fn ping(&self) -> Result<()>;
}
