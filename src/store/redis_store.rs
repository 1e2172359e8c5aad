use super::Store;
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;

/// Redis-backed store for queues shared by several processes.
///
/// `ZPOPMIN` is atomic on the server, so two engines never pop the same
/// waiting job. Everything after the pop is separate commands, which makes
/// dispatch at-least-once.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

fn score_arg(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `redis_url`
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| Error::Store(format!("Failed to create Redis client: {}", e)))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Store(format!("Failed to connect to Redis: {}", e)))?;

        log::info!("Connected to Redis store");
        Ok(Self { connection })
    }

    pub fn with_connection(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn scored_insert(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let _: () = redis::cmd("ZADD")
            .arg(key)
            .arg(score_arg(score))
            .arg(member)
            .exec_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn scored_pop_min(&self, key: &str) -> Result<Option<String>> {
        // Reply is a flat [member, score] pair, or empty.
        let popped: Vec<String> = redis::cmd("ZPOPMIN")
            .arg(key)
            .arg(1)
            .query_async(&mut self.conn())
            .await?;
        Ok(popped.into_iter().next())
    }

    async fn scored_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let members: Vec<String> = self
            .conn()
            .zrangebyscore(key, score_arg(min), score_arg(max))
            .await?;
        Ok(members)
    }

    async fn scored_remove(&self, key: &str, member: &str) -> Result<bool> {
        let removed: usize = self.conn().zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn scored_cardinality(&self, key: &str) -> Result<usize> {
        let size: usize = self.conn().zcard(key).await?;
        Ok(size)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let _: () = self.conn().hset(key, field, value).await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn().hget(key, field).await?;
        Ok(value)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        let removed: usize = self.conn().hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let all: HashMap<String, String> = self.conn().hgetall(key).await?;
        Ok(all)
    }

    async fn hash_length(&self, key: &str) -> Result<usize> {
        let size: usize = self.conn().hlen(key).await?;
        Ok(size)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _: () = redis::cmd("DEL")
            .arg(key)
            .exec_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let reply: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(Error::Store(format!("Unexpected PING reply: {}", reply)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_scores_use_redis_syntax() {
        assert_eq!(score_arg(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_arg(f64::INFINITY), "+inf");
        assert_eq!(score_arg(-3.0), "-3");
        assert_eq!(score_arg(1700000000123.0), "1700000000123");
    }
}
