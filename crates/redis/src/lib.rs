//! Redis store for the kue job queue.
//!
//! Every `Store` call maps to one Redis command, so the single-key atomicity
//! the queue relies on is exactly what the server provides.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kue_core::{Queue, QueueConfig};
//! use kue_redis::RedisStore;
//!
//! #[tokio::main]
//! async fn main() -> kue_core::Result<()> {
//!     let store = RedisStore::new("redis://localhost").await?;
//!     let queue = Queue::new(QueueConfig::default(), store);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use kue_core::{KueError, Result, Store};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;

/// Store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `redis_url`.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| KueError::Store(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| KueError::Store(e.to_string()))?;
        tracing::debug!(url = %redis_url, "Connected to Redis");
        Ok(Self { conn })
    }

    /// Create a store over an existing connection manager.
    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| KueError::Store(e.to_string()))?;
        Ok(())
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(|e| KueError::Store(e.to_string()))?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.hget(key, field)
            .await
            .map_err(|e| KueError::Store(e.to_string()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall(key)
            .await
            .map_err(|e| KueError::Store(e.to_string()))
    }

    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.hincr(key, field, by)
            .await
            .map_err(|e| KueError::Store(e.to_string()))
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys)
            .await
            .map_err(|e| KueError::Store(e.to_string()))?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member)
            .await
            .map_err(|e| KueError::Store(e.to_string()))?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(key)
            .await
            .map_err(|e| KueError::Store(e.to_string()))
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score)
            .await
            .map_err(|e| KueError::Store(e.to_string()))?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        conn.zrem(key, member)
            .await
            .map_err(|e| KueError::Store(e.to_string()))
    }

    async fn zrevrangebyscore(&self, key: &str, max: i64, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.zrevrangebyscore_limit(key, max, "-inf", 0, limit as isize)
            .await
            .map_err(|e| KueError::Store(e.to_string()))
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.zrange(key, 0, -1)
            .await
            .map_err(|e| KueError::Store(e.to_string()))
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        conn.zcard(key)
            .await
            .map_err(|e| KueError::Store(e.to_string()))
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(key, value)
            .await
            .map_err(|e| KueError::Store(e.to_string()))?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(key, value)
            .await
            .map_err(|e| KueError::Store(e.to_string()))?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.lrange(key, start, stop)
            .await
            .map_err(|e| KueError::Store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_store_error() {
        let result = RedisStore::new("not a url").await;
        assert!(matches!(result, Err(KueError::Store(_))));
    }
}

// ========== Integration Tests (require Redis) ==========
