//! Store abstraction for job queue persistence and coordination.
//!
//! The queue needs nothing more than single-key atomic operations on hashes,
//! sorted sets, sets and lists. Every cross-worker interaction goes through
//! one of these calls; no multi-key transaction is assumed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

/// Store trait for the primitive operations the queue is built on.
///
/// Implementations must be thread-safe (Send + Sync) and each method must be
/// atomic with respect to the single key it touches.
#[async_trait]
pub trait Store: Send + Sync {
    // ========== Hash Operations ==========

    /// Set one field of a hash.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Set several fields of a hash in one call.
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Get one field of a hash.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Get every field of a hash. Empty when the key does not exist.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Atomically increment an integer hash field, returning the new value.
    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64>;

    // ========== Key Operations ==========

    /// Delete keys. Missing keys are ignored.
    async fn del(&self, keys: &[String]) -> Result<()>;

    // ========== Set Operations ==========

    /// Add a member to a set.
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set.
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    // ========== Sorted Set Operations ==========

    /// Add or re-score a sorted set member.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()>;

    /// Remove a member, returning how many members were removed (0 or 1).
    async fn zrem(&self, key: &str, member: &str) -> Result<usize>;

    /// Members with score <= `max`, highest score first, at most `limit`.
    async fn zrevrangebyscore(&self, key: &str, max: i64, limit: usize) -> Result<Vec<String>>;

    /// Every member in ascending score order.
    async fn zrange_all(&self, key: &str) -> Result<Vec<String>>;

    /// Number of members.
    async fn zcard(&self, key: &str) -> Result<usize>;

    // ========== List Operations ==========

    /// Push to the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> Result<()>;

    /// Push to the tail of a list.
    async fn rpush(&self, key: &str, value: &str) -> Result<()>;

    /// Range of a list, inclusive, negative indexes count from the tail.
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
}

/// A type-erased store that can be shared across threads.
pub type DynStore = Arc<dyn Store>;

/// Wrapper around Arc<dyn Store> for convenience.
#[derive(Clone)]
pub struct SharedStore {
    inner: DynStore,
}

impl SharedStore {
    /// Create a new SharedStore from any Store implementation.
    pub fn new<S: Store + 'static>(store: S) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Get a reference to the inner store.
    pub fn inner(&self) -> &DynStore {
        &self.inner
    }
}

impl From<DynStore> for SharedStore {
    fn from(inner: DynStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Store for SharedStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.inner.hset(key, field, value).await
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.inner.hset_multiple(key, fields).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.inner.hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.inner.hgetall(key).await
    }

    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        self.inner.hincr(key, field, by).await
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        self.inner.del(keys).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.inner.sadd(key, member).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.inner.smembers(key).await
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        self.inner.zadd(key, member, score).await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<usize> {
        self.inner.zrem(key, member).await
    }

    async fn zrevrangebyscore(&self, key: &str, max: i64, limit: usize) -> Result<Vec<String>> {
        self.inner.zrevrangebyscore(key, max, limit).await
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        self.inner.zrange_all(key).await
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        self.inner.zcard(key).await
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.inner.lpush(key, value).await
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        self.inner.rpush(key, value).await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.inner.lrange(key, start, stop).await
    }
}
