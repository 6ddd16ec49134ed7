//! In-process store.
//!
//! Keeps every structure behind a single lock so each call is atomic, which
//! is the same guarantee a Redis server gives for single-key commands. Useful
//! for tests and for deployments where all workers share one process.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{KueError, Result};
use crate::store::Store;

#[derive(Default)]
struct Data {
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, HashMap<String, i64>>,
    lists: HashMap<String, VecDeque<String>>,
}

impl Data {
    /// Members of a sorted set ordered by (score, member) ascending.
    fn sorted(&self, key: &str) -> Vec<(i64, String)> {
        let mut members: Vec<(i64, String)> = self
            .zsets
            .get(key)
            .map(|z| z.iter().map(|(m, s)| (*s, m.clone())).collect())
            .unwrap_or_default();
        members.sort();
        members
    }
}

/// Store backed by process memory. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Data>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        data.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut data = self.data.lock().await;
        let hash = data.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let data = self.data.lock().await;
        Ok(data.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let data = self.data.lock().await;
        Ok(data.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        let mut data = self.data.lock().await;
        let hash = data.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(v) => v
                .parse::<i64>()
                .map_err(|_| KueError::Store(format!("hash value is not an integer: {}", v)))?,
            None => 0,
        };
        let next = current + by;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        let mut data = self.data.lock().await;
        for key in keys {
            data.hashes.remove(key);
            data.sets.remove(key);
            data.zsets.remove(key);
            data.lists.remove(key);
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        data.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let data = self.data.lock().await;
        Ok(data
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut data = self.data.lock().await;
        data.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<usize> {
        let mut data = self.data.lock().await;
        let Some(zset) = data.zsets.get_mut(key) else {
            return Ok(0);
        };
        let removed = zset.remove(member).is_some();
        if zset.is_empty() {
            data.zsets.remove(key);
        }
        Ok(usize::from(removed))
    }

    async fn zrevrangebyscore(&self, key: &str, max: i64, limit: usize) -> Result<Vec<String>> {
        let data = self.data.lock().await;
        Ok(data
            .sorted(key)
            .into_iter()
            .rev()
            .filter(|(score, _)| *score <= max)
            .take(limit)
            .map(|(_, member)| member)
            .collect())
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        let data = self.data.lock().await;
        Ok(data.sorted(key).into_iter().map(|(_, m)| m).collect())
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let data = self.data.lock().await;
        Ok(data.zsets.get(key).map(|z| z.len()).unwrap_or(0))
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        data.lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        data.lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let data = self.data.lock().await;
        let Some(list) = data.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_roundtrip() {
        let store = MemoryStore::new();
        store.hset("h", "a", "1").await.unwrap();
        store
            .hset_multiple("h", &[("b".to_string(), "2".to_string())])
            .await
            .unwrap();

        assert_eq!(store.hget("h", "a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.hget("h", "missing").await.unwrap(), None);
        let all = store.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["b"], "2");
        assert!(store.hgetall("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hincr() {
        let store = MemoryStore::new();
        assert_eq!(store.hincr("h", "n", 1).await.unwrap(), 1);
        assert_eq!(store.hincr("h", "n", 5).await.unwrap(), 6);

        store.hset("h", "s", "text").await.unwrap();
        assert!(matches!(
            store.hincr("h", "s", 1).await,
            Err(KueError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_zrevrangebyscore_orders_and_bounds() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 10).await.unwrap();
        store.zadd("z", "b", 20).await.unwrap();
        store.zadd("z", "c", 30).await.unwrap();

        assert_eq!(store.zrevrangebyscore("z", 25, 1).await.unwrap(), vec!["b"]);
        assert_eq!(
            store.zrevrangebyscore("z", 100, 10).await.unwrap(),
            vec!["c", "b", "a"]
        );
        assert!(store.zrevrangebyscore("z", 5, 1).await.unwrap().is_empty());
        assert_eq!(store.zrange_all("z").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_zrem_reports_removed_count() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 1).await.unwrap();
        assert_eq!(store.zrem("z", "a").await.unwrap(), 1);
        assert_eq!(store.zrem("z", "a").await.unwrap(), 0);
        assert_eq!(store.zrem("missing", "a").await.unwrap(), 0);
        assert_eq!(store.zcard("z").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zadd_rescores_existing_member() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 1).await.unwrap();
        store.zadd("z", "a", 50).await.unwrap();
        assert_eq!(store.zcard("z").await.unwrap(), 1);
        assert!(store.zrevrangebyscore("z", 10, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lists() {
        let store = MemoryStore::new();
        store.rpush("l", "b").await.unwrap();
        store.rpush("l", "c").await.unwrap();
        store.lpush("l", "a").await.unwrap();

        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.lrange("l", 1, 1).await.unwrap(), vec!["b"]);
        assert_eq!(store.lrange("l", -2, -1).await.unwrap(), vec!["b", "c"]);
        assert_eq!(store.lrange("l", 0, 100).await.unwrap(), vec!["a", "b", "c"]);
        assert!(store.lrange("l", 5, 10).await.unwrap().is_empty());
        assert!(store.lrange("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sets_and_del() {
        let store = MemoryStore::new();
        store.sadd("s", "x").await.unwrap();
        store.sadd("s", "x").await.unwrap();
        store.sadd("s", "y").await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap(), vec!["x", "y"]);

        store.hset("h", "f", "v").await.unwrap();
        store
            .del(&["s".to_string(), "h".to_string(), "none".to_string()])
            .await
            .unwrap();
        assert!(store.smembers("s").await.unwrap().is_empty());
        assert!(store.hgetall("h").await.unwrap().is_empty());
    }
}
