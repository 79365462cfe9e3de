//! Shared key-value store.
//!
//! Workers on different machines coordinate through this keyspace (queues,
//! worker status, sessions, processing markers), so the production
//! implementation is Redis. The in-memory implementation backs tests and
//! single-process development.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::{Result, StoreError};

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Append to the tail of a list.
    async fn list_push_back(&self, key: &str, value: &str) -> Result<()>;
    /// Read up to `count` entries from the head without removing them.
    async fn list_front(&self, key: &str, count: usize) -> Result<Vec<String>>;
    /// Remove all occurrences of `value`. Returns how many were removed.
    async fn list_remove(&self, key: &str, value: &str) -> Result<usize>;
    async fn list_len(&self, key: &str) -> Result<usize>;
}

// =============================================================================
// Redis
// =============================================================================

pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
}

impl RedisKv {
    /// Connect and verify the server responds. Failure here is fatal to boot.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(StoreError::from)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(StoreError::from)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                    .await?
            }
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn list_push_back(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn list_front(&self, key: &str, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, 0, count as isize - 1).await?)
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.lrem(key, 0, value).await?)
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key).await?)
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    values: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, Vec<String>>,
}

impl MemoryInner {
    fn live_value(&mut self, key: &str) -> Option<String> {
        match self.values.get(key) {
            Some((_, Some(expiry))) if *expiry <= Instant::now() => {
                self.values.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

/// In-process stand-in for Redis with the same observable semantics,
/// TTL expiry included.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<MemoryInner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expiry = ttl.map(|ttl| Instant::now() + ttl);
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        inner
            .values
            .insert(key.to_string(), (value.to_string(), expiry));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        Ok(inner.live_value(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        inner.values.remove(key);
        inner.lists.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        Ok(inner.live_value(key).is_some() || inner.lists.contains_key(key))
    }

    async fn list_push_back(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    async fn list_front(&self, key: &str, count: usize) -> Result<Vec<String>> {
        let inner = self.inner.lock().expect("kv lock poisoned");
        Ok(inner
            .lists
            .get(key)
            .map(|list| list.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<usize> {
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        let Some(list) = inner.lists.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|entry| entry != value);
        Ok(before - list.len())
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let inner = self.inner.lock().expect("kv lock poisoned");
        Ok(inner.lists.get(key).map(Vec::len).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_kv_honors_ttl() {
        let kv = MemoryKv::new();
        kv.set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_kv_lists_are_fifo() {
        let kv = MemoryKv::new();
        kv.list_push_back("list", "a").await.unwrap();
        kv.list_push_back("list", "b").await.unwrap();
        kv.list_push_back("list", "c").await.unwrap();

        assert_eq!(kv.list_front("list", 2).await.unwrap(), vec!["a", "b"]);
        assert_eq!(kv.list_len("list").await.unwrap(), 3);

        assert_eq!(kv.list_remove("list", "b").await.unwrap(), 1);
        assert_eq!(kv.list_front("list", 10).await.unwrap(), vec!["a", "c"]);
    }
}
