use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The three commands the cache needs from a key-value store. Every command must be atomic on
/// the store side, the wrapper itself never locks anything.
#[async_trait::async_trait]
pub trait KeyValueStore {
    /// Increment the integer stored at `key` by one and return the new value. A missing key
    /// counts as zero.
    async fn incr(&mut self, key: &str) -> anyhow::Result<i64>;

    /// Read the raw bytes stored at `key`, or `None` when the key is absent or expired.
    async fn get(&mut self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Store `value` at `key`, expiring it `ttl_secs` seconds from now.
    async fn set_ex(&mut self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()>;
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expire_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expire_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process store. Clones share the same map, so a single `MemoryStore` behaves like one
/// shared client handle. Expiry follows the tokio clock.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let mut map = self.inner.lock().await;
        map.retain(|_, entry| !entry.is_expired());
        map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn incr(&mut self, key: &str) -> anyhow::Result<i64> {
        let mut map = self.inner.lock().await;

        let current = match map.get(key) {
            Some(entry) if !entry.is_expired() => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| anyhow::anyhow!("value at `{key}` is not an integer"))?,
            _ => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("increment of `{key}` would overflow"))?;

        // INCR keeps the remaining time to live of an existing key
        let expire_at = map
            .get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| entry.expire_at);
        map.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expire_at,
            },
        );

        Ok(next)
    }

    async fn get(&mut self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut map = self.inner.lock().await;
        match map.get(key) {
            Some(entry) if entry.is_expired() => {
                map.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&mut self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        if ttl_secs == 0 {
            anyhow::bail!("invalid expire time in set_ex for `{key}`");
        }

        let mut map = self.inner.lock().await;
        map.insert(
            key.to_string(),
            Entry {
                value: value.as_bytes().to_vec(),
                expire_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }
}

#[tokio::test]
async fn test_memory_store_incr() {
    let mut store = MemoryStore::new();
    assert_eq!(store.incr("count:a").await.unwrap(), 1);
    assert_eq!(store.incr("count:a").await.unwrap(), 2);
    assert_eq!(store.incr("count:b").await.unwrap(), 1);
    assert_eq!(store.get("count:a").await.unwrap(), Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_memory_store_incr_rejects_text() {
    let mut store = MemoryStore::new();
    store.set_ex("k", "not a number", 10).await.unwrap();
    assert!(store.incr("k").await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_memory_store_expiry() {
    let mut store = MemoryStore::new();
    store.set_ex("cached:a", "hello", 10).await.unwrap();

    tokio::time::advance(Duration::from_secs(9)).await;
    assert_eq!(store.get("cached:a").await.unwrap(), Some(b"hello".to_vec()));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(store.get("cached:a").await.unwrap(), None);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_memory_store_clones_share_state() {
    let mut a = MemoryStore::new();
    let mut b = a.clone();
    a.set_ex("k", "v", 10).await.unwrap();
    assert_eq!(b.get("k").await.unwrap(), Some(b"v".to_vec()));
    assert_eq!(a.len().await, 1);
}
