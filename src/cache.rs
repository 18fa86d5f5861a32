use anyhow::Context;
use std::time::Duration;
use tracing::debug;

use crate::fetcher::Fetch;
use crate::store::KeyValueStore;

const COUNT_PREFIX_KEY: &str = "count";
const CACHED_PREFIX_KEY: &str = "cached";

/// Time to live of a cache entry when none is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

pub fn count_key(identifier: &str) -> String {
    format!("{COUNT_PREFIX_KEY}:{identifier}")
}

pub fn cached_key(identifier: &str) -> String {
    format!("{CACHED_PREFIX_KEY}:{identifier}")
}

/// Caching decorator over a [`Fetch`] implementation.
///
/// Every call bumps `count:<identifier>` in the store, then serves `cached:<identifier>` when it
/// is present. On a miss the inner fetcher runs and its result is written back with the TTL.
/// Concurrent misses on the same identifier are not merged: each of them fetches and the last
/// write wins.
#[derive(typed_builder::TypedBuilder, Debug, Clone)]
pub struct CachedFetcher<S, F> {
    store: S,
    fetcher: F,
    #[builder(default = DEFAULT_TTL)]
    ttl: Duration,
}

impl<S, F> CachedFetcher<S, F>
where
    S: KeyValueStore + Clone + Send + Sync,
    F: Fetch + Send + Sync,
{
    pub fn new(store: S, fetcher: F) -> Self {
        Self::builder().store(store).fetcher(fetcher).build()
    }

    pub async fn get_cached(&self, identifier: &str) -> anyhow::Result<String> {
        let mut store = self.store.clone();

        let count = store.incr(&count_key(identifier)).await?;

        let key = cached_key(identifier);
        if let Some(raw) = store.get(&key).await? {
            debug!("cache hit for `{identifier}` (access #{count})");
            return String::from_utf8(raw)
                .with_context(|| format!("cached value of `{identifier}` is not valid utf-8"));
        }

        debug!("cache miss for `{identifier}` (access #{count}), fetching");
        let content = self.fetcher.fetch(identifier).await?;

        store.set_ex(&key, &content, self.ttl_secs()).await?;
        debug!("cached `{identifier}` for {}s", self.ttl_secs());

        Ok(content)
    }

    /// Read the access counter of `identifier` without bumping it.
    pub async fn access_count(&self, identifier: &str) -> anyhow::Result<u64> {
        let mut store = self.store.clone();
        let Some(raw) = store.get(&count_key(identifier)).await? else {
            return Ok(0);
        };

        std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| anyhow::anyhow!("access counter of `{identifier}` is not an integer"))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // SETEX takes whole seconds and rejects zero, so partial seconds round up
    fn ttl_secs(&self) -> u64 {
        let secs = self.ttl.as_millis().div_ceil(1000).max(1);
        u64::try_from(secs).unwrap_or(u64::MAX)
    }
}

#[async_trait::async_trait]
impl<S, F> Fetch for CachedFetcher<S, F>
where
    S: KeyValueStore + Clone + Send + Sync,
    F: Fetch + Send + Sync,
{
    async fn fetch(&self, identifier: &str) -> anyhow::Result<String> {
        self.get_cached(identifier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fetcher::FetchExt, store::MemoryStore};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Fetcher that returns `<html>A</html>`, `<html>B</html>`, ... and counts its calls.
    #[derive(Clone, Default)]
    struct CountingFetcher {
        calls: Arc<AtomicUsize>,
    }

    impl CountingFetcher {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Fetch for CountingFetcher {
        async fn fetch(&self, _identifier: &str) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let page = char::from(b'A' + (n % 26) as u8);
            Ok(format!("<html>{page}</html>"))
        }
    }

    struct FailingFetcher;

    #[async_trait::async_trait]
    impl Fetch for FailingFetcher {
        async fn fetch(&self, identifier: &str) -> anyhow::Result<String> {
            anyhow::bail!("connection refused: {identifier}")
        }
    }

    /// A store whose every command fails, standing in for an unreachable server.
    #[derive(Clone)]
    struct DownStore;

    #[async_trait::async_trait]
    impl KeyValueStore for DownStore {
        async fn incr(&mut self, _key: &str) -> anyhow::Result<i64> {
            anyhow::bail!("store unavailable")
        }

        async fn get(&mut self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            anyhow::bail!("store unavailable")
        }

        async fn set_ex(&mut self, _key: &str, _value: &str, _ttl_secs: u64) -> anyhow::Result<()> {
            anyhow::bail!("store unavailable")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_example_page_scenario() {
        let fetcher = CountingFetcher::default();
        let cache = CachedFetcher::new(MemoryStore::new(), fetcher.clone());
        let url = "http://example.com";

        assert_eq!(cache.access_count(url).await.unwrap(), 0);

        assert_eq!(cache.get_cached(url).await.unwrap(), "<html>A</html>");
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.access_count(url).await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get_cached(url).await.unwrap(), "<html>A</html>");
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.access_count(url).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get_cached(url).await.unwrap(), "<html>B</html>");
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(cache.access_count(url).await.unwrap(), 3);

        // the refreshed entry is served again
        assert_eq!(cache.get_cached(url).await.unwrap(), "<html>B</html>");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_counter_counts_every_call() {
        let fetcher = CountingFetcher::default();
        let cache = CachedFetcher::new(MemoryStore::new(), fetcher.clone());

        for _ in 0..7 {
            cache.get_cached("a").await.unwrap();
        }
        cache.get_cached("b").await.unwrap();

        assert_eq!(cache.access_count("a").await.unwrap(), 7);
        assert_eq!(cache.access_count("b").await.unwrap(), 1);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_has_no_expiry() {
        let mut store = MemoryStore::new();
        let cache = CachedFetcher::new(store.clone(), CountingFetcher::default());
        cache.get_cached("a").await.unwrap();

        tokio::time::advance(Duration::from_secs(3600)).await;

        assert_eq!(store.get("count:a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("cached:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let store = MemoryStore::new();
        let cache = CachedFetcher::new(store.clone(), FailingFetcher);

        let err = cache.get_cached("http://down.example").await.unwrap_err();
        assert_eq!(err.to_string(), "connection refused: http://down.example");

        // the counter is not rolled back, and nothing else is written
        assert_eq!(cache.access_count("http://down.example").await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_store_error_skips_fetch() {
        let fetcher = CountingFetcher::default();
        let cache = CachedFetcher::new(DownStore, fetcher.clone());

        let err = cache.get_cached("a").await.unwrap_err();
        assert_eq!(err.to_string(), "store unavailable");
        assert_eq!(fetcher.calls(), 0);
    }

    /// A store that always holds the same raw bytes under every key.
    #[derive(Clone)]
    struct FixedStore(Vec<u8>);

    #[async_trait::async_trait]
    impl KeyValueStore for FixedStore {
        async fn incr(&mut self, _key: &str) -> anyhow::Result<i64> {
            Ok(1)
        }

        async fn get(&mut self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(Some(self.0.clone()))
        }

        async fn set_ex(&mut self, _key: &str, _value: &str, _ttl_secs: u64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_non_utf8_cached_value() {
        let fetcher = CountingFetcher::default();
        let cache = CachedFetcher::new(FixedStore(vec![0xff, 0xfe]), fetcher.clone());

        let err = cache.get_cached("a").await.unwrap_err();
        assert!(err.to_string().contains("not valid utf-8"));
        assert_eq!(fetcher.calls(), 0);

        let err = cache.access_count("a").await.unwrap_err();
        assert!(err.to_string().contains("not an integer"));
    }

    #[tokio::test]
    async fn test_empty_content_is_a_hit() {
        let fetcher = CountingFetcher::default();
        let store = MemoryStore::new();
        let mut planted = store.clone();
        planted.set_ex("cached:empty", "", 10).await.unwrap();

        let cache = CachedFetcher::new(store, fetcher.clone());
        assert_eq!(cache.get_cached("empty").await.unwrap(), "");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_with_custom_ttl() {
        let fetcher = CountingFetcher::default();
        let cache = fetcher.clone().cached(MemoryStore::new(), Duration::from_secs(60));
        assert_eq!(cache.ttl(), Duration::from_secs(60));

        cache.get_cached("a").await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.get_cached("a").await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        cache.get_cached("a").await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_cached_fetcher_is_a_fetcher() {
        let fetcher = CountingFetcher::default();
        let cache = CachedFetcher::new(MemoryStore::new(), fetcher.clone());

        let as_fetch: &(dyn Fetch + Send + Sync) = &cache;
        assert_eq!(as_fetch.fetch("x").await.unwrap(), "<html>A</html>");
        assert_eq!(as_fetch.fetch("x").await.unwrap(), "<html>A</html>");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls() {
        let fetcher = CountingFetcher::default();
        let cache = Arc::new(CachedFetcher::new(MemoryStore::new(), fetcher.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_cached("shared").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // misses may race, but every call is counted
        assert_eq!(cache.access_count("shared").await.unwrap(), 16);
        assert!(fetcher.calls() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_ttl_rounds_up() {
        let fetcher = CountingFetcher::default();
        let cache = fetcher.clone().cached(MemoryStore::new(), Duration::from_millis(1500));

        cache.get_cached("a").await.unwrap();
        tokio::time::advance(Duration::from_millis(1200)).await;
        cache.get_cached("a").await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_millis(900)).await;
        cache.get_cached("a").await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_ttl_secs_rounding() {
        let with_ttl = |ttl: Duration| {
            CachedFetcher::builder()
                .store(MemoryStore::new())
                .fetcher(CountingFetcher::default())
                .ttl(ttl)
                .build()
                .ttl_secs()
        };

        assert_eq!(with_ttl(Duration::from_secs(10)), 10);
        assert_eq!(with_ttl(Duration::from_millis(1500)), 2);
        assert_eq!(with_ttl(Duration::from_millis(10_001)), 11);
        assert_eq!(with_ttl(Duration::from_millis(200)), 1);
        assert_eq!(with_ttl(Duration::ZERO), 1);
    }
}
