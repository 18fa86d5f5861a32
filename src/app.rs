use redis::aio::ConnectionManager;

use crate::cache::CachedFetcher;
use crate::config::Config;
use crate::http::HttpClient;

/// Web pages cached in redis.
pub type PageCache = CachedFetcher<ConnectionManager, HttpClient>;

impl PageCache {
    /// Connect to the configured redis server and build the HTTP client. The connection manager
    /// is the one client handle shared by every call made through the returned cache.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let store = crate::redis::connect(&config.redis_addr).await?;
        let requester = HttpClient::new(config.request_timeout())?;

        tracing::info!(
            "page cache ready on {} with a {}s ttl",
            config.redis_addr,
            config.ttl_secs
        );

        Ok(Self::builder()
            .store(store)
            .fetcher(requester)
            .ttl(config.ttl())
            .build())
    }

    /// Fetch the page at `url`, served from redis while the cached copy is fresh.
    pub async fn get_page(&self, url: &str) -> anyhow::Result<String> {
        self.get_cached(url).await
    }
}

#[tokio::test]
#[ignore = "require a running redis server at $REDIS_ADDR and network access"]
async fn test_get_page() {
    let config = Config {
        redis_addr: std::env::var("REDIS_ADDR").unwrap_or_else(|_| "redis://localhost:6379".into()),
        ..Config::default()
    };
    let cache = PageCache::connect(&config).await.unwrap();

    let url = "http://example.com";
    let before = cache.access_count(url).await.unwrap();
    let first = cache.get_page(url).await.unwrap();
    let second = cache.get_page(url).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(cache.access_count(url).await.unwrap(), before + 2);
}
