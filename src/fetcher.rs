use std::future::Future;
use std::time::Duration;

use crate::cache::CachedFetcher;
use crate::store::KeyValueStore;

/// Anything that can turn an identifier into content. Implemented by the HTTP client, by plain
/// async closures through [`FetchFn`], and by [`CachedFetcher`] itself.
#[async_trait::async_trait]
pub trait Fetch {
    async fn fetch(&self, identifier: &str) -> anyhow::Result<String>;
}

/// Adapter for async closures taking the identifier by value.
#[derive(Debug, Clone)]
pub struct FetchFn<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> Fetch for FetchFn<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    async fn fetch(&self, identifier: &str) -> anyhow::Result<String> {
        (self.0)(identifier.to_string()).await
    }
}

pub fn from_fn<F, Fut>(f: F) -> FetchFn<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    FetchFn(f)
}

pub trait FetchExt: Fetch + Sized {
    /// Wrap this fetcher so that results are kept in `store` for `ttl`.
    fn cached<S>(self, store: S, ttl: Duration) -> CachedFetcher<S, Self>
    where
        S: KeyValueStore + Clone + Send + Sync,
    {
        CachedFetcher::builder()
            .store(store)
            .fetcher(self)
            .ttl(ttl)
            .build()
    }
}

impl<T: Fetch + Sized> FetchExt for T {}

#[tokio::test]
async fn test_fetch_fn() {
    let fetcher = from_fn(|url: String| async move { anyhow::Ok(format!("<html>{url}</html>")) });
    assert_eq!(fetcher.fetch("a").await.unwrap(), "<html>a</html>");
}
