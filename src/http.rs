use anyhow::Context;
use std::ops::Deref;
use std::time::Duration;

use crate::fetcher::Fetch;

/// A wrapper for re-using the reqwest client.
#[derive(Debug, Clone)]
pub struct HttpClient(reqwest::Client);

impl Deref for HttpClient {
    type Target = reqwest::Client;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl HttpClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "fail to build http client")?;
        Ok(Self(client))
    }

    /// Make a GET request to the given URL and return the response body as text. The status code
    /// is not checked: an error page is still content.
    #[inline]
    pub async fn fetch_text(&self, url: &str) -> anyhow::Result<String> {
        self.get(url)
            .send()
            .await
            .with_context(|| format!("fail to send GET request to url: `{}`", url))?
            .text()
            .await
            .with_context(|| format!("fail to read response body from url: `{}`", url))
    }
}

#[async_trait::async_trait]
impl Fetch for HttpClient {
    async fn fetch(&self, identifier: &str) -> anyhow::Result<String> {
        self.fetch_text(identifier).await
    }
}

#[tokio::test]
async fn test_invalid_url() {
    let client = HttpClient::new(Duration::from_secs(5)).unwrap();
    let err = client.fetch("not a url").await.unwrap_err();
    assert!(err.to_string().contains("not a url"));
}

#[tokio::test]
#[ignore = "require network access"]
async fn test_fetch_example_page() {
    let client = HttpClient::new(Duration::from_secs(30)).unwrap();
    let page = client.fetch("http://example.com").await.unwrap();
    assert!(page.contains("Example Domain"));
}
