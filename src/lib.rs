//! Expiring cache for fetched web content, kept in redis.
//!
//! [`CachedFetcher`] wraps any [`Fetch`] implementation: every call counts an access under
//! `count:<identifier>` and serves `cached:<identifier>` while it lives, fetching and storing
//! a fresh copy otherwise.

pub mod cache;
pub mod config;
pub mod fetcher;
pub mod redis;
pub mod store;

#[cfg(feature = "reqwest")]
pub mod app;
#[cfg(feature = "reqwest")]
pub mod http;

pub use cache::{CachedFetcher, DEFAULT_TTL};
pub use config::Config;
pub use fetcher::{from_fn, Fetch, FetchExt, FetchFn};
pub use store::{KeyValueStore, MemoryStore};

#[cfg(feature = "reqwest")]
pub use {app::PageCache, http::HttpClient};
