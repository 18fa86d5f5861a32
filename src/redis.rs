use crate::store::KeyValueStore;
use anyhow::Context;
use redis::{aio::ConnectionManager, AsyncCommands};

/// Open a multiplexed connection to the redis server at `addr`. The returned manager is cheap to
/// clone and reconnects by itself, so one handle can be shared by the whole process.
pub async fn connect(addr: &str) -> anyhow::Result<ConnectionManager> {
    let client =
        redis::Client::open(addr).with_context(|| format!("invalid redis address `{addr}`"))?;
    client
        .get_connection_manager()
        .await
        .with_context(|| format!("fail to connect to redis at `{addr}`"))
}

#[async_trait::async_trait]
impl KeyValueStore for ConnectionManager {
    async fn incr(&mut self, key: &str) -> anyhow::Result<i64> {
        AsyncCommands::incr(self, key, 1)
            .await
            .with_context(|| format!("fail to make INCR request to redis for `{key}`"))
    }

    async fn get(&mut self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        AsyncCommands::get(self, key)
            .await
            .with_context(|| format!("fail to make GET request to redis for `{key}`"))
    }

    async fn set_ex(&mut self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        AsyncCommands::set_ex(self, key, value, ttl_secs)
            .await
            .with_context(|| format!("fail to make SETEX request to redis for `{key}`"))
    }
}

#[tokio::test]
#[ignore = "require a running redis server at $REDIS_ADDR"]
async fn test_redis_store() {
    let addr = std::env::var("REDIS_ADDR").unwrap_or_else(|_| "redis://localhost:6379".into());
    let mut conn = connect(&addr).await.unwrap();

    let key = format!("web-cache-test:{}", std::process::id());
    let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await.unwrap();

    assert_eq!(KeyValueStore::get(&mut conn, &key).await.unwrap(), None);
    KeyValueStore::set_ex(&mut conn, &key, "41", 10).await.unwrap();
    assert_eq!(KeyValueStore::incr(&mut conn, &key).await.unwrap(), 42);
    assert_eq!(
        KeyValueStore::get(&mut conn, &key).await.unwrap(),
        Some(b"42".to_vec())
    );

    let ttl: i64 = redis::cmd("TTL").arg(&key).query_async(&mut conn).await.unwrap();
    assert!(ttl > 0 && ttl <= 10);

    let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await.unwrap();
}
