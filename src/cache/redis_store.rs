//! Redis-backed store (feature `redis`).

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::backend::CacheStore;
use super::key::{CacheKey, Namespace};
use crate::{Error, ErrorContext, Result};

// GET and DEL run as one script so nothing can write in between.
const DELETE_IF_EQ: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| redis_error("open", None, e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| redis_error("connect", None, e))?;
        Ok(Self { conn })
    }
}

fn redis_error(op: &str, key: Option<&CacheKey>, err: redis::RedisError) -> Error {
    let mut ctx = ErrorContext::new()
        .with_details(err.to_string())
        .with_source("redis_store");
    if let Some(key) = key {
        ctx = ctx.with_field_path(key.encode());
    }
    Error::store_unavailable(format!("redis {} failed", op), ctx)
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .get(key.encode())
            .await
            .map_err(|e| redis_error("GET", Some(key), e))?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key.encode(), value.as_ref(), ttl_secs(ttl))
            .await
            .map_err(|e| redis_error("SET", Some(key), e))?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(key.encode())
            .await
            .map_err(|e| redis_error("DEL", Some(key), e))?;
        Ok(removed > 0)
    }

    async fn delete_if_eq(&self, key: &CacheKey, expected: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::Script::new(DELETE_IF_EQ)
            .key(key.encode())
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_error("EVALSHA", Some(key), e))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.conn.clone();
        let found: bool = conn
            .exists(key.encode())
            .await
            .map_err(|e| redis_error("EXISTS", Some(key), e))?;
        Ok(found)
    }

    async fn incr(&self, key: &CacheKey, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        let encoded = key.encode();
        // MULTI/EXEC keeps INCR and EXPIRE together; the key embeds the window,
        // so refreshing the expiry on every hit never extends a window.
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(&encoded, 1)
            .expire(&encoded, ttl_secs(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("INCR", Some(key), e))?;
        Ok(count)
    }

    async fn scan(&self, namespace: Namespace) -> Result<Vec<CacheKey>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", namespace.prefix());
        let mut raw = Vec::new();
        {
            let mut iter: redis::AsyncIter<String> = conn
                .scan_match(&pattern)
                .await
                .map_err(|e| redis_error("SCAN", None, e))?;
            while let Some(key) = iter.next_item().await {
                raw.push(key);
            }
        }
        let mut keys: Vec<CacheKey> = raw
            .iter()
            .filter_map(|k| CacheKey::parse(k).ok())
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
