//! Redis hot cache backend
//!
//! Values are plain string keys with `EX`; the index is a sorted set.
//! Writes go through a `MULTI`/`EXEC` pipeline so a value is never staged
//! without its index entry.

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::ops::DerefMut;
use std::time::Duration;

use super::HotCache;
use crate::error::{Error, Result};

/// Hot cache backed by a Redis connection pool
#[derive(Clone)]
pub struct RedisHotCache {
    pool: Pool,
    index_key: String,
}

impl RedisHotCache {
    /// Create a cache using `index_key` as the sorted-set index
    pub fn new(pool: Pool, index_key: impl Into<String>) -> Self {
        Self {
            pool,
            index_key: index_key.into(),
        }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::CacheUnavailable(format!("Failed to get Redis connection: {}", e)))
    }
}

/// Connection-level failures become `CacheUnavailable`; the rest keep their detail
fn classify(err: redis::RedisError) -> Error {
    if err.is_io_error() || err.is_timeout() || err.is_connection_refusal() || err.is_connection_dropped() {
        Error::CacheUnavailable(err.to_string())
    } else {
        Error::from(err)
    }
}

#[async_trait]
impl HotCache for RedisHotCache {
    async fn put(&self, key: &str, payload: &str, ttl: Duration, score: i64) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .set_ex(key, payload, ttl.as_secs().max(1))
            .ignore()
            .zadd(&self.index_key, key, score)
            .ignore()
            .query_async::<()>(conn.deref_mut())
            .await
            .map_err(classify)
    }

    async fn due(&self, max_score: i64, offset: usize, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        redis::cmd("ZRANGEBYSCORE")
            .arg(&self.index_key)
            .arg("-inf")
            .arg(max_score)
            .arg("LIMIT")
            .arg(offset)
            .arg(limit)
            .query_async::<Vec<String>>(conn.deref_mut())
            .await
            .map_err(classify)
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key).await.map_err(classify)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .zrem(&self.index_key, key)
            .ignore()
            .query_async::<()>(conn.deref_mut())
            .await
            .map_err(classify)
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        conn.zcard::<_, usize>(&self.index_key).await.map_err(classify)
    }
}
