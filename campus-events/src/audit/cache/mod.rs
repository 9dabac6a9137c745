//! Hot cache tier
//!
//! Short-lived staging area for audit records that are not durable yet.
//! A backend stores each serialized record under its own key with an expiry
//! and keeps a time-ordered index of keys (score = ingestion time in epoch
//! milliseconds) so the flush worker can fetch records by age.
//!
//! # Available Backends
//!
//! - **Memory** (always): [`MemoryHotCache`], used by tests and single-node setups
//! - **Redis** (`cache` feature): [`RedisHotCache`], `SET EX` + sorted-set index

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

mod memory;
#[cfg(feature = "cache")]
mod redis;

pub use memory::MemoryHotCache;
#[cfg(feature = "cache")]
pub use self::redis::RedisHotCache;

/// Key/value store with TTL plus an ordered index of keys
///
/// Connection-level failures must be reported as
/// [`Error::CacheUnavailable`](crate::error::Error::CacheUnavailable) so the
/// recorder can fall back to direct persistent writes.
#[async_trait]
pub trait HotCache: Send + Sync {
    /// Store `payload` under `key` with `ttl`, and index `key` at `score`
    ///
    /// Value and index entry are written together.
    async fn put(&self, key: &str, payload: &str, ttl: Duration, score: i64) -> Result<()>;

    /// Keys whose score is at most `max_score`, oldest first
    async fn due(&self, max_score: i64, offset: usize, limit: usize) -> Result<Vec<String>>;

    /// Read a staged payload; `None` if the key expired or never existed
    async fn fetch(&self, key: &str) -> Result<Option<String>>;

    /// Delete the value and its index entry
    async fn remove(&self, key: &str) -> Result<()>;

    /// Number of indexed keys
    async fn len(&self) -> Result<usize>;
}
