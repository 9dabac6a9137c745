//! Staging of audit records into the hot cache

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::cache::HotCache;
use super::config::HotCacheConfig;
use super::record::AuditRecord;
use crate::error::{Error, Result};

/// Disambiguates records staged within the same microsecond
static STAGE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Writes serialized records into the hot cache
///
/// Each record gets a unique key `{prefix}:{actor}:{ACTION}:{micros}-{seq}`
/// and an index entry scored by ingestion time.
#[derive(Clone)]
pub struct HotCacheBuffer {
    cache: Arc<dyn HotCache>,
    config: HotCacheConfig,
}

impl HotCacheBuffer {
    /// Create a buffer over `cache`
    pub fn new(cache: Arc<dyn HotCache>, config: HotCacheConfig) -> Self {
        Self { cache, config }
    }

    /// Underlying cache
    pub fn cache(&self) -> &Arc<dyn HotCache> {
        &self.cache
    }

    /// Stage a record ingested now
    pub async fn stage(&self, record: &AuditRecord) -> Result<String> {
        self.stage_at(record, Utc::now()).await
    }

    /// Stage a record with an explicit ingestion time
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheUnavailable`] when the cache cannot be reached
    /// or does not answer within `op_timeout`.
    pub async fn stage_at(&self, record: &AuditRecord, ingested_at: DateTime<Utc>) -> Result<String> {
        let payload = serde_json::to_string(record)?;
        let key = self.key_for(record, ingested_at);
        let score = ingested_at.timestamp_millis();

        let put = self.cache.put(&key, &payload, self.config.ttl(), score);
        match tokio::time::timeout(self.config.op_timeout(), put).await {
            Ok(Ok(())) => {
                tracing::debug!(key = %key, record_id = %record.id, "Audit record staged");
                Ok(key)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::CacheUnavailable(format!(
                "stage timed out after {}ms",
                self.config.op_timeout_ms
            ))),
        }
    }

    fn key_for(&self, record: &AuditRecord, ingested_at: DateTime<Utc>) -> String {
        let seq = STAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}:{}:{}:{}-{}",
            self.config.key_prefix,
            record.actor_id,
            record.action,
            ingested_at.timestamp_micros(),
            seq
        )
    }
}
