//! Fire-and-forget audit recording with tiered fallback
//!
//! Producers call [`AuditRecorder::log`] and return immediately. In the
//! background each record is staged in the hot cache; when the cache is
//! unavailable it is written straight to the persistent store with bounded
//! retries, and when that fails too it is logged and dropped. The path
//! taken is reported as a [`StageOutcome`].

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::buffer::HotCacheBuffer;
use super::record::AuditRecord;
use super::store::AuditStore;
use crate::retry::{retry, RetryConfig};
use crate::worker::TaskQueue;

/// Which tier ended up holding a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Staged in the hot cache under this key
    Cached(String),
    /// Hot cache unavailable; written directly to the persistent store
    FellBackToDirect,
    /// Both tiers unavailable; record logged and discarded
    Dropped,
}

/// Entry point for producers of audit records
#[derive(Clone)]
pub struct AuditRecorder {
    buffer: Option<HotCacheBuffer>,
    store: Arc<dyn AuditStore>,
    fallback: RetryConfig,
    queue: TaskQueue,
}

impl AuditRecorder {
    /// Create a recorder
    ///
    /// Without a buffer every record takes the direct-write path.
    pub fn new(
        buffer: Option<HotCacheBuffer>,
        store: Arc<dyn AuditStore>,
        fallback: RetryConfig,
        queue: TaskQueue,
    ) -> Self {
        Self {
            buffer,
            store,
            fallback,
            queue,
        }
    }

    /// Background queue used by [`log`](Self::log)
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Stage a record, falling back tier by tier
    ///
    /// Never fails; the outcome says where the record went.
    pub async fn stage_with_fallback(&self, record: &AuditRecord) -> StageOutcome {
        if let Some(buffer) = &self.buffer {
            match buffer.stage(record).await {
                Ok(key) => return StageOutcome::Cached(key),
                Err(e) => {
                    tracing::warn!(
                        record_id = %record.id,
                        class = %e.class(),
                        error = %e,
                        "Hot cache staging failed, writing directly to persistent store"
                    );
                }
            }
        }

        match retry(&self.fallback, "audit direct write", || self.store.insert(record)).await {
            Ok(_) => StageOutcome::FellBackToDirect,
            Err(e) => {
                drop_record(record, &e.to_string());
                StageOutcome::Dropped
            }
        }
    }

    /// Hand a record to the background queue
    ///
    /// Returns the task handle, or `None` if the queue rejected the record
    /// (full or draining), in which case the record is logged and dropped.
    pub fn log(&self, record: AuditRecord) -> Option<JoinHandle<StageOutcome>> {
        let recorder = self.clone();
        let record_for_log = record.clone();
        match self
            .queue
            .spawn(async move { recorder.stage_with_fallback(&record).await })
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                drop_record(&record_for_log, &e.to_string());
                None
            }
        }
    }

    /// Stop accepting records and wait for in-flight staging
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.queue.drain(timeout).await
    }
}

/// Last resort: the record survives only in the process log
fn drop_record(record: &AuditRecord, reason: &str) {
    let payload = serde_json::to_string(record).unwrap_or_else(|_| format!("{record:?}"));
    tracing::error!(
        record_id = %record.id,
        actor_id = record.actor_id,
        action = %record.action,
        resource = %record.resource,
        record = %payload,
        reason,
        "Audit record dropped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::cache::{HotCache, MemoryHotCache};
    use crate::audit::config::HotCacheConfig;
    use crate::audit::store::MemoryAuditStore;
    use crate::audit::{AuditAction, AuditBuilder};
    use crate::worker::TaskQueueConfig;
    use serde_json::json;

    struct Fixture {
        cache: Arc<MemoryHotCache>,
        store: Arc<MemoryAuditStore>,
        recorder: AuditRecorder,
    }

    fn fixture(max_attempts: u32) -> Fixture {
        let cache = Arc::new(MemoryHotCache::new());
        let store = Arc::new(MemoryAuditStore::new());
        let buffer = HotCacheBuffer::new(cache.clone(), HotCacheConfig::default());
        let recorder = AuditRecorder::new(
            Some(buffer),
            store.clone(),
            RetryConfig::new(max_attempts, 1, 2),
            TaskQueue::new("audit", &TaskQueueConfig::default()),
        );
        Fixture {
            cache,
            store,
            recorder,
        }
    }

    fn record() -> AuditRecord {
        AuditBuilder::build(Some(8), AuditAction::Delete, "clubs", "4", json!({}), "", "")
    }

    #[tokio::test]
    async fn test_cache_path() {
        let f = fixture(3);
        let outcome = f.recorder.stage_with_fallback(&record()).await;
        assert!(matches!(outcome, StageOutcome::Cached(ref key) if key.starts_with("audit:8:DELETE:")));
        assert_eq!(f.store.insert_attempts(), 0);
    }

    #[tokio::test]
    async fn test_direct_path_when_cache_down() {
        let f = fixture(3);
        f.cache.set_available(false);
        let outcome = f.recorder.stage_with_fallback(&record()).await;
        assert_eq!(outcome, StageOutcome::FellBackToDirect);
        assert_eq!(f.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropped_after_configured_attempts() {
        let f = fixture(4);
        f.cache.set_available(false);
        f.store.set_available(false);

        let outcome = f.recorder.stage_with_fallback(&record()).await;
        assert_eq!(outcome, StageOutcome::Dropped);
        assert_eq!(f.store.insert_attempts(), 4);
    }

    #[tokio::test]
    async fn test_log_is_fire_and_forget() {
        let f = fixture(3);
        let handle = f.recorder.log(record()).unwrap();
        assert!(matches!(handle.await.unwrap(), StageOutcome::Cached(_)));
        assert!(f.recorder.drain(Duration::from_secs(1)).await);
        assert_eq!(f.cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_log_after_drain_is_rejected() {
        let f = fixture(3);
        assert!(f.recorder.drain(Duration::from_secs(1)).await);
        assert!(f.recorder.log(record()).is_none());
    }
}
