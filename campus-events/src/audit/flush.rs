//! Flush worker: hot cache to persistent store
//!
//! Delivery is at-least-once. A crash between the persistent insert and the
//! cache removal leaves the key in the cache; the next run inserts the same
//! record again and the store reports it as a duplicate.
//!
//! A staged record whose digest does not match is moved, payload verbatim,
//! into the store's quarantine before it leaves the cache, so the cache TTL
//! can never discard it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cache::HotCache;
use super::config::FlushConfig;
use super::record::AuditRecord;
use super::store::{AuditStore, InsertOutcome, QuarantineEntry};
use crate::error::Result;
use crate::worker::spawn_periodic;

/// Summary of one flush run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Keys examined
    pub scanned: usize,
    /// Records newly written to the store
    pub committed: usize,
    /// Records the store already had
    pub duplicates: usize,
    /// Index entries whose value had already expired
    pub expired: usize,
    /// Payloads that could not be decoded; discarded
    pub malformed: usize,
    /// Records failing digest verification; moved to quarantine
    pub tampered: usize,
    /// Keys left for the next run after a tier error
    pub failed: usize,
}

enum KeyOutcome {
    Committed,
    Duplicate,
    Expired,
    Malformed,
    Tampered,
}

/// Moves due records from the hot cache into the persistent store
#[derive(Clone)]
pub struct FlushWorker {
    cache: Arc<dyn HotCache>,
    store: Arc<dyn AuditStore>,
    config: FlushConfig,
}

impl FlushWorker {
    /// Create a worker
    pub fn new(cache: Arc<dyn HotCache>, store: Arc<dyn AuditStore>, config: FlushConfig) -> Self {
        Self {
            cache,
            store,
            config,
        }
    }

    /// Flush everything older than `min_age`
    pub async fn run_once(&self) -> Result<FlushReport> {
        self.run_once_at(Utc::now()).await
    }

    /// Flush everything staged at or before `now - min_age`
    ///
    /// # Errors
    ///
    /// Only an unreachable index aborts the run; per-key failures are
    /// counted in the report and the key is retried next time.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<FlushReport> {
        let max_score = (now - self.config.min_age()).timestamp_millis();
        let batch_size = self.config.batch_size.max(1);
        let mut report = FlushReport::default();
        // Keys left in the cache shift the window of the next page
        let mut offset = 0;

        loop {
            let keys = self.cache.due(max_score, offset, batch_size).await?;
            if keys.is_empty() {
                break;
            }

            for key in &keys {
                report.scanned += 1;
                match self.flush_key(key).await {
                    Ok(KeyOutcome::Committed) => report.committed += 1,
                    Ok(KeyOutcome::Duplicate) => report.duplicates += 1,
                    Ok(KeyOutcome::Expired) => report.expired += 1,
                    Ok(KeyOutcome::Malformed) => report.malformed += 1,
                    Ok(KeyOutcome::Tampered) => report.tampered += 1,
                    Err(e) => {
                        tracing::warn!(key = %key, class = %e.class(), error = %e, "Flush of key failed, retrying next run");
                        report.failed += 1;
                        offset += 1;
                    }
                }
            }

            if keys.len() < batch_size {
                break;
            }
        }

        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                committed = report.committed,
                duplicates = report.duplicates,
                expired = report.expired,
                malformed = report.malformed,
                tampered = report.tampered,
                failed = report.failed,
                "Flush run completed"
            );
        }
        Ok(report)
    }

    /// Run every `interval` until cancelled
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let worker = self.clone();
        spawn_periodic("audit-flush", self.config.interval(), cancel, move || {
            let worker = worker.clone();
            async move {
                if let Err(e) = worker.run_once().await {
                    tracing::error!(class = %e.class(), error = %e, "Flush run aborted");
                }
            }
        })
    }

    async fn flush_key(&self, key: &str) -> Result<KeyOutcome> {
        let Some(payload) = self.cache.fetch(key).await? else {
            self.cache.remove(key).await?;
            tracing::debug!(key, "Staged record expired before flush");
            return Ok(KeyOutcome::Expired);
        };

        let record: AuditRecord = match serde_json::from_str(&payload) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding malformed staged record");
                self.cache.remove(key).await?;
                return Ok(KeyOutcome::Malformed);
            }
        };

        if let Err(e) = record.verify() {
            let entry = QuarantineEntry {
                source_key: key.to_string(),
                record_id: record.id,
                payload,
                reason: e.to_string(),
                quarantined_at: Utc::now(),
            };
            self.store.quarantine(&entry).await?;
            self.cache.remove(key).await?;
            tracing::error!(key, record_id = %record.id, error = %e, "Staged record failed integrity check, quarantined");
            return Ok(KeyOutcome::Tampered);
        }

        let outcome = self.store.insert(&record).await?;
        self.cache.remove(key).await?;

        Ok(match outcome {
            InsertOutcome::Inserted => KeyOutcome::Committed,
            InsertOutcome::Duplicate => KeyOutcome::Duplicate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::cache::MemoryHotCache;
    use crate::audit::store::MemoryAuditStore;
    use crate::audit::{AuditAction, AuditBuilder};
    use serde_json::json;
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(86_400);

    fn worker(cache: &Arc<MemoryHotCache>, store: &Arc<MemoryAuditStore>, batch_size: usize) -> FlushWorker {
        FlushWorker::new(
            cache.clone(),
            store.clone(),
            FlushConfig {
                min_age_secs: 3600,
                batch_size,
                ..FlushConfig::default()
            },
        )
    }

    async fn stage(cache: &MemoryHotCache, key: &str, record: &AuditRecord, score: i64) {
        let payload = serde_json::to_string(record).unwrap();
        cache.put(key, &payload, DAY, score).await.unwrap();
    }

    fn record(actor: i64) -> AuditRecord {
        AuditBuilder::build(Some(actor), AuditAction::Create, "rooms", "1", json!({}), "", "")
    }

    #[tokio::test]
    async fn test_pages_through_large_backlog() {
        let cache = Arc::new(MemoryHotCache::new());
        let store = Arc::new(MemoryAuditStore::new());
        for i in 0..25 {
            stage(&cache, &format!("k{i:02}"), &record(i), i).await;
        }

        let report = worker(&cache, &store, 4).run_once().await.unwrap();
        assert_eq!(report.committed, 25);
        assert_eq!(store.count().await.unwrap(), 25);
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_and_malformed_entries_are_cleared() {
        let cache = Arc::new(MemoryHotCache::new());
        let store = Arc::new(MemoryAuditStore::new());
        stage(&cache, "gone", &record(1), 1).await;
        cache.expire("gone");
        cache.put("junk", "{not json", DAY, 2).await.unwrap();

        let report = worker(&cache, &store, 10).run_once().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.malformed, 1);
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tampered_record_is_quarantined() {
        let cache = Arc::new(MemoryHotCache::new());
        let store = Arc::new(MemoryAuditStore::new());
        let mut forged = record(1);
        forged.actor_id = 99;
        stage(&cache, "forged", &forged, 1).await;
        stage(&cache, "honest", &record(2), 2).await;

        let report = worker(&cache, &store, 1).run_once().await.unwrap();
        assert_eq!(report.tampered, 1);
        assert_eq!(report.committed, 1);
        assert!(!cache.contains("forged"));
        assert_eq!(store.count().await.unwrap(), 1);

        let held = store.quarantined(10).await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].source_key, "forged");
        assert_eq!(held[0].record_id, forged.id);
        let kept: AuditRecord = serde_json::from_str(&held[0].payload).unwrap();
        assert_eq!(kept, forged);
    }

    #[tokio::test]
    async fn test_quarantined_record_outlives_cache_ttl() {
        let cache = Arc::new(MemoryHotCache::new());
        let store = Arc::new(MemoryAuditStore::new());
        let mut forged = record(1);
        forged.resource = "grades".into();
        let payload = serde_json::to_string(&forged).unwrap();
        cache
            .put("forged", &payload, Duration::from_millis(50), 1)
            .await
            .unwrap();

        let first = worker(&cache, &store, 10).run_once().await.unwrap();
        assert_eq!(first.tampered, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = worker(&cache, &store, 10).run_once().await.unwrap();
        assert_eq!(second.tampered, 0);
        assert_eq!(second.expired, 0);
        assert_eq!(store.quarantined(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quarantine_outage_leaves_tampered_key() {
        let cache = Arc::new(MemoryHotCache::new());
        let store = Arc::new(MemoryAuditStore::new());
        let mut forged = record(1);
        forged.actor_id = 42;
        stage(&cache, "forged", &forged, 1).await;
        store.set_available(false);

        let report = worker(&cache, &store, 10).run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(cache.contains("forged"));
    }

    #[tokio::test]
    async fn test_store_outage_leaves_keys() {
        let cache = Arc::new(MemoryHotCache::new());
        let store = Arc::new(MemoryAuditStore::new());
        stage(&cache, "a", &record(1), 1).await;
        stage(&cache, "b", &record(2), 2).await;
        store.set_available(false);

        let report = worker(&cache, &store, 1).run_once().await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(cache.len().await.unwrap(), 2);

        store.set_available(true);
        let report = worker(&cache, &store, 1).run_once().await.unwrap();
        assert_eq!(report.committed, 2);
    }

    #[tokio::test]
    async fn test_unreachable_index_aborts() {
        let cache = Arc::new(MemoryHotCache::new());
        let store = Arc::new(MemoryAuditStore::new());
        cache.set_available(false);
        assert!(worker(&cache, &store, 10).run_once().await.is_err());
    }
}
