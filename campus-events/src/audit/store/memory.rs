//! In-process persistent store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use super::{ArchiveCatalog, AuditStore, InsertOutcome, QuarantineEntry};
use crate::audit::archive::ArchiveDescriptor;
use crate::audit::record::AuditRecord;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    records: HashMap<Uuid, AuditRecord>,
    digests: HashSet<String>,
    descriptors: Vec<ArchiveDescriptor>,
    quarantine: Vec<QuarantineEntry>,
    journal: Vec<String>,
}

/// Audit store and archive catalog kept in process memory
///
/// Mirrors the uniqueness rule of the SQL backend (one row per digest) and
/// keeps a journal of mutating calls so tests can assert on ordering.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    insert_attempts: AtomicUsize,
}

impl MemoryAuditStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a transient store error
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of `insert` calls, including failed ones
    #[must_use]
    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored record
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        let mut records: Vec<_> = self.lock().records.values().cloned().collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    /// Mutating calls in the order they happened, e.g. `"delete:10"`
    #[must_use]
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Store("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, record: &AuditRecord) -> Result<InsertOutcome> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut state = self.lock();
        if !state.digests.insert(record.digest.clone()) {
            return Ok(InsertOutcome::Duplicate);
        }
        state.records.insert(record.id, record.clone());
        state.journal.push(format!("insert:{}", record.id));
        Ok(InsertOutcome::Inserted)
    }

    async fn older_than(
        &self,
        cutoff: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AuditRecord>> {
        self.check_available()?;
        let mut records: Vec<_> = self
            .lock()
            .records
            .values()
            .filter(|r| r.created_at < cutoff)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<u64> {
        self.check_available()?;
        let mut state = self.lock();
        let mut removed = 0;
        for id in ids {
            if let Some(record) = state.records.remove(id) {
                state.digests.remove(&record.digest);
                removed += 1;
            }
        }
        state.journal.push(format!("delete:{removed}"));
        Ok(removed)
    }

    async fn count(&self) -> Result<u64> {
        self.check_available()?;
        Ok(self.lock().records.len() as u64)
    }

    async fn quarantine(&self, entry: &QuarantineEntry) -> Result<()> {
        self.check_available()?;
        let mut state = self.lock();
        if state.quarantine.iter().any(|q| q.source_key == entry.source_key) {
            return Ok(());
        }
        state.quarantine.push(entry.clone());
        state.journal.push(format!("quarantine:{}", entry.record_id));
        Ok(())
    }

    async fn quarantined(&self, limit: usize) -> Result<Vec<QuarantineEntry>> {
        self.check_available()?;
        let mut entries = self.lock().quarantine.clone();
        entries.sort_by(|a, b| b.quarantined_at.cmp(&a.quarantined_at));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[async_trait]
impl ArchiveCatalog for MemoryAuditStore {
    async fn begin(&self, descriptor: &ArchiveDescriptor) -> Result<()> {
        self.check_available()?;
        let mut state = self.lock();
        state.descriptors.push(descriptor.clone());
        state.journal.push(format!("begin:{}", descriptor.status));
        Ok(())
    }

    async fn finish(&self, descriptor: &ArchiveDescriptor) -> Result<()> {
        self.check_available()?;
        let mut state = self.lock();
        match state.descriptors.iter_mut().find(|d| d.id == descriptor.id) {
            Some(existing) => *existing = descriptor.clone(),
            None => state.descriptors.push(descriptor.clone()),
        }
        state.journal.push(format!("finish:{}", descriptor.status));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ArchiveDescriptor>> {
        self.check_available()?;
        Ok(self.lock().descriptors.iter().find(|d| d.id == id).cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ArchiveDescriptor>> {
        self.check_available()?;
        let mut descriptors = self.lock().descriptors.clone();
        descriptors.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        descriptors.truncate(limit);
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditBuilder};
    use serde_json::json;

    fn record_at(age_hours: i64) -> AuditRecord {
        AuditBuilder::build_at(
            Some(1),
            AuditAction::Update,
            "courses",
            "5",
            json!({}),
            "",
            "",
            Utc::now() - chrono::Duration::hours(age_hours),
        )
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_by_digest() {
        let store = MemoryAuditStore::new();
        let record = record_at(1);

        assert_eq!(store.insert(&record).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&record).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_older_than_and_delete() {
        let store = MemoryAuditStore::new();
        let old = record_at(48);
        let new = record_at(1);
        store.insert(&old).await.unwrap();
        store.insert(&new).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let selected = store.older_than(cutoff, 0, 100).await.unwrap();
        assert_eq!(selected, vec![old.clone()]);
        assert!(store.older_than(cutoff, 1, 100).await.unwrap().is_empty());

        assert_eq!(store.delete(&[old.id, Uuid::nil()]).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_quarantine_ignores_repeated_key() {
        let store = MemoryAuditStore::new();
        let record = record_at(2);
        let entry = QuarantineEntry {
            source_key: "audit:1:UPDATE:1-0".into(),
            record_id: record.id,
            payload: serde_json::to_string(&record).unwrap(),
            reason: "digest mismatch".into(),
            quarantined_at: Utc::now(),
        };

        store.quarantine(&entry).await.unwrap();
        store.quarantine(&entry).await.unwrap();
        assert_eq!(store.quarantined(10).await.unwrap(), vec![entry]);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryAuditStore::new();
        store.set_available(false);
        let err = store.insert(&record_at(0)).await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(store.insert_attempts(), 1);
    }
}
