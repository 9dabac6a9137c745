//! Persistent audit store and archive catalog
//!
//! The `AuditStore` trait is the durable tier: inserts are keyed by the
//! record digest, so a repeated insert of the same record is reported as a
//! duplicate instead of creating a second row. Staged payloads that fail
//! digest verification are moved into a quarantine that never expires.
//! `ArchiveCatalog` keeps the archive descriptors.
//!
//! # Available Backends
//!
//! - **Memory** (always): [`MemoryAuditStore`]
//! - **PostgreSQL** (`database` feature): [`PgAuditStore`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::archive::ArchiveDescriptor;
use super::record::AuditRecord;
use crate::error::Result;

mod memory;
#[cfg(feature = "database")]
mod pg;

pub use memory::MemoryAuditStore;
#[cfg(feature = "database")]
pub use pg::PgAuditStore;

/// Result of an insert keyed by digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written
    Inserted,
    /// A row with the same digest already existed; nothing changed
    Duplicate,
}

/// A staged payload that failed verification, kept for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// Hot cache key the payload was staged under
    pub source_key: String,
    /// Id claimed by the payload
    pub record_id: Uuid,
    /// Payload exactly as it was staged
    pub payload: String,
    /// Why it was quarantined
    pub reason: String,
    /// When it left the hot cache
    pub quarantined_at: DateTime<Utc>,
}

/// Durable audit record storage
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert a record, tolerating repeats of the same digest
    async fn insert(&self, record: &AuditRecord) -> Result<InsertOutcome>;

    /// Records created before `cutoff`, ordered by `(created_at, id)`,
    /// skipping the first `offset`
    async fn older_than(
        &self,
        cutoff: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AuditRecord>>;

    /// Delete records by id, returning how many were removed
    async fn delete(&self, ids: &[Uuid]) -> Result<u64>;

    /// Total number of stored records
    async fn count(&self) -> Result<u64>;

    /// Keep a payload that failed verification; repeats of the same
    /// `source_key` are ignored
    async fn quarantine(&self, entry: &QuarantineEntry) -> Result<()>;

    /// Quarantined payloads, newest first
    async fn quarantined(&self, limit: usize) -> Result<Vec<QuarantineEntry>>;
}

/// Archive descriptor persistence
#[async_trait]
pub trait ArchiveCatalog: Send + Sync {
    /// Record a new run (status `Pending`)
    async fn begin(&self, descriptor: &ArchiveDescriptor) -> Result<()>;

    /// Persist the terminal status of a run
    async fn finish(&self, descriptor: &ArchiveDescriptor) -> Result<()>;

    /// Look up a descriptor
    async fn get(&self, id: Uuid) -> Result<Option<ArchiveDescriptor>>;

    /// Most recent descriptors, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<ArchiveDescriptor>>;
}
