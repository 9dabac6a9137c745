//! Tiered, tamper-evident audit pipeline
//!
//! Records move through three tiers:
//!
//! 1. **Hot cache**: [`AuditRecorder::log`] stages each record under a
//!    time-scored key with a TTL. Producers never wait on it.
//! 2. **Persistent store**: [`FlushWorker`] periodically moves staged
//!    records that are old enough into the [`AuditStore`], deduplicating on
//!    the record digest.
//! 3. **Cold archive**: [`ArchiveWorker`] periodically bundles records past
//!    the retention threshold, uploads the bundle to a [`BlobStore`] and
//!    deletes the originals only after the upload is confirmed.
//!
//! Every record carries a BLAKE3 digest over its identifying fields; records
//! whose digest no longer matches are never moved to the next tier.
//!
//! # Feature Interactions
//!
//! - default: in-memory hot cache and store, filesystem blob store
//! - `cache`: Redis hot cache
//! - `database`: PostgreSQL store and archive catalog

pub mod archive;
pub mod blob;
pub mod buffer;
pub mod builder;
pub mod cache;
pub mod config;
pub mod flush;
pub mod integrity;
pub mod middleware;
pub mod record;
pub mod recorder;
pub mod store;

pub use archive::{ArchiveDescriptor, ArchiveReport, ArchiveStatus, ArchiveWorker};
pub use blob::{BlobStore, LocalBlobStore, MemoryBlobStore};
pub use buffer::HotCacheBuffer;
pub use builder::AuditBuilder;
pub use cache::{HotCache, MemoryHotCache};
pub use config::{ArchiveConfig, AuditConfig, FlushConfig, HotCacheConfig};
pub use flush::{FlushReport, FlushWorker};
pub use integrity::{verify_all, IntegrityViolation};
pub use middleware::{audit_middleware, path_matches_patterns, Actor, AuditLayerState, RequestContext};
pub use record::{AuditAction, AuditRecord, ANONYMOUS_ACTOR};
pub use recorder::{AuditRecorder, StageOutcome};
pub use store::{ArchiveCatalog, AuditStore, InsertOutcome, MemoryAuditStore, QuarantineEntry};

#[cfg(feature = "cache")]
pub use cache::RedisHotCache;

#[cfg(feature = "database")]
pub use store::PgAuditStore;
