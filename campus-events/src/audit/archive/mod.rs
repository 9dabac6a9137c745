//! Archive worker: persistent store to cold storage
//!
//! Each run selects records older than the retention threshold, encodes
//! them into a bundle, uploads the bundle and deletes the source records.
//!
//! Ordering per run:
//!
//! 1. page through records past retention, verifying digests; tampered
//!    records are left in place for inspection and paged past, so they never
//!    starve intact records of a slot in the batch
//! 2. write a `Pending` descriptor
//! 3. refuse to upload if anything already exists under the bundle prefix,
//!    upload every bundle object (bounded retry with backoff), then confirm
//!    the objects are listed under the bundle prefix
//! 4. on success mark the descriptor `Completed`, then delete the archived ids
//! 5. on failure keep a local copy of the bundle, mark the descriptor
//!    `Failed` and leave the source records untouched
//!
//! A record is only deleted once its descriptor has been persisted as
//! `Completed`.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod bundle;
mod descriptor;

pub use bundle::{ArchiveBundle, BundleMetadata, BundleObject};
pub use descriptor::{ArchiveDescriptor, ArchiveStatus};

use super::blob::BlobStore;
use super::config::ArchiveConfig;
use super::integrity::verify_all;
use super::record::AuditRecord;
use super::store::{ArchiveCatalog, AuditStore};
use crate::error::{Error, Result};
use crate::retry::retry;
use crate::worker::spawn_periodic;

/// Summary of one archive run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveReport {
    /// Records past the retention threshold examined by this run
    pub selected: usize,
    /// Records written into the bundle
    pub archived: usize,
    /// Source records deleted after a completed upload
    pub deleted: u64,
    /// Records excluded because their digest did not match
    pub tampered: usize,
    /// Descriptor of the run, if a bundle was built
    pub descriptor: Option<ArchiveDescriptor>,
}

/// Moves aged records from the persistent store into cold storage
#[derive(Clone)]
pub struct ArchiveWorker {
    store: Arc<dyn AuditStore>,
    catalog: Arc<dyn ArchiveCatalog>,
    blob: Arc<dyn BlobStore>,
    config: ArchiveConfig,
}

impl ArchiveWorker {
    /// Create a worker
    pub fn new(
        store: Arc<dyn AuditStore>,
        catalog: Arc<dyn ArchiveCatalog>,
        blob: Arc<dyn BlobStore>,
        config: ArchiveConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            blob,
            config,
        }
    }

    /// Run once against the current time
    pub async fn run_once(&self) -> Result<ArchiveReport> {
        self.run_once_at(Utc::now()).await
    }

    /// Run once as if the current time were `now`
    ///
    /// # Errors
    ///
    /// Returns an error if the store or catalog cannot be reached. Upload
    /// failures are not errors: they produce a `Failed` descriptor.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<ArchiveReport> {
        let cutoff = now - self.config.retention();
        let mut report = ArchiveReport::default();
        let intact = self.select(cutoff, &mut report).await?;
        if report.selected == 0 {
            tracing::debug!(cutoff = %cutoff, "No records due for archival");
            return Ok(report);
        }
        if intact.is_empty() {
            return Ok(report);
        }

        let run_id = Uuid::now_v7();
        let bundle = bundle::build(&intact, run_id, now, self.config.compression_level)?;
        let mut descriptor = ArchiveDescriptor {
            id: run_id,
            file_name: bundle.name.clone(),
            storage_key: bundle.data_key().to_string(),
            range_start: bundle.metadata.range_start,
            range_end: bundle.metadata.range_end,
            record_count: intact.len() as u64,
            byte_size: bundle.byte_size(),
            status: ArchiveStatus::Pending,
            error: None,
            created_at: now,
            finished_at: None,
        };
        self.catalog.begin(&descriptor).await?;

        match self.upload(&bundle).await {
            Ok(()) => {
                descriptor.complete(Utc::now());
                self.catalog.finish(&descriptor).await?;

                let ids: Vec<Uuid> = intact.iter().map(|r| r.id).collect();
                report.archived = ids.len();
                match self.store.delete(&ids).await {
                    Ok(deleted) => report.deleted = deleted,
                    Err(e) => {
                        // Records stay until the next run archives them again
                        tracing::warn!(
                            bundle = %bundle.name,
                            error = %e,
                            "Archived records could not be deleted"
                        );
                    }
                }
                tracing::info!(
                    bundle = %bundle.name,
                    records = report.archived,
                    deleted = report.deleted,
                    bytes = descriptor.byte_size,
                    "Archive run completed"
                );
            }
            Err(upload_error) => {
                let mut message = upload_error.to_string();
                match self.write_fallback(&bundle).await {
                    Ok(path) => {
                        tracing::warn!(
                            bundle = %bundle.name,
                            path = %path.display(),
                            "Upload failed, bundle kept locally"
                        );
                    }
                    Err(e) => {
                        tracing::error!(bundle = %bundle.name, error = %e, "Failed to write local fallback copy");
                        message = format!("{message}; fallback copy failed: {e}");
                    }
                }
                descriptor.fail(message, Utc::now());
                self.catalog.finish(&descriptor).await?;
                tracing::error!(
                    bundle = %bundle.name,
                    error = descriptor.error.as_deref().unwrap_or_default(),
                    "Archive run failed, source records kept"
                );
            }
        }

        report.descriptor = Some(descriptor);
        Ok(report)
    }

    /// Run every `interval` until cancelled
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let worker = self.clone();
        spawn_periodic("audit-archive", self.config.interval(), cancel, move || {
            let worker = worker.clone();
            async move {
                if let Err(e) = worker.run_once().await {
                    tracing::error!(class = %e.class(), error = %e, "Archive run aborted");
                }
            }
        })
    }

    /// Collect up to `batch_limit` intact records created before `cutoff`
    async fn select(&self, cutoff: DateTime<Utc>, report: &mut ArchiveReport) -> Result<Vec<AuditRecord>> {
        let limit = self.config.batch_limit.max(1);
        let mut intact = Vec::with_capacity(limit);
        // Tampered rows stay in the store, so the offset moves past them
        let mut offset = 0;

        while intact.len() < limit {
            let wanted = limit - intact.len();
            let page = self.store.older_than(cutoff, offset, wanted).await?;
            let fetched = page.len();
            report.selected += fetched;
            offset += fetched;

            let violations = verify_all(&page);
            for violation in &violations {
                tracing::error!(
                    record_id = %violation.record_id,
                    stored = %violation.stored,
                    computed = %violation.computed,
                    "Integrity mismatch, record retained and excluded from archive"
                );
            }
            let tampered: HashSet<Uuid> = violations.iter().map(|v| v.record_id).collect();
            report.tampered += tampered.len();
            intact.extend(page.into_iter().filter(|r| !tampered.contains(&r.id)));

            if fetched < wanted {
                break;
            }
        }
        Ok(intact)
    }

    async fn upload(&self, bundle: &ArchiveBundle) -> Result<()> {
        let existing = retry(&self.config.upload, "archive prefix check", || {
            self.blob.list(&bundle.key_prefix)
        })
        .await?;
        if !existing.is_empty() {
            return Err(Error::Validation(format!(
                "refusing to overwrite {} existing object(s) under '{}'",
                existing.len(),
                bundle.key_prefix
            )));
        }

        for object in &bundle.objects {
            retry(&self.config.upload, "archive upload", || {
                self.blob
                    .put(&object.key, object.bytes.clone(), object.content_type)
            })
            .await?;
        }

        let listed: HashSet<String> = retry(&self.config.upload, "archive confirm", || {
            self.blob.list(&bundle.key_prefix)
        })
        .await?
        .into_iter()
        .collect();

        match bundle.objects.iter().find(|o| !listed.contains(&o.key)) {
            Some(missing) => Err(Error::Blob(format!(
                "upload not confirmed: '{}' missing from listing",
                missing.key
            ))),
            None => Ok(()),
        }
    }

    async fn write_fallback(&self, bundle: &ArchiveBundle) -> Result<PathBuf> {
        let dir = self.config.fallback_dir.join(&bundle.name);
        tokio::fs::create_dir_all(&dir).await?;
        for object in &bundle.objects {
            let file_name = object.key.rsplit('/').next().unwrap_or(&object.key);
            tokio::fs::write(dir.join(file_name), &object.bytes).await?;
        }
        Ok(dir)
    }
}
