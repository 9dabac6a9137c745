//! PostgreSQL audit store and archive catalog
//!
//! Deduplication is enforced by a unique constraint on `digest`, so a
//! repeated flush of the same record is a no-op at the database level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ArchiveCatalog, AuditStore, InsertOutcome, QuarantineEntry};
use crate::audit::archive::{ArchiveDescriptor, ArchiveStatus};
use crate::audit::record::{AuditAction, AuditRecord};
use crate::error::{Error, Result};

/// PostgreSQL-backed audit store
#[derive(Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    /// Create a new PostgreSQL audit store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `audit_logs`, `audit_quarantine` and `archive_logs`
    /// tables if missing
    ///
    /// Should be called once during startup.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id UUID PRIMARY KEY,
                actor_id BIGINT NOT NULL,
                action TEXT NOT NULL,
                resource TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                detail JSONB NOT NULL,
                origin TEXT NOT NULL,
                client TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                digest TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to create audit_logs table: {}", e)))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs (created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to create audit_logs index: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_quarantine (
                source_key TEXT PRIMARY KEY,
                record_id UUID NOT NULL,
                payload TEXT NOT NULL,
                reason TEXT NOT NULL,
                quarantined_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to create audit_quarantine table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archive_logs (
                id UUID PRIMARY KEY,
                file_name TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                range_start TIMESTAMPTZ NOT NULL,
                range_end TIMESTAMPTZ NOT NULL,
                record_count BIGINT NOT NULL,
                byte_size BIGINT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to create archive_logs table: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert(&self, record: &AuditRecord) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, actor_id, action, resource, resource_id,
                detail, origin, client, created_at, digest
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (digest) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.actor_id)
        .bind(record.action.as_str())
        .bind(&record.resource)
        .bind(&record.resource_id)
        .bind(&record.detail)
        .bind(&record.origin)
        .bind(&record.client)
        .bind(record.created_at)
        .bind(&record.digest)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn older_than(
        &self,
        cutoff: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditLogRow>(
            "SELECT * FROM audit_logs WHERE created_at < $1 ORDER BY created_at ASC, id ASC LIMIT $2 OFFSET $3",
        )
        .bind(cutoff)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM audit_logs WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn quarantine(&self, entry: &QuarantineEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_quarantine (source_key, record_id, payload, reason, quarantined_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(&entry.source_key)
        .bind(entry.record_id)
        .bind(&entry.payload)
        .bind(&entry.reason)
        .bind(entry.quarantined_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn quarantined(&self, limit: usize) -> Result<Vec<QuarantineEntry>> {
        let rows = sqlx::query_as::<_, QuarantineRow>(
            "SELECT * FROM audit_quarantine ORDER BY quarantined_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(QuarantineEntry::from).collect())
    }
}

#[async_trait]
impl ArchiveCatalog for PgAuditStore {
    async fn begin(&self, descriptor: &ArchiveDescriptor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO archive_logs (
                id, file_name, storage_key, range_start, range_end,
                record_count, byte_size, status, error, created_at, finished_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(descriptor.id)
        .bind(&descriptor.file_name)
        .bind(&descriptor.storage_key)
        .bind(descriptor.range_start)
        .bind(descriptor.range_end)
        .bind(descriptor.record_count as i64)
        .bind(descriptor.byte_size as i64)
        .bind(descriptor.status.as_str())
        .bind(&descriptor.error)
        .bind(descriptor.created_at)
        .bind(descriptor.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish(&self, descriptor: &ArchiveDescriptor) -> Result<()> {
        sqlx::query(
            "UPDATE archive_logs SET status = $2, error = $3, finished_at = $4 WHERE id = $1",
        )
        .bind(descriptor.id)
        .bind(descriptor.status.as_str())
        .bind(&descriptor.error)
        .bind(descriptor.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ArchiveDescriptor>> {
        let row = sqlx::query_as::<_, ArchiveLogRow>("SELECT * FROM archive_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ArchiveDescriptor::try_from).transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ArchiveDescriptor>> {
        let rows = sqlx::query_as::<_, ArchiveLogRow>(
            "SELECT * FROM archive_logs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ArchiveDescriptor::try_from).collect()
    }
}

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct AuditLogRow {
    id: Uuid,
    actor_id: i64,
    action: String,
    resource: String,
    resource_id: String,
    detail: serde_json::Value,
    origin: String,
    client: String,
    created_at: DateTime<Utc>,
    digest: String,
}

impl TryFrom<AuditLogRow> for AuditRecord {
    type Error = Error;

    fn try_from(row: AuditLogRow) -> Result<Self> {
        Ok(AuditRecord {
            id: row.id,
            actor_id: row.actor_id,
            action: row.action.parse::<AuditAction>()?,
            resource: row.resource,
            resource_id: row.resource_id,
            detail: row.detail,
            origin: row.origin,
            client: row.client,
            created_at: row.created_at,
            digest: row.digest,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QuarantineRow {
    source_key: String,
    record_id: Uuid,
    payload: String,
    reason: String,
    quarantined_at: DateTime<Utc>,
}

impl From<QuarantineRow> for QuarantineEntry {
    fn from(row: QuarantineRow) -> Self {
        QuarantineEntry {
            source_key: row.source_key,
            record_id: row.record_id,
            payload: row.payload,
            reason: row.reason,
            quarantined_at: row.quarantined_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ArchiveLogRow {
    id: Uuid,
    file_name: String,
    storage_key: String,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    record_count: i64,
    byte_size: i64,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<ArchiveLogRow> for ArchiveDescriptor {
    type Error = Error;

    fn try_from(row: ArchiveLogRow) -> Result<Self> {
        Ok(ArchiveDescriptor {
            id: row.id,
            file_name: row.file_name,
            storage_key: row.storage_key,
            range_start: row.range_start,
            range_end: row.range_end,
            record_count: row.record_count.max(0) as u64,
            byte_size: row.byte_size.max(0) as u64,
            status: row.status.parse::<ArchiveStatus>()?,
            error: row.error,
            created_at: row.created_at,
            finished_at: row.finished_at,
        })
    }
}
