//! Archive descriptor: the catalog row tracking one archive run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle of an archive run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveStatus {
    /// Bundle built, upload not confirmed yet
    Pending,
    /// Every bundle object confirmed in cold storage
    Completed,
    /// Upload gave up; a local fallback copy was kept
    Failed,
}

impl ArchiveStatus {
    /// Lowercase name as stored in the catalog
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArchiveStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Validation(format!("unknown archive status '{other}'"))),
        }
    }
}

/// Metadata of one archive bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDescriptor {
    /// Descriptor identifier
    pub id: Uuid,
    /// Bundle name, e.g. `audit-20260301T020000Z`
    pub file_name: String,
    /// Cold storage key of the compressed bundle
    pub storage_key: String,
    /// Oldest record timestamp covered
    pub range_start: DateTime<Utc>,
    /// Newest record timestamp covered
    pub range_end: DateTime<Utc>,
    /// Number of records in the bundle
    pub record_count: u64,
    /// Compressed bundle size in bytes
    pub byte_size: u64,
    /// Current status
    pub status: ArchiveStatus,
    /// Failure detail for `Failed` runs
    pub error: Option<String>,
    /// When the run started
    pub created_at: DateTime<Utc>,
    /// When the run reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

impl ArchiveDescriptor {
    /// Mark the run as completed
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = ArchiveStatus::Completed;
        self.error = None;
        self.finished_at = Some(at);
    }

    /// Mark the run as failed
    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = ArchiveStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(at);
    }
}
