//! Audit pipeline configuration
//!
//! Loaded from the `[audit]` section of config.toml or environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryConfig;
use crate::worker::TaskQueueConfig;

/// Audit pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit capture (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Background staging queue limits
    #[serde(default)]
    pub queue: TaskQueueConfig,

    /// Hot cache staging settings
    #[serde(default)]
    pub cache: HotCacheConfig,

    /// Direct-write retries used when the hot cache is unavailable
    ///
    /// Once these attempts are exhausted the record is logged and dropped.
    #[serde(default)]
    pub fallback: RetryConfig,

    /// Flush worker settings
    #[serde(default)]
    pub flush: FlushConfig,

    /// Archive worker settings
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Routes never audited by the middleware (default: ["/health", "/ready", "/ws"])
    #[serde(default = "default_excluded_routes")]
    pub excluded_routes: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue: TaskQueueConfig::default(),
            cache: HotCacheConfig::default(),
            fallback: RetryConfig::default(),
            flush: FlushConfig::default(),
            archive: ArchiveConfig::default(),
            excluded_routes: default_excluded_routes(),
        }
    }
}

/// Hot cache staging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotCacheConfig {
    /// Prefix of every staged record key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Name of the time-ordered index of staged keys
    #[serde(default = "default_index_key")]
    pub index_key: String,

    /// Expiry of staged records in seconds (default: 24 hours)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Upper bound on a single cache operation in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl HotCacheConfig {
    /// Get the record TTL as a Duration
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Get the operation timeout as a Duration
    #[must_use]
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for HotCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            index_key: default_index_key(),
            ttl_secs: default_ttl_secs(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

/// Flush worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    /// Seconds between runs (default: hourly)
    #[serde(default = "default_flush_interval_secs")]
    pub interval_secs: u64,

    /// Minimum age in seconds before a staged record is flushed
    ///
    /// Must stay below the cache TTL, otherwise records expire before
    /// they become due.
    #[serde(default = "default_flush_min_age_secs")]
    pub min_age_secs: u64,

    /// Keys fetched from the index per page
    #[serde(default = "default_flush_batch_size")]
    pub batch_size: usize,
}

impl FlushConfig {
    /// Get the run interval as a Duration
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Get the minimum age as a chrono Duration
    #[must_use]
    pub fn min_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.min_age_secs).unwrap_or(i64::MAX / 1_000))
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_flush_interval_secs(),
            min_age_secs: default_flush_min_age_secs(),
            batch_size: default_flush_batch_size(),
        }
    }
}

/// Archive worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Run the archive worker (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between runs (default: daily)
    #[serde(default = "default_archive_interval_secs")]
    pub interval_secs: u64,

    /// Records older than this many days are archived (default: 7)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Maximum records per bundle
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// zstd compression level
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Local directory receiving bundles whose upload failed
    #[serde(default = "default_fallback_dir")]
    pub fallback_dir: PathBuf,

    /// Upload retries per bundle object
    #[serde(default = "default_upload_retry")]
    pub upload: RetryConfig,
}

impl ArchiveConfig {
    /// Get the run interval as a Duration
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Get the retention threshold as a chrono Duration
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_archive_interval_secs(),
            retention_days: default_retention_days(),
            batch_limit: default_batch_limit(),
            compression_level: default_compression_level(),
            fallback_dir: default_fallback_dir(),
            upload: default_upload_retry(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_excluded_routes() -> Vec<String> {
    vec!["/health".to_string(), "/ready".to_string(), "/ws".to_string()]
}

fn default_key_prefix() -> String {
    "audit".to_string()
}

fn default_index_key() -> String {
    "audit:index".to_string()
}

const fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

const fn default_op_timeout_ms() -> u64 {
    500
}

const fn default_flush_interval_secs() -> u64 {
    60 * 60
}

const fn default_flush_min_age_secs() -> u64 {
    60 * 60
}

const fn default_flush_batch_size() -> usize {
    500
}

const fn default_archive_interval_secs() -> u64 {
    24 * 60 * 60
}

const fn default_retention_days() -> u32 {
    7
}

const fn default_batch_limit() -> usize {
    10_000
}

const fn default_compression_level() -> i32 {
    3
}

fn default_fallback_dir() -> PathBuf {
    PathBuf::from("./archive-fallback")
}

const fn default_upload_retry() -> RetryConfig {
    RetryConfig::new(5, 500, 30_000)
}
