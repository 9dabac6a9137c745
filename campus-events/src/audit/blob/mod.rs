//! Cold storage tier
//!
//! Object storage for archive bundles. Only two operations are needed:
//! writing an object and listing keys under a prefix, which the archive
//! worker uses to confirm an upload before deleting source records.
//!
//! Objects are keyed `logs/archived/<YYYY>/<MM>/<bundle-name>.<ext>`.

use async_trait::async_trait;

use crate::error::Result;

mod local;
mod memory;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;

/// Object storage used for archive bundles
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write an object, replacing any existing object with the same key
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
