//! Storage medium interface.
//!
//! The stream layers talk to the backing store only through these traits.
//! `azure` implements them over Azure page blobs and `memory` keeps
//! everything in process.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::Result;
use crate::page::PAGE_SIZE;

/// Metadata key holding the logical content length of a page blob.
pub const CONTENT_LENGTH_KEY: &str = "content_length";

/// Progress of a server-side copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Succeeded,
    Failed(String),
}

impl CopyStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CopyStatus::Pending)
    }
}

/// A copy as reported when it was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOperation {
    pub id: String,
    pub status: CopyStatus,
}

/// The last copy recorded on a destination blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyState {
    pub id: Option<String>,
    pub status: CopyStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    /// Allocated size in bytes, always a page multiple
    pub capacity: u64,
    /// Logical content length in bytes
    pub content_length: u64,
    pub copy: Option<CopyState>,
}

/// Page-aligned blob primitives.
///
/// Every ranged call takes page-aligned offsets and lengths; implementations
/// reject anything else with `InvalidArgument`.
#[async_trait]
pub trait PageBlob: Send + Sync {
    fn name(&self) -> &str;

    fn page_size(&self) -> u64 {
        PAGE_SIZE
    }

    async fn exists(&self) -> Result<bool>;

    /// Create the blob, replacing any existing one with an empty blob of `size` bytes.
    async fn create(&self, size: u64) -> Result<()>;

    async fn properties(&self) -> Result<BlobProperties>;

    /// Read `len` bytes at `offset`. Unwritten pages read as zeros.
    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes>;

    async fn write_range(&self, offset: u64, data: Bytes) -> Result<()>;

    /// Zero `len` bytes at `offset`.
    async fn clear_range(&self, offset: u64, len: u64) -> Result<()>;

    /// Change the allocated capacity to `size` bytes.
    async fn resize(&self, size: u64) -> Result<()>;

    /// Persist the logical content length.
    async fn set_content_length(&self, len: u64) -> Result<()>;

    /// Returns true if a blob was deleted.
    async fn delete_if_exists(&self) -> Result<bool>;

    async fn copy_state(&self) -> Result<Option<CopyState>>;
}

/// Container primitives plus server-side copy between two blobs in it.
#[async_trait]
pub trait BlobContainer: Send + Sync {
    fn name(&self) -> &str;

    /// Returns true if the container was created by this call.
    async fn create_if_missing(&self) -> Result<bool>;

    async fn exists(&self) -> Result<bool>;

    /// Returns true if a container was deleted.
    async fn delete_if_exists(&self) -> Result<bool>;

    fn page_blob(&self, name: &str) -> Arc<dyn PageBlob>;

    /// Submit a server-side copy of `source` onto `destination`.
    ///
    /// Returns as soon as the copy is accepted; the copy may still be pending.
    async fn start_copy(&self, source: &str, destination: &str) -> Result<CopyOperation>;
}
