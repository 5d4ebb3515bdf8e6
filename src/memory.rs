//! In-memory page-blob medium.
//!
//! Behaves like a page-blob container: ranged calls must be page aligned,
//! capacity is explicit, and copies go through Pending before reaching a
//! terminal state. Request counters and fault injection let tests observe
//! what the stream layers send to the medium.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{BlobFsError, Result};
use crate::page::{check_aligned, PAGE_SIZE};
use crate::storage::{BlobContainer, BlobProperties, CopyOperation, CopyState, CopyStatus, PageBlob};

#[derive(Debug, Clone, Default)]
struct StoredBlob {
    /// Allocated pages; `data.len()` is the capacity
    data: Vec<u8>,
    content_length: u64,
    copy: Option<CopyState>,
}

#[derive(Debug)]
struct PendingCopy {
    id: String,
    polls_left: u32,
    data: Vec<u8>,
    content_length: u64,
    failure: Option<String>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_writes: bool,
    fail_creates: bool,
    fail_next_copy: Option<String>,
    copy_pending_polls: u32,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    clears: AtomicU64,
    resizes: AtomicU64,
    copies: AtomicU64,
}

/// Snapshot of the requests a container has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub reads: u64,
    pub writes: u64,
    pub clears: u64,
    pub resizes: u64,
    pub copies: u64,
}

#[derive(Debug)]
struct Shared {
    name: String,
    page_size: u64,
    exists: AtomicBool,
    blobs: DashMap<String, StoredBlob>,
    pending: DashMap<String, PendingCopy>,
    copy_seq: AtomicU64,
    faults: Mutex<Faults>,
    counters: Counters,
}

/// An in-memory container of page blobs. Clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryContainer {
    inner: Arc<Shared>,
}

impl MemoryContainer {
    pub fn new(name: &str) -> Self {
        Self::with_page_size(name, PAGE_SIZE)
    }

    pub fn with_page_size(name: &str, page_size: u64) -> Self {
        Self {
            inner: Arc::new(Shared {
                name: name.to_string(),
                page_size,
                exists: AtomicBool::new(false),
                blobs: DashMap::new(),
                pending: DashMap::new(),
                copy_seq: AtomicU64::new(0),
                faults: Mutex::new(Faults::default()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        let c = &self.inner.counters;
        MemoryStats {
            reads: c.reads.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            clears: c.clears.load(Ordering::Relaxed),
            resizes: c.resizes.load(Ordering::Relaxed),
            copies: c.copies.load(Ordering::Relaxed),
        }
    }

    /// Allocated capacity of a blob, if it exists
    pub fn capacity_of(&self, name: &str) -> Option<u64> {
        self.inner.blobs.get(name).map(|b| b.data.len() as u64)
    }

    pub fn blob_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.blobs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Make every subsequent `write_range` fail with a transport error.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.faults.lock().fail_writes = fail;
    }

    /// Make every subsequent blob `create` fail with a transport error.
    pub fn fail_creates(&self, fail: bool) {
        self.inner.faults.lock().fail_creates = fail;
    }

    /// Make the next copy end in the Failed state.
    pub fn fail_next_copy(&self, reason: &str) {
        self.inner.faults.lock().fail_next_copy = Some(reason.to_string());
    }

    /// Keep copies Pending for `polls` status checks before they finish.
    pub fn set_copy_pending_polls(&self, polls: u32) {
        self.inner.faults.lock().copy_pending_polls = polls;
    }
}

#[async_trait]
impl BlobContainer for MemoryContainer {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn create_if_missing(&self) -> Result<bool> {
        let created = !self.inner.exists.swap(true, Ordering::SeqCst);
        if created {
            debug!("memory: created container {}", self.inner.name);
        }
        Ok(created)
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.inner.exists.load(Ordering::SeqCst))
    }

    async fn delete_if_exists(&self) -> Result<bool> {
        let existed = self.inner.exists.swap(false, Ordering::SeqCst);
        self.inner.blobs.clear();
        self.inner.pending.clear();
        Ok(existed)
    }

    fn page_blob(&self, name: &str) -> Arc<dyn PageBlob> {
        Arc::new(MemoryPageBlob {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }

    async fn start_copy(&self, source: &str, destination: &str) -> Result<CopyOperation> {
        self.inner.require_container()?;
        let (data, content_length) = {
            let blob = self.inner.blobs.get(source).ok_or_else(|| BlobFsError::NotFound {
                path: source.to_string(),
            })?;
            (blob.data.clone(), blob.content_length)
        };

        self.inner.counters.copies.fetch_add(1, Ordering::Relaxed);
        let seq = self.inner.copy_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("copy-{:08}", seq);
        let (polls_left, failure) = {
            let mut faults = self.inner.faults.lock();
            (faults.copy_pending_polls, faults.fail_next_copy.take())
        };

        debug!("memory: copy {} {} -> {} ({} polls)", id, source, destination, polls_left);

        let mut pending = PendingCopy {
            id: id.clone(),
            polls_left,
            data,
            content_length,
            failure,
        };

        if polls_left == 0 {
            let status = self.inner.finish_copy(destination, &mut pending);
            return Ok(CopyOperation { id, status });
        }

        self.inner
            .blobs
            .entry(destination.to_string())
            .or_default()
            .copy = Some(CopyState {
            id: Some(id.clone()),
            status: CopyStatus::Pending,
        });
        self.inner.pending.insert(destination.to_string(), pending);

        Ok(CopyOperation {
            id,
            status: CopyStatus::Pending,
        })
    }
}

impl Shared {
    fn require_container(&self) -> Result<()> {
        if !self.exists.load(Ordering::SeqCst) {
            return Err(BlobFsError::NotFound {
                path: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Apply a copy to its destination and record the terminal state.
    fn finish_copy(&self, destination: &str, pending: &mut PendingCopy) -> CopyStatus {
        let status = match pending.failure.take() {
            Some(reason) => CopyStatus::Failed(reason),
            None => CopyStatus::Succeeded,
        };
        let mut blob = self.blobs.entry(destination.to_string()).or_default();
        if status == CopyStatus::Succeeded {
            blob.data = std::mem::take(&mut pending.data);
            blob.content_length = pending.content_length;
        }
        blob.copy = Some(CopyState {
            id: Some(pending.id.clone()),
            status: status.clone(),
        });
        status
    }
}

/// Handle to one blob inside a [`MemoryContainer`].
#[derive(Debug)]
pub struct MemoryPageBlob {
    name: String,
    inner: Arc<Shared>,
}

impl MemoryPageBlob {
    fn not_found(&self) -> BlobFsError {
        BlobFsError::NotFound {
            path: self.name.clone(),
        }
    }

    fn check_range(&self, blob: &StoredBlob, offset: u64, len: u64) -> Result<()> {
        check_aligned(offset, len, self.inner.page_size)?;
        if offset.saturating_add(len) > blob.data.len() as u64 {
            return Err(BlobFsError::InvalidArgument(format!(
                "range {}+{} exceeds capacity {} of '{}'",
                offset,
                len,
                blob.data.len(),
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PageBlob for MemoryPageBlob {
    fn name(&self) -> &str {
        &self.name
    }

    fn page_size(&self) -> u64 {
        self.inner.page_size
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.inner.exists.load(Ordering::SeqCst) && self.inner.blobs.contains_key(&self.name))
    }

    async fn create(&self, size: u64) -> Result<()> {
        self.inner.require_container()?;
        check_aligned(0, size, self.inner.page_size)?;
        if self.inner.faults.lock().fail_creates {
            return Err(BlobFsError::AzureError("injected create failure".to_string()));
        }
        self.inner.pending.remove(&self.name);
        self.inner.blobs.insert(
            self.name.clone(),
            StoredBlob {
                data: vec![0; size as usize],
                content_length: 0,
                copy: None,
            },
        );
        Ok(())
    }

    async fn properties(&self) -> Result<BlobProperties> {
        self.inner.require_container()?;
        let blob = self.inner.blobs.get(&self.name).ok_or_else(|| self.not_found())?;
        Ok(BlobProperties {
            capacity: blob.data.len() as u64,
            content_length: blob.content_length,
            copy: blob.copy.clone(),
        })
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes> {
        self.inner.require_container()?;
        let blob = self.inner.blobs.get(&self.name).ok_or_else(|| self.not_found())?;
        self.check_range(&blob, offset, len)?;
        self.inner.counters.reads.fetch_add(1, Ordering::Relaxed);
        let start = offset as usize;
        Ok(Bytes::copy_from_slice(&blob.data[start..start + len as usize]))
    }

    async fn write_range(&self, offset: u64, data: Bytes) -> Result<()> {
        self.inner.require_container()?;
        if self.inner.faults.lock().fail_writes {
            return Err(BlobFsError::AzureError("injected write failure".to_string()));
        }
        let mut blob = self.inner.blobs.get_mut(&self.name).ok_or_else(|| self.not_found())?;
        self.check_range(&blob, offset, data.len() as u64)?;
        self.inner.counters.writes.fetch_add(1, Ordering::Relaxed);
        let start = offset as usize;
        blob.data[start..start + data.len()].copy_from_slice(&data);
        Ok(())
    }

    async fn clear_range(&self, offset: u64, len: u64) -> Result<()> {
        self.inner.require_container()?;
        let mut blob = self.inner.blobs.get_mut(&self.name).ok_or_else(|| self.not_found())?;
        self.check_range(&blob, offset, len)?;
        self.inner.counters.clears.fetch_add(1, Ordering::Relaxed);
        let start = offset as usize;
        blob.data[start..start + len as usize].fill(0);
        Ok(())
    }

    async fn resize(&self, size: u64) -> Result<()> {
        self.inner.require_container()?;
        check_aligned(0, size, self.inner.page_size)?;
        let mut blob = self.inner.blobs.get_mut(&self.name).ok_or_else(|| self.not_found())?;
        self.inner.counters.resizes.fetch_add(1, Ordering::Relaxed);
        blob.data.resize(size as usize, 0);
        blob.content_length = blob.content_length.min(size);
        Ok(())
    }

    async fn set_content_length(&self, len: u64) -> Result<()> {
        self.inner.require_container()?;
        let mut blob = self.inner.blobs.get_mut(&self.name).ok_or_else(|| self.not_found())?;
        blob.content_length = len;
        Ok(())
    }

    async fn delete_if_exists(&self) -> Result<bool> {
        self.inner.require_container()?;
        self.inner.pending.remove(&self.name);
        Ok(self.inner.blobs.remove(&self.name).is_some())
    }

    async fn copy_state(&self) -> Result<Option<CopyState>> {
        self.inner.require_container()?;
        let finished = match self.inner.pending.get_mut(&self.name) {
            Some(mut pending) => {
                pending.polls_left = pending.polls_left.saturating_sub(1);
                pending.polls_left == 0
            }
            None => false,
        };
        if finished {
            if let Some((_, mut pending)) = self.inner.pending.remove(&self.name) {
                self.inner.finish_copy(&self.name, &mut pending);
            }
        }
        let blob = self.inner.blobs.get(&self.name).ok_or_else(|| self.not_found())?;
        Ok(blob.copy.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn container() -> MemoryContainer {
        let container = MemoryContainer::new("test-container");
        container.create_if_missing().await.unwrap();
        container
    }

    #[tokio::test]
    async fn test_container_lifecycle() {
        let container = MemoryContainer::new("c");
        assert!(!container.exists().await.unwrap());
        assert!(container.create_if_missing().await.unwrap());
        assert!(!container.create_if_missing().await.unwrap());
        assert!(container.exists().await.unwrap());
        assert!(container.delete_if_exists().await.unwrap());
        assert!(!container.delete_if_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_blob_requires_container() {
        let container = MemoryContainer::new("c");
        let blob = container.page_blob("a");
        assert!(blob.create(0).await.unwrap_err().is_not_found());
        assert!(!blob.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_misaligned_ranges() {
        let container = container().await;
        let blob = container.page_blob("a");
        blob.create(1024).await.unwrap();

        assert!(blob.write_range(1, Bytes::from(vec![0; 512])).await.is_err());
        assert!(blob.write_range(0, Bytes::from(vec![0; 100])).await.is_err());
        assert!(blob.read_range(0, 100).await.is_err());
        assert!(blob.read_range(1024, 512).await.is_err());
        assert!(blob.create(100).await.is_err());
    }

    #[tokio::test]
    async fn test_write_read_clear() {
        let container = container().await;
        let blob = container.page_blob("a");
        blob.create(1024).await.unwrap();

        blob.write_range(512, Bytes::from(vec![7u8; 512])).await.unwrap();
        let data = blob.read_range(0, 1024).await.unwrap();
        assert!(data[..512].iter().all(|&b| b == 0));
        assert!(data[512..].iter().all(|&b| b == 7));

        blob.clear_range(512, 512).await.unwrap();
        let data = blob.read_range(512, 512).await.unwrap();
        assert!(data.iter().all(|&b| b == 0));

        let stats = container.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.clears, 1);
    }

    #[tokio::test]
    async fn test_resize_and_length() {
        let container = container().await;
        let blob = container.page_blob("a");
        blob.create(0).await.unwrap();
        blob.resize(2048).await.unwrap();
        blob.set_content_length(1500).await.unwrap();

        let props = blob.properties().await.unwrap();
        assert_eq!(props.capacity, 2048);
        assert_eq!(props.content_length, 1500);

        blob.resize(1024).await.unwrap();
        let props = blob.properties().await.unwrap();
        assert_eq!(props.capacity, 1024);
        assert_eq!(props.content_length, 1024);
    }

    #[tokio::test]
    async fn test_copy_stays_pending_until_polled() {
        let container = container().await;
        let src = container.page_blob("src");
        src.create(512).await.unwrap();
        src.write_range(0, Bytes::from(vec![1u8; 512])).await.unwrap();
        src.set_content_length(3).await.unwrap();

        container.set_copy_pending_polls(2);
        let op = container.start_copy("src", "dst").await.unwrap();
        assert_eq!(op.status, CopyStatus::Pending);

        let dst = container.page_blob("dst");
        assert_eq!(dst.copy_state().await.unwrap().unwrap().status, CopyStatus::Pending);
        let state = dst.copy_state().await.unwrap().unwrap();
        assert_eq!(state.status, CopyStatus::Succeeded);
        assert_eq!(state.id, Some(op.id));
        assert_eq!(dst.properties().await.unwrap().content_length, 3);
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_destination() {
        let container = container().await;
        let src = container.page_blob("src");
        src.create(512).await.unwrap();
        let dst = container.page_blob("dst");
        dst.create(512).await.unwrap();
        dst.write_range(0, Bytes::from(vec![9u8; 512])).await.unwrap();

        container.fail_next_copy("boom");
        let op = container.start_copy("src", "dst").await.unwrap();
        assert_eq!(op.status, CopyStatus::Failed("boom".into()));
        assert_eq!(dst.read_range(0, 512).await.unwrap()[0], 9);
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let container = container().await;
        let err = container.start_copy("nope", "dst").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
