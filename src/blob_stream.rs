//! Page-aligned remote stream.
//!
//! Maps byte-offset reads and writes onto page-aligned range calls against a
//! [`PageBlob`]. The logical length is tracked separately from the allocated
//! capacity. Bytes between the logical length and the capacity are always
//! zero: truncation clears them, and newly allocated pages start zeroed. That
//! lets a write past the end skip the explicit zero-fill of the gap.

use bytes::Bytes;
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{BlobFsError, Result};
use crate::page::{align_down, align_up, PageSpan};
use crate::storage::PageBlob;

/// Requested access for an open stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

impl FileAccess {
    pub fn can_read(self) -> bool {
        matches!(self, FileAccess::Read | FileAccess::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, FileAccess::Write | FileAccess::ReadWrite)
    }
}

/// Resolve a seek against a position and length.
pub(crate) fn resolve_seek(pos: SeekFrom, position: u64, length: u64) -> Result<u64> {
    let (base, delta) = match pos {
        SeekFrom::Start(n) => return Ok(n),
        SeekFrom::Current(d) => (position, d),
        SeekFrom::End(d) => (length, d),
    };
    base.checked_add_signed(delta).ok_or_else(|| {
        BlobFsError::InvalidArgument(format!(
            "seek by {} from {} leaves the stream bounds",
            delta, base
        ))
    })
}

/// A random-access stream over a single page blob.
pub struct PageBlobStream {
    blob: Arc<dyn PageBlob>,
    access: FileAccess,
    page_size: u64,
    position: u64,
    length: u64,
    /// Allocated bytes, a multiple of `page_size`
    capacity: u64,
}

impl std::fmt::Debug for PageBlobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBlobStream")
            .field("blob", &self.blob.name())
            .field("access", &self.access)
            .field("position", &self.position)
            .field("length", &self.length)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl PageBlobStream {
    /// Open a stream over an existing blob.
    pub async fn open(blob: Arc<dyn PageBlob>, access: FileAccess) -> Result<Self> {
        let props = blob
            .properties()
            .await
            .map_err(|e| e.context("open", blob.name(), 0, 0))?;
        let page_size = blob.page_size();

        debug!(
            "Opened {} ({:?}): length={}, capacity={}",
            blob.name(),
            access,
            props.content_length,
            props.capacity
        );

        Ok(Self {
            blob,
            access,
            page_size,
            position: 0,
            length: props.content_length,
            capacity: props.capacity,
        })
    }

    pub fn name(&self) -> &str {
        self.blob.name()
    }

    pub fn access(&self) -> FileAccess {
        self.access
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Allocated capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Positions past the end are allowed; reads there return 0.
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.position = resolve_seek(pos, self.position, self.length)?;
        Ok(self.position)
    }

    fn deny(&self, op: &'static str) -> BlobFsError {
        BlobFsError::AccessDenied {
            path: self.blob.name().to_string(),
            op,
        }
    }

    /// Read into `buf` from the current position.
    ///
    /// Returns 0 at or past the end of the stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.access.can_read() {
            return Err(self.deny("read"));
        }
        if buf.is_empty() || self.position >= self.length {
            return Ok(0);
        }

        let n = (buf.len() as u64).min(self.length - self.position);
        let span = PageSpan::covering(self.position, n, self.page_size)?;
        trace!(
            "read {}: pos={}, len={}, pages=[{}, {})",
            self.name(),
            self.position,
            n,
            span.start,
            span.end
        );

        let data = self
            .blob
            .read_range(span.start, span.len())
            .await
            .map_err(|e| e.context("read", self.blob.name(), self.position, n))?;

        let skip = (self.position - span.start) as usize;
        let n = n as usize;
        let available = data.len().saturating_sub(skip).min(n);
        buf[..available].copy_from_slice(&data[skip..skip + available]);
        buf[available..n].fill(0);

        self.position += n as u64;
        Ok(n)
    }

    /// Write all of `buf` at the current position.
    ///
    /// Partial boundary pages are read, patched and written back whole.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.access.can_write() {
            return Err(self.deny("write"));
        }
        if buf.is_empty() {
            return Ok(());
        }

        let offset = self.position;
        let len = buf.len() as u64;
        let span = PageSpan::covering(offset, len, self.page_size)?;
        let end = offset + len;

        self.ensure_capacity(span.end)
            .await
            .map_err(|e| e.context("resize", self.blob.name(), offset, len))?;

        let mut region = vec![0u8; span.len() as usize];
        self.fill_boundary_pages(&mut region, span, offset, end)
            .await
            .map_err(|e| e.context("write", self.blob.name(), offset, len))?;

        let skip = (offset - span.start) as usize;
        region[skip..skip + buf.len()].copy_from_slice(buf);

        debug!(
            "write {}: pos={}, len={}, pages=[{}, {})",
            self.name(),
            offset,
            len,
            span.start,
            span.end
        );
        self.blob
            .write_range(span.start, Bytes::from(region))
            .await
            .map_err(|e| e.context("write", self.blob.name(), offset, len))?;

        if end > self.length {
            self.blob
                .set_content_length(end)
                .await
                .map_err(|e| e.context("write", self.blob.name(), offset, len))?;
            self.length = end;
        }
        self.position = end;
        Ok(())
    }

    /// Load the existing content of partially covered first and last pages.
    ///
    /// Pages at or past the logical length are known to be zero and are not read.
    async fn fill_boundary_pages(
        &self,
        region: &mut [u8],
        span: PageSpan,
        offset: u64,
        end: u64,
    ) -> Result<()> {
        let ps = self.page_size;
        let first = span.first_page();
        let last = span.last_page(ps);

        let head_partial = offset % ps != 0 && first < self.length;
        let tail_partial = end % ps != 0 && last < self.length && !(head_partial && last == first);

        if head_partial {
            let page = self.blob.read_range(first, ps).await?;
            let n = page.len().min(ps as usize);
            region[..n].copy_from_slice(&page[..n]);
        }
        if tail_partial {
            let page = self.blob.read_range(last, ps).await?;
            let at = (last - first) as usize;
            let n = page.len().min(ps as usize);
            region[at..at + n].copy_from_slice(&page[..n]);
        }
        Ok(())
    }

    /// Grow the allocation to cover `required` bytes. Never shrinks.
    async fn ensure_capacity(&mut self, required: u64) -> Result<()> {
        if required <= self.capacity {
            return Ok(());
        }
        let new_capacity = align_up(required, self.page_size)?;
        debug!(
            "Growing {} from {} to {} bytes",
            self.name(),
            self.capacity,
            new_capacity
        );
        self.blob.resize(new_capacity).await?;
        self.capacity = new_capacity;
        Ok(())
    }

    /// Set the logical length.
    ///
    /// Growing exposes zeros. Shrinking zeroes the cut-off bytes but keeps
    /// the allocated pages.
    pub async fn set_len(&mut self, new_len: u64) -> Result<()> {
        if !self.access.can_write() {
            return Err(self.deny("set length of"));
        }
        let old_len = self.length;
        if new_len == old_len {
            return Ok(());
        }

        if new_len > old_len {
            let required = align_up(new_len, self.page_size)?;
            self.ensure_capacity(required)
                .await
                .map_err(|e| e.context("set_len", self.blob.name(), old_len, new_len - old_len))?;
        } else {
            self.zero_tail(new_len, old_len)
                .await
                .map_err(|e| e.context("set_len", self.blob.name(), new_len, old_len - new_len))?;
        }

        self.blob
            .set_content_length(new_len)
            .await
            .map_err(|e| e.context("set_len", self.blob.name(), new_len, 0))?;
        self.length = new_len;
        Ok(())
    }

    /// Zero `[from, to)` so the bytes past the new end read back as zeros.
    async fn zero_tail(&self, from: u64, to: u64) -> Result<()> {
        let ps = self.page_size;
        let mut clear_from = from;

        if from % ps != 0 {
            let page_start = align_down(from, ps);
            let page = self.blob.read_range(page_start, ps).await?;
            let mut page = page.to_vec();
            page.resize(ps as usize, 0);
            page[(from - page_start) as usize..].fill(0);
            self.blob.write_range(page_start, Bytes::from(page)).await?;
            clear_from = page_start + ps;
        }

        let clear_to = align_up(to, ps)?.min(self.capacity);
        if clear_to > clear_from {
            self.blob.clear_range(clear_from, clear_to - clear_from).await?;
        }
        Ok(())
    }

    /// Nothing is buffered at this layer; writes are durable once they return.
    pub async fn flush(&mut self) -> Result<()> {
        trace!("flush {}: no-op", self.name());
        Ok(())
    }
}
