//! Buffering layer over [`PageBlobStream`].
//!
//! Keeps a single buffered region per stream. Sequential writes collect in
//! it and go out as one remote write; sequential reads fill it ahead of the
//! caller. Touching anything outside the region flushes it first if dirty.

use std::io::SeekFrom;
use tracing::{debug, warn};

use crate::blob_stream::{resolve_seek, PageBlobStream};
use crate::error::{BlobFsError, Result};

#[must_use = "buffered writes are lost unless the stream is flushed or closed"]
pub struct BufferedBlobStream {
    inner: PageBlobStream,
    buffer_size: usize,
    /// Buffered bytes; `buffer.len()` is the region length
    buffer: Vec<u8>,
    buffer_start: u64,
    dirty: bool,
    position: u64,
    /// Where the previous read ended, used to detect sequential access
    last_read_end: Option<u64>,
}

impl std::fmt::Debug for BufferedBlobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedBlobStream")
            .field("inner", &self.inner)
            .field("buffer_size", &self.buffer_size)
            .field("buffer_start", &self.buffer_start)
            .field("buffer_len", &self.buffer.len())
            .field("dirty", &self.dirty)
            .field("position", &self.position)
            .finish()
    }
}

impl BufferedBlobStream {
    pub fn new(inner: PageBlobStream, buffer_size: usize) -> Self {
        let position = inner.position();
        Self {
            inner,
            buffer_size,
            buffer: Vec::with_capacity(buffer_size),
            buffer_start: position,
            dirty: false,
            position,
            last_read_end: Some(position),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Bytes written but not yet sent to the remote stream
    pub fn pending_bytes(&self) -> usize {
        if self.dirty {
            self.buffer.len()
        } else {
            0
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Logical length including buffered writes.
    pub fn len(&self) -> u64 {
        if self.dirty {
            self.inner.len().max(self.buffer_end())
        } else {
            self.inner.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn buffer_end(&self) -> u64 {
        self.buffer_start.saturating_add(self.buffer.len() as u64)
    }

    fn in_buffer(&self, pos: u64) -> bool {
        !self.buffer.is_empty() && pos >= self.buffer_start && pos < self.buffer_end()
    }

    /// Write out dirty data, or drop a clean read-ahead region.
    ///
    /// On failure the dirty region is kept so a later flush can retry it.
    async fn flush_buffer(&mut self) -> Result<()> {
        if self.dirty && !self.buffer.is_empty() {
            debug!(
                "Flushing {} buffered bytes of {} at offset {}",
                self.buffer.len(),
                self.inner.name(),
                self.buffer_start
            );
            self.inner.set_position(self.buffer_start);
            self.inner.write(&self.buffer).await?;
        }
        self.dirty = false;
        self.buffer.clear();
        Ok(())
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = resolve_seek(pos, self.position, self.len())?;
        if self.dirty && (target < self.buffer_start || target > self.buffer_end()) {
            self.flush_buffer().await?;
        }
        self.position = target;
        Ok(target)
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.inner.access().can_write() {
            return Err(BlobFsError::AccessDenied {
                path: self.inner.name().to_string(),
                op: "write",
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        let end = self.position.checked_add(data.len() as u64).ok_or_else(|| {
            BlobFsError::InvalidArgument(format!(
                "write of {} bytes at offset {} of {} overflows",
                data.len(),
                self.position,
                self.inner.name()
            ))
        })?;
        self.last_read_end = None;

        // Flush before taking any of `data`, so a failed write accepts nothing.
        // Only an append that fits the dirty region can stay buffered.
        let appends = self.dirty && self.position == self.buffer_end();
        if !self.buffer.is_empty() && (!appends || self.buffer.len() + data.len() > self.buffer_size) {
            self.flush_buffer().await?;
        }

        if self.buffer.is_empty() {
            if data.len() >= self.buffer_size {
                self.inner.set_position(self.position);
                self.inner.write(data).await?;
                self.position = end;
                return Ok(());
            }
            self.buffer_start = self.position;
        }

        self.buffer.extend_from_slice(data);
        self.dirty = true;
        self.position = end;
        Ok(())
    }

    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if !self.inner.access().can_read() {
            return Err(BlobFsError::AccessDenied {
                path: self.inner.name().to_string(),
                op: "read",
            });
        }

        let mut total = 0;
        while total < out.len() {
            if self.in_buffer(self.position) {
                let skip = (self.position - self.buffer_start) as usize;
                let n = (self.buffer.len() - skip).min(out.len() - total);
                out[total..total + n].copy_from_slice(&self.buffer[skip..skip + n]);
                self.position += n as u64;
                total += n;
                continue;
            }

            self.flush_buffer().await?;
            if self.position >= self.inner.len() {
                break;
            }

            let remaining = out.len() - total;
            let sequential = total > 0 || self.last_read_end == Some(self.position);
            self.inner.set_position(self.position);

            if sequential && remaining < self.buffer_size {
                self.buffer.resize(self.buffer_size, 0);
                let n = self.inner.read(&mut self.buffer).await;
                let n = match n {
                    Ok(n) => n,
                    Err(e) => {
                        self.buffer.clear();
                        return Err(e);
                    }
                };
                self.buffer.truncate(n);
                self.buffer_start = self.position;
                if n == 0 {
                    break;
                }
            } else {
                let n = self.inner.read(&mut out[total..]).await?;
                self.position += n as u64;
                total += n;
                break;
            }
        }

        self.last_read_end = Some(self.position);
        Ok(total)
    }

    /// Send buffered writes to the remote stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.flush_buffer().await?;
        self.inner.flush().await
    }

    pub async fn set_len(&mut self, len: u64) -> Result<()> {
        self.flush_buffer().await?;
        self.inner.set_len(len).await
    }

    /// Flush and release the stream.
    pub async fn close(mut self) -> Result<()> {
        self.flush().await
    }
}

impl Drop for BufferedBlobStream {
    fn drop(&mut self) {
        if self.dirty && !self.buffer.is_empty() {
            warn!(
                "Dropping stream {} with {} unflushed bytes at offset {}; call close() or flush()",
                self.inner.name(),
                self.buffer.len(),
                self.buffer_start
            );
        }
    }
}
