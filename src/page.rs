//! Page math for page-aligned storage.
//!
//! Page blobs only accept reads and writes whose offset and length are
//! multiples of the page size (512 bytes).

use crate::error::{BlobFsError, Result};

/// Page size of an Azure page blob
pub const PAGE_SIZE: u64 = 512;

/// Round `offset` down to the start of its page.
pub fn align_down(offset: u64, page_size: u64) -> u64 {
    offset - offset % page_size
}

/// Round `offset` up to the next page boundary.
pub fn align_up(offset: u64, page_size: u64) -> Result<u64> {
    match offset % page_size {
        0 => Ok(offset),
        rem => offset.checked_add(page_size - rem).ok_or_else(|| {
            BlobFsError::InvalidArgument(format!("offset {} overflows page alignment", offset))
        }),
    }
}

pub fn is_aligned(value: u64, page_size: u64) -> bool {
    value % page_size == 0
}

/// The page-aligned byte span `[start, end)` covering a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    pub start: u64,
    pub end: u64,
}

impl PageSpan {
    /// Span covering `[offset, offset + len)`.
    pub fn covering(offset: u64, len: u64, page_size: u64) -> Result<Self> {
        let stop = offset.checked_add(len).ok_or_else(|| {
            BlobFsError::InvalidArgument(format!("range {}+{} overflows", offset, len))
        })?;
        Ok(Self {
            start: align_down(offset, page_size),
            end: align_up(stop, page_size)?,
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn page_count(&self, page_size: u64) -> u64 {
        self.len() / page_size
    }

    /// Offset of the first page in the span
    pub fn first_page(&self) -> u64 {
        self.start
    }

    /// Offset of the last page in the span
    pub fn last_page(&self, page_size: u64) -> u64 {
        self.end.saturating_sub(page_size).max(self.start)
    }
}

/// Reject offsets or lengths that the medium cannot accept.
pub fn check_aligned(offset: u64, len: u64, page_size: u64) -> Result<()> {
    if !is_aligned(offset, page_size) || !is_aligned(len, page_size) {
        return Err(BlobFsError::InvalidArgument(format!(
            "range {}+{} is not aligned to {}-byte pages",
            offset, len, page_size
        )));
    }
    Ok(())
}
