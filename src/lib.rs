/// PageBlob FS - file streams over Azure Page Blobs
///
/// Exposes open/seek/read/write/flush, file and directory checks and an
/// atomic replace on top of page-aligned blob storage.
///
/// Architecture:
/// 1. PageBlob/BlobContainer: storage medium traits (Azure or in-memory)
/// 2. PageBlobStream: byte-offset stream over 512-byte pages
/// 3. BufferedBlobStream: write coalescing and sequential read-ahead
/// 4. ContainerResolver: path normalization, container = directory
/// 5. replace_blob: server-side copy that waits for completion
/// 6. BlobFileStreamProvider: the file-system surface tying it together

pub mod error;
pub mod page;
pub mod storage;
pub mod memory;
pub mod azure;
pub mod config;
pub mod blob_stream;
pub mod buffered;
pub mod resolver;
pub mod replace;
pub mod provider;
pub mod durable;

pub use blob_stream::{FileAccess, PageBlobStream};
pub use buffered::BufferedBlobStream;
pub use config::BlobFsConfig;
pub use durable::DurableFileWriter;
pub use error::{BlobFsError, Result};
pub use memory::MemoryContainer;
pub use provider::{BlobFileStreamProvider, FileMode, OpenOptions};
pub use replace::{replace_blob, ReplaceOptions};
pub use storage::{BlobContainer, PageBlob};
