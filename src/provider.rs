//! File-stream provider over a page-blob container.
//!
//! This is the surface callers use: open streams by path, check and delete
//! files, treat the container as the one directory, and replace files.

use std::sync::Arc;
use tracing::{debug, info};

use crate::azure::AzureContainer;
use crate::blob_stream::{FileAccess, PageBlobStream};
use crate::buffered::BufferedBlobStream;
use crate::config::{BlobFsConfig, DEFAULT_BUFFER_SIZE};
use crate::durable::DurableFileWriter;
use crate::error::{BlobFsError, Result};
use crate::page::{align_up, PAGE_SIZE};
use crate::replace::{replace_blob, ReplaceOptions};
use crate::resolver::ContainerResolver;
use crate::storage::{BlobContainer, PageBlob};

/// How `open` treats an existing or missing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Create; fail if the file exists
    CreateNew,
    /// Create, or truncate an existing file
    Create,
    /// Open; fail if the file is missing
    Open,
    OpenOrCreate,
    /// Open and truncate; fail if the file is missing
    Truncate,
    /// Open or create, positioned at the end. Write-only.
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub mode: FileMode,
    pub access: FileAccess,
    /// Buffer size in bytes; 0 disables buffering. `None` uses the
    /// provider's configured size.
    pub buffer_size: Option<usize>,
}

impl OpenOptions {
    pub fn new(mode: FileMode, access: FileAccess) -> Self {
        Self {
            mode,
            access,
            buffer_size: None,
        }
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    pub fn read() -> Self {
        Self::new(FileMode::Open, FileAccess::Read)
    }

    pub fn create() -> Self {
        Self::new(FileMode::Create, FileAccess::Write)
    }

    fn validate(&self, path: &str) -> Result<()> {
        let needs_write = matches!(
            self.mode,
            FileMode::CreateNew | FileMode::Create | FileMode::Truncate | FileMode::Append
        );
        if needs_write && !self.access.can_write() {
            return Err(BlobFsError::InvalidArgument(format!(
                "{:?} on '{}' requires write access",
                self.mode, path
            )));
        }
        if self.mode == FileMode::Append && self.access.can_read() {
            return Err(BlobFsError::InvalidArgument(format!(
                "Append on '{}' must be write-only",
                path
            )));
        }
        Ok(())
    }
}

/// Exposes files stored as page blobs in one container.
///
/// Holds a single long-lived container client for its whole lifetime.
pub struct BlobFileStreamProvider {
    resolver: ContainerResolver,
    default_buffer_size: usize,
    replace_options: ReplaceOptions,
}

impl BlobFileStreamProvider {
    pub fn new(container: Arc<dyn BlobContainer>) -> Self {
        Self {
            resolver: ContainerResolver::new(container),
            default_buffer_size: DEFAULT_BUFFER_SIZE,
            replace_options: ReplaceOptions::default(),
        }
    }

    pub fn with_config(container: Arc<dyn BlobContainer>, config: &BlobFsConfig) -> Self {
        Self {
            resolver: ContainerResolver::new(container),
            default_buffer_size: config.aligned_buffer_size(),
            replace_options: ReplaceOptions {
                poll_interval: config.replace_poll_interval(),
                timeout: config.replace_timeout(),
            },
        }
    }

    /// Provider over the Azure container named in `config`.
    pub fn from_config(config: &BlobFsConfig) -> Result<Self> {
        config.validate()?;
        let conn = config.connection_string.as_deref().ok_or_else(|| {
            BlobFsError::ConfigError("a connection string is required for Azure storage".into())
        })?;
        let container =
            AzureContainer::from_connection_string(conn, &config.container, config.provisioned_capacity)?;
        Ok(Self::with_config(Arc::new(container), config))
    }

    pub fn with_replace_options(mut self, options: ReplaceOptions) -> Self {
        self.replace_options = options;
        self
    }

    pub fn container_name(&self) -> &str {
        self.resolver.container().name()
    }

    pub fn default_buffer_size(&self) -> usize {
        self.default_buffer_size
    }

    /// Normalized blob name for a path
    pub fn normalize(&self, path: &str) -> String {
        self.resolver.normalize(path)
    }

    /// Open a buffered stream.
    pub async fn open(&self, path: &str, options: OpenOptions) -> Result<BufferedBlobStream> {
        let stream = self.open_unbuffered(path, options).await?;
        let requested = options.buffer_size.unwrap_or(self.default_buffer_size);
        let buffer_size = align_up(requested as u64, PAGE_SIZE)? as usize;
        Ok(BufferedBlobStream::new(stream, buffer_size))
    }

    /// Open a buffered stream with the provider's default buffer size.
    pub async fn open_default(&self, path: &str, mode: FileMode, access: FileAccess) -> Result<BufferedBlobStream> {
        self.open(path, OpenOptions::new(mode, access)).await
    }

    /// Open the page-aligned stream without a buffer.
    pub async fn open_unbuffered(&self, path: &str, options: OpenOptions) -> Result<PageBlobStream> {
        options.validate(path)?;
        self.resolver.ensure_container().await?;
        let blob = self.resolver.blob(path)?;
        self.prepare(&blob, options.mode).await?;

        let mut stream = PageBlobStream::open(blob, options.access).await?;
        if options.mode == FileMode::Append {
            stream.set_position(stream.len());
        }
        debug!("Opened {} as {:?}/{:?}", stream.name(), options.mode, options.access);
        Ok(stream)
    }

    /// Create, truncate or check the blob according to `mode`.
    async fn prepare(&self, blob: &Arc<dyn PageBlob>, mode: FileMode) -> Result<()> {
        let exists = blob.exists().await?;
        let not_found = || BlobFsError::NotFound {
            path: blob.name().to_string(),
        };
        match mode {
            FileMode::CreateNew if exists => Err(BlobFsError::AlreadyExists {
                path: blob.name().to_string(),
            }),
            FileMode::Open | FileMode::Truncate if !exists => Err(not_found()),
            FileMode::CreateNew | FileMode::Create | FileMode::Truncate => blob.create(0).await,
            FileMode::OpenOrCreate | FileMode::Append if !exists => blob.create(0).await,
            FileMode::Open | FileMode::OpenOrCreate | FileMode::Append => Ok(()),
        }
    }

    /// Create the container. `path` is informational: the container is the only directory.
    pub async fn create_directory(&self, path: &str) -> Result<()> {
        debug!("create_directory({}) -> container {}", path, self.container_name());
        self.resolver.ensure_container().await
    }

    pub async fn directory_exists(&self, path: &str) -> Result<bool> {
        debug!("directory_exists({}) -> container {}", path, self.container_name());
        self.resolver.container_exists().await
    }

    /// Delete the container and every blob in it.
    ///
    /// The namespace is flat, so `recursive` changes nothing: the container's
    /// blobs are its only entries and go with it.
    pub async fn delete_directory(&self, path: &str, recursive: bool) -> Result<()> {
        info!(
            "Deleting directory {} (container {}, recursive={})",
            path,
            self.container_name(),
            recursive
        );
        self.resolver.delete_container().await?;
        Ok(())
    }

    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        self.resolver.blob_exists(path).await
    }

    /// Delete a file. Deleting a missing file is not an error.
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let deleted = self.resolver.delete_blob(path).await?;
        debug!("delete_file({}): {}", path, deleted);
        Ok(())
    }

    pub async fn read_all_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let mut stream = self.open_unbuffered(path, OpenOptions::read()).await?;
        let mut data = vec![0u8; stream.len() as usize];
        let mut filled = 0;
        while filled < data.len() {
            let n = stream.read(&mut data[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);
        Ok(data)
    }

    pub async fn read_all_text(&self, path: &str) -> Result<String> {
        Ok(String::from_utf8(self.read_all_bytes(path).await?)?)
    }

    /// Replace `destination` with a copy of `source`.
    ///
    /// Blocks until the copy completes. `backup` is accepted for interface
    /// compatibility and not used; `source` is left in place.
    pub async fn replace(&self, source: &str, destination: &str, backup: Option<&str>) -> Result<()> {
        if let Some(backup) = backup {
            debug!("replace: ignoring backup name {}", backup);
        }
        let paths = self.resolver.paths();
        let source = paths.blob_name(source)?;
        let destination = paths.blob_name(destination)?;

        self.resolver.ensure_container().await?;
        replace_blob(
            self.resolver.container().as_ref(),
            &source,
            &destination,
            self.replace_options,
        )
        .await
    }

    pub fn durable_writer(&self) -> DurableFileWriter<'_> {
        DurableFileWriter::new(self)
    }
}
