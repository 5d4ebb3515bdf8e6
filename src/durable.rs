//! Whole-file writes that never leave a partially written target.
//!
//! Data goes to `<path>.tmp` first; only a complete temp file is copied onto
//! the target, and the temp file is removed afterwards.

use tracing::{debug, warn};

use crate::blob_stream::FileAccess;
use crate::error::Result;
use crate::provider::{BlobFileStreamProvider, FileMode, OpenOptions};

const TEMP_SUFFIX: &str = ".tmp";

pub struct DurableFileWriter<'a> {
    provider: &'a BlobFileStreamProvider,
}

impl<'a> DurableFileWriter<'a> {
    pub fn new(provider: &'a BlobFileStreamProvider) -> Self {
        Self { provider }
    }

    pub fn temp_path(path: &str) -> String {
        format!("{}{}", path, TEMP_SUFFIX)
    }

    /// Replace the contents of `path` with `data`.
    ///
    /// If this fails the target still holds its previous contents.
    pub async fn write_all_bytes(&self, path: &str, data: &[u8]) -> Result<()> {
        let temp = Self::temp_path(path);
        debug!("Writing {} bytes to {} via {}", data.len(), path, temp);

        let options = OpenOptions::new(FileMode::Create, FileAccess::Write);
        let mut stream = self.provider.open(&temp, options).await?;
        stream.write(data).await?;
        stream.close().await?;

        self.provider.replace(&temp, path, None).await?;

        if let Err(e) = self.provider.delete_file(&temp).await {
            // target is already replaced; a stale temp file is overwritten next time
            warn!("Failed to remove temp file {}: {}", temp, e);
        }
        Ok(())
    }

    pub async fn write_all_text(&self, path: &str, text: &str) -> Result<()> {
        self.write_all_bytes(path, text.as_bytes()).await
    }
}
