//! Path and container resolution.
//!
//! The blob namespace is flat: a "directory" is the provider's container and
//! there are no nested directory entities. Paths become blob names by
//! switching to `/` separators and dropping any leading container segment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{BlobFsError, Result};
use crate::storage::{BlobContainer, PageBlob};

/// Turns caller paths into blob names inside one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    container: String,
}

impl PathResolver {
    pub fn new(container: &str) -> Self {
        Self {
            container: container.to_string(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Normalize a caller path into a blob name.
    ///
    /// `\` and `/` both separate segments; empty and `.` segments are
    /// dropped, as is every leading segment equal to the container name.
    /// Normalizing a normalized name returns it unchanged.
    pub fn normalize(&self, path: &str) -> String {
        let mut segments = path
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .peekable();
        while segments.peek() == Some(&self.container.as_str()) {
            segments.next();
        }
        segments.collect::<Vec<_>>().join("/")
    }

    /// Normalize and reject paths that name no blob.
    pub fn blob_name(&self, path: &str) -> Result<String> {
        let name = self.normalize(path);
        if name.is_empty() {
            return Err(BlobFsError::InvalidArgument(format!(
                "path '{}' does not name a file",
                path
            )));
        }
        Ok(name)
    }
}

/// Resolves paths to blob handles and creates the container on first use.
pub struct ContainerResolver {
    container: Arc<dyn BlobContainer>,
    paths: PathResolver,
    ready: AtomicBool,
}

impl ContainerResolver {
    pub fn new(container: Arc<dyn BlobContainer>) -> Self {
        let paths = PathResolver::new(container.name());
        Self {
            container,
            paths,
            ready: AtomicBool::new(false),
        }
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn container(&self) -> &Arc<dyn BlobContainer> {
        &self.container
    }

    pub fn normalize(&self, path: &str) -> String {
        self.paths.normalize(path)
    }

    /// Create the container if needed.
    ///
    /// Idempotent and safe to race: concurrent callers may all reach the
    /// medium, which treats an existing container as success.
    pub async fn ensure_container(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.container.create_if_missing().await? {
            info!("Created container {}", self.container.name());
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn container_exists(&self) -> Result<bool> {
        self.container.exists().await
    }

    pub async fn delete_container(&self) -> Result<bool> {
        self.ready.store(false, Ordering::Release);
        let deleted = self.container.delete_if_exists().await?;
        debug!("Delete container {}: {}", self.container.name(), deleted);
        Ok(deleted)
    }

    /// Blob handle for a caller path, without touching the medium.
    pub fn blob(&self, path: &str) -> Result<Arc<dyn PageBlob>> {
        let name = self.paths.blob_name(path)?;
        Ok(self.container.page_blob(&name))
    }

    pub async fn blob_exists(&self, path: &str) -> Result<bool> {
        self.ensure_container().await?;
        self.blob(path)?.exists().await
    }

    pub async fn delete_blob(&self, path: &str) -> Result<bool> {
        if !self.container.exists().await? {
            return Ok(false);
        }
        self.blob(path)?.delete_if_exists().await
    }
}
