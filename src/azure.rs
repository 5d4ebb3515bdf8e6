//! Azure page-blob medium
//!
//! Implements the storage traits over Azure Page Blobs. One `ContainerClient`
//! is built per provider and shared by every blob handle it hands out.
//!
//! The SDK has no resize call for page blobs, so blobs are created at a
//! provisioned capacity (sparse: unwritten pages are not billed) and the
//! logical length lives in blob metadata.

use async_trait::async_trait;
use azure_core::request_options::Metadata;
use azure_core::StatusCode;
use azure_storage::{CloudLocation, StorageCredentials};
use azure_storage_blobs::blob::CopyStatus as AzureCopyStatus;
use azure_storage_blobs::prelude::*;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ConnectionInfo;
use crate::error::{BlobFsError, Result};
use crate::page::{check_aligned, PAGE_SIZE};
use crate::storage::{
    BlobContainer, BlobProperties, CopyOperation, CopyState, CopyStatus, PageBlob,
    CONTENT_LENGTH_KEY,
};

/// Largest range accepted by a single Put Page call
const MAX_PUT_PAGE: u64 = 4 * 1024 * 1024;

fn status_of(err: &azure_core::Error) -> Option<StatusCode> {
    err.as_http_error().map(|e| e.status())
}

fn is_not_found(err: &azure_core::Error) -> bool {
    status_of(err) == Some(StatusCode::NotFound)
}

fn map_copy_status(status: &AzureCopyStatus, description: Option<&str>) -> CopyStatus {
    match status {
        AzureCopyStatus::Pending => CopyStatus::Pending,
        AzureCopyStatus::Success => CopyStatus::Succeeded,
        AzureCopyStatus::Aborted => CopyStatus::Failed("copy aborted".to_string()),
        #[allow(unreachable_patterns)]
        _ => CopyStatus::Failed(description.unwrap_or("copy failed").to_string()),
    }
}

fn length_metadata(len: u64) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(CONTENT_LENGTH_KEY, len.to_string());
    metadata
}

/// An Azure blob container holding page blobs
#[derive(Clone)]
pub struct AzureContainer {
    client: Arc<ContainerClient>,
    container_name: String,
    provisioned_capacity: u64,
}

impl std::fmt::Debug for AzureContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureContainer")
            .field("container_name", &self.container_name)
            .field("provisioned_capacity", &self.provisioned_capacity)
            .finish()
    }
}

impl AzureContainer {
    /// Build the container client from a connection string.
    ///
    /// No request is sent; the container is created lazily by the provider.
    pub fn from_connection_string(
        connection_string: &str,
        container_name: &str,
        provisioned_capacity: u64,
    ) -> Result<Self> {
        let info = ConnectionInfo::parse(connection_string)?;
        check_aligned(0, provisioned_capacity, PAGE_SIZE)?;

        info!(
            "Initializing Azure container client: account={}, container={}",
            info.account_name, container_name
        );

        let creds = StorageCredentials::access_key(info.account_name.clone(), info.account_key);
        let builder = match info.blob_endpoint {
            Some(uri) => ClientBuilder::with_location(
                CloudLocation::Custom {
                    account: info.account_name,
                    uri,
                },
                creds,
            ),
            None => ClientBuilder::new(info.account_name, creds),
        };

        Ok(Self {
            client: Arc::new(builder.container_client(container_name)),
            container_name: container_name.to_string(),
            provisioned_capacity,
        })
    }
}

#[async_trait]
impl BlobContainer for AzureContainer {
    fn name(&self) -> &str {
        &self.container_name
    }

    async fn create_if_missing(&self) -> Result<bool> {
        if self.client.exists().await? {
            return Ok(false);
        }
        match self.client.create().await {
            Ok(_) => {
                info!("Created container {}", self.container_name);
                Ok(true)
            }
            // another opener won the race
            Err(e) if status_of(&e) == Some(StatusCode::Conflict) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.client.exists().await?)
    }

    async fn delete_if_exists(&self) -> Result<bool> {
        match self.client.delete().await {
            Ok(_) => {
                info!("Deleted container {}", self.container_name);
                Ok(true)
            }
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn page_blob(&self, name: &str) -> Arc<dyn PageBlob> {
        Arc::new(AzurePageBlob {
            client: self.client.blob_client(name),
            blob_name: name.to_string(),
            provisioned_capacity: self.provisioned_capacity,
        })
    }

    async fn start_copy(&self, source: &str, destination: &str) -> Result<CopyOperation> {
        let source_url = self.client.blob_client(source).url()?;
        debug!("Copy Blob {} -> {}", source_url, destination);

        let response = match self.client.blob_client(destination).copy(source_url).await {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => {
                return Err(BlobFsError::NotFound {
                    path: source.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        Ok(CopyOperation {
            id: format!("{:?}", response.copy_id),
            status: map_copy_status(&response.copy_status, None),
        })
    }
}

/// A single page blob inside an [`AzureContainer`]
pub struct AzurePageBlob {
    client: BlobClient,
    blob_name: String,
    provisioned_capacity: u64,
}

impl AzurePageBlob {
    fn not_found(&self) -> BlobFsError {
        BlobFsError::NotFound {
            path: self.blob_name.clone(),
        }
    }

    fn map_err(&self, err: azure_core::Error) -> BlobFsError {
        if is_not_found(&err) {
            self.not_found()
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl PageBlob for AzurePageBlob {
    fn name(&self) -> &str {
        &self.blob_name
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.client.exists().await?)
    }

    async fn create(&self, size: u64) -> Result<()> {
        check_aligned(0, size, PAGE_SIZE)?;
        let capacity = size.max(self.provisioned_capacity);
        info!("Creating page blob {} with capacity {} bytes", self.blob_name, capacity);

        self.client
            .put_page_blob(capacity as u128)
            .metadata(length_metadata(0))
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn properties(&self) -> Result<BlobProperties> {
        let response = self.client.get_properties().await.map_err(|e| self.map_err(e))?;
        let blob = response.blob;

        let content_length = blob
            .metadata
            .as_ref()
            .and_then(|m| m.get(CONTENT_LENGTH_KEY))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(blob.properties.content_length);

        let copy = blob.properties.copy_status.as_ref().map(|status| CopyState {
            id: blob.properties.copy_id.as_ref().map(|id| format!("{:?}", id)),
            status: map_copy_status(status, blob.properties.copy_status_description.as_deref()),
        });

        Ok(BlobProperties {
            capacity: blob.properties.content_length,
            content_length,
            copy,
        })
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes> {
        check_aligned(offset, len, PAGE_SIZE)?;
        if len == 0 {
            return Ok(Bytes::new());
        }
        debug!("Reading {} bytes of {} at offset {}", len, self.blob_name, offset);

        let mut data = Vec::with_capacity(len as usize);
        let mut stream = self.client.get().range(offset..offset + len).into_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_err(e))?;
            data.extend_from_slice(&chunk.data.collect().await?);
        }

        // sparse pages can come back short
        data.resize(len as usize, 0);
        Ok(Bytes::from(data))
    }

    async fn write_range(&self, offset: u64, data: Bytes) -> Result<()> {
        check_aligned(offset, data.len() as u64, PAGE_SIZE)?;
        debug!("Writing {} bytes of {} at offset {}", data.len(), self.blob_name, offset);

        let mut written = 0u64;
        while written < data.len() as u64 {
            let chunk_len = (data.len() as u64 - written).min(MAX_PUT_PAGE);
            let start = offset + written;
            let range = BA512Range::new(start, start + chunk_len - 1)?;
            let chunk = data.slice(written as usize..(written + chunk_len) as usize);
            self.client
                .put_page(range, chunk)
                .await
                .map_err(|e| self.map_err(e))?;
            written += chunk_len;
        }
        Ok(())
    }

    async fn clear_range(&self, offset: u64, len: u64) -> Result<()> {
        check_aligned(offset, len, PAGE_SIZE)?;
        if len == 0 {
            return Ok(());
        }
        let range = BA512Range::new(offset, offset + len - 1)?;
        self.client.clear_page(range).await.map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn resize(&self, size: u64) -> Result<()> {
        check_aligned(0, size, PAGE_SIZE)?;
        let capacity = self.properties().await?.capacity;
        if size > capacity {
            return Err(BlobFsError::InvalidArgument(format!(
                "page blob {} is provisioned at {} bytes and cannot grow to {}",
                self.blob_name, capacity, size
            )));
        }
        debug!("Resize of {} to {} fits provisioned capacity {}", self.blob_name, size, capacity);
        Ok(())
    }

    async fn set_content_length(&self, len: u64) -> Result<()> {
        self.client
            .set_metadata()
            .metadata(length_metadata(len))
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn delete_if_exists(&self) -> Result<bool> {
        match self.client.delete().await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_state(&self) -> Result<Option<CopyState>> {
        Ok(self.properties().await?.copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_put_page_is_page_aligned() {
        assert_eq!(MAX_PUT_PAGE % PAGE_SIZE, 0);
    }

    #[test]
    fn test_copy_status_mapping() {
        assert_eq!(map_copy_status(&AzureCopyStatus::Pending, None), CopyStatus::Pending);
        assert_eq!(map_copy_status(&AzureCopyStatus::Success, None), CopyStatus::Succeeded);
        assert_eq!(
            map_copy_status(&AzureCopyStatus::Failed, Some("source modified")),
            CopyStatus::Failed("source modified".to_string())
        );
        assert!(map_copy_status(&AzureCopyStatus::Aborted, None).is_terminal());
    }

    #[test]
    fn test_rejects_bad_connection_string() {
        let err = AzureContainer::from_connection_string("AccountName=x", "c", 1024).unwrap_err();
        assert!(matches!(err, BlobFsError::ConfigError(_)));
    }

    #[test]
    fn test_rejects_misaligned_capacity() {
        let err = AzureContainer::from_connection_string("AccountName=x;AccountKey=eQ==", "c", 1000)
            .unwrap_err();
        assert!(matches!(err, BlobFsError::InvalidArgument(_)));
    }
}
