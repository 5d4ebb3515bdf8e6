//! Configuration for the blob file system.
//!
//! Loaded from JSON or from the environment. The connection string is only
//! parsed here; building the storage client happens in `azure`.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{BlobFsError, Result};
use crate::page::{align_up, PAGE_SIZE};

pub const CONNECTION_STRING_VAR: &str = "AZURE_STORAGE_CONNECTION_STRING";
pub const CONTAINER_VAR: &str = "PAGEBLOB_FS_CONTAINER";
pub const BUFFER_SIZE_VAR: &str = "PAGEBLOB_FS_BUFFER_SIZE";

pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_PROVISIONED_CAPACITY: u64 = 1024 * 1024 * 1024; // 1GB, sparse
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_REPLACE_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobFsConfig {
    pub connection_string: Option<String>,
    pub container: String,
    /// Stream buffer size in bytes, rounded up to a whole page
    pub buffer_size: usize,
    /// Size each Azure page blob is created with
    pub provisioned_capacity: u64,
    pub replace_poll_interval_ms: u64,
    pub replace_timeout_ms: u64,
}

impl Default for BlobFsConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            container: "pageblob-fs".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            provisioned_capacity: DEFAULT_PROVISIONED_CAPACITY,
            replace_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            replace_timeout_ms: DEFAULT_REPLACE_TIMEOUT_MS,
        }
    }
}

impl BlobFsConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `AZURE_STORAGE_CONNECTION_STRING`,
    /// `PAGEBLOB_FS_CONTAINER` and `PAGEBLOB_FS_BUFFER_SIZE`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(conn) = env::var(CONNECTION_STRING_VAR) {
            config.connection_string = Some(conn);
        }
        if let Ok(container) = env::var(CONTAINER_VAR) {
            config.container = container;
        }
        if let Ok(size) = env::var(BUFFER_SIZE_VAR) {
            config.buffer_size = size.parse().map_err(|_| {
                BlobFsError::ConfigError(format!("{} is not a byte count: {}", BUFFER_SIZE_VAR, size))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container.is_empty() {
            return Err(BlobFsError::ConfigError("container name cannot be empty".into()));
        }
        if self.provisioned_capacity % PAGE_SIZE != 0 {
            return Err(BlobFsError::ConfigError(format!(
                "provisioned_capacity {} is not a multiple of {}",
                self.provisioned_capacity, PAGE_SIZE
            )));
        }
        if self.replace_poll_interval_ms == 0 {
            return Err(BlobFsError::ConfigError("replace_poll_interval_ms must be positive".into()));
        }
        if let Some(conn) = &self.connection_string {
            ConnectionInfo::parse(conn)?;
        }
        Ok(())
    }

    /// Buffer size rounded up to the page size
    pub fn aligned_buffer_size(&self) -> usize {
        align_up(self.buffer_size as u64, PAGE_SIZE).map_or(self.buffer_size, |n| n as usize)
    }

    pub fn replace_poll_interval(&self) -> Duration {
        Duration::from_millis(self.replace_poll_interval_ms)
    }

    pub fn replace_timeout(&self) -> Duration {
        Duration::from_millis(self.replace_timeout_ms)
    }
}

/// The parts of a storage connection string this crate uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub account_name: String,
    pub account_key: String,
    /// Set for the emulator or custom endpoints
    pub blob_endpoint: Option<String>,
}

impl ConnectionInfo {
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut account_name = String::new();
        let mut account_key = String::new();
        let mut blob_endpoint = None;

        for part in connection_string.split(';') {
            if let Some((key, value)) = part.split_once('=') {
                match key.trim() {
                    "AccountName" => account_name = value.to_string(),
                    "AccountKey" => account_key = value.to_string(),
                    "BlobEndpoint" => blob_endpoint = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        if account_name.is_empty() || account_key.is_empty() {
            return Err(BlobFsError::ConfigError(
                "Invalid connection string: missing AccountName or AccountKey".into(),
            ));
        }

        Ok(Self {
            account_name,
            account_key,
            blob_endpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONN: &str = "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=a2V5PT0=;EndpointSuffix=core.windows.net";

    #[test]
    fn test_parse_connection_string() {
        let info = ConnectionInfo::parse(CONN).unwrap();
        assert_eq!(info.account_name, "acct");
        // base64 padding contains '=' and must survive split_once
        assert_eq!(info.account_key, "a2V5PT0=");
        assert_eq!(info.blob_endpoint, None);
    }

    #[test]
    fn test_parse_emulator_connection_string() {
        let info = ConnectionInfo::parse(
            "AccountName=devstoreaccount1;AccountKey=key;BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1",
        )
        .unwrap();
        assert_eq!(
            info.blob_endpoint.as_deref(),
            Some("http://127.0.0.1:10000/devstoreaccount1")
        );
    }

    #[test]
    fn test_parse_rejects_missing_key() {
        assert!(matches!(
            ConnectionInfo::parse("AccountName=acct"),
            Err(BlobFsError::ConfigError(_))
        ));
    }

    #[test]
    fn test_json_defaults() {
        let config = BlobFsConfig::from_json_str(r#"{ "container": "trees" }"#).unwrap();
        assert_eq!(config.container, "trees");
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.replace_timeout(), Duration::from_secs(60));
        assert!(config.connection_string.is_none());
    }

    #[test]
    fn test_json_validation() {
        assert!(BlobFsConfig::from_json_str(r#"{ "container": "" }"#).is_err());
        assert!(BlobFsConfig::from_json_str(r#"{ "provisioned_capacity": 1000 }"#).is_err());
        assert!(BlobFsConfig::from_json_str(r#"{ "connection_string": "garbage" }"#).is_err());
        assert!(BlobFsConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_buffer_size_rounds_to_page() {
        let config = BlobFsConfig {
            buffer_size: 1000,
            ..BlobFsConfig::default()
        };
        assert_eq!(config.aligned_buffer_size(), 1024);
        assert_eq!(BlobFsConfig::default().aligned_buffer_size(), 4096);
    }
}
