use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobFsError {
    #[error("Blob or container not found: {path}")]
    NotFound { path: String },

    #[error("Blob already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Access denied: cannot {op} '{path}'")]
    AccessDenied { path: String, op: &'static str },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O failure during {op} on '{path}' at offset {offset} (len {len}): {message}")]
    Io {
        op: &'static str,
        path: String,
        offset: u64,
        len: u64,
        message: String,
    },

    #[error("Replace of '{from}' onto '{to}' failed: {reason}")]
    ReplaceFailed {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Azure SDK error: {0}")]
    AzureError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, BlobFsError>;

impl BlobFsError {
    /// Attach the failing operation and byte range to a storage-medium error.
    ///
    /// Caller-facing errors (not found, access denied, bad arguments) pass
    /// through unchanged so they keep their kind.
    pub fn context(self, op: &'static str, path: &str, offset: u64, len: u64) -> Self {
        match self {
            BlobFsError::AzureError(message) => BlobFsError::Io {
                op,
                path: path.to_string(),
                offset,
                len,
                message,
            },
            BlobFsError::IoError(err) => BlobFsError::Io {
                op,
                path: path.to_string(),
                offset,
                len,
                message: err.to_string(),
            },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobFsError::NotFound { .. })
    }
}

impl From<azure_core::Error> for BlobFsError {
    fn from(err: azure_core::Error) -> Self {
        BlobFsError::AzureError(err.to_string())
    }
}

impl From<BlobFsError> for io::Error {
    fn from(err: BlobFsError) -> Self {
        let kind = match &err {
            BlobFsError::NotFound { .. } => io::ErrorKind::NotFound,
            BlobFsError::AlreadyExists { .. } => io::ErrorKind::AlreadyExists,
            BlobFsError::AccessDenied { .. } => io::ErrorKind::PermissionDenied,
            BlobFsError::InvalidArgument(_) | BlobFsError::ConfigError(_) => {
                io::ErrorKind::InvalidInput
            }
            BlobFsError::Utf8Error(_) => io::ErrorKind::InvalidData,
            BlobFsError::IoError(inner) => inner.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
