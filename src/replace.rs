//! Atomic replace over server-side copy.
//!
//! The medium has no rename, so replacing a file copies the source blob onto
//! the destination and waits for the copy to reach a terminal state. The
//! destination only counts as replaced once the copy reports Succeeded.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{BlobFsError, Result};
use crate::storage::{BlobContainer, CopyStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOptions {
    pub poll_interval: Duration,
    /// Give up waiting for a pending copy after this long
    pub timeout: Duration,
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Copy blob `source` onto blob `destination` and wait for the result.
///
/// A missing source is `NotFound`. A missing destination is created empty
/// first. A failed or timed-out copy is `ReplaceFailed` and means the
/// replace did not happen; calling again with the same arguments is safe.
/// The source is left in place.
pub async fn replace_blob(
    container: &dyn BlobContainer,
    source: &str,
    destination: &str,
    options: ReplaceOptions,
) -> Result<()> {
    let failed = |reason: String| BlobFsError::ReplaceFailed {
        from: source.to_string(),
        to: destination.to_string(),
        reason,
    };

    let src = container.page_blob(source);
    if !src.exists().await? {
        return Err(BlobFsError::NotFound {
            path: source.to_string(),
        });
    }

    let dst = container.page_blob(destination);
    if !dst.exists().await? {
        debug!("Creating empty destination {} for replace", destination);
        dst.create(0).await?;
    }

    info!("Replacing {} with {}", destination, source);
    let operation = container.start_copy(source, destination).await?;
    let deadline = Instant::now() + options.timeout;
    let mut status = operation.status.clone();

    while status == CopyStatus::Pending {
        if Instant::now() >= deadline {
            warn!("Copy {} onto {} still pending after {:?}", operation.id, destination, options.timeout);
            return Err(failed(format!(
                "copy {} did not complete within {:?}",
                operation.id, options.timeout
            )));
        }
        sleep(options.poll_interval).await;

        status = match dst.copy_state().await? {
            Some(state) if state.id.as_deref() == Some(operation.id.as_str()) => state.status,
            Some(state) => {
                return Err(failed(format!(
                    "copy {} was superseded by {:?}",
                    operation.id, state.id
                )))
            }
            None => return Err(failed(format!("copy {} is no longer tracked", operation.id))),
        };
        debug!("Copy {} onto {}: {:?}", operation.id, destination, status);
    }

    match status {
        CopyStatus::Succeeded => {
            info!("Replaced {} with {}", destination, source);
            Ok(())
        }
        CopyStatus::Failed(reason) => {
            warn!("Copy {} onto {} failed: {}", operation.id, destination, reason);
            Err(failed(reason))
        }
        CopyStatus::Pending => Err(failed(format!("copy {} is still pending", operation.id))),
    }
}
