//! Sparse disk image creation and removal.
//!
//! The disk is a plain file truncated to its nominal size; APFS and ext4
//! keep it sparse, so a fresh 64 GB image occupies a few kilobytes until
//! Windows starts writing.

use std::path::{Path, PathBuf};

use crate::config::{MAX_DISK_GB, MIN_DISK_GB};
use crate::error::{ProvisioningError, Result};

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Outcome of a successful disk creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCreationResult {
    /// Where the image lives.
    pub path: PathBuf,
    /// Nominal size in bytes.
    pub size_bytes: u64,
}

/// Create a sparse disk image of `size_gb` at `path`.
///
/// # Errors
///
/// - [`ProvisioningError::DiskInvalidSize`] outside 32..=2048 GB.
/// - [`ProvisioningError::DiskAlreadyExists`] when the path is occupied.
/// - [`ProvisioningError::DiskInsufficientSpace`] when the filesystem
///   refuses the allocation.
/// - [`ProvisioningError::DiskCreationFailed`] for other I/O failures
///   (missing parent directories are created first).
pub async fn create_disk_image(path: &Path, size_gb: u64) -> Result<DiskCreationResult> {
    if !(MIN_DISK_GB..=MAX_DISK_GB).contains(&size_gb) {
        return Err(ProvisioningError::DiskInvalidSize {
            requested_gb: size_gb,
            min_gb: MIN_DISK_GB,
            max_gb: MAX_DISK_GB,
        });
    }

    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(ProvisioningError::DiskAlreadyExists { path: path.to_path_buf() });
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            ProvisioningError::DiskCreationFailed {
                detail: format!("creating {}: {e}", parent.display()),
            }
        })?;
    }

    let size_bytes = size_gb * BYTES_PER_GB;
    let file = tokio::fs::File::create(path).await.map_err(|e| {
        ProvisioningError::DiskCreationFailed { detail: format!("{}: {e}", path.display()) }
    })?;

    if let Err(e) = file.set_len(size_bytes).await {
        // Remove the partial file so a retry does not hit DiskAlreadyExists.
        let _ = tokio::fs::remove_file(path).await;
        return Err(match e.kind() {
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded => {
                ProvisioningError::DiskInsufficientSpace { requested_gb: size_gb }
            },
            _ => ProvisioningError::DiskCreationFailed {
                detail: format!("truncate to {size_bytes} bytes: {e}"),
            },
        });
    }

    tracing::info!(path = %path.display(), size_gb, "created sparse disk image");
    Ok(DiskCreationResult { path: path.to_path_buf(), size_bytes })
}

/// Delete the disk image, returning the bytes its removal nominally freed.
///
/// Used by rollback; a missing file frees zero bytes and is not an error.
pub async fn delete_disk_image(path: &Path) -> std::result::Result<u64, String> {
    let size = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(format!("stat {}: {e}", path.display())),
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), freed = size, "deleted disk image");
            Ok(size)
        },
        Err(e) => Err(format!("remove {}: {e}", path.display())),
    }
}
