//! Provisioning error taxonomy.
//!
//! Recoverable guest provisioning errors are logged and never surface here;
//! everything in this enum terminates the current phase. `Cancelled` is the
//! canonical cancellation error and is never retried internally.

use std::path::PathBuf;

use thiserror::Error;

use crate::phase::ProvisioningPhase;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProvisioningError>;

/// Errors from the provisioning pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisioningError {
    /// The user cancelled, or a watchdog observed the cancel flag.
    #[error("provisioning cancelled")]
    Cancelled,

    /// Configuration failed validation before any work started.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The ISO path does not exist, is not a file, or carries no Windows
    /// image.
    #[error("invalid ISO: {reason}")]
    IsoInvalid {
        /// What is wrong with the ISO.
        reason: String,
    },

    /// The external image-attach tool failed.
    #[error("failed to mount ISO: {detail}")]
    IsoMountFailed {
        /// Tool stderr or exit status.
        detail: String,
    },

    /// The image cannot run on this machine.
    #[error("unsupported ISO architecture: {architecture}")]
    IsoArchitectureUnsupported {
        /// The architecture found in the image.
        architecture: String,
    },

    /// The WIM header or XML metadata did not parse.
    #[error("failed to parse image metadata: {detail}")]
    IsoMetadataParseFailed {
        /// Parse failure description.
        detail: String,
    },

    /// Disk image creation failed.
    #[error("disk creation failed: {detail}")]
    DiskCreationFailed {
        /// I/O failure description.
        detail: String,
    },

    /// A disk image already exists at the target path.
    #[error("disk image already exists at {path}")]
    DiskAlreadyExists {
        /// The occupied path.
        path: PathBuf,
    },

    /// Requested disk size is outside the supported range.
    #[error("disk size {requested_gb} GB outside supported range {min_gb}..={max_gb} GB")]
    DiskInvalidSize {
        /// Requested size.
        requested_gb: u64,
        /// Minimum supported size.
        min_gb: u64,
        /// Maximum supported size.
        max_gb: u64,
    },

    /// The host filesystem cannot hold the disk image.
    #[error("insufficient disk space for {requested_gb} GB image")]
    DiskInsufficientSpace {
        /// Requested size.
        requested_gb: u64,
    },

    /// The VM façade did not complete an operation in time.
    #[error("VM operation timed out: {operation}")]
    VmOperationTimeout {
        /// The operation that timed out.
        operation: String,
    },

    /// Golden snapshot creation failed.
    #[error("snapshot failed: {detail}")]
    VmSnapshotFailed {
        /// Façade failure description.
        detail: String,
    },

    /// The virtualization stack is unavailable on this host.
    #[error("virtualization unavailable: {detail}")]
    VirtualizationUnavailable {
        /// Why virtualization cannot be used.
        detail: String,
    },

    /// The in-guest setup service reported a non-recoverable failure.
    #[error("guest provisioning failed (code {code}): {message}")]
    GuestProvisioningFailed {
        /// Guest error code.
        code: u32,
        /// Guest error description.
        message: String,
    },

    /// The guest never finished post-install provisioning.
    #[error("guest provisioning timed out")]
    Timeout,

    /// A phase transition outside the valid-transition table was attempted.
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Phase the machine was in.
        from: ProvisioningPhase,
        /// Phase that was requested.
        to: ProvisioningPhase,
    },

    /// Catch-all for unexpected internal failures.
    #[error("internal error: {message}")]
    InternalError {
        /// Failure description.
        message: String,
    },
}

impl ProvisioningError {
    /// Whether this error is the canonical cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
