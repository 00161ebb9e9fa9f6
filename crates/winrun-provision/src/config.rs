//! Provisioning configuration and the installer VM specification.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProvisioningError, Result};

/// Smallest supported disk image, GB.
pub const MIN_DISK_GB: u64 = 32;

/// Largest supported disk image, GB.
pub const MAX_DISK_GB: u64 = 2048;

/// Default disk image size, GB.
pub const DEFAULT_DISK_GB: u64 = 64;

/// Minimum vCPUs for the installer VM.
pub const MIN_CPU_COUNT: u32 = 2;

/// Default vCPUs for the installer VM.
pub const DEFAULT_CPU_COUNT: u32 = 4;

/// Minimum guest memory, GiB.
pub const MIN_MEMORY_GB: u64 = 4;

/// Default guest memory, GiB.
pub const DEFAULT_MEMORY_GB: u64 = 8;

/// Everything needed to provision a fresh Windows VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    /// Windows installer ISO.
    pub iso_path: PathBuf,
    /// Target disk image path (`<app-support>/WinRun/windows.img` by
    /// convention).
    pub disk_image_path: PathBuf,
    /// Disk image size in GB.
    pub disk_size_gb: u64,
    /// Installer VM vCPU count.
    pub cpu_count: u32,
    /// Installer VM memory in GiB.
    pub memory_gb: u64,
    /// Optional autounattend floppy/ISO image for unattended setup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autounattend_image: Option<PathBuf>,
}

impl SetupConfig {
    /// Config with defaults for everything but the two paths.
    #[must_use]
    pub fn new(iso_path: impl Into<PathBuf>, disk_image_path: impl Into<PathBuf>) -> Self {
        Self {
            iso_path: iso_path.into(),
            disk_image_path: disk_image_path.into(),
            disk_size_gb: DEFAULT_DISK_GB,
            cpu_count: DEFAULT_CPU_COUNT,
            memory_gb: DEFAULT_MEMORY_GB,
            autounattend_image: None,
        }
    }

    /// Validate bounds and paths.
    ///
    /// # Errors
    ///
    /// - [`ProvisioningError::ConfigInvalid`] for empty paths or
    ///   out-of-range CPU/memory values.
    /// - [`ProvisioningError::DiskInvalidSize`] for a disk size outside
    ///   [`MIN_DISK_GB`]..=[`MAX_DISK_GB`].
    pub fn validate(&self) -> Result<()> {
        if self.iso_path.as_os_str().is_empty() {
            return Err(ProvisioningError::ConfigInvalid { reason: "ISO path is empty".into() });
        }
        if self.disk_image_path.as_os_str().is_empty() {
            return Err(ProvisioningError::ConfigInvalid {
                reason: "disk image path is empty".into(),
            });
        }
        if self.disk_size_gb < MIN_DISK_GB || self.disk_size_gb > MAX_DISK_GB {
            return Err(ProvisioningError::DiskInvalidSize {
                requested_gb: self.disk_size_gb,
                min_gb: MIN_DISK_GB,
                max_gb: MAX_DISK_GB,
            });
        }
        if self.cpu_count < MIN_CPU_COUNT {
            return Err(ProvisioningError::ConfigInvalid {
                reason: format!("cpu count {} below minimum {MIN_CPU_COUNT}", self.cpu_count),
            });
        }
        if self.memory_gb < MIN_MEMORY_GB {
            return Err(ProvisioningError::ConfigInvalid {
                reason: format!("memory {} GiB below minimum {MIN_MEMORY_GB}", self.memory_gb),
            });
        }
        Ok(())
    }
}

/// One storage device of the installer VM, in boot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDevice {
    /// The writable system disk image.
    Disk {
        /// Disk image path.
        path: PathBuf,
    },
    /// The bootable installer ISO, read-only.
    InstallerIso {
        /// ISO path.
        path: PathBuf,
    },
    /// Optional autounattend floppy/ISO, read-only.
    AutounattendImage {
        /// Image path.
        path: PathBuf,
    },
}

/// Contract handed to the external VM façade for the installation boot.
///
/// Device order matters: the disk comes first so reboots during setup land
/// back in the half-installed system, with the ISO as EFI fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerVmSpec {
    /// vCPU count.
    pub cpu_count: u32,
    /// Memory in GiB.
    pub memory_gb: u64,
    /// EFI firmware boot (always true for Windows on ARM).
    pub efi_boot: bool,
    /// Storage devices in boot order.
    pub storage: Vec<StorageDevice>,
}

impl InstallerVmSpec {
    /// Build the spec from a validated config.
    #[must_use]
    pub fn from_config(config: &SetupConfig) -> Self {
        let mut storage = vec![
            StorageDevice::Disk { path: config.disk_image_path.clone() },
            StorageDevice::InstallerIso { path: config.iso_path.clone() },
        ];
        if let Some(autounattend) = &config.autounattend_image {
            storage.push(StorageDevice::AutounattendImage { path: autounattend.clone() });
        }
        Self {
            cpu_count: config.cpu_count,
            memory_gb: config.memory_gb,
            efi_boot: true,
            storage,
        }
    }

    /// The disk image path (always the first storage device).
    #[must_use]
    pub fn disk_path(&self) -> Option<&Path> {
        self.storage.iter().find_map(|device| match device {
            StorageDevice::Disk { path } => Some(path.as_path()),
            _ => None,
        })
    }
}
