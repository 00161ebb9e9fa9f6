//! Hypervisor façade over the external `winrun-vmm` helper.
//!
//! The hypervisor integration ships as a separate privileged helper; its
//! contract is exit code + stderr. Each façade operation is one helper
//! invocation.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use winrun_provision::config::{InstallerVmSpec, StorageDevice};
use winrun_provision::{ProvisioningError, VmFacade};

/// Shells out to the `winrun-vmm` helper for every VM operation.
pub struct VmmCliFacade {
    tool: PathBuf,
    /// Disk path captured from the installer spec for later boots.
    disk_path: Mutex<Option<PathBuf>>,
}

impl VmmCliFacade {
    /// Façade using the helper at `tool`.
    #[must_use]
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into(), disk_path: Mutex::new(None) }
    }

    async fn run(&self, args: Vec<String>) -> Result<(), ProvisioningError> {
        tracing::debug!(tool = %self.tool.display(), ?args, "invoking vmm helper");
        let output = tokio::process::Command::new(&self.tool)
            .args(&args)
            .output()
            .await
            .map_err(|e| ProvisioningError::VirtualizationUnavailable {
                detail: format!("spawning {}: {e}", self.tool.display()),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ProvisioningError::InternalError {
                message: format!(
                    "{} {} failed (exit {}): {}",
                    self.tool.display(),
                    args.first().map_or("", String::as_str),
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

#[async_trait]
impl VmFacade for VmmCliFacade {
    async fn start_installer(&self, spec: &InstallerVmSpec) -> Result<(), ProvisioningError> {
        let mut args = vec![
            "start-installer".to_string(),
            "--cpus".to_string(),
            spec.cpu_count.to_string(),
            "--memory-gb".to_string(),
            spec.memory_gb.to_string(),
        ];
        if spec.efi_boot {
            args.push("--efi".to_string());
        }
        for device in &spec.storage {
            match device {
                StorageDevice::Disk { path } => {
                    args.push("--disk".to_string());
                    args.push(path.display().to_string());
                },
                StorageDevice::InstallerIso { path } => {
                    args.push("--cdrom".to_string());
                    args.push(path.display().to_string());
                },
                StorageDevice::AutounattendImage { path } => {
                    args.push("--autounattend".to_string());
                    args.push(path.display().to_string());
                },
            }
        }

        {
            #[allow(clippy::expect_used)]
            let mut disk = self.disk_path.lock().expect("disk path lock poisoned");
            *disk = spec.disk_path().map(std::path::Path::to_path_buf);
        }

        self.run(args).await
    }

    async fn wait_for_install_complete(&self) -> Result<(), ProvisioningError> {
        self.run(vec!["wait-shutdown".to_string()]).await
    }

    async fn start_provisioned(&self) -> Result<(), ProvisioningError> {
        let disk = {
            #[allow(clippy::expect_used)]
            let disk = self.disk_path.lock().expect("disk path lock poisoned");
            disk.clone()
        };
        let disk = disk.ok_or_else(|| ProvisioningError::InternalError {
            message: "no disk image recorded; installer never started".to_string(),
        })?;
        self.run(vec!["start".to_string(), "--disk".to_string(), disk.display().to_string()])
            .await
    }

    async fn create_snapshot(&self, name: &str) -> Result<(), ProvisioningError> {
        self.run(vec!["snapshot".to_string(), name.to_string()])
            .await
            .map_err(|e| ProvisioningError::VmSnapshotFailed { detail: e.to_string() })
    }

    async fn stop(&self) -> Result<(), ProvisioningError> {
        self.run(vec!["stop".to_string()]).await
    }
}
