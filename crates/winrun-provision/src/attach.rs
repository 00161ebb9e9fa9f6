//! External image-attach collaborator.
//!
//! Mounting an ISO is delegated to the platform's image tool; the contract
//! is exit code + stderr bytes + parsed stdout. The trait keeps the
//! validator testable with an in-process fake, and the production
//! implementation shells out to `hdiutil`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{ProvisioningError, Result};

/// A mounted image that must be detached on every exit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountHandle {
    /// Filesystem location of the mounted image contents.
    pub mount_point: PathBuf,
    /// Device identifier to pass back to detach (e.g. `/dev/disk4`).
    pub device: String,
}

/// Attaches and detaches disk images read-only.
#[async_trait]
pub trait ImageAttacher: Send + Sync + 'static {
    /// Mount `image` read-only and return the handle.
    async fn attach_read_only(&self, image: &Path) -> Result<MountHandle>;

    /// Unmount a previously attached image.
    async fn detach(&self, handle: &MountHandle) -> Result<()>;
}

/// Production attacher shelling out to `hdiutil`.
///
/// `hdiutil attach -readonly -nobrowse -plist <image>` prints a property
/// list on stdout; the mount point and device entry are extracted from it.
/// Failures surface stderr verbatim in the error detail.
pub struct HdiutilAttacher {
    tool: PathBuf,
}

impl Default for HdiutilAttacher {
    fn default() -> Self {
        Self::new()
    }
}

impl HdiutilAttacher {
    /// Attacher using `hdiutil` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self { tool: PathBuf::from("hdiutil") }
    }

    /// Attacher using an explicit tool path.
    #[must_use]
    pub fn with_tool(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }
}

#[async_trait]
impl ImageAttacher for HdiutilAttacher {
    async fn attach_read_only(&self, image: &Path) -> Result<MountHandle> {
        let output = tokio::process::Command::new(&self.tool)
            .arg("attach")
            .arg("-readonly")
            .arg("-nobrowse")
            .arg("-plist")
            .arg(image)
            .output()
            .await
            .map_err(|e| ProvisioningError::IsoMountFailed {
                detail: format!("spawning {}: {e}", self.tool.display()),
            })?;

        if !output.status.success() {
            return Err(ProvisioningError::IsoMountFailed {
                detail: format!(
                    "exit {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_attach_plist(&stdout).ok_or_else(|| ProvisioningError::IsoMountFailed {
            detail: "attach output carried no mount point".to_string(),
        })
    }

    async fn detach(&self, handle: &MountHandle) -> Result<()> {
        let output = tokio::process::Command::new(&self.tool)
            .arg("detach")
            .arg(&handle.device)
            .output()
            .await
            .map_err(|e| ProvisioningError::IsoMountFailed {
                detail: format!("spawning {}: {e}", self.tool.display()),
            })?;

        if !output.status.success() {
            return Err(ProvisioningError::IsoMountFailed {
                detail: format!(
                    "detach exit {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

/// Extract mount point and device entry from `hdiutil -plist` output.
///
/// The plist is XML; the first `dev-entry` and `mount-point` string values
/// are all we need, so a full plist parser is not warranted.
fn parse_attach_plist(plist: &str) -> Option<MountHandle> {
    let device = string_after_key(plist, "dev-entry")?;
    let mount_point = string_after_key(plist, "mount-point")?;
    Some(MountHandle { mount_point: PathBuf::from(mount_point), device })
}

fn string_after_key(plist: &str, key: &str) -> Option<String> {
    let needle = format!("<key>{key}</key>");
    let after = &plist[plist.find(&needle)? + needle.len()..];
    let start = after.find("<string>")? + "<string>".len();
    let end = after.find("</string>")?;
    (start <= end).then(|| after[start..end].to_string())
}
