//! VM façade contract.
//!
//! The hypervisor integration lives outside this crate; provisioning only
//! needs these five operations. The disk image handle is passed via the
//! [`crate::config::InstallerVmSpec`] after `createDisk` completes — the
//! façade never touches the image before that.

use async_trait::async_trait;

use crate::config::InstallerVmSpec;
use crate::error::Result;

/// External hypervisor collaborator driving the provisioning VM.
#[async_trait]
pub trait VmFacade: Send + Sync + 'static {
    /// Boot the installer VM with the given devices.
    async fn start_installer(&self, spec: &InstallerVmSpec) -> Result<()>;

    /// Wait until Windows setup finishes and the guest powers off.
    async fn wait_for_install_complete(&self) -> Result<()>;

    /// Boot the installed system from disk for post-install provisioning.
    async fn start_provisioned(&self) -> Result<()>;

    /// Snapshot the disk state under `name` (the golden snapshot).
    async fn create_snapshot(&self, name: &str) -> Result<()>;

    /// Stop whatever VM is running, forcefully if needed.
    async fn stop(&self) -> Result<()>;
}

/// Name of the post-provisioning baseline snapshot.
pub const GOLDEN_SNAPSHOT_NAME: &str = "golden";
