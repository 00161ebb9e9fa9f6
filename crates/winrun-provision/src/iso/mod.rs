//! ISO validation: mount, locate the install image, classify it.
//!
//! The mount is always released, on every exit path: the work happens in an
//! inner function and the detach runs unconditionally on its result before
//! the outcome is returned.

pub mod classify;
pub mod wim;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use classify::{IsoValidation, ValidationWarning, WarningSeverity, classify};
pub use wim::{DirectWimInspector, WimArchitecture, WimImageInfo, WimInspector, WimlibInspector};

use crate::attach::{ImageAttacher, MountHandle};
use crate::error::{ProvisioningError, Result};

/// Relative locations of the Windows install image inside the ISO.
const INSTALL_IMAGE_CANDIDATES: [&str; 2] = ["sources/install.wim", "sources/install.esd"];

/// Validates Windows installer ISOs.
pub struct IsoValidator {
    attacher: Arc<dyn ImageAttacher>,
    inspector: Arc<dyn WimInspector>,
}

impl IsoValidator {
    /// Validator using the given attach and inspect collaborators.
    #[must_use]
    pub fn new(attacher: Arc<dyn ImageAttacher>, inspector: Arc<dyn WimInspector>) -> Self {
        Self { attacher, inspector }
    }

    /// Validate the ISO at `iso_path` end to end.
    ///
    /// # Errors
    ///
    /// - [`ProvisioningError::IsoInvalid`] when the path is missing, not a
    ///   file, or carries no `sources/install.{wim,esd}`.
    /// - [`ProvisioningError::IsoMountFailed`] from the attach tool.
    /// - [`ProvisioningError::IsoMetadataParseFailed`] from the inspector.
    pub async fn validate(&self, iso_path: &Path) -> Result<IsoValidation> {
        let metadata = tokio::fs::metadata(iso_path).await.map_err(|_| {
            ProvisioningError::IsoInvalid {
                reason: format!("{} does not exist", iso_path.display()),
            }
        })?;
        if !metadata.is_file() {
            return Err(ProvisioningError::IsoInvalid {
                reason: format!("{} is not a file", iso_path.display()),
            });
        }

        let handle = self.attacher.attach_read_only(iso_path).await?;
        tracing::debug!(
            iso = %iso_path.display(),
            mount = %handle.mount_point.display(),
            "ISO mounted for validation"
        );

        let outcome = self.validate_mounted(&handle).await;

        // Unmount on every exit path; a detach failure must not mask the
        // validation outcome.
        if let Err(e) = self.attacher.detach(&handle).await {
            tracing::warn!(error = %e, mount = %handle.mount_point.display(), "ISO detach failed");
        }

        outcome
    }

    async fn validate_mounted(&self, handle: &MountHandle) -> Result<IsoValidation> {
        let image_path = locate_install_image(&handle.mount_point).await.ok_or_else(|| {
            ProvisioningError::IsoInvalid {
                reason: "no sources/install.wim or sources/install.esd in image".to_string(),
            }
        })?;

        let info = self.inspector.inspect(&image_path).await?;
        tracing::info!(
            edition = %info.edition_name,
            architecture = %info.architecture.name(),
            build = info.build,
            "Windows image identified"
        );
        Ok(classify(&info))
    }
}

async fn locate_install_image(mount_point: &Path) -> Option<PathBuf> {
    for candidate in INSTALL_IMAGE_CANDIDATES {
        let path = mount_point.join(candidate);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::wim::testing::synthetic_wim;
    use super::*;

    /// Attacher whose "mount point" is a prepared temp directory.
    struct FakeAttacher {
        mount_point: PathBuf,
        attached: Mutex<u32>,
        detached: Mutex<u32>,
        fail_attach: bool,
    }

    impl FakeAttacher {
        fn new(mount_point: PathBuf) -> Self {
            Self {
                mount_point,
                attached: Mutex::new(0),
                detached: Mutex::new(0),
                fail_attach: false,
            }
        }
    }

    #[async_trait]
    impl ImageAttacher for FakeAttacher {
        async fn attach_read_only(&self, _image: &Path) -> Result<MountHandle> {
            if self.fail_attach {
                return Err(ProvisioningError::IsoMountFailed { detail: "hdiutil: -5".into() });
            }
            *self.attached.lock().unwrap() += 1;
            Ok(MountHandle { mount_point: self.mount_point.clone(), device: "/dev/disk9".into() })
        }

        async fn detach(&self, _handle: &MountHandle) -> Result<()> {
            *self.detached.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn write_iso_stub(dir: &Path) -> PathBuf {
        let iso = dir.join("windows.iso");
        std::fs::write(&iso, b"iso-stub").unwrap();
        iso
    }

    #[tokio::test]
    async fn validates_arm64_ltsc_image() {
        let mount = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(mount.path().join("sources")).unwrap();
        std::fs::write(
            mount.path().join("sources/install.wim"),
            synthetic_wim("Windows 11 IoT Enterprise LTSC", 12, 26100),
        )
        .unwrap();

        let workdir = tempfile::tempdir().unwrap();
        let iso = write_iso_stub(workdir.path());

        let attacher = Arc::new(FakeAttacher::new(mount.path().to_path_buf()));
        let validator = IsoValidator::new(attacher.clone(), Arc::new(DirectWimInspector));

        let validation = validator.validate(&iso).await.unwrap();
        assert!(validation.is_usable);
        assert!(validation.warnings.is_empty());
        assert_eq!(*attacher.detached.lock().unwrap(), 1, "unmounted after success");
    }

    #[tokio::test]
    async fn esd_fallback_is_found() {
        let mount = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(mount.path().join("sources")).unwrap();
        std::fs::write(
            mount.path().join("sources/install.esd"),
            synthetic_wim("Windows 11 Home", 12, 26100),
        )
        .unwrap();

        let workdir = tempfile::tempdir().unwrap();
        let iso = write_iso_stub(workdir.path());

        let attacher = Arc::new(FakeAttacher::new(mount.path().to_path_buf()));
        let validator = IsoValidator::new(attacher, Arc::new(DirectWimInspector));
        let validation = validator.validate(&iso).await.unwrap();
        assert_eq!(validation.edition_name, "Windows 11 Home");
    }

    #[tokio::test]
    async fn missing_install_image_unmounts_anyway() {
        let mount = tempfile::tempdir().unwrap(); // empty: no sources/
        let workdir = tempfile::tempdir().unwrap();
        let iso = write_iso_stub(workdir.path());

        let attacher = Arc::new(FakeAttacher::new(mount.path().to_path_buf()));
        let validator = IsoValidator::new(attacher.clone(), Arc::new(DirectWimInspector));

        let err = validator.validate(&iso).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::IsoInvalid { .. }));
        assert_eq!(*attacher.detached.lock().unwrap(), 1, "unmounted after failure");
    }

    #[tokio::test]
    async fn corrupt_wim_unmounts_anyway() {
        let mount = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(mount.path().join("sources")).unwrap();
        std::fs::write(mount.path().join("sources/install.wim"), b"garbage").unwrap();

        let workdir = tempfile::tempdir().unwrap();
        let iso = write_iso_stub(workdir.path());

        let attacher = Arc::new(FakeAttacher::new(mount.path().to_path_buf()));
        let validator = IsoValidator::new(attacher.clone(), Arc::new(DirectWimInspector));

        let err = validator.validate(&iso).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::IsoMetadataParseFailed { .. }));
        assert_eq!(*attacher.detached.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_path_is_iso_invalid() {
        let attacher = Arc::new(FakeAttacher::new(PathBuf::from("/nonexistent")));
        let validator = IsoValidator::new(attacher.clone(), Arc::new(DirectWimInspector));

        let err = validator.validate(Path::new("/no/such/iso.iso")).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::IsoInvalid { .. }));
        assert_eq!(*attacher.attached.lock().unwrap(), 0, "never mounted");
    }

    #[tokio::test]
    async fn directory_path_is_iso_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let attacher = Arc::new(FakeAttacher::new(dir.path().to_path_buf()));
        let validator = IsoValidator::new(attacher, Arc::new(DirectWimInspector));

        let err = validator.validate(dir.path()).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::IsoInvalid { .. }));
    }
}
