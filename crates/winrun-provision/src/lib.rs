//! Provisioning pipeline for a fresh WinRun Windows VM.
//!
//! Turns a Windows installer ISO into a provisioned, snapshotted disk
//! image: validate the ISO (mount, locate the install image, classify
//! edition/architecture), create a sparse disk, run Windows setup in the
//! installer VM, wait out the guest's post-install provisioning reports,
//! and take the golden snapshot the fast-boot path starts from.
//!
//! External collaborators are traits: the image-attach tool
//! ([`attach::ImageAttacher`]), the WIM inspector ([`iso::WimInspector`]),
//! the hypervisor façade ([`vm::VmFacade`]), and the guest event stream
//! ([`guest::GuestEventSource`]). Everything else is in-crate and
//! deterministic under test.

pub mod attach;
pub mod config;
pub mod coordinator;
pub mod disk;
pub mod error;
pub mod failure;
pub mod guest;
pub mod iso;
pub mod phase;
pub mod vm;

pub use attach::{HdiutilAttacher, ImageAttacher, MountHandle};
pub use config::{InstallerVmSpec, SetupConfig, StorageDevice};
pub use coordinator::{
    CoordinatorConfig, ProvisioningCoordinator, ProvisioningDelegate, ProvisioningResult,
    ProvisioningState, RollbackResult,
};
pub use disk::DiskCreationResult;
pub use error::ProvisioningError;
pub use failure::{SetupFailureContext, SuggestedAction};
pub use guest::{GuestEvent, GuestEventSource, guest_event_channel};
pub use iso::{IsoValidation, IsoValidator, ValidationWarning, WarningSeverity};
pub use phase::ProvisioningPhase;
pub use vm::{GOLDEN_SNAPSHOT_NAME, VmFacade};
