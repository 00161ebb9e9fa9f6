//! User-facing failure context.
//!
//! Maps `{failed phase, error}` onto a human summary, a technical detail
//! string, and the set of suggested next actions the UI renders as buttons.

use serde::{Deserialize, Serialize};

use crate::error::ProvisioningError;
use crate::phase::ProvisioningPhase;

/// Actions the UI can offer after a provisioning failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuggestedAction {
    /// Run provisioning again with the same configuration.
    Retry,
    /// Pick a different installer ISO.
    ChooseDifferentIso,
    /// Free space on the host volume.
    FreeDiskSpace,
    /// Check network connectivity.
    CheckNetwork,
    /// Grant a missing permission (disk access, virtualization).
    GrantPermission,
    /// Revisit the setup configuration.
    ReviewConfig,
    /// Contact support with the technical detail.
    ContactSupport,
    /// Delete the partial disk image.
    Rollback,
}

/// Everything the UI needs to present one failure.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupFailureContext {
    /// Phase that was active when the failure occurred.
    pub failed_phase: ProvisioningPhase,
    /// The error itself.
    pub error: ProvisioningError,
}

impl SetupFailureContext {
    /// Build the context for a failure in `failed_phase`.
    #[must_use]
    pub fn new(failed_phase: ProvisioningPhase, error: ProvisioningError) -> Self {
        Self { failed_phase, error }
    }

    /// One-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.error {
            ProvisioningError::Cancelled => "Setup was cancelled".to_string(),
            ProvisioningError::ConfigInvalid { .. } => {
                "The setup configuration is invalid".to_string()
            },
            ProvisioningError::IsoInvalid { .. }
            | ProvisioningError::IsoMetadataParseFailed { .. } => {
                "The selected ISO is not a usable Windows image".to_string()
            },
            ProvisioningError::IsoMountFailed { .. } => {
                "The ISO could not be opened".to_string()
            },
            ProvisioningError::IsoArchitectureUnsupported { architecture } => {
                format!("{architecture} Windows cannot run on this Mac")
            },
            ProvisioningError::DiskAlreadyExists { .. } => {
                "A Windows disk already exists".to_string()
            },
            ProvisioningError::DiskInvalidSize { .. } => {
                "The requested disk size is not supported".to_string()
            },
            ProvisioningError::DiskInsufficientSpace { .. } => {
                "Not enough free space for the Windows disk".to_string()
            },
            ProvisioningError::DiskCreationFailed { .. } => {
                "The Windows disk could not be created".to_string()
            },
            ProvisioningError::VmOperationTimeout { .. } => {
                "The virtual machine stopped responding".to_string()
            },
            ProvisioningError::VmSnapshotFailed { .. } => {
                "The golden snapshot could not be created".to_string()
            },
            ProvisioningError::VirtualizationUnavailable { .. } => {
                "Virtualization is not available on this Mac".to_string()
            },
            ProvisioningError::GuestProvisioningFailed { .. } => {
                "Windows setup failed inside the virtual machine".to_string()
            },
            ProvisioningError::Timeout => {
                "Windows setup did not finish in time".to_string()
            },
            ProvisioningError::InvalidTransition { .. } | ProvisioningError::InternalError { .. } => {
                "An internal error interrupted setup".to_string()
            },
        }
    }

    /// Technical detail string for logs and support.
    #[must_use]
    pub fn technical_detail(&self) -> String {
        format!("phase {:?}: {}", self.failed_phase, self.error)
    }

    /// Suggested next actions, most useful first.
    #[must_use]
    pub fn suggested_actions(&self) -> Vec<SuggestedAction> {
        use SuggestedAction as A;
        let mut actions = match &self.error {
            ProvisioningError::Cancelled => vec![A::Retry],
            ProvisioningError::ConfigInvalid { .. } | ProvisioningError::DiskInvalidSize { .. } => {
                vec![A::ReviewConfig, A::Retry]
            },
            ProvisioningError::IsoInvalid { .. }
            | ProvisioningError::IsoArchitectureUnsupported { .. }
            | ProvisioningError::IsoMetadataParseFailed { .. } => {
                vec![A::ChooseDifferentIso]
            },
            ProvisioningError::IsoMountFailed { .. } => {
                vec![A::ChooseDifferentIso, A::GrantPermission, A::Retry]
            },
            ProvisioningError::DiskAlreadyExists { .. } => vec![A::ReviewConfig, A::Rollback],
            ProvisioningError::DiskInsufficientSpace { .. } => vec![A::FreeDiskSpace, A::Retry],
            ProvisioningError::DiskCreationFailed { .. } => {
                vec![A::GrantPermission, A::FreeDiskSpace, A::Retry]
            },
            ProvisioningError::VmOperationTimeout { .. } | ProvisioningError::Timeout => {
                vec![A::Retry, A::CheckNetwork, A::ContactSupport]
            },
            ProvisioningError::VmSnapshotFailed { .. } => vec![A::Retry, A::FreeDiskSpace],
            ProvisioningError::VirtualizationUnavailable { .. } => {
                vec![A::GrantPermission, A::ContactSupport]
            },
            ProvisioningError::GuestProvisioningFailed { .. } => {
                vec![A::Retry, A::ChooseDifferentIso, A::ContactSupport]
            },
            ProvisioningError::InvalidTransition { .. } | ProvisioningError::InternalError { .. } => {
                vec![A::Retry, A::ContactSupport]
            },
        };

        if self.cleanup_recommended() && !actions.contains(&SuggestedAction::Rollback) {
            actions.push(SuggestedAction::Rollback);
        }
        actions
    }

    /// Whether deleting the partial disk image is recommended.
    ///
    /// True once the failure happened after disk creation began, because a
    /// partial or half-installed image is worthless.
    #[must_use]
    pub fn cleanup_recommended(&self) -> bool {
        matches!(
            self.failed_phase,
            ProvisioningPhase::CreatingDisk
                | ProvisioningPhase::InstallingWindows
                | ProvisioningPhase::PostInstallProvisioning
                | ProvisioningPhase::CreatingSnapshot
        ) && !matches!(self.error, ProvisioningError::DiskAlreadyExists { .. })
    }
}
