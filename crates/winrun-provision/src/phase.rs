//! Provisioning phase machine: states, transitions, progress weights.
//!
//! The weights are the single source of truth for overall progress; the
//! coordinator and every UI consumer map through [`overall_progress`] so
//! they can never disagree.
//!
//! ```text
//! idle → validatingIso → creatingDisk → installingWindows
//!      → postInstallProvisioning → creatingSnapshot → complete
//!
//! any active phase → failed | cancelled
//! failed | cancelled → idle        (reset / rollback / retry)
//! complete → idle                  (reset)
//! ```

use serde::{Deserialize, Serialize};
use winrun_proto::messages::provision::GuestProvisionPhase;

/// States of the provisioning machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvisioningPhase {
    /// Nothing in progress.
    Idle,
    /// Checking the ISO and its Windows image metadata.
    ValidatingIso,
    /// Creating the sparse disk image.
    CreatingDisk,
    /// Installer VM is running Windows setup.
    InstallingWindows,
    /// In-guest setup service is installing drivers, the agent, and
    /// optimizations.
    PostInstallProvisioning,
    /// Taking the golden snapshot.
    CreatingSnapshot,
    /// Pipeline finished successfully.
    Complete,
    /// Pipeline failed; see the recorded error.
    Failed,
    /// Pipeline was cancelled.
    Cancelled,
}

impl ProvisioningPhase {
    /// The five working phases, in execution order.
    pub const ACTIVE_ORDER: [Self; 5] = [
        Self::ValidatingIso,
        Self::CreatingDisk,
        Self::InstallingWindows,
        Self::PostInstallProvisioning,
        Self::CreatingSnapshot,
    ];

    /// Whether this phase is one of the five working phases.
    #[must_use]
    pub fn is_active(self) -> bool {
        Self::ACTIVE_ORDER.contains(&self)
    }

    /// Whether the machine stopped here (successfully or not).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Progress weight of this phase within the overall pipeline.
    ///
    /// The active weights sum to exactly 1.0.
    #[must_use]
    pub fn weight(self) -> f64 {
        match self {
            Self::ValidatingIso => 0.02,
            Self::CreatingDisk => 0.03,
            Self::InstallingWindows => 0.60,
            Self::PostInstallProvisioning => 0.25,
            Self::CreatingSnapshot => 0.10,
            Self::Idle | Self::Complete | Self::Failed | Self::Cancelled => 0.0,
        }
    }
}

/// Whether `from → to` is in the valid-transition table.
#[must_use]
pub fn is_valid_transition(from: ProvisioningPhase, to: ProvisioningPhase) -> bool {
    use ProvisioningPhase as P;
    match (from, to) {
        (P::Idle, P::ValidatingIso)
        | (P::ValidatingIso, P::CreatingDisk)
        | (P::CreatingDisk, P::InstallingWindows)
        | (P::InstallingWindows, P::PostInstallProvisioning)
        | (P::PostInstallProvisioning, P::CreatingSnapshot)
        | (P::CreatingSnapshot, P::Complete)
        | (P::Failed | P::Cancelled | P::Complete, P::Idle) => true,
        // Any active phase may abort.
        (from, P::Failed | P::Cancelled) => from.is_active(),
        _ => false,
    }
}

/// Map a phase-local progress value into overall pipeline progress.
///
/// Sums the weights of all earlier active phases plus the weighted local
/// progress. Terminal states report their natural endpoints.
#[must_use]
pub fn overall_progress(phase: ProvisioningPhase, phase_progress: f64) -> f64 {
    match phase {
        ProvisioningPhase::Idle => 0.0,
        ProvisioningPhase::Complete => 1.0,
        ProvisioningPhase::Failed | ProvisioningPhase::Cancelled => 0.0,
        active => {
            let done: f64 = ProvisioningPhase::ACTIVE_ORDER
                .iter()
                .take_while(|p| **p != active)
                .map(|p| p.weight())
                .sum();
            done + active.weight() * phase_progress.clamp(0.0, 1.0)
        },
    }
}

/// Span of post-install progress covered by one guest sub-phase.
///
/// Guest percent within the sub-phase interpolates across the span.
#[must_use]
pub fn guest_phase_span(phase: GuestProvisionPhase) -> (f64, f64) {
    match phase {
        GuestProvisionPhase::Drivers => (0.0, 0.25),
        GuestProvisionPhase::Agent => (0.25, 0.50),
        GuestProvisionPhase::Optimize => (0.50, 0.80),
        GuestProvisionPhase::Finalize => (0.80, 0.95),
        GuestProvisionPhase::Complete => (0.95, 1.0),
    }
}

/// Map one guest progress report into post-install phase progress.
#[must_use]
pub fn guest_progress(phase: GuestProvisionPhase, percent: f64) -> f64 {
    let (start, end) = guest_phase_span(phase);
    start + (end - start) * (percent / 100.0).clamp(0.0, 1.0)
}
