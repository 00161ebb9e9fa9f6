//! Guest-side provisioning progress payloads.
//!
//! During post-install provisioning the in-guest setup service reports its
//! sub-phases over the control channel. The host coordinator maps these onto
//! the overall progress scale.

use serde::{Deserialize, Serialize};

/// Guest provisioning sub-phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GuestProvisionPhase {
    /// Driver installation (virtio, GPU, input).
    Drivers,
    /// WinRun agent installation and service registration.
    Agent,
    /// OS debloat and service trimming.
    Optimize,
    /// Final reboots and cleanup.
    Finalize,
    /// Everything done; about to report completion.
    Complete,
}

/// Progress report for the current guest sub-phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionProgress {
    /// Sub-phase currently executing.
    pub phase: GuestProvisionPhase,
    /// Completion within the sub-phase, 0–100.
    pub percent: f64,
    /// Human-readable status line.
    pub message: String,
}

/// Error report from the guest setup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionError {
    /// Sub-phase that failed.
    pub phase: GuestProvisionPhase,
    /// Guest error code.
    pub error_code: u32,
    /// Human-readable description.
    pub message: String,
    /// True when the guest continues despite the error.
    pub is_recoverable: bool,
}

/// Final provisioning report from the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionComplete {
    /// Whether provisioning succeeded end to end.
    pub success: bool,
    /// Disk space used on the system volume, MiB.
    pub disk_usage_mb: u64,
    /// Installed Windows version string.
    pub windows_version: String,
    /// Installed agent version string.
    pub agent_version: String,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
