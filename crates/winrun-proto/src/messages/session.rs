//! Session, shortcut, launch, and lifecycle payloads.

use serde::{Deserialize, Serialize};

use crate::version::ProtocolVersion;

/// Host request to launch a Windows program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchProgram {
    /// Correlation id echoed in the Ack.
    pub message_id: u32,
    /// Windows path of the executable (e.g. `C:\\Windows\\notepad.exe`).
    pub windows_path: String,
    /// Command-line arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    /// Working directory; the executable's directory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// Host request for the guest's open application sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessions {
    /// Correlation id echoed in the SessionList reply.
    pub message_id: u32,
}

/// Host request to close one guest session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSession {
    /// Correlation id echoed in the Ack.
    pub message_id: u32,
    /// Session to close, from a previous [`SessionList`].
    pub session_id: String,
}

/// Host request for detected Start-menu shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListShortcuts {
    /// Correlation id echoed in the ShortcutList reply.
    pub message_id: u32,
}

/// Host request for a clean guest shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shutdown {
    /// Correlation id echoed in the Ack.
    pub message_id: u32,
    /// Grace period before the guest force-terminates remaining processes.
    pub timeout_ms: u32,
}

/// Host request for an icon bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestIcon {
    /// Correlation id echoed in the IconData reply.
    pub message_id: u32,
    /// Windows path of the shortcut or executable.
    pub path: String,
    /// Preferred square size in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_px: Option<u32>,
}

/// One running application session inside the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSession {
    /// Stable session identifier.
    pub session_id: String,
    /// Executable path that was launched.
    pub executable_path: String,
    /// Process id inside the guest.
    pub process_id: u32,
    /// Window ids owned by this session.
    #[serde(default)]
    pub window_ids: Vec<u64>,
    /// Seconds since the session started.
    pub uptime_seconds: u64,
}

/// Reply to [`ListSessions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionList {
    /// Correlation id of the request; absent when unsolicited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u32>,
    /// Open sessions.
    pub sessions: Vec<GuestSession>,
}

/// One Start-menu shortcut found by the guest agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowsShortcut {
    /// Display name.
    pub name: String,
    /// Path of the `.lnk` file.
    pub windows_path: String,
    /// Resolved target executable, when the agent could resolve it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    /// Icon source path, when present in the shortcut.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
}

/// Reply to [`ListShortcuts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutList {
    /// Correlation id of the request; absent when unsolicited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u32>,
    /// Detected shortcuts.
    pub shortcuts: Vec<WindowsShortcut>,
}

/// Unsolicited notification that a new shortcut appeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutDetected {
    /// The shortcut that appeared.
    #[serde(flatten)]
    pub shortcut: WindowsShortcut,
}

/// Guest handshake message carrying capabilities and versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityFlags {
    /// Capability bitfield; see the `CAP_*` constants.
    pub capabilities: u32,
    /// Packed protocol version.
    pub protocol_version: ProtocolVersion,
    /// Agent build version string.
    pub agent_version: String,
    /// Guest OS version string.
    pub os_version: String,
}

/// Guest tracks individual windows.
pub const CAP_WINDOW_TRACKING: u32 = 0x01;
/// Guest captures via desktop duplication.
pub const CAP_DESKTOP_DUPLICATION: u32 = 0x02;
/// Guest syncs clipboard contents.
pub const CAP_CLIPBOARD_SYNC: u32 = 0x04;
/// Guest accepts drag-and-drop.
pub const CAP_DRAG_DROP: u32 = 0x08;
/// Guest extracts icons.
pub const CAP_ICON_EXTRACTION: u32 = 0x10;
/// Guest detects Start-menu shortcuts.
pub const CAP_SHORTCUT_DETECTION: u32 = 0x20;
/// Guest reports per-monitor DPI.
pub const CAP_HIGH_DPI: u32 = 0x40;
/// Guest handles multiple monitors.
pub const CAP_MULTI_MONITOR: u32 = 0x80;

/// Periodic guest liveness signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Seconds since the agent started.
    #[serde(default)]
    pub uptime_seconds: u64,
}

/// Guest resource usage report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReport {
    /// Guest CPU utilization, 0–100.
    pub cpu_percent: f64,
    /// Guest memory in use, MiB.
    pub memory_used_mb: u64,
    /// Disk space in use on the system volume, bytes.
    pub disk_usage_bytes: u64,
    /// Number of tracked windows.
    pub window_count: u32,
}

/// Guest-reported error outside any request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestError {
    /// Correlation id when the error answers a request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u32>,
    /// Numeric error code.
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

/// Generic acknowledgement for host→guest requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// Correlation id of the request being acknowledged.
    pub message_id: u32,
    /// Whether the request succeeded.
    pub success: bool,
    /// Guest error code when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
    /// Guest error description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Ack {
    /// Successful acknowledgement of `message_id`.
    #[must_use]
    pub fn ok(message_id: u32) -> Self {
        Self { message_id, success: true, error_code: None, error_message: None }
    }

    /// Failed acknowledgement with guest error detail.
    #[must_use]
    pub fn failed(message_id: u32, code: u32, message: impl Into<String>) -> Self {
        Self {
            message_id,
            success: false,
            error_code: Some(code),
            error_message: Some(message.into()),
        }
    }
}
