//! Typed IPC request/response surface and its framing.
//!
//! Frames are a little-endian u32 length followed by JSON, with camelCase
//! fields and a `type` tag — the same conventions as the guest wire
//! protocol, so client authors only learn one shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use winrun_proto::messages::session::{GuestSession, WindowsShortcut};
use winrun_provision::{ProvisioningPhase, SetupConfig};

use crate::error::IpcError;

/// Maximum IPC frame size (1 MiB); requests and responses are small.
pub const MAX_FRAME: usize = 1024 * 1024;

/// Requests clients may issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IpcRequest {
    /// Current VM status.
    VmStatus,
    /// Launch a Windows program.
    #[serde(rename_all = "camelCase")]
    LaunchProgram {
        /// Windows executable path.
        windows_path: String,
        /// Command-line arguments.
        #[serde(default)]
        arguments: Vec<String>,
        /// Working directory, when not the executable's.
        #[serde(default)]
        working_directory: Option<String>,
    },
    /// List guest application sessions.
    ListSessions,
    /// Close one guest session.
    #[serde(rename_all = "camelCase")]
    CloseSession {
        /// Session to close.
        session_id: String,
    },
    /// List detected Start-menu shortcuts.
    ListShortcuts,
    /// Create host launchers for the given shortcuts.
    #[serde(rename_all = "camelCase")]
    SyncShortcuts {
        /// Shortcut paths to sync.
        windows_paths: Vec<String>,
    },
    /// Start the provisioning pipeline; progress streams back before the
    /// final result frame.
    #[serde(rename_all = "camelCase")]
    StartProvisioning {
        /// Pipeline configuration.
        config: SetupConfig,
    },
    /// Cancel an active provisioning run.
    CancelProvisioning,
}

/// VM status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmStatusReport {
    /// Lifecycle string (`stopped`, `starting`, `running`, ...).
    pub status: String,
    /// Seconds since the VM booted; zero when stopped.
    pub uptime_seconds: u64,
    /// Open guest application sessions.
    pub active_sessions: u32,
}

/// Outcome of a shortcut sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutSyncReport {
    /// Launchers created.
    pub created: u32,
    /// Shortcuts already synced.
    pub skipped: u32,
    /// Shortcuts that failed.
    pub failed: u32,
    /// Host paths of all launchers, created and pre-existing.
    pub launcher_paths: Vec<String>,
}

/// One provisioning progress frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningUpdate {
    /// Overall progress, 0..=1.
    pub overall_progress: f64,
    /// Current phase.
    pub phase: ProvisioningPhase,
    /// Status line.
    pub message: String,
}

/// Final provisioning report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningReport {
    /// Whether the pipeline completed.
    pub success: bool,
    /// Terminal phase.
    pub final_phase: ProvisioningPhase,
    /// Run duration in seconds.
    pub duration_seconds: f64,
    /// Guest-reported Windows version, when known.
    pub windows_version: String,
    /// Terminating error description, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Responses the daemon sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IpcResponse {
    /// VM status reply.
    VmStatus(VmStatusReport),
    /// Generic success.
    Ack,
    /// Session list reply.
    #[serde(rename_all = "camelCase")]
    Sessions {
        /// Open sessions.
        sessions: Vec<GuestSession>,
    },
    /// Shortcut list reply.
    #[serde(rename_all = "camelCase")]
    Shortcuts {
        /// Detected shortcuts.
        shortcuts: Vec<WindowsShortcut>,
    },
    /// Shortcut sync reply.
    ShortcutSync(ShortcutSyncReport),
    /// Streamed provisioning progress (zero or more before the result).
    ProvisioningProgress(ProvisioningUpdate),
    /// Final provisioning result.
    ProvisioningResult(ProvisioningReport),
    /// Typed error.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Stable error kind string.
        kind: String,
        /// Human-readable description.
        message: String,
        /// Cooldown remainder for throttled clients, milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },
}

impl IpcResponse {
    /// Map an [`IpcError`] onto the wire error shape.
    #[must_use]
    pub fn from_error(error: &IpcError) -> Self {
        let (kind, retry_after_ms) = match error {
            IpcError::DaemonUnreachable(_) => ("daemonUnreachable", None),
            IpcError::ConnectionRejected(_) => ("connectionRejected", None),
            IpcError::Throttled { retry_after } => {
                ("throttled", Some(retry_after.as_millis() as u64))
            },
            IpcError::Unauthorized { .. } => ("unauthorized", None),
            IpcError::Protocol(_) => ("protocol", None),
            IpcError::Internal { .. } => ("internal", None),
        };
        Self::Error { kind: kind.to_string(), message: error.to_string(), retry_after_ms }
    }
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)
        .map_err(|e| IpcError::Internal { message: format!("encoding frame: {e}") })?;
    if body.len() > MAX_FRAME {
        return Err(IpcError::Protocol(format!("frame of {} bytes exceeds maximum", body.len())));
    }
    writer
        .write_all(&(body.len() as u32).to_le_bytes())
        .await
        .map_err(|e| IpcError::DaemonUnreachable(e.to_string()))?;
    writer.write_all(&body).await.map_err(|e| IpcError::DaemonUnreachable(e.to_string()))?;
    writer.flush().await.map_err(|e| IpcError::DaemonUnreachable(e.to_string()))
}

/// Read one length-prefixed JSON frame; `None` on clean EOF.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, IpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(IpcError::DaemonUnreachable(e.to_string())),
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME {
        return Err(IpcError::Protocol(format!("frame of {len} bytes exceeds maximum")));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| IpcError::DaemonUnreachable(e.to_string()))?;

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| IpcError::Protocol(format!("decoding frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let request = IpcRequest::CloseSession { session_id: "sess-1".to_string() };
        write_frame(&mut client, &request).await.unwrap();

        let received: Option<IpcRequest> = read_frame(&mut server).await.unwrap();
        assert_eq!(received, Some(request));
    }

    #[tokio::test]
    async fn eof_reads_as_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let received: Option<IpcRequest> = read_frame(&mut server).await.unwrap();
        assert_eq!(received, None);
    }

    #[test]
    fn requests_use_type_tags() {
        let json = serde_json::to_value(&IpcRequest::ListSessions).unwrap();
        assert_eq!(json["type"], "listSessions");

        let json = serde_json::to_value(&IpcRequest::LaunchProgram {
            windows_path: "C:\\x.exe".to_string(),
            arguments: vec![],
            working_directory: None,
        })
        .unwrap();
        assert_eq!(json["type"], "launchProgram");
        assert_eq!(json["windowsPath"], "C:\\x.exe");
    }

    #[test]
    fn throttled_error_carries_retry_after() {
        let response =
            IpcResponse::from_error(&IpcError::Throttled {
                retry_after: std::time::Duration::from_millis(1500),
            });
        match response {
            IpcResponse::Error { kind, retry_after_ms, .. } => {
                assert_eq!(kind, "throttled");
                assert_eq!(retry_after_ms, Some(1500));
            },
            other => panic!("unexpected: {other:?}"),
        }
    }
}
